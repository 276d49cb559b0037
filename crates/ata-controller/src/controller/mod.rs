//! Command state machine.
//!
//! Every entry point (`execute_command`, both interrupt handlers, `tick`, mode-select, reset and
//! removal) runs on the caller's single work context and ends by dispatching the next queued
//! request if the bus is idle. Completions never dispatch on their own, so completion callbacks
//! cannot re-enter the controller.

mod interrupt;
mod lifecycle;

use std::collections::VecDeque;

use ata_dbdma::{DescriptorArena, DmaAllocator, DmaEngine, DmaState, MemoryBus};
use tracing::{debug, trace, warn};

use crate::config::ControllerConfig;
use crate::error::{AtaError, Result};
use crate::event::BusEvent;
use crate::family::{BusInfo, ControllerFamily};
use crate::hw::{
    device_select, poll_alt_status, AtaHardware, InterruptSource, ATA_STATUS_BSY,
    ATA_STATUS_DRQ, ATA_STATUS_ERR, PIO_BLOCK_SIZE,
};
use crate::request::{Direction, TransferRequest};
use crate::timer::TimeoutTimer;
use crate::timing::{TimingConfig, TimingRequest};

use interrupt::Resync;

type Listener = Box<dyn FnMut(&BusEvent)>;

pub struct AtaController<H: AtaHardware> {
    hw: H,
    family: Box<dyn ControllerFamily>,
    config: ControllerConfig,
    engine: DmaEngine,
    timings: Vec<TimingConfig>,

    current: Option<TransferRequest>,
    queue: VecDeque<TransferRequest>,
    queue_locked: bool,

    online: bool,
    terminated: bool,

    /// A DMA-complete interrupt is still owed for the current request.
    dma_irq_expected: bool,
    resync: Resync,

    timer: TimeoutTimer,
    now_ns: u64,
    listeners: Vec<Listener>,
}

impl<H: AtaHardware> AtaController<H> {
    /// Attach to a cell. Allocates the descriptor arena and programs PIO mode 0 timing for every
    /// unit.
    pub fn new(
        mut hw: H,
        family: Box<dyn ControllerFamily>,
        config: ControllerConfig,
        alloc: &mut dyn DmaAllocator,
    ) -> Result<Self> {
        config.validate()?;
        let default_timing = family.compute_timing(&TimingRequest::pio(0))?;
        let arena = DescriptorArena::allocate(alloc, config.descriptor_capacity)?;
        let engine = DmaEngine::new(arena, config.max_descriptor_bytes, config.poll_limit);

        hw.set_interrupt_enabled(InterruptSource::Device, true);
        hw.set_interrupt_enabled(InterruptSource::Dma, true);
        debug!(family = family.name(), units = config.units, "ATA controller attached");

        Ok(Self {
            hw,
            family,
            timings: vec![default_timing; usize::from(config.units)],
            config,
            engine,
            current: None,
            queue: VecDeque::new(),
            queue_locked: false,
            online: true,
            terminated: false,
            dma_irq_expected: false,
            resync: Resync::Idle,
            timer: TimeoutTimer::default(),
            now_ns: 0,
            listeners: Vec::new(),
        })
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn dma_state(&self) -> DmaState {
        self.engine.state()
    }

    /// DMA states visited by the most recent transfer.
    pub fn dma_history(&self) -> &[DmaState] {
        self.engine.history()
    }

    /// Unit of the request in flight.
    pub fn current_unit(&self) -> Option<u8> {
        self.current.as_ref().map(TransferRequest::unit)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn add_listener(&mut self, listener: impl FnMut(&BusEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn provide_bus_info(&self) -> BusInfo {
        BusInfo {
            family: self.family.name(),
            units: self.config.units,
            modes: self.family.supported_modes(),
            dma: true,
            max_descriptor_bytes: self.config.max_descriptor_bytes,
            descriptors_per_chain: self.engine.arena().data_capacity(),
        }
    }

    fn unit_index(&self, unit: u8) -> Result<usize> {
        if unit < self.config.units {
            Ok(usize::from(unit))
        } else {
            Err(AtaError::InvalidUnit(unit))
        }
    }

    /// Mode-select. On error nothing changes.
    pub fn select_config(&mut self, unit: u8, request: &TimingRequest) -> Result<TimingConfig> {
        if !self.online {
            return Err(AtaError::Offline);
        }
        let index = self.unit_index(unit)?;
        if self.current_unit() == Some(unit) {
            return Err(AtaError::Busy);
        }
        let config = self.family.compute_timing(request)?;
        debug!(unit, register = ?config.register, "timing selected");
        self.timings[index] = config;
        Ok(config)
    }

    pub fn get_config(&self, unit: u8) -> Result<TimingConfig> {
        if !self.online {
            return Err(AtaError::Offline);
        }
        Ok(self.timings[self.unit_index(unit)?])
    }

    /// Queue a request and start it if the bus is idle.
    ///
    /// A request refused here still gets its completion, with the same error.
    pub fn execute_command(
        &mut self,
        mem: &mut dyn MemoryBus,
        request: TransferRequest,
    ) -> Result<()> {
        if !self.online || self.queue_locked {
            debug!(unit = request.unit(), "bus offline, refusing command");
            request.complete(Err(AtaError::Offline));
            return Err(AtaError::Offline);
        }
        let unit = request.unit();
        if let Err(err) = self.unit_index(unit) {
            request.complete(Err(err.clone()));
            return Err(err);
        }
        trace!(?request, "command queued");
        self.queue.push_back(request);
        self.pump(mem);
        Ok(())
    }

    /// Advance time. Expires the command timer.
    pub fn tick(&mut self, mem: &mut dyn MemoryBus, now_ns: u64) {
        self.now_ns = now_ns;
        if !self.online {
            return;
        }
        if self.current.is_some() && self.timer.expired(now_ns) {
            warn!(unit = ?self.current_unit(), "command timed out");
            self.abort_dma();
            if let Err(err) = self.reset_hardware(lifecycle::ResetScope::Bus) {
                warn!(%err, "bus reset after timeout failed");
            }
            self.emit(BusEvent::BusReset);
            self.finish_current(Err(AtaError::Timeout));
        }
        self.pump(mem);
    }

    /// Whether a wait started before `now_ns` should give up. Always true once offline.
    pub fn timed_out(&self, now_ns: u64) -> bool {
        !self.online || self.timer.expired(now_ns)
    }

    /// Release the descriptor arena and hand the hardware back. Outstanding work completes with
    /// `Offline`.
    pub fn teardown(mut self, alloc: &mut dyn DmaAllocator) -> H {
        self.on_bus_removed();
        let Self { hw, engine, .. } = self;
        engine.into_arena().release(alloc);
        hw
    }

    fn emit(&mut self, event: BusEvent) {
        debug!(?event, "bus event");
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    fn pump(&mut self, mem: &mut dyn MemoryBus) {
        while self.online && !self.queue_locked && self.current.is_none() {
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            let is_reset = request.is_reset();
            self.current = Some(request);
            if is_reset {
                // Completes the request itself.
                if let Err(err) = self.reset_current() {
                    debug!(%err, "reset request failed");
                }
                continue;
            }
            if let Err(err) = self.start_current(mem) {
                debug!(%err, "command failed to start");
                self.finish_current(Err(err));
            }
        }
    }

    fn start_current(&mut self, mem: &mut dyn MemoryBus) -> Result<()> {
        let Some(request) = self.current.as_ref() else {
            return Ok(());
        };
        let unit = request.unit();
        let index = self.unit_index(unit)?;

        self.family
            .select_device(&mut self.hw, unit, self.config.poll_limit)?;
        let timing = self
            .family
            .timing_for_transfer(&self.timings[index], request.direction(), request.uses_dma());
        self.hw.write_timing(timing);

        if request.uses_dma() {
            let pass = self
                .engine
                .start_transfer(&mut self.hw, mem, request.window())?;
            self.dma_irq_expected = true;
            debug!(
                unit,
                bytes = pass.bytes,
                entries = pass.data_entries,
                final_pass = pass.final_pass,
                "DMA armed"
            );
        }

        let mut tf = *request.task_file();
        tf.device |= device_select(unit);
        self.hw.write_task_file(&tf);

        let timeout_ms = request
            .request_timeout_ms()
            .unwrap_or(self.config.command_timeout_ms);
        let pio_out = !request.uses_dma() && request.direction() == Direction::Write;
        self.timer.arm(self.now_ns, timeout_ms);

        if pio_out {
            let ready = poll_alt_status(&mut self.hw, self.config.poll_limit, |status| {
                status & ATA_STATUS_BSY == 0 && status & (ATA_STATUS_DRQ | ATA_STATUS_ERR) != 0
            });
            match ready {
                Some(status) if status & ATA_STATUS_DRQ != 0 => self.pio_out_block(mem)?,
                // Device refused the command; its interrupt reports why.
                Some(_) => {}
                None => return Err(AtaError::Timeout),
            }
        }
        Ok(())
    }

    /// Feed the next PIO block to the device.
    fn pio_out_block(&mut self, mem: &mut dyn MemoryBus) -> Result<()> {
        let Some(request) = self.current.as_mut() else {
            return Ok(());
        };
        let len = request.remaining().min(PIO_BLOCK_SIZE as u64) as usize;
        let mut block = [0u8; PIO_BLOCK_SIZE];
        request.read_buffer(mem, &mut block[..len])?;
        self.hw.write_data(&block[..len]);
        request.add_transferred(len as u64);
        trace!(bytes = len, total = request.actual(), "PIO block out");
        Ok(())
    }

    /// Take the next PIO block from the device.
    fn pio_in_block(&mut self, mem: &mut dyn MemoryBus) -> Result<()> {
        let Some(request) = self.current.as_mut() else {
            return Ok(());
        };
        let len = request.remaining().min(PIO_BLOCK_SIZE as u64) as usize;
        let mut block = [0u8; PIO_BLOCK_SIZE];
        self.hw.read_data(&mut block[..len]);
        request.write_buffer(mem, &block[..len])?;
        request.add_transferred(len as u64);
        trace!(bytes = len, total = request.actual(), "PIO block in");
        Ok(())
    }

    /// Stop the channel and record the failure if DMA is still owed.
    fn abort_dma(&mut self) {
        if self.dma_irq_expected {
            self.engine.stop_transfer(&mut self.hw);
            self.engine.mark_error();
            self.dma_irq_expected = false;
        }
    }

    /// Release the current request with `result`. Never dispatches.
    fn finish_current(&mut self, result: Result<()>) {
        let Some(request) = self.current.take() else {
            return;
        };
        self.timer.disarm();
        self.abort_dma();
        self.resync = Resync::Idle;
        self.engine.finish();
        debug!(
            unit = request.unit(),
            ok = result.is_ok(),
            bytes = request.actual(),
            "command complete"
        );
        request.complete(result);
    }
}
