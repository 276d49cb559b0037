use ata_dbdma::MemoryBus;
use tracing::{debug, warn};

use super::AtaController;
use crate::error::{AtaError, Result};
use crate::event::BusEvent;
use crate::hw::{
    device_select, poll_alt_status, AtaHardware, InterruptSource, ATA_CMD_DEVICE_RESET,
    ATA_CTRL_NIEN, ATA_CTRL_SRST, ATA_STATUS_BSY,
};
use crate::request::TaskFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResetScope {
    /// DEVICE RESET of one packet device.
    Unit(u8),
    /// Soft reset through the device control register.
    Bus,
}

impl<H: AtaHardware> AtaController<H> {
    /// Externally requested reset.
    ///
    /// Resets only the current unit when the request in flight is an ATAPI device reset, and the
    /// whole bus otherwise. A data command interrupted by the reset completes `ResetInterrupted`.
    pub fn handle_bus_reset(&mut self, mem: &mut dyn MemoryBus) -> Result<()> {
        if !self.online {
            return Err(AtaError::Offline);
        }
        let result = self.reset_current();
        self.pump(mem);
        result
    }

    pub(super) fn reset_current(&mut self) -> Result<()> {
        let (scope, reset_request) = match self.current.as_ref() {
            Some(request) if request.is_reset() && request.is_atapi() => {
                (ResetScope::Unit(request.unit()), true)
            }
            Some(request) => (ResetScope::Bus, request.is_reset()),
            None => (ResetScope::Bus, false),
        };

        self.abort_dma();
        let result = self.reset_hardware(scope);
        if let Err(err) = &result {
            warn!(?scope, %err, "reset did not complete");
        }
        self.emit(match scope {
            ResetScope::Unit(unit) => BusEvent::UnitReset { unit },
            ResetScope::Bus => BusEvent::BusReset,
        });

        if self.current.is_some() {
            let completion = if reset_request {
                result.clone()
            } else {
                Err(AtaError::ResetInterrupted)
            };
            self.finish_current(completion);
        }
        result
    }

    pub(super) fn reset_hardware(&mut self, scope: ResetScope) -> Result<()> {
        debug!(?scope, "resetting");
        match scope {
            ResetScope::Unit(unit) => {
                self.family
                    .select_device(&mut self.hw, unit, self.config.poll_limit)?;
                let mut tf = TaskFile::new(ATA_CMD_DEVICE_RESET);
                tf.device = device_select(unit);
                self.hw.write_task_file(&tf);
            }
            ResetScope::Bus => {
                self.hw.write_device_control(ATA_CTRL_SRST | ATA_CTRL_NIEN);
                self.hw.write_device_control(0);
            }
        }
        poll_alt_status(&mut self.hw, self.config.poll_limit, |status| {
            status & ATA_STATUS_BSY == 0
        })
        .ok_or(AtaError::Timeout)?;
        // Reset completion may latch an interrupt; it carries nothing for us.
        let _ = self.hw.read_status();
        Ok(())
    }

    /// The bus is gone. Idempotent.
    ///
    /// Locks the queue, masks both interrupt sources, fails everything queued or in flight with
    /// `Offline`, and emits [`BusEvent::Terminated`] once.
    pub fn on_bus_removed(&mut self) {
        if self.terminated {
            return;
        }
        warn!(
            queued = self.queue.len(),
            in_flight = self.current.is_some(),
            "bus removed"
        );
        self.online = false;
        self.queue_locked = true;
        self.hw.set_interrupt_enabled(InterruptSource::Device, false);
        self.hw.set_interrupt_enabled(InterruptSource::Dma, false);
        self.timer.disarm();

        let queued: Vec<_> = self.queue.drain(..).collect();
        for request in queued {
            request.complete(Err(AtaError::Offline));
        }
        self.finish_current(Err(AtaError::Offline));

        self.terminated = true;
        self.emit(BusEvent::Terminated);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}
