//! Interrupt coordinator.
//!
//! The drive and the DBDMA channel interrupt independently and in either order. A DMA command
//! is done only once both have reported. If the device interrupt arrives while the final pass is
//! still running, its status is parked in [`Resync::Pending`] and serviced right after the DMA
//! completion is processed.

use ata_dbdma::{ChainScan, DmaError, DmaState, MemoryBus};
use tracing::{debug, trace, warn};

use super::AtaController;
use crate::error::{AtaError, Result};
use crate::family::DeviceIrqAction;
use crate::hw::{
    poll_alt_status, AtaHardware, ATA_STATUS_BSY, ATA_STATUS_DF, ATA_STATUS_DRQ, ATA_STATUS_ERR,
};
use crate::request::Direction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) enum Resync {
    #[default]
    Idle,
    /// Device status read ahead of the DMA completion.
    Pending { status: u8 },
}

impl<H: AtaHardware> AtaController<H> {
    /// Device (INTRQ) interrupt.
    pub fn handle_device_interrupt(&mut self, mem: &mut dyn MemoryBus) {
        if !self.online {
            // Still acknowledge, or a level-triggered line stays asserted.
            let _ = self.hw.read_status();
            return;
        }
        if self.family.acknowledge_device_interrupt(&mut self.hw) == DeviceIrqAction::Ignore {
            return;
        }
        if self.current.is_none() {
            let status = self.hw.read_status();
            debug!(status, "spurious device interrupt");
            return;
        }

        let alt = self.hw.read_alt_status();
        if alt & ATA_STATUS_BSY != 0 {
            trace!(alt, "device interrupt while busy");
            return;
        }
        if self.dma_irq_expected
            && alt & ATA_STATUS_ERR == 0
            && self.engine.state() == DmaState::Status
        {
            let status = self.hw.read_status();
            debug!(status, "device finished ahead of DMA completion");
            self.resync = Resync::Pending { status };
            return;
        }

        let status = self.hw.read_status();
        self.service_device_status(mem, status);
        self.pump(mem);
    }

    /// DBDMA channel interrupt.
    pub fn handle_dma_interrupt(&mut self, mem: &mut dyn MemoryBus) {
        if !self.online {
            return;
        }
        if !self.dma_irq_expected || self.current.is_none() {
            trace!("unexpected DMA interrupt");
            return;
        }

        match self.engine.scan_completion_chain(&mut self.hw, mem) {
            ChainScan::Ignore => {
                trace!(state = ?self.engine.state(), "DMA interrupt before chain finished");
                return;
            }
            ChainScan::Clean { bytes } => self.dma_pass_done(mem, bytes),
            ChainScan::Fault { bytes } => {
                if let Some(request) = self.current.as_mut() {
                    request.add_transferred(bytes);
                }
                warn!(bytes, "DMA transfer failed");
                self.abort_dma();
                self.finish_current(Err(AtaError::Dma(DmaError::HardwareError)));
            }
        }

        if let Resync::Pending { status } = self.resync {
            if !self.dma_irq_expected {
                self.resync = Resync::Idle;
                trace!(status, "servicing deferred device status");
                self.service_device_status(mem, status);
            }
        }
        self.pump(mem);
    }

    fn dma_pass_done(&mut self, mem: &mut dyn MemoryBus, bytes: u64) {
        let Some(request) = self.current.as_mut() else {
            return;
        };
        request.add_transferred(bytes);
        match self.engine.state() {
            DmaState::Active => {
                let next = self
                    .engine
                    .continue_transfer(&mut self.hw, mem, request.window());
                match next {
                    Ok(pass) => debug!(
                        bytes = pass.bytes,
                        entries = pass.data_entries,
                        final_pass = pass.final_pass,
                        "DMA chain rebuilt"
                    ),
                    Err(err) => {
                        warn!(%err, "DMA chain rebuild failed");
                        self.abort_dma();
                        self.finish_current(Err(err.into()));
                    }
                }
            }
            DmaState::Status => {
                let total = request.actual();
                self.engine.mark_complete();
                self.engine.stop_transfer(&mut self.hw);
                self.dma_irq_expected = false;
                debug!(total, "DMA complete");
            }
            state => warn!(?state, "DMA completion in unexpected state"),
        }
    }

    /// Act on a device status read in response to its interrupt.
    fn service_device_status(&mut self, mem: &mut dyn MemoryBus, status: u8) {
        let Some(request) = self.current.as_ref() else {
            return;
        };
        let expected = request.byte_count();
        let actual = request.actual();
        let uses_dma = request.uses_dma();
        let direction = request.direction();

        if status & (ATA_STATUS_ERR | ATA_STATUS_DF) != 0 {
            let error = self.hw.read_error();
            warn!(status, error, "device reported an error");
            self.abort_dma();
            self.finish_current(Err(AtaError::DeviceError { status, error }));
            return;
        }

        if uses_dma {
            if self.dma_irq_expected {
                warn!(expected, actual, "device finished before DMA did");
                self.abort_dma();
                self.finish_current(Err(AtaError::IncompleteTransfer { expected, actual }));
            } else {
                self.finish_current(Ok(()));
            }
            return;
        }

        let finished = match direction {
            Direction::None => Ok(true),
            Direction::Read => self.service_pio_in(mem, status),
            Direction::Write => self.service_pio_out(mem, status),
        };
        match finished {
            Ok(true) => self.finish_current(Ok(())),
            Ok(false) => {}
            Err(err) => self.finish_current(Err(err)),
        }
    }

    fn progress(&self) -> (u64, u64) {
        self.current
            .as_ref()
            .map_or((0, 0), |request| (request.byte_count(), request.actual()))
    }

    /// One PIO-in block per interrupt. Returns whether the command is finished.
    fn service_pio_in(&mut self, mem: &mut dyn MemoryBus, status: u8) -> Result<bool> {
        let (expected, actual) = self.progress();
        if status & ATA_STATUS_DRQ == 0 {
            if actual >= expected {
                return Ok(true);
            }
            return Err(AtaError::IncompleteTransfer { expected, actual });
        }
        self.pio_in_block(mem)?;
        let (expected, actual) = self.progress();
        if actual < expected {
            return Ok(false);
        }
        self.drain_after_pio()?;
        Ok(true)
    }

    /// The first block went out at dispatch; every interrupt asks for the next one until the
    /// final interrupt reports the command done.
    fn service_pio_out(&mut self, mem: &mut dyn MemoryBus, status: u8) -> Result<bool> {
        let (expected, actual) = self.progress();
        if actual >= expected {
            return Ok(true);
        }
        if status & ATA_STATUS_DRQ == 0 {
            return Err(AtaError::IncompleteTransfer { expected, actual });
        }
        self.pio_out_block(mem)?;
        Ok(false)
    }

    /// No interrupt follows the last PIO-in block; wait for the device to go idle instead.
    fn drain_after_pio(&mut self) -> Result<()> {
        let status = poll_alt_status(&mut self.hw, self.config.poll_limit, |status| {
            status & ATA_STATUS_BSY == 0
        })
        .ok_or(AtaError::Timeout)?;
        let _ = self.hw.read_status();
        if status & (ATA_STATUS_ERR | ATA_STATUS_DF) != 0 {
            let error = self.hw.read_error();
            return Err(AtaError::DeviceError { status, error });
        }
        Ok(())
    }
}
