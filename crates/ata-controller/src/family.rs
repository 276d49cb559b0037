//! Per-cell behavior layered over the generic controller.

use serde::Serialize;
use tracing::trace;

use crate::error::{AtaError, Result};
use crate::hw::{device_select, poll_alt_status, AtaHardware, ATA_STATUS_BSY, KAUAI_CAUSE_ATA};
use crate::request::Direction;
use crate::timing::{self, ClockClass, TimingConfig, TimingRegister, TimingRequest};

/// Verdict of a family on a raw device interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceIrqAction {
    Proceed,
    /// Not ours; leave all state alone.
    Ignore,
}

/// Mode bitmasks a cell can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupportedModes {
    pub pio: u8,
    pub dma: u8,
    pub ultra: u8,
}

impl SupportedModes {
    pub fn for_clock(clock: ClockClass) -> Self {
        Self {
            pio: (1 << (timing::MAX_PIO_MODE + 1)) - 1,
            dma: (1 << (timing::MAX_DMA_MODE + 1)) - 1,
            ultra: (1 << (clock.max_ultra_mode() + 1)) - 1,
        }
    }
}

/// Capabilities reported to probing logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusInfo {
    pub family: &'static str,
    pub units: u8,
    pub modes: SupportedModes,
    pub dma: bool,
    pub max_descriptor_bytes: u32,
    pub descriptors_per_chain: usize,
}

/// Strategy for one cell family. The controller owns exactly one and calls it at the points
/// where cells differ.
pub trait ControllerFamily {
    fn name(&self) -> &'static str;

    fn clock_class(&self) -> ClockClass;

    fn supported_modes(&self) -> SupportedModes {
        SupportedModes::for_clock(self.clock_class())
    }

    fn compute_timing(&self, request: &TimingRequest) -> Result<TimingConfig> {
        timing::compute_timing(self.clock_class(), request)
    }

    /// Register value to program right before issuing a command.
    fn timing_for_transfer(
        &self,
        config: &TimingConfig,
        _direction: Direction,
        _uses_dma: bool,
    ) -> TimingRegister {
        config.register
    }

    /// First look at a device interrupt, before any task-file register is touched.
    fn acknowledge_device_interrupt(&self, _hw: &mut dyn AtaHardware) -> DeviceIrqAction {
        DeviceIrqAction::Proceed
    }

    /// Point the task file at `unit` and wait for it to be ready for a command.
    fn select_device(&self, hw: &mut dyn AtaHardware, unit: u8, poll_limit: u32) -> Result<()> {
        select_unit(hw, unit, poll_limit)
    }
}

fn select_unit(hw: &mut dyn AtaHardware, unit: u8, poll_limit: u32) -> Result<()> {
    hw.write_device_select(device_select(unit));
    if poll_alt_status(hw, poll_limit, |status| status & ATA_STATUS_BSY == 0).is_none() {
        return Err(AtaError::Timeout);
    }
    // Drop any interrupt condition left over from the previous command.
    let stale = hw.read_status();
    trace!(unit, stale, "unit selected");
    Ok(())
}

/// 66 MHz cells.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyLargo;

impl ControllerFamily for KeyLargo {
    fn name(&self) -> &'static str {
        "keylargo-ata"
    }

    fn clock_class(&self) -> ClockClass {
        ClockClass::Mhz66
    }

    fn timing_for_transfer(
        &self,
        config: &TimingConfig,
        direction: Direction,
        uses_dma: bool,
    ) -> TimingRegister {
        match direction {
            Direction::Read if uses_dma => {
                timing::apply_ultra_read_erratum(self.clock_class(), config.register)
            }
            _ => config.register,
        }
    }
}

/// 100 MHz cells with an interrupt-cause register.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kauai;

impl ControllerFamily for Kauai {
    fn name(&self) -> &'static str {
        "kauai-ata"
    }

    fn clock_class(&self) -> ClockClass {
        ClockClass::Mhz100
    }

    fn acknowledge_device_interrupt(&self, hw: &mut dyn AtaHardware) -> DeviceIrqAction {
        let cause = hw.read_interrupt_cause();
        if cause & KAUAI_CAUSE_ATA == 0 {
            trace!(cause, "foreign interrupt cause");
            return DeviceIrqAction::Ignore;
        }
        hw.clear_interrupt_cause(KAUAI_CAUSE_ATA);
        DeviceIrqAction::Proceed
    }

    fn select_device(&self, hw: &mut dyn AtaHardware, unit: u8, poll_limit: u32) -> Result<()> {
        select_unit(hw, unit, poll_limit)?;
        hw.clear_interrupt_cause(KAUAI_CAUSE_ATA);
        Ok(())
    }
}
