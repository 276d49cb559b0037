//! Interrupt-driven ATA bus controller for Mac-IO style cells with a DBDMA engine.
//!
//! The controller runs one command at a time on a single work context. It coordinates two
//! independent interrupt sources (the drive's INTRQ and the DBDMA channel), rebuilds the
//! descriptor chain for transfers larger than one chain, selects register timing per unit, and
//! unwinds cleanly when the bus is hot-removed.
//!
//! - [`AtaController`]: the command state machine and both interrupt entry points
//! - [`ControllerFamily`]: per-cell strategy ([`KeyLargo`], [`Kauai`])
//! - [`compute_timing`]: the timing table
//! - [`AtaHardware`]: the register seam a concrete cell (or an emulator) implements

#![forbid(unsafe_code)]

mod config;
mod controller;
mod error;
mod event;
mod family;
mod hw;
mod request;
mod timer;
mod timing;

pub use config::ControllerConfig;
pub use controller::AtaController;
pub use error::{AtaError, ConfigError, Result};
pub use event::BusEvent;
pub use family::{BusInfo, ControllerFamily, DeviceIrqAction, Kauai, KeyLargo, SupportedModes};
pub use hw::*;
pub use request::{CommandFlags, Completion, Direction, TaskFile, TransferRequest};
pub use timer::TimeoutTimer;
pub use timing::{
    apply_ultra_read_erratum, compute_timing, ClockClass, TimingConfig, TimingRegister,
    TimingRequest,
};

#[cfg(test)]
mod proptests;
