//! Software model of a Mac-IO ATA cell for driving `ata-controller` without hardware.
//!
//! [`EmulatedCell`] implements the controller's register interface on top of:
//!
//! - [`DbdmaChannel`]: walks descriptor chains in physical memory and writes result words back
//! - [`EmulatedDrive`]: a task-file disk with PIO and DMA data phases over an in-memory image
//!
//! Nothing runs on its own. Tests call [`EmulatedCell::run_dma`] to let the channel make
//! progress and poll the interrupt lines to decide which controller handler to invoke. Faults
//! (dead channel, stalled chain, device error, hung drive, removal) are injected explicitly.

#![forbid(unsafe_code)]

mod cell;
mod channel;
mod drive;

pub use cell::EmulatedCell;
pub use channel::{ChannelRun, DbdmaChannel, DmaPort, NullPort};
pub use drive::{EmulatedDrive, ATA_ERROR_IDNF, SECTOR_SIZE};
