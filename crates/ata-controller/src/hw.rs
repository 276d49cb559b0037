use ata_dbdma::DbdmaRegisters;

use crate::request::TaskFile;
use crate::timing::TimingRegister;

pub const ATA_STATUS_BSY: u8 = 0x80;
pub const ATA_STATUS_DRDY: u8 = 0x40;
pub const ATA_STATUS_DF: u8 = 0x20;
pub const ATA_STATUS_DRQ: u8 = 0x08;
pub const ATA_STATUS_ERR: u8 = 0x01;

pub const ATA_ERROR_ABRT: u8 = 0x04;

pub const ATA_CTRL_NIEN: u8 = 0x02;
pub const ATA_CTRL_SRST: u8 = 0x04;

pub const ATA_DEVICE_OBS: u8 = 0xA0;
pub const ATA_DEVICE_LBA: u8 = 0x40;
pub const ATA_DEVICE_DEV1: u8 = 0x10;

pub const ATA_CMD_DEVICE_RESET: u8 = 0x08;
pub const ATA_CMD_READ_SECTORS: u8 = 0x20;
pub const ATA_CMD_READ_SECTORS_EXT: u8 = 0x24;
pub const ATA_CMD_READ_DMA_EXT: u8 = 0x25;
pub const ATA_CMD_WRITE_SECTORS: u8 = 0x30;
pub const ATA_CMD_WRITE_SECTORS_EXT: u8 = 0x34;
pub const ATA_CMD_WRITE_DMA_EXT: u8 = 0x35;
pub const ATA_CMD_READ_DMA: u8 = 0xC8;
pub const ATA_CMD_WRITE_DMA: u8 = 0xCA;
pub const ATA_CMD_FLUSH_CACHE: u8 = 0xE7;
pub const ATA_CMD_SET_FEATURES: u8 = 0xEF;

/// Bytes moved per device interrupt in PIO data phases.
pub const PIO_BLOCK_SIZE: usize = 512;

/// Kauai interrupt-cause bit for the ATA device line.
pub const KAUAI_CAUSE_ATA: u32 = 0x4000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    Device,
    Dma,
}

/// Register access to one ATA cell: the task file, the cell's timing registers and its DBDMA
/// channel.
pub trait AtaHardware: DbdmaRegisters {
    /// Read the status register. Acknowledges the device interrupt.
    fn read_status(&mut self) -> u8;
    /// Read the alternate status register. No side effects.
    fn read_alt_status(&mut self) -> u8;
    fn read_error(&mut self) -> u8;
    fn write_device_select(&mut self, value: u8);
    fn write_device_control(&mut self, value: u8);
    /// Load the task file and write the command register last.
    fn write_task_file(&mut self, tf: &TaskFile);
    fn read_data(&mut self, buf: &mut [u8]);
    fn write_data(&mut self, buf: &[u8]);
    fn write_timing(&mut self, timing: TimingRegister);
    fn set_interrupt_enabled(&mut self, source: InterruptSource, enabled: bool);

    /// Pending interrupt causes on cells with a cause register. Cells without one report 0.
    fn read_interrupt_cause(&mut self) -> u32 {
        0
    }

    fn clear_interrupt_cause(&mut self, _bits: u32) {}
}

/// Device register value addressing `unit`.
pub(crate) fn device_select(unit: u8) -> u8 {
    ATA_DEVICE_OBS | if unit == 1 { ATA_DEVICE_DEV1 } else { 0 }
}

/// Read alternate status until `done` holds, at most `limit` times.
pub(crate) fn poll_alt_status(
    hw: &mut dyn AtaHardware,
    limit: u32,
    mut done: impl FnMut(u8) -> bool,
) -> Option<u8> {
    (0..limit.max(1))
        .map(|_| hw.read_alt_status())
        .find(|&status| done(status))
}
