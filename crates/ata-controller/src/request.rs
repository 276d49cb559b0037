use std::fmt;

use ata_dbdma::{DmaDirection, DmaError, MemoryBus, MemoryRegion, PhysSegment, TransferWindow};
use bitflags::bitflags;

use crate::error::Result;
use crate::hw::{ATA_CMD_DEVICE_RESET, ATA_DEVICE_LBA};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandFlags: u32 {
        /// Data phase runs through the DBDMA channel.
        const DMA = 1 << 0;
        /// Packet device; resets target the unit rather than the whole bus.
        const ATAPI = 1 << 1;
        /// Request is a reset, not a command.
        const RESET = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    /// Device to memory.
    Read,
    /// Memory to device.
    Write,
}

/// Shadow of the ATA command block registers, issued verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFile {
    pub features: u16,
    pub sector_count: u16,
    pub lba: u64,
    pub device: u8,
    pub command: u8,
}

impl TaskFile {
    pub fn new(command: u8) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// LBA-addressed command covering `sectors` sectors.
    pub fn lba(command: u8, lba: u64, sectors: u16) -> Self {
        Self {
            sector_count: sectors,
            lba,
            device: ATA_DEVICE_LBA,
            command,
            ..Self::default()
        }
    }

    pub fn with_features(mut self, features: u16) -> Self {
        self.features = features;
        self
    }
}

/// What the completion callback receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub unit: u8,
    pub result: Result<()>,
    pub bytes_transferred: u64,
}

type CompletionFn = Box<dyn FnOnce(Completion)>;

/// One command for one unit.
///
/// Owned by the caller until handed to [`crate::AtaController::execute_command`], by the
/// controller until completion, and consumed by delivering its [`Completion`].
pub struct TransferRequest {
    unit: u8,
    task_file: TaskFile,
    flags: CommandFlags,
    direction: Direction,
    region: Option<MemoryRegion>,
    position: u64,
    byte_count: u64,
    actual: u64,
    timeout_ms: Option<u64>,
    completion: Option<CompletionFn>,
}

impl TransferRequest {
    fn new(unit: u8, task_file: TaskFile, flags: CommandFlags, direction: Direction) -> Self {
        Self {
            unit,
            task_file,
            flags,
            direction,
            region: None,
            position: 0,
            byte_count: 0,
            actual: 0,
            timeout_ms: None,
            completion: None,
        }
    }

    fn with_buffer(mut self, region: MemoryRegion, byte_count: u64) -> Self {
        self.region = Some(region);
        self.byte_count = byte_count;
        self
    }

    pub fn dma_read(unit: u8, task_file: TaskFile, region: MemoryRegion, byte_count: u64) -> Self {
        Self::new(unit, task_file, CommandFlags::DMA, Direction::Read)
            .with_buffer(region, byte_count)
    }

    pub fn dma_write(unit: u8, task_file: TaskFile, region: MemoryRegion, byte_count: u64) -> Self {
        Self::new(unit, task_file, CommandFlags::DMA, Direction::Write)
            .with_buffer(region, byte_count)
    }

    pub fn pio_read(unit: u8, task_file: TaskFile, region: MemoryRegion, byte_count: u64) -> Self {
        Self::new(unit, task_file, CommandFlags::empty(), Direction::Read)
            .with_buffer(region, byte_count)
    }

    pub fn pio_write(unit: u8, task_file: TaskFile, region: MemoryRegion, byte_count: u64) -> Self {
        Self::new(unit, task_file, CommandFlags::empty(), Direction::Write)
            .with_buffer(region, byte_count)
    }

    pub fn non_data(unit: u8, task_file: TaskFile) -> Self {
        Self::new(unit, task_file, CommandFlags::empty(), Direction::None)
    }

    /// DEVICE RESET of one packet device.
    pub fn device_reset(unit: u8) -> Self {
        Self::new(
            unit,
            TaskFile::new(ATA_CMD_DEVICE_RESET),
            CommandFlags::RESET | CommandFlags::ATAPI,
            Direction::None,
        )
    }

    /// Soft reset of the whole bus.
    pub fn bus_reset(unit: u8) -> Self {
        Self::new(unit, TaskFile::default(), CommandFlags::RESET, Direction::None)
    }

    pub fn atapi(mut self) -> Self {
        self.flags |= CommandFlags::ATAPI;
        self
    }

    /// Logical offset into the buffer where the transfer starts.
    pub fn at_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(Completion) + 'static) -> Self {
        self.completion = Some(Box::new(f));
        self
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn task_file(&self) -> &TaskFile {
        &self.task_file
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Bytes transferred so far.
    pub fn actual(&self) -> u64 {
        self.actual
    }

    pub(crate) fn request_timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub(crate) fn uses_dma(&self) -> bool {
        self.flags.contains(CommandFlags::DMA)
    }

    pub(crate) fn is_reset(&self) -> bool {
        self.flags.contains(CommandFlags::RESET)
    }

    pub(crate) fn is_atapi(&self) -> bool {
        self.flags.contains(CommandFlags::ATAPI)
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.byte_count.saturating_sub(self.actual)
    }

    pub(crate) fn add_transferred(&mut self, bytes: u64) {
        self.actual += bytes;
    }

    /// The rest of the request, as seen by the chain builder.
    pub(crate) fn window(&self) -> TransferWindow<'_> {
        TransferWindow {
            region: self.region.as_ref(),
            offset: self.position + self.actual,
            remaining: self.remaining(),
            direction: match self.direction {
                Direction::Write => DmaDirection::FromMemory,
                _ => DmaDirection::ToMemory,
            },
        }
    }

    /// Copy the next `buf.len()` bytes of the buffer out of memory.
    pub(crate) fn read_buffer(&self, mem: &mut dyn MemoryBus, buf: &mut [u8]) -> Result<()> {
        let mut offset = self.position + self.actual;
        let mut done = 0;
        while done < buf.len() {
            let seg = self.segment_at(offset)?;
            let n = (buf.len() - done).min(seg.len as usize);
            mem.read_physical(seg.addr, &mut buf[done..done + n]);
            done += n;
            offset += n as u64;
        }
        Ok(())
    }

    /// Copy `data` into the buffer at the current position.
    pub(crate) fn write_buffer(&self, mem: &mut dyn MemoryBus, data: &[u8]) -> Result<()> {
        let mut offset = self.position + self.actual;
        let mut done = 0;
        while done < data.len() {
            let seg = self.segment_at(offset)?;
            let n = (data.len() - done).min(seg.len as usize);
            mem.write_physical(seg.addr, &data[done..done + n]);
            done += n;
            offset += n as u64;
        }
        Ok(())
    }

    fn segment_at(&self, offset: u64) -> Result<PhysSegment> {
        let region = self.region.as_ref().ok_or(DmaError::NoBuffer)?;
        let seg = region.segment_at(offset).ok_or(DmaError::SizeMismatch {
            covered: region.len(),
            remaining: self.remaining(),
        })?;
        Ok(seg)
    }

    /// Deliver the completion. Consumes the request.
    pub(crate) fn complete(mut self, result: Result<()>) {
        let completion = Completion {
            unit: self.unit,
            result,
            bytes_transferred: self.actual,
        };
        if let Some(f) = self.completion.take() {
            f(completion);
        }
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("unit", &self.unit)
            .field("task_file", &self.task_file)
            .field("flags", &self.flags)
            .field("direction", &self.direction)
            .field("position", &self.position)
            .field("byte_count", &self.byte_count)
            .field("actual", &self.actual)
            .finish_non_exhaustive()
    }
}
