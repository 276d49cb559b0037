use ata_controller::{
    TaskFile, ATA_CMD_DEVICE_RESET, ATA_CMD_FLUSH_CACHE, ATA_CMD_READ_DMA, ATA_CMD_READ_DMA_EXT,
    ATA_CMD_READ_SECTORS, ATA_CMD_READ_SECTORS_EXT, ATA_CMD_SET_FEATURES, ATA_CMD_WRITE_DMA,
    ATA_CMD_WRITE_DMA_EXT, ATA_CMD_WRITE_SECTORS, ATA_CMD_WRITE_SECTORS_EXT, ATA_ERROR_ABRT,
    ATA_STATUS_BSY, ATA_STATUS_DRDY, ATA_STATUS_DRQ, ATA_STATUS_ERR, PIO_BLOCK_SIZE,
};
use tracing::{debug, trace};

use crate::channel::DmaPort;

pub const SECTOR_SIZE: usize = 512;

pub const ATA_ERROR_IDNF: u8 = 0x10;

/// SET FEATURES subcommand: set transfer mode from the sector count register.
const FEATURE_SET_TRANSFER_MODE: u16 = 0x03;

/// Diagnostic code left in the error register after a reset: no error.
const DIAGNOSTIC_OK: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataPhase {
    None,
    PioIn,
    PioOut,
    DmaIn,
    DmaOut,
}

/// A single ATA disk behind the task file, backed by an in-memory image.
#[derive(Debug)]
pub struct EmulatedDrive {
    media: Vec<u8>,

    status: u8,
    error: u8,
    irq: bool,

    phase: DataPhase,
    buffer: Vec<u8>,
    index: usize,
    target_lba: u64,

    transfer_mode: Option<u8>,
    pending_error: Option<u8>,
    hung: bool,
    commands: Vec<u8>,
}

impl EmulatedDrive {
    pub fn new(sectors: u64) -> Self {
        Self::with_media(vec![0; sectors as usize * SECTOR_SIZE])
    }

    /// Media length is rounded down to whole sectors.
    pub fn with_media(mut media: Vec<u8>) -> Self {
        media.truncate(media.len() / SECTOR_SIZE * SECTOR_SIZE);
        Self {
            media,
            status: ATA_STATUS_DRDY,
            error: DIAGNOSTIC_OK,
            irq: false,
            phase: DataPhase::None,
            buffer: Vec::new(),
            index: 0,
            target_lba: 0,
            transfer_mode: None,
            pending_error: None,
            hung: false,
            commands: Vec::new(),
        }
    }

    pub fn sectors(&self) -> u64 {
        (self.media.len() / SECTOR_SIZE) as u64
    }

    pub fn media(&self) -> &[u8] {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut [u8] {
        &mut self.media
    }

    /// Mode byte from the last SET FEATURES / set transfer mode.
    pub fn transfer_mode(&self) -> Option<u8> {
        self.transfer_mode
    }

    /// Command opcodes received, oldest first.
    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    pub fn irq_pending(&self) -> bool {
        self.irq
    }

    /// The next command fails with `error` in the error register.
    pub fn inject_error(&mut self, error: u8) {
        self.pending_error = Some(error);
    }

    /// The next command leaves the drive busy until a soft reset.
    pub fn inject_hang(&mut self) {
        self.hung = true;
    }

    pub fn in_dma_phase(&self) -> bool {
        matches!(self.phase, DataPhase::DmaIn | DataPhase::DmaOut)
    }

    pub fn read_status(&mut self) -> u8 {
        self.irq = false;
        self.status
    }

    pub fn read_alt_status(&self) -> u8 {
        self.status
    }

    pub fn read_error(&self) -> u8 {
        self.error
    }

    /// SRST. Abandons any command in progress.
    pub fn soft_reset(&mut self) {
        debug!("drive soft reset");
        self.reset_state();
    }

    fn reset_state(&mut self) {
        self.phase = DataPhase::None;
        self.buffer.clear();
        self.index = 0;
        self.status = ATA_STATUS_DRDY;
        self.error = DIAGNOSTIC_OK;
        self.irq = false;
        self.hung = false;
        self.pending_error = None;
    }

    /// Host stopped the DMA engine before the data phase finished.
    pub fn abort_dma(&mut self) {
        if self.in_dma_phase() {
            debug!(moved = self.index, len = self.buffer.len(), "DMA aborted by host");
            self.abort(ATA_ERROR_ABRT);
        }
    }

    fn abort(&mut self, error: u8) {
        self.phase = DataPhase::None;
        self.buffer.clear();
        self.index = 0;
        self.error = error;
        self.status = ATA_STATUS_DRDY | ATA_STATUS_ERR;
        self.irq = true;
    }

    fn complete(&mut self) {
        self.phase = DataPhase::None;
        self.buffer.clear();
        self.index = 0;
        self.error = 0;
        self.status = ATA_STATUS_DRDY;
        self.irq = true;
    }

    pub fn execute(&mut self, tf: &TaskFile) {
        trace!(command = tf.command, lba = tf.lba, count = tf.sector_count, "drive command");
        self.commands.push(tf.command);
        self.irq = false;

        if self.hung {
            self.status = ATA_STATUS_BSY;
            return;
        }
        if let Some(error) = self.pending_error.take() {
            self.abort(error);
            return;
        }

        match tf.command {
            ATA_CMD_READ_DMA | ATA_CMD_READ_DMA_EXT => self.begin_read(tf, DataPhase::DmaIn),
            ATA_CMD_WRITE_DMA | ATA_CMD_WRITE_DMA_EXT => self.begin_write(tf, DataPhase::DmaOut),
            ATA_CMD_READ_SECTORS | ATA_CMD_READ_SECTORS_EXT => {
                self.begin_read(tf, DataPhase::PioIn)
            }
            ATA_CMD_WRITE_SECTORS | ATA_CMD_WRITE_SECTORS_EXT => {
                self.begin_write(tf, DataPhase::PioOut)
            }
            ATA_CMD_SET_FEATURES if tf.features == FEATURE_SET_TRANSFER_MODE => {
                self.transfer_mode = Some(tf.sector_count as u8);
                self.complete();
            }
            ATA_CMD_FLUSH_CACHE => self.complete(),
            ATA_CMD_DEVICE_RESET => self.reset_state(),
            _ => self.abort(ATA_ERROR_ABRT),
        }
    }

    fn span(&self, tf: &TaskFile) -> Option<(u64, usize)> {
        let extended = matches!(
            tf.command,
            ATA_CMD_READ_DMA_EXT
                | ATA_CMD_WRITE_DMA_EXT
                | ATA_CMD_READ_SECTORS_EXT
                | ATA_CMD_WRITE_SECTORS_EXT
        );
        let count = match (tf.sector_count, extended) {
            (0, true) => 65536,
            (0, false) => 256,
            (n, true) => u64::from(n),
            (n, false) => u64::from(n & 0xFF),
        };
        let end = tf.lba.checked_add(count)?;
        (end <= self.sectors()).then_some((tf.lba, count as usize * SECTOR_SIZE))
    }

    fn begin_read(&mut self, tf: &TaskFile, phase: DataPhase) {
        let Some((lba, len)) = self.span(tf) else {
            self.abort(ATA_ERROR_IDNF);
            return;
        };
        let start = lba as usize * SECTOR_SIZE;
        self.buffer = self.media[start..start + len].to_vec();
        self.index = 0;
        self.target_lba = lba;
        self.phase = phase;
        self.status = ATA_STATUS_DRDY | ATA_STATUS_DRQ;
        // PIO-in: the first block is ready now.
        self.irq = phase == DataPhase::PioIn;
    }

    fn begin_write(&mut self, tf: &TaskFile, phase: DataPhase) {
        let Some((lba, len)) = self.span(tf) else {
            self.abort(ATA_ERROR_IDNF);
            return;
        };
        self.buffer = vec![0; len];
        self.index = 0;
        self.target_lba = lba;
        self.phase = phase;
        // No interrupt before the first PIO-out block.
        self.status = ATA_STATUS_DRDY | ATA_STATUS_DRQ;
    }

    fn commit(&mut self) {
        let start = self.target_lba as usize * SECTOR_SIZE;
        let end = start + self.buffer.len();
        self.media[start..end].copy_from_slice(&self.buffer);
        trace!(lba = self.target_lba, bytes = self.buffer.len(), "drive committed write");
    }

    /// PIO data register read.
    pub fn read_data(&mut self, buf: &mut [u8]) {
        if self.phase != DataPhase::PioIn {
            buf.fill(0);
            return;
        }
        let n = self.copy_out(buf);
        buf[n..].fill(0);
        if self.index >= self.buffer.len() {
            // No interrupt after the last block.
            self.phase = DataPhase::None;
            self.buffer.clear();
            self.index = 0;
            self.status = ATA_STATUS_DRDY;
        } else if self.index % PIO_BLOCK_SIZE == 0 {
            self.irq = true;
        }
    }

    /// PIO data register write.
    pub fn write_data(&mut self, buf: &[u8]) {
        if self.phase != DataPhase::PioOut {
            return;
        }
        self.copy_in(buf);
        if self.index >= self.buffer.len() {
            self.commit();
            self.complete();
        } else if self.index % PIO_BLOCK_SIZE == 0 {
            self.irq = true;
        }
    }

    fn copy_out(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.buffer.len() - self.index);
        buf[..n].copy_from_slice(&self.buffer[self.index..self.index + n]);
        self.index += n;
        n
    }

    fn copy_in(&mut self, buf: &[u8]) -> usize {
        let n = buf.len().min(self.buffer.len() - self.index);
        self.buffer[self.index..self.index + n].copy_from_slice(&buf[..n]);
        self.index += n;
        n
    }
}

impl DmaPort for EmulatedDrive {
    fn dma_in(&mut self, buf: &mut [u8]) -> usize {
        if self.phase != DataPhase::DmaIn {
            return 0;
        }
        let n = self.copy_out(buf);
        if self.index >= self.buffer.len() {
            self.complete();
        }
        n
    }

    fn dma_out(&mut self, buf: &[u8]) -> usize {
        if self.phase != DataPhase::DmaOut {
            return 0;
        }
        let n = self.copy_in(buf);
        if self.index >= self.buffer.len() {
            self.commit();
            self.complete();
        }
        n
    }
}
