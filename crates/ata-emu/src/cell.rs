use ata_controller::{
    AtaHardware, InterruptSource, TaskFile, TimingRegister, ATA_CTRL_NIEN, ATA_CTRL_SRST,
    ATA_DEVICE_DEV1, KAUAI_CAUSE_ATA,
};
use ata_dbdma::{ChannelStatus, DbdmaRegisters, MemoryBus};
use tracing::{debug, trace};

use crate::channel::{ChannelRun, DbdmaChannel, DmaPort, NullPort};
use crate::drive::EmulatedDrive;

/// Value read from an empty or detached bus.
const FLOATING: u8 = 0xFF;

/// Register-level model of one Mac-IO ATA cell: two drive positions, the DBDMA channel and the
/// timing register.
#[derive(Debug, Default)]
pub struct EmulatedCell {
    drives: [Option<EmulatedDrive>; 2],
    selected: usize,
    channel: DbdmaChannel,
    device_control: u8,
    timing_writes: Vec<TimingRegister>,
    device_irq_enabled: bool,
    dma_irq_enabled: bool,

    has_cause_register: bool,
    foreign_cause: u32,
    removed: bool,
}

impl EmulatedCell {
    /// A KeyLargo-style cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// A Kauai-style cell, with an interrupt-cause register shared with other functions.
    pub fn kauai() -> Self {
        Self {
            has_cause_register: true,
            ..Self::default()
        }
    }

    pub fn attach_drive(&mut self, unit: u8, drive: EmulatedDrive) {
        self.drives[usize::from(unit & 1)] = Some(drive);
    }

    pub fn with_drive(mut self, unit: u8, drive: EmulatedDrive) -> Self {
        self.attach_drive(unit, drive);
        self
    }

    pub fn drive(&self, unit: u8) -> Option<&EmulatedDrive> {
        self.drives[usize::from(unit & 1)].as_ref()
    }

    pub fn drive_mut(&mut self, unit: u8) -> Option<&mut EmulatedDrive> {
        self.drives[usize::from(unit & 1)].as_mut()
    }

    pub fn channel(&self) -> &DbdmaChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut DbdmaChannel {
        &mut self.channel
    }

    /// Every value written to the timing register, oldest first.
    pub fn timing_writes(&self) -> &[TimingRegister] {
        &self.timing_writes
    }

    pub fn interrupts_enabled(&self, source: InterruptSource) -> bool {
        match source {
            InterruptSource::Device => self.device_irq_enabled,
            InterruptSource::Dma => self.dma_irq_enabled,
        }
    }

    /// Let the channel execute whatever chain it has been given, with the selected drive on the
    /// other end.
    pub fn run_dma(&mut self, mem: &mut dyn MemoryBus) -> ChannelRun {
        let run = match self.drives[self.selected].as_mut() {
            Some(drive) => self.channel.run(mem, drive as &mut dyn DmaPort),
            None => self.channel.run(mem, &mut NullPort),
        };
        trace!(?run, "DBDMA run");
        run
    }

    /// DMA interrupt line, consumed.
    pub fn take_dma_irq(&mut self) -> bool {
        self.dma_irq_enabled && self.channel.take_irq()
    }

    /// INTRQ of the selected drive, gated by nIEN and the cell's enable.
    pub fn device_irq_pending(&self) -> bool {
        self.device_irq_enabled
            && self.device_control & ATA_CTRL_NIEN == 0
            && self.selected_drive().is_some_and(EmulatedDrive::irq_pending)
    }

    /// Another function sharing the Kauai cause register raised its interrupt.
    pub fn raise_foreign_cause(&mut self, bits: u32) {
        self.foreign_cause |= bits & !KAUAI_CAUSE_ATA;
    }

    /// Detach the cell. Registers float from here on.
    pub fn remove(&mut self) {
        debug!("ATA cell removed");
        self.removed = true;
    }

    fn selected_drive(&self) -> Option<&EmulatedDrive> {
        self.drives[self.selected].as_ref()
    }

    fn selected_drive_mut(&mut self) -> Option<&mut EmulatedDrive> {
        if self.removed {
            return None;
        }
        self.drives[self.selected].as_mut()
    }

    fn select(&mut self, device: u8) {
        self.selected = usize::from(device & ATA_DEVICE_DEV1 != 0);
    }
}

impl DbdmaRegisters for EmulatedCell {
    fn write_control(&mut self, mask: ChannelStatus, value: ChannelStatus) {
        if self.removed {
            return;
        }
        let was_running = self.channel.status().contains(ChannelStatus::RUN);
        self.channel.write_control(mask, value);
        if was_running && !self.channel.status().contains(ChannelStatus::RUN) {
            if let Some(drive) = self.selected_drive_mut() {
                drive.abort_dma();
            }
        }
    }

    fn read_channel_status(&mut self) -> ChannelStatus {
        if self.removed {
            return ChannelStatus::all();
        }
        self.channel.status()
    }

    fn write_command_ptr(&mut self, paddr: u32) {
        if !self.removed {
            self.channel.write_command_ptr(paddr);
        }
    }
}

impl AtaHardware for EmulatedCell {
    fn read_status(&mut self) -> u8 {
        self.selected_drive_mut()
            .map_or(FLOATING, EmulatedDrive::read_status)
    }

    fn read_alt_status(&mut self) -> u8 {
        self.selected_drive_mut()
            .map_or(FLOATING, |drive| drive.read_alt_status())
    }

    fn read_error(&mut self) -> u8 {
        self.selected_drive_mut()
            .map_or(FLOATING, |drive| drive.read_error())
    }

    fn write_device_select(&mut self, value: u8) {
        if !self.removed {
            self.select(value);
        }
    }

    fn write_device_control(&mut self, value: u8) {
        if self.removed {
            return;
        }
        let rising_reset = value & ATA_CTRL_SRST != 0 && self.device_control & ATA_CTRL_SRST == 0;
        self.device_control = value;
        if rising_reset {
            for drive in self.drives.iter_mut().flatten() {
                drive.soft_reset();
            }
        }
    }

    fn write_task_file(&mut self, tf: &TaskFile) {
        if self.removed {
            return;
        }
        self.select(tf.device);
        if let Some(drive) = self.selected_drive_mut() {
            drive.execute(tf);
        }
    }

    fn read_data(&mut self, buf: &mut [u8]) {
        match self.selected_drive_mut() {
            Some(drive) => drive.read_data(buf),
            None => buf.fill(FLOATING),
        }
    }

    fn write_data(&mut self, buf: &[u8]) {
        if let Some(drive) = self.selected_drive_mut() {
            drive.write_data(buf);
        }
    }

    fn write_timing(&mut self, timing: TimingRegister) {
        if !self.removed {
            self.timing_writes.push(timing);
        }
    }

    fn set_interrupt_enabled(&mut self, source: InterruptSource, enabled: bool) {
        match source {
            InterruptSource::Device => self.device_irq_enabled = enabled,
            InterruptSource::Dma => self.dma_irq_enabled = enabled,
        }
    }

    fn read_interrupt_cause(&mut self) -> u32 {
        if !self.has_cause_register || self.removed {
            return 0;
        }
        let ata = self
            .selected_drive()
            .is_some_and(EmulatedDrive::irq_pending);
        self.foreign_cause | if ata { KAUAI_CAUSE_ATA } else { 0 }
    }

    fn clear_interrupt_cause(&mut self, bits: u32) {
        // The ATA bit follows INTRQ and only drops once status is read.
        self.foreign_cause &= !bits;
    }
}
