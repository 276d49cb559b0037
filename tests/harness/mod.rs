#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use ata_controller::{
    AtaController, BusEvent, Completion, ControllerConfig, ControllerFamily, Kauai, KeyLargo,
    TransferRequest,
};
use ata_dbdma::{MemoryBus, MemoryRegion, PhysSegment, PhysicalMemory};
use ata_emu::{ChannelRun, EmulatedCell, EmulatedDrive, SECTOR_SIZE};

pub const MEMORY_SIZE: usize = 2 * 1024 * 1024;
pub const DISK_SECTORS: u64 = 2048;

/// Which interrupt the bench delivers first when both lines are up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    DeviceFirst,
    DmaFirst,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Disk image whose every byte depends on its offset.
pub fn patterned_disk(sectors: u64) -> EmulatedDrive {
    let media = (0..sectors as usize * SECTOR_SIZE)
        .map(|i| (i / SECTOR_SIZE) as u8 ^ (i % 251) as u8)
        .collect();
    EmulatedDrive::with_media(media)
}

/// `count` buffers of `len` bytes, each followed by a gap of the same size.
pub fn scattered(base: u64, count: usize, len: u64) -> MemoryRegion {
    MemoryRegion::new((0..count as u64).map(|i| PhysSegment {
        addr: base + i * len * 2,
        len,
    }))
}

pub fn read_region(mem: &mut PhysicalMemory, region: &MemoryRegion) -> Vec<u8> {
    let mut out = Vec::with_capacity(region.len() as usize);
    for seg in region.segments() {
        let mut buf = vec![0u8; seg.len as usize];
        mem.read_physical(seg.addr, &mut buf);
        out.extend_from_slice(&buf);
    }
    out
}

pub fn fill_region(mem: &mut PhysicalMemory, region: &MemoryRegion, data: &[u8]) {
    let mut offset = 0;
    for seg in region.segments() {
        let len = seg.len as usize;
        mem.write_physical(seg.addr, &data[offset..offset + len]);
        offset += len;
    }
}

pub struct Bench {
    pub ctrl: AtaController<EmulatedCell>,
    pub mem: PhysicalMemory,
    pub done: Rc<RefCell<Vec<Completion>>>,
    pub events: Rc<RefCell<Vec<BusEvent>>>,
}

impl Bench {
    pub fn new(
        cell: EmulatedCell,
        family: Box<dyn ControllerFamily>,
        config: ControllerConfig,
    ) -> Self {
        init_tracing();
        let mut mem = PhysicalMemory::new(MEMORY_SIZE);
        let mut ctrl =
            AtaController::new(cell, family, config, &mut mem).expect("controller attaches");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        ctrl.add_listener(move |event| sink.borrow_mut().push(*event));
        Self {
            ctrl,
            mem,
            done: Rc::new(RefCell::new(Vec::new())),
            events,
        }
    }

    /// KeyLargo cell with a patterned disk as unit 0.
    pub fn keylargo() -> Self {
        let cell = EmulatedCell::new().with_drive(0, patterned_disk(DISK_SECTORS));
        Self::new(cell, Box::new(KeyLargo), ControllerConfig::default())
    }

    /// Kauai cell with a patterned disk as unit 0.
    pub fn kauai() -> Self {
        let cell = EmulatedCell::kauai().with_drive(0, patterned_disk(DISK_SECTORS));
        Self::new(cell, Box::new(Kauai), ControllerConfig::default())
    }

    pub fn cell(&mut self) -> &mut EmulatedCell {
        self.ctrl.hardware_mut()
    }

    pub fn submit(&mut self, request: TransferRequest) -> ata_controller::Result<()> {
        let sink = self.done.clone();
        let request = request.on_complete(move |c| sink.borrow_mut().push(c));
        self.ctrl.execute_command(&mut self.mem, request)
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.done.borrow().clone()
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.borrow().clone()
    }

    pub fn run_dma(&mut self) -> ChannelRun {
        self.ctrl.hardware_mut().run_dma(&mut self.mem)
    }

    /// Hand a pending DMA interrupt to the controller. Returns whether there was one.
    pub fn deliver_dma(&mut self) -> bool {
        if !self.ctrl.hardware_mut().take_dma_irq() {
            return false;
        }
        self.ctrl.handle_dma_interrupt(&mut self.mem);
        true
    }

    /// Hand a pending device interrupt to the controller. Returns whether there was one.
    pub fn deliver_device(&mut self) -> bool {
        if !self.ctrl.hardware().device_irq_pending() {
            return false;
        }
        self.ctrl.handle_device_interrupt(&mut self.mem);
        true
    }

    /// Run the channel and deliver interrupts until nothing moves.
    pub fn settle(&mut self, order: Order) {
        for _ in 0..10_000 {
            let delivered = match order {
                Order::DeviceFirst => self.deliver_device() | self.deliver_dma(),
                Order::DmaFirst => self.deliver_dma() | self.deliver_device(),
            };
            if delivered {
                continue;
            }
            if self.run_dma() == ChannelRun::Idle {
                return;
            }
        }
        panic!("bench did not settle");
    }
}
