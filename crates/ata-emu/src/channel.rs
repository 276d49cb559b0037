use ata_dbdma::{
    ChannelStatus, Descriptor, DescriptorCommand, InterruptCondition, MemoryBus, DESCRIPTOR_SIZE,
};
use tracing::trace;

/// Device end of a DMA transfer.
pub trait DmaPort {
    /// Device -> memory. Fill `buf` and return how many bytes the device supplied.
    fn dma_in(&mut self, buf: &mut [u8]) -> usize;
    /// Memory -> device. Returns how many bytes the device accepted.
    fn dma_out(&mut self, buf: &[u8]) -> usize;
}

/// A port with nothing attached.
pub struct NullPort;

impl DmaPort for NullPort {
    fn dma_in(&mut self, _buf: &mut [u8]) -> usize {
        0
    }

    fn dma_out(&mut self, _buf: &[u8]) -> usize {
        0
    }
}

/// Why [`DbdmaChannel::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRun {
    /// Not running, or not woken since the last STOP.
    Idle,
    /// Reached STOP.
    Stopped,
    /// Paused before a data entry by an injected stall. The next `run` resumes there.
    Stalled,
    /// Hit a corrupt descriptor or an injected fault; DEAD is set.
    Dead,
}

/// Guard against chains without a STOP.
const MAX_ENTRIES_PER_RUN: usize = 4096;

/// One DBDMA channel executing descriptor chains out of memory.
#[derive(Debug, Default)]
pub struct DbdmaChannel {
    status: ChannelStatus,
    command_ptr: u32,
    pc: u64,
    irq: bool,

    /// Data entries executed since RUN was last set from clear.
    data_entries: usize,
    dead_at: Option<usize>,
    stall_at: Option<usize>,

    activations: u32,
    stops: u32,
    flushes: u32,
}

impl DbdmaChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn command_ptr(&self) -> u32 {
        self.command_ptr
    }

    pub fn write_command_ptr(&mut self, paddr: u32) {
        self.command_ptr = paddr;
    }

    /// Control register write: bits in `mask` take their value from `value`.
    pub fn write_control(&mut self, mask: ChannelStatus, value: ChannelStatus) {
        let was_running = self.status.contains(ChannelStatus::RUN);
        let set = mask & value;

        if set.contains(ChannelStatus::FLUSH) {
            // Nothing is ever buffered, so the flush completes immediately.
            self.flushes += 1;
        }

        let latched = mask & (ChannelStatus::RUN | ChannelStatus::PAUSE);
        self.status = (self.status - latched) | (value & latched);

        let running = self.status.contains(ChannelStatus::RUN);
        if was_running && !running {
            self.stops += 1;
            self.status.remove(ChannelStatus::ACTIVE | ChannelStatus::DEAD);
            trace!(stops = self.stops, "DBDMA channel stopped");
        } else if running && (!was_running || set.contains(ChannelStatus::WAKE)) {
            if !was_running {
                self.data_entries = 0;
                self.status.remove(ChannelStatus::DEAD);
            }
            self.activations += 1;
            self.pc = u64::from(self.command_ptr);
            self.status.insert(ChannelStatus::ACTIVE);
            trace!(
                activations = self.activations,
                command_ptr = self.command_ptr,
                "DBDMA channel woken"
            );
        }
    }

    /// Times the channel was started or woken with a new chain.
    pub fn activations(&self) -> u32 {
        self.activations
    }

    /// Times RUN went from set to clear.
    pub fn stops(&self) -> u32 {
        self.stops
    }

    pub fn flushes(&self) -> u32 {
        self.flushes
    }

    pub fn irq_pending(&self) -> bool {
        self.irq
    }

    pub fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq)
    }

    /// Die on the `n`th data entry after the next start (0-based, counted across chained passes).
    pub fn inject_dead_at(&mut self, n: usize) {
        self.dead_at = Some(n);
    }

    /// Raise the interrupt and pause right before the `n`th data entry, once.
    pub fn inject_stall_at(&mut self, n: usize) {
        self.stall_at = Some(n);
    }

    /// Execute the current chain until STOP, a stall, or a fault.
    pub fn run(&mut self, mem: &mut dyn MemoryBus, port: &mut dyn DmaPort) -> ChannelRun {
        if !self
            .status
            .contains(ChannelStatus::RUN | ChannelStatus::ACTIVE)
            || self.status.contains(ChannelStatus::PAUSE)
        {
            return ChannelRun::Idle;
        }

        for _ in 0..MAX_ENTRIES_PER_RUN {
            let paddr = self.pc;
            let Some(desc) = Descriptor::read_from(mem, paddr) else {
                return self.die(mem, None);
            };

            match desc.command {
                DescriptorCommand::Stop => {
                    self.status.remove(ChannelStatus::ACTIVE);
                    trace!(paddr, "DBDMA STOP");
                    return ChannelRun::Stopped;
                }
                command if command.is_data() => {
                    if self.stall_at == Some(self.data_entries) {
                        self.stall_at = None;
                        self.irq = true;
                        return ChannelRun::Stalled;
                    }
                    if self.dead_at == Some(self.data_entries) {
                        self.dead_at = None;
                        return self.die(mem, Some(&desc));
                    }
                    let moved = self.transfer(mem, port, &desc);
                    let residual = desc.req_count - moved as u16;
                    self.complete_entry(mem, residual);
                    self.data_entries += 1;
                }
                _ => self.complete_entry(mem, 0),
            }

            if desc.interrupt == InterruptCondition::Always {
                self.irq = true;
            }
            self.pc = paddr + DESCRIPTOR_SIZE as u64;
        }
        self.die(mem, None)
    }

    fn transfer(
        &self,
        mem: &mut dyn MemoryBus,
        port: &mut dyn DmaPort,
        desc: &Descriptor,
    ) -> usize {
        let mut buf = vec![0u8; usize::from(desc.req_count)];
        let addr = u64::from(desc.address);
        if desc.command.is_input() {
            let n = port.dma_in(&mut buf).min(buf.len());
            mem.write_physical(addr, &buf[..n]);
            n
        } else {
            mem.read_physical(addr, &mut buf);
            port.dma_out(&buf).min(buf.len())
        }
    }

    fn complete_entry(&self, mem: &mut dyn MemoryBus, residual: u16) {
        let status = self.status | ChannelStatus::RUN | ChannelStatus::ACTIVE;
        Descriptor::write_result(mem, self.pc, status, residual);
    }

    fn die(&mut self, mem: &mut dyn MemoryBus, desc: Option<&Descriptor>) -> ChannelRun {
        if let Some(desc) = desc {
            let status =
                self.status | ChannelStatus::RUN | ChannelStatus::ACTIVE | ChannelStatus::DEAD;
            Descriptor::write_result(mem, self.pc, status, desc.req_count);
        }
        self.status.remove(ChannelStatus::ACTIVE);
        self.status.insert(ChannelStatus::DEAD);
        self.irq = true;
        trace!(pc = self.pc, "DBDMA channel dead");
        ChannelRun::Dead
    }
}
