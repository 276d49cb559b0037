/// Access to host physical memory as seen by the DBDMA channel.
///
/// Reads take `&mut self` so implementations backed by devices with read side effects remain
/// possible.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    fn read_u16(&mut self, paddr: u64) -> u16 {
        let mut buf = [0u8; 2];
        self.read_physical(paddr, &mut buf);
        u16::from_le_bytes(buf)
    }

    fn read_u32(&mut self, paddr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_u16(&mut self, paddr: u64, val: u16) {
        self.write_physical(paddr, &val.to_le_bytes());
    }

    fn write_u32(&mut self, paddr: u64, val: u32) {
        self.write_physical(paddr, &val.to_le_bytes());
    }
}

/// Source of physically contiguous, DMA-visible memory.
pub trait DmaAllocator {
    /// Allocate `len` bytes aligned to `align` (a power of two). Returns the physical address.
    fn alloc_contiguous(&mut self, len: usize, align: u64) -> Option<u64>;
    fn free(&mut self, paddr: u64, len: usize);
}

/// Dense RAM starting at physical address 0.
///
/// Accesses outside the backing store behave like an unpopulated bus: reads return `0xFF`,
/// writes are dropped. The allocator hands out memory from the top half of RAM so tests can
/// freely use the bottom half for data buffers.
#[derive(Debug, Clone)]
pub struct PhysicalMemory {
    ram: Vec<u8>,
    alloc_next: u64,
    free_list: Vec<(u64, usize)>,
}

impl PhysicalMemory {
    pub fn new(size: usize) -> Self {
        Self {
            ram: vec![0; size],
            alloc_next: (size / 2) as u64,
            free_list: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.ram.len()
    }

    /// Number of bytes currently handed out by the allocator.
    pub fn allocated_bytes(&self) -> u64 {
        let freed: u64 = self.free_list.iter().map(|&(_, len)| len as u64).sum();
        self.alloc_next - (self.ram.len() / 2) as u64 - freed
    }
}

impl MemoryBus for PhysicalMemory {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            let addr = paddr.wrapping_add(i as u64);
            *byte = usize::try_from(addr)
                .ok()
                .and_then(|a| self.ram.get(a).copied())
                .unwrap_or(0xFF);
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        for (i, &byte) in buf.iter().enumerate() {
            let addr = paddr.wrapping_add(i as u64);
            if let Some(slot) = usize::try_from(addr)
                .ok()
                .and_then(|a| self.ram.get_mut(a))
            {
                *slot = byte;
            }
        }
    }
}

impl DmaAllocator for PhysicalMemory {
    fn alloc_contiguous(&mut self, len: usize, align: u64) -> Option<u64> {
        if len == 0 || !align.is_power_of_two() {
            return None;
        }
        if let Some(idx) = self
            .free_list
            .iter()
            .position(|&(addr, l)| l >= len && addr % align == 0)
        {
            let (addr, _) = self.free_list.swap_remove(idx);
            return Some(addr);
        }
        let start = self.alloc_next.checked_add(align - 1)? & !(align - 1);
        let end = start.checked_add(len as u64)?;
        if end > self.ram.len() as u64 {
            return None;
        }
        self.alloc_next = end;
        Some(start)
    }

    fn free(&mut self, paddr: u64, len: usize) {
        self.free_list.push((paddr, len));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_reads_float_high_and_writes_are_dropped() {
        let mut mem = PhysicalMemory::new(0x100);
        mem.write_u32(0xFE, 0xDEAD_BEEF);
        assert_eq!(mem.read_u16(0xFE), 0xBEEF);
        assert_eq!(mem.read_u32(0x100), 0xFFFF_FFFF);
    }

    #[test]
    fn allocations_are_aligned_and_reused_after_free() {
        let mut mem = PhysicalMemory::new(0x1000);
        let a = mem.alloc_contiguous(24, 16).unwrap();
        assert_eq!(a % 16, 0);
        assert!(a >= 0x800);
        let b = mem.alloc_contiguous(16, 16).unwrap();
        assert!(b >= a + 24);

        mem.free(a, 24);
        assert_eq!(mem.alloc_contiguous(20, 16), Some(a));
    }

    #[test]
    fn exhausted_allocator_returns_none() {
        let mut mem = PhysicalMemory::new(0x100);
        assert!(mem.alloc_contiguous(0x81, 16).is_none());
        assert!(mem.alloc_contiguous(0, 16).is_none());
        assert!(mem.alloc_contiguous(16, 3).is_none());
    }
}
