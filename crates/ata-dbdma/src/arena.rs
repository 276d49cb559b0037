use crate::descriptor::{Descriptor, DESCRIPTOR_SIZE};
use crate::error::{DmaError, Result};
use crate::memory::{DmaAllocator, MemoryBus};

/// Fixed-capacity table of descriptor slots in DMA-visible memory.
///
/// The table is one physically contiguous block; every slot's physical address is computed once
/// here so the chain builder only ever deals in slot indices. The last two slots of any chain
/// are reserved for the interrupt NOP and the STOP sentinel.
#[derive(Debug)]
pub struct DescriptorArena {
    base: u64,
    slots: Vec<u64>,
}

impl DescriptorArena {
    /// Alignment the DBDMA channel requires for the command pointer.
    pub const ALIGN: u64 = 16;

    pub fn allocate(alloc: &mut dyn DmaAllocator, capacity: usize) -> Result<Self> {
        if capacity < 3 {
            return Err(DmaError::NoDescriptorMemory);
        }
        let bytes = capacity * DESCRIPTOR_SIZE;
        let base = alloc
            .alloc_contiguous(bytes, Self::ALIGN)
            .ok_or(DmaError::NoDescriptorMemory)?;
        if base.saturating_add(bytes as u64) > u64::from(u32::MAX) {
            alloc.free(base, bytes);
            return Err(DmaError::AddressOutOfRange { addr: base });
        }
        let slots = (0..capacity)
            .map(|i| base + (i * DESCRIPTOR_SIZE) as u64)
            .collect();
        Ok(Self { base, slots })
    }

    /// Return the table memory to `alloc`.
    pub fn release(self, alloc: &mut dyn DmaAllocator) {
        alloc.free(self.base, self.slots.len() * DESCRIPTOR_SIZE);
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots available for data descriptors in one chain.
    pub fn data_capacity(&self) -> usize {
        self.slots.len() - 2
    }

    pub fn slot_addr(&self, index: usize) -> u64 {
        self.slots[index]
    }

    pub fn write(&self, mem: &mut dyn MemoryBus, index: usize, desc: &Descriptor) {
        desc.write_to(mem, self.slots[index]);
    }

    pub fn read(&self, mem: &mut dyn MemoryBus, index: usize) -> Option<Descriptor> {
        Descriptor::read_from(mem, self.slots[index])
    }
}
