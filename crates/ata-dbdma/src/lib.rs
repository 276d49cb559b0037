//! Descriptor-based DMA (DBDMA) plumbing for the Mac-IO ATA cell.
//!
//! The ATA controller never moves data itself: it hands the DBDMA channel a chain of
//! 16-byte descriptors in physical memory and waits for the channel to raise an interrupt.
//! This crate provides:
//!
//! - [`MemoryBus`] / [`DmaAllocator`]: the physical memory seam (plus a dense [`PhysicalMemory`])
//! - [`Descriptor`]: the bit-exact descriptor wire format and channel status bits
//! - [`MemoryRegion`]: a scatter/gather view of a request's backing buffer
//! - [`DescriptorArena`]: fixed-capacity descriptor slots with pre-translated addresses
//! - [`build_chain`]: converts the remaining byte range of a request into one chain pass
//! - [`DmaEngine`]: start/continue/stop and completion-chain scanning

#![forbid(unsafe_code)]

mod arena;
mod chain;
mod descriptor;
mod engine;
mod error;
mod memory;
mod region;

pub use arena::DescriptorArena;
pub use chain::{build_chain, ChainPass, TransferWindow};
pub use descriptor::{
    ChannelStatus, Descriptor, DescriptorCommand, InterruptCondition, DESCRIPTOR_SIZE,
    MAX_REQ_COUNT,
};
pub use engine::{ChainScan, DbdmaRegisters, DmaEngine, DmaState};
pub use error::{DmaError, Result};
pub use memory::{DmaAllocator, MemoryBus, PhysicalMemory};
pub use region::{MemoryRegion, PhysSegment};

/// Direction of a DMA transfer, from the point of view of host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device -> host memory (ATA read).
    ToMemory,
    /// Host memory -> device (ATA write).
    FromMemory,
}

#[cfg(test)]
mod proptests;
