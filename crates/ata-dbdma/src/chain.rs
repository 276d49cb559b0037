use tracing::trace;

use crate::arena::DescriptorArena;
use crate::descriptor::{Descriptor, DescriptorCommand, MAX_REQ_COUNT};
use crate::error::{DmaError, Result};
use crate::memory::MemoryBus;
use crate::region::MemoryRegion;
use crate::DmaDirection;

/// The part of a request one activation of the channel should cover.
#[derive(Debug, Clone, Copy)]
pub struct TransferWindow<'a> {
    pub region: Option<&'a MemoryRegion>,
    /// Logical buffer offset of the first byte still to be moved
    /// (request position plus bytes already transferred).
    pub offset: u64,
    /// Bytes still to be moved for the whole request.
    pub remaining: u64,
    pub direction: DmaDirection,
}

/// What one chain build produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPass {
    pub data_entries: usize,
    pub bytes: u64,
    /// This pass moves every remaining byte of the request.
    pub final_pass: bool,
}

/// Rebuild the chain in `arena` for the next pass of a transfer.
///
/// Emits up to `arena.data_capacity()` data descriptors, then an interrupt-raising NOP and a
/// STOP. Each data descriptor covers at most `max_entry_bytes` and never crosses a physical
/// segment boundary. The chain is always rewritten from slot 0.
pub fn build_chain(
    arena: &DescriptorArena,
    mem: &mut dyn MemoryBus,
    window: TransferWindow<'_>,
    max_entry_bytes: u32,
) -> Result<ChainPass> {
    let region = window.region.ok_or(DmaError::NoBuffer)?;

    let end = window.offset.saturating_add(window.remaining);
    if region.len() < end {
        return Err(DmaError::SizeMismatch {
            covered: region.len().saturating_sub(window.offset),
            remaining: window.remaining,
        });
    }

    let (more, last) = match window.direction {
        DmaDirection::ToMemory => (DescriptorCommand::InputMore, DescriptorCommand::InputLast),
        DmaDirection::FromMemory => (DescriptorCommand::OutputMore, DescriptorCommand::OutputLast),
    };
    let max_entry = u64::from(max_entry_bytes.clamp(1, MAX_REQ_COUNT));

    let mut covered = 0u64;
    let mut entries = 0usize;
    let mut offset = window.offset;
    let mut tail = None;
    while covered < window.remaining && entries < arena.data_capacity() {
        let Some(seg) = region.segment_at(offset) else {
            break;
        };
        let chunk = seg.len.min(max_entry).min(window.remaining - covered);
        if seg.addr.saturating_add(chunk) > u64::from(u32::MAX) + 1 {
            return Err(DmaError::AddressOutOfRange { addr: seg.addr });
        }

        let desc = Descriptor::data(more, chunk as u16, seg.addr as u32);
        arena.write(mem, entries, &desc);
        tail = Some(desc);

        covered += chunk;
        offset += chunk;
        entries += 1;
    }

    let Some(tail) = tail else {
        return Err(DmaError::SegmentOverflow);
    };
    if covered > window.remaining {
        return Err(DmaError::SizeMismatch {
            covered,
            remaining: window.remaining,
        });
    }

    let final_pass = covered == window.remaining;
    if final_pass {
        arena.write(mem, entries - 1, &Descriptor { command: last, ..tail });
    }
    arena.write(mem, entries, &Descriptor::nop_interrupt());
    arena.write(mem, entries + 1, &Descriptor::stop());

    trace!(entries, bytes = covered, final_pass, "built DBDMA chain");
    Ok(ChainPass {
        data_entries: entries,
        bytes: covered,
        final_pass,
    })
}
