/// One physically contiguous piece of a transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysSegment {
    pub addr: u64,
    pub len: u64,
}

/// Scatter/gather description of the host memory backing a transfer.
///
/// Offsets are logical byte offsets into the buffer; [`MemoryRegion::segment_at`] translates one
/// into the physical run that contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    segments: Vec<PhysSegment>,
    // Logical start offset of each segment, parallel to `segments`.
    starts: Vec<u64>,
    len: u64,
}

impl MemoryRegion {
    /// Build a region from physical segments in logical order. Empty segments are dropped.
    pub fn new(segments: impl IntoIterator<Item = PhysSegment>) -> Self {
        let mut region = Self {
            segments: Vec::new(),
            starts: Vec::new(),
            len: 0,
        };
        for seg in segments.into_iter().filter(|s| s.len != 0) {
            region.starts.push(region.len);
            region.len += seg.len;
            region.segments.push(seg);
        }
        region
    }

    pub fn contiguous(addr: u64, len: u64) -> Self {
        Self::new([PhysSegment { addr, len }])
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segments(&self) -> &[PhysSegment] {
        &self.segments
    }

    /// The physical run starting at logical `offset`, trimmed to the end of its segment.
    pub fn segment_at(&self, offset: u64) -> Option<PhysSegment> {
        if offset >= self.len {
            return None;
        }
        let idx = self.starts.partition_point(|&start| start <= offset) - 1;
        let seg = self.segments[idx];
        let skip = offset - self.starts[idx];
        Some(PhysSegment {
            addr: seg.addr + skip,
            len: seg.len - skip,
        })
    }
}
