use thiserror::Error;

pub type Result<T> = std::result::Result<T, DmaError>;

/// Failures reported by the descriptor chain builder and the DMA engine.
///
/// Chain-building failures (`NoBuffer`, `SegmentOverflow`, `SizeMismatch`, `AddressOutOfRange`)
/// describe a malformed request; the engine is left `Inactive` and nothing is retried.
/// `HardwareError` is only produced while scanning a completed chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("request has no backing memory")]
    NoBuffer,

    #[error("request produced no DMA segments")]
    SegmentOverflow,

    #[error("descriptor coverage mismatch: covered={covered} remaining={remaining}")]
    SizeMismatch { covered: u64, remaining: u64 },

    #[error("DBDMA channel reported a fatal transfer error")]
    HardwareError,

    #[error("physical address {addr:#x} is not reachable by the DBDMA channel")]
    AddressOutOfRange { addr: u64 },

    #[error("unable to allocate descriptor memory")]
    NoDescriptorMemory,

    #[error("chained activation requested while the engine is not mid-transfer")]
    NotChained,
}
