use ata_dbdma::DmaError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AtaError>;

/// Errors surfaced by the controller.
///
/// Configuration errors (`ModeNotSupported`, `ModeConflict`, `InvalidUnit`, `Busy`) are returned
/// synchronously and leave all state untouched. Everything that happens to a request after it
/// was accepted reaches the caller only through its completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtaError {
    #[error("requested transfer mode is not supported")]
    ModeNotSupported,

    #[error("multiword DMA and UltraDMA modes requested together")]
    ModeConflict,

    #[error(transparent)]
    Dma(#[from] DmaError),

    #[error("bus is offline")]
    Offline,

    #[error("no such unit: {0}")]
    InvalidUnit(u8),

    #[error("unit has a command in flight")]
    Busy,

    #[error("device error: status={status:#04x} error={error:#04x}")]
    DeviceError { status: u8, error: u8 },

    #[error("command timed out")]
    Timeout,

    #[error("command interrupted by bus reset")]
    ResetInterrupted,

    #[error("device finished after {actual} of {expected} bytes")]
    IncompleteTransfer { expected: u64, actual: u64 },

    #[error("invalid controller configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unit count {0} out of range (1..=2)")]
    Units(u8),

    #[error("descriptor capacity {0} too small (need room for data, NOP and STOP)")]
    DescriptorCapacity(usize),

    #[error("max descriptor bytes {0} out of range (1..=0xFFFF)")]
    MaxDescriptorBytes(u32),

    #[error("poll limit must be non-zero")]
    PollLimit,
}
