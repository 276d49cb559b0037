use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Static parameters of one controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Device slots on the bus (master, and optionally slave).
    pub units: u8,
    /// Descriptor slots per chain, including the trailing NOP and STOP.
    pub descriptor_capacity: usize,
    /// Largest byte count placed in one data descriptor.
    pub max_descriptor_bytes: u32,
    /// Timeout applied to requests that don't carry their own.
    pub command_timeout_ms: u64,
    /// Upper bound on register reads for any busy-wait.
    pub poll_limit: u32,
}

impl ControllerConfig {
    pub const DEFAULT_DESCRIPTOR_CAPACITY: usize = 33 + 2;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=2).contains(&self.units) {
            return Err(ConfigError::Units(self.units));
        }
        if self.descriptor_capacity < 3 {
            return Err(ConfigError::DescriptorCapacity(self.descriptor_capacity));
        }
        if !(1..=0xFFFF).contains(&self.max_descriptor_bytes) {
            return Err(ConfigError::MaxDescriptorBytes(self.max_descriptor_bytes));
        }
        if self.poll_limit == 0 {
            return Err(ConfigError::PollLimit);
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            units: 2,
            descriptor_capacity: Self::DEFAULT_DESCRIPTOR_CAPACITY,
            max_descriptor_bytes: 0xFE00,
            command_timeout_ms: 30_000,
            poll_limit: 10_000,
        }
    }
}
