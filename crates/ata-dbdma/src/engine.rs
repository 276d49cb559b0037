//! Driver-side control of one DBDMA channel.
//!
//! State machine for one transfer:
//!
//! ```text
//! Inactive -> Starting -> Active -> Starting -> ... -> Status -> Complete -> Inactive
//!                \______________________________________/
//!                          Error (from any state)
//! ```
//!
//! `Active` means the chain just programmed does not cover the rest of the request and another
//! activation is expected after the next DMA interrupt; `Status` means the final pass is running
//! and only a status confirmation remains.

use tracing::{debug, trace, warn};

use crate::arena::DescriptorArena;
use crate::chain::{build_chain, ChainPass, TransferWindow};
use crate::descriptor::{ChannelStatus, DescriptorCommand};
use crate::error::{DmaError, Result};
use crate::memory::MemoryBus;

/// Register interface of a DBDMA channel.
pub trait DbdmaRegisters {
    /// Write the channel control register: bits in `mask` take their value from `value`.
    fn write_control(&mut self, mask: ChannelStatus, value: ChannelStatus);
    fn read_channel_status(&mut self) -> ChannelStatus;
    fn write_command_ptr(&mut self, paddr: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaState {
    Inactive,
    Starting,
    Active,
    Status,
    Complete,
    Error,
}

/// Outcome of inspecting a chain after a DMA interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainScan {
    /// Every entry up to STOP finished with no residual; `bytes` is their total.
    Clean { bytes: u64 },
    /// The channel died or an entry was still mid-transfer. `bytes` only counts the clean
    /// entries that precede the failing one.
    Fault { bytes: u64 },
    /// The chain has not finished; the interrupt belongs to something else.
    Ignore,
}

const HISTORY_LIMIT: usize = 256;

#[derive(Debug)]
pub struct DmaEngine {
    arena: DescriptorArena,
    state: DmaState,
    max_entry_bytes: u32,
    poll_limit: u32,
    pass: Option<ChainPass>,
    history: Vec<DmaState>,
}

impl DmaEngine {
    pub fn new(arena: DescriptorArena, max_entry_bytes: u32, poll_limit: u32) -> Self {
        Self {
            arena,
            state: DmaState::Inactive,
            max_entry_bytes,
            poll_limit,
            pass: None,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> DmaState {
        self.state
    }

    /// States visited since the last fresh activation.
    pub fn history(&self) -> &[DmaState] {
        &self.history
    }

    /// The chain currently programmed into the arena.
    pub fn pass(&self) -> Option<ChainPass> {
        self.pass
    }

    pub fn arena(&self) -> &DescriptorArena {
        &self.arena
    }

    pub fn into_arena(self) -> DescriptorArena {
        self.arena
    }

    fn set_state(&mut self, state: DmaState) {
        trace!(from = ?self.state, to = ?state, "DMA state");
        self.state = state;
        if self.history.len() == HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push(state);
    }

    /// Begin a new transfer.
    ///
    /// The channel is stopped (and its FIFO flushed) first, so any stale transfer is discarded.
    /// On a chain-build error the engine is back in `Inactive` and nothing has been started.
    pub fn start_transfer<R: DbdmaRegisters + ?Sized>(
        &mut self,
        regs: &mut R,
        mem: &mut dyn MemoryBus,
        window: TransferWindow<'_>,
    ) -> Result<ChainPass> {
        if self.state != DmaState::Inactive {
            warn!(state = ?self.state, "starting DMA over an unfinished transfer");
        }
        self.stop_transfer(regs);
        self.history.clear();
        self.set_state(DmaState::Starting);
        self.activate(regs, mem, window)
    }

    /// Program the next pass of a multi-pass transfer.
    ///
    /// Precondition: `state() == DmaState::Active`. The channel must NOT be stopped between
    /// passes: the device keeps streaming and a stop would discard bytes staged in the FIFO.
    pub fn continue_transfer<R: DbdmaRegisters + ?Sized>(
        &mut self,
        regs: &mut R,
        mem: &mut dyn MemoryBus,
        window: TransferWindow<'_>,
    ) -> Result<ChainPass> {
        if self.state != DmaState::Active {
            return Err(DmaError::NotChained);
        }
        self.set_state(DmaState::Starting);
        self.activate(regs, mem, window)
    }

    fn activate<R: DbdmaRegisters + ?Sized>(
        &mut self,
        regs: &mut R,
        mem: &mut dyn MemoryBus,
        window: TransferWindow<'_>,
    ) -> Result<ChainPass> {
        let pass = match build_chain(&self.arena, mem, window, self.max_entry_bytes) {
            Ok(pass) => pass,
            Err(err) => {
                debug!(%err, "DBDMA chain build failed");
                self.pass = None;
                self.set_state(DmaState::Inactive);
                return Err(err);
            }
        };
        self.pass = Some(pass);
        self.set_state(if pass.final_pass {
            DmaState::Status
        } else {
            DmaState::Active
        });

        regs.write_command_ptr(self.arena.base() as u32);
        regs.write_control(
            ChannelStatus::RUN | ChannelStatus::PAUSE | ChannelStatus::WAKE,
            ChannelStatus::RUN | ChannelStatus::WAKE,
        );
        Ok(pass)
    }

    /// Halt the channel. Safe to call in any state, including with nothing running.
    ///
    /// Does not change [`DmaEngine::state`]; callers record completion or failure explicitly.
    pub fn stop_transfer<R: DbdmaRegisters + ?Sized>(&mut self, regs: &mut R) {
        let status = regs.read_channel_status();
        if status.intersects(ChannelStatus::RUN | ChannelStatus::ACTIVE) {
            regs.write_control(ChannelStatus::FLUSH, ChannelStatus::FLUSH);
            if !self.poll_clear(regs, ChannelStatus::FLUSH) {
                warn!("DBDMA FIFO flush did not complete");
            }
        }
        regs.write_control(ChannelStatus::CONTROL_MASK, ChannelStatus::empty());
        if !self.poll_clear(regs, ChannelStatus::ACTIVE) {
            warn!("DBDMA channel still active after stop");
        }
    }

    fn poll_clear<R: DbdmaRegisters + ?Sized>(&self, regs: &mut R, bits: ChannelStatus) -> bool {
        (0..self.poll_limit.max(1)).any(|_| !regs.read_channel_status().intersects(bits))
    }

    /// Inspect the result words of the programmed chain.
    ///
    /// Does not change state: on `Clean` the caller decides between another pass (`Active`) and
    /// completion (`Status`).
    pub fn scan_completion_chain<R: DbdmaRegisters + ?Sized>(
        &mut self,
        regs: &mut R,
        mem: &mut dyn MemoryBus,
    ) -> ChainScan {
        if self.pass.is_none() {
            return ChainScan::Ignore;
        }
        let channel = regs.read_channel_status();
        let mut bytes = 0u64;
        for index in 0..self.arena.capacity() {
            let Some(desc) = self.arena.read(mem, index) else {
                warn!(index, "corrupt descriptor in completed chain");
                return ChainScan::Fault { bytes };
            };
            let dead = channel.contains(ChannelStatus::DEAD);
            if desc.command == DescriptorCommand::Stop {
                if dead {
                    warn!(bytes, "DBDMA channel dead after clean chain");
                    return ChainScan::Fault { bytes };
                }
                return ChainScan::Clean { bytes };
            }

            let status = desc.xfer_status;
            let ran = status.contains(ChannelStatus::RUN | ChannelStatus::ACTIVE);
            if ran && !status.contains(ChannelStatus::DEAD) && desc.res_count == 0 {
                bytes += u64::from(desc.req_count);
                continue;
            }
            if dead || status.contains(ChannelStatus::DEAD) {
                warn!(index, bytes, "DBDMA channel dead");
                return ChainScan::Fault { bytes };
            }
            if !ran {
                return ChainScan::Ignore;
            }
            warn!(index, residual = desc.res_count, "DBDMA entry still running at interrupt");
            return ChainScan::Fault { bytes };
        }
        warn!("completed chain has no STOP");
        ChainScan::Fault { bytes }
    }

    /// The final pass finished cleanly.
    pub fn mark_complete(&mut self) {
        if self.state == DmaState::Status {
            self.set_state(DmaState::Complete);
        }
    }

    pub fn mark_error(&mut self) {
        self.set_state(DmaState::Error);
    }

    /// Return to `Inactive` once the owning request is released.
    pub fn finish(&mut self) {
        self.pass = None;
        if self.state != DmaState::Inactive {
            self.set_state(DmaState::Inactive);
        }
    }
}
