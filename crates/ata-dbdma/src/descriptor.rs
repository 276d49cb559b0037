//! DBDMA descriptor wire format.
//!
//! Each descriptor is four little-endian 32-bit words:
//!
//! ```text
//! word0  cmd[31:28] key[26:24] i[21:20] b[19:18] w[17:16] req_count[15:0]
//! word1  address (physical, 32-bit)
//! word2  cmd_dep
//! word3  xfer_status[31:16] res_count[15:0]    (written back by the channel)
//! ```

use bitflags::bitflags;

use crate::memory::MemoryBus;

pub const DESCRIPTOR_SIZE: usize = 16;

/// Largest byte count a single descriptor can encode.
pub const MAX_REQ_COUNT: u32 = 0xFFFF;

const CMD_SHIFT: u32 = 28;
const KEY_SHIFT: u32 = 24;
const INT_SHIFT: u32 = 20;
const BRANCH_SHIFT: u32 = 18;
const WAIT_SHIFT: u32 = 16;

const RESULT_OFFSET: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DescriptorCommand {
    OutputMore = 0,
    OutputLast = 1,
    InputMore = 2,
    InputLast = 3,
    StoreQuad = 4,
    LoadQuad = 5,
    Nop = 6,
    Stop = 7,
}

impl DescriptorCommand {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Self::OutputMore,
            1 => Self::OutputLast,
            2 => Self::InputMore,
            3 => Self::InputLast,
            4 => Self::StoreQuad,
            5 => Self::LoadQuad,
            6 => Self::Nop,
            7 => Self::Stop,
            _ => return None,
        })
    }

    pub fn is_data(self) -> bool {
        matches!(
            self,
            Self::OutputMore | Self::OutputLast | Self::InputMore | Self::InputLast
        )
    }

    /// Data flows from the device into host memory.
    pub fn is_input(self) -> bool {
        matches!(self, Self::InputMore | Self::InputLast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptCondition {
    Never = 0,
    IfTrue = 1,
    IfFalse = 2,
    Always = 3,
}

impl InterruptCondition {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Never,
            1 => Self::IfTrue,
            2 => Self::IfFalse,
            _ => Self::Always,
        }
    }
}

bitflags! {
    /// DBDMA channel status, also written back into each descriptor's `xfer_status`.
    ///
    /// The low byte carries device-specific status lines and is retained as-is.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ChannelStatus: u16 {
        const RUN = 0x8000;
        const PAUSE = 0x4000;
        const FLUSH = 0x2000;
        const WAKE = 0x1000;
        const DEAD = 0x0800;
        const ACTIVE = 0x0400;
        const BT = 0x0100;
        const _ = 0x00FF;
    }
}

impl ChannelStatus {
    /// Bits the driver may set or clear through the control register.
    pub const CONTROL_MASK: Self = Self::RUN
        .union(Self::PAUSE)
        .union(Self::FLUSH)
        .union(Self::WAKE);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub command: DescriptorCommand,
    pub key: u8,
    pub interrupt: InterruptCondition,
    pub branch: u8,
    pub wait: u8,
    pub req_count: u16,
    pub address: u32,
    pub cmd_dep: u32,
    pub xfer_status: ChannelStatus,
    pub res_count: u16,
}

impl Descriptor {
    fn new(command: DescriptorCommand, req_count: u16, address: u32) -> Self {
        Self {
            command,
            key: 0,
            interrupt: InterruptCondition::Never,
            branch: 0,
            wait: 0,
            req_count,
            address,
            cmd_dep: 0,
            xfer_status: ChannelStatus::empty(),
            res_count: 0,
        }
    }

    pub fn data(command: DescriptorCommand, req_count: u16, address: u32) -> Self {
        debug_assert!(command.is_data());
        Self::new(command, req_count, address)
    }

    /// NOP that raises the channel interrupt once every preceding entry has completed.
    pub fn nop_interrupt() -> Self {
        Self {
            interrupt: InterruptCondition::Always,
            ..Self::new(DescriptorCommand::Nop, 0, 0)
        }
    }

    pub fn stop() -> Self {
        Self::new(DescriptorCommand::Stop, 0, 0)
    }

    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let op = (u32::from(self.command as u8) << CMD_SHIFT)
            | (u32::from(self.key & 0x7) << KEY_SHIFT)
            | (u32::from(self.interrupt as u8) << INT_SHIFT)
            | (u32::from(self.branch & 0x3) << BRANCH_SHIFT)
            | (u32::from(self.wait & 0x3) << WAIT_SHIFT)
            | u32::from(self.req_count);
        let result = (u32::from(self.xfer_status.bits()) << 16) | u32::from(self.res_count);

        let mut out = [0u8; DESCRIPTOR_SIZE];
        out[0..4].copy_from_slice(&op.to_le_bytes());
        out[4..8].copy_from_slice(&self.address.to_le_bytes());
        out[8..12].copy_from_slice(&self.cmd_dep.to_le_bytes());
        out[12..16].copy_from_slice(&result.to_le_bytes());
        out
    }

    /// Decode a descriptor. Returns `None` for reserved operation codes.
    pub fn decode(raw: &[u8; DESCRIPTOR_SIZE]) -> Option<Self> {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        let op = word(0);
        let result = word(12);
        Some(Self {
            command: DescriptorCommand::from_bits((op >> CMD_SHIFT) as u8)?,
            key: ((op >> KEY_SHIFT) & 0x7) as u8,
            interrupt: InterruptCondition::from_bits((op >> INT_SHIFT) as u8),
            branch: ((op >> BRANCH_SHIFT) & 0x3) as u8,
            wait: ((op >> WAIT_SHIFT) & 0x3) as u8,
            req_count: op as u16,
            address: word(4),
            cmd_dep: word(8),
            xfer_status: ChannelStatus::from_bits_retain((result >> 16) as u16),
            res_count: result as u16,
        })
    }

    pub fn write_to(&self, mem: &mut dyn MemoryBus, paddr: u64) {
        mem.write_physical(paddr, &self.encode());
    }

    pub fn read_from(mem: &mut dyn MemoryBus, paddr: u64) -> Option<Self> {
        let mut raw = [0u8; DESCRIPTOR_SIZE];
        mem.read_physical(paddr, &mut raw);
        Self::decode(&raw)
    }

    /// Read only the result word the channel writes back after processing the entry.
    pub fn read_result(mem: &mut dyn MemoryBus, paddr: u64) -> (ChannelStatus, u16) {
        let result = mem.read_u32(paddr.wrapping_add(RESULT_OFFSET));
        (
            ChannelStatus::from_bits_retain((result >> 16) as u16),
            result as u16,
        )
    }

    pub fn write_result(
        mem: &mut dyn MemoryBus,
        paddr: u64,
        status: ChannelStatus,
        res_count: u16,
    ) {
        let result = (u32::from(status.bits()) << 16) | u32::from(res_count);
        mem.write_u32(paddr.wrapping_add(RESULT_OFFSET), result);
    }
}
