//! Timing table: requested transfer modes and cycle times to packed timing-register values.
//!
//! Each table is ordered slowest to fastest. Selection picks the fastest entry whose cycle time
//! is not faster than the one requested, so a longer requested cycle never yields a faster entry.

use serde::{Deserialize, Serialize};

use crate::error::{AtaError, Result};

pub const MAX_PIO_MODE: u8 = 4;
pub const MAX_DMA_MODE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockClass {
    /// 66 MHz cells (KeyLargo): one 32-bit timing register, 15 ns clock.
    Mhz66,
    /// 100 MHz cells (Kauai): PIO/DMA register plus a separate UltraDMA register, 10 ns clock.
    Mhz100,
}

impl ClockClass {
    pub fn period_ns(self) -> u16 {
        match self {
            ClockClass::Mhz66 => 15,
            ClockClass::Mhz100 => 10,
        }
    }

    pub fn max_ultra_mode(self) -> u8 {
        match self {
            ClockClass::Mhz66 => 4,
            ClockClass::Mhz100 => 5,
        }
    }
}

/// Mode request as accepted by mode-select. Bit `n` of a mask selects mode `n`; the highest set
/// bit wins. A cycle time of 0 means "use the mode's rated cycle time".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingRequest {
    pub pio_modes: u8,
    pub pio_cycle_ns: u16,
    pub dma_modes: u8,
    pub dma_cycle_ns: u16,
    pub ultra_modes: u8,
}

impl TimingRequest {
    pub fn pio(mode: u8) -> Self {
        Self {
            pio_modes: mode_bit(mode),
            ..Self::default()
        }
    }

    pub fn with_pio_cycle(mut self, cycle_ns: u16) -> Self {
        self.pio_cycle_ns = cycle_ns;
        self
    }

    pub fn with_dma(mut self, mode: u8) -> Self {
        self.dma_modes = mode_bit(mode);
        self
    }

    pub fn with_dma_cycle(mut self, cycle_ns: u16) -> Self {
        self.dma_cycle_ns = cycle_ns;
        self
    }

    pub fn with_ultra(mut self, mode: u8) -> Self {
        self.ultra_modes = mode_bit(mode);
        self
    }
}

/// Raw values for the cell's timing registers. `ultra` is unused on 66 MHz cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingRegister {
    pub primary: u32,
    pub ultra: u32,
}

/// Selected timing for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    pub pio_modes: u8,
    pub pio_cycle_ns: u16,
    pub dma_modes: u8,
    pub dma_cycle_ns: u16,
    pub ultra_modes: u8,
    pub register: TimingRegister,
}

impl TimingConfig {
    pub fn pio_mode(&self) -> u8 {
        highest_mode(self.pio_modes).unwrap_or(0)
    }

    pub fn dma_mode(&self) -> Option<u8> {
        highest_mode(self.dma_modes)
    }

    pub fn ultra_mode(&self) -> Option<u8> {
        highest_mode(self.ultra_modes)
    }

    /// The request that reproduces this configuration.
    pub fn to_request(&self) -> TimingRequest {
        TimingRequest {
            pio_modes: self.pio_modes,
            pio_cycle_ns: self.pio_cycle_ns,
            dma_modes: self.dma_modes,
            dma_cycle_ns: self.dma_cycle_ns,
            ultra_modes: self.ultra_modes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CycleEntry {
    cycle_ns: u16,
    access_ns: u16,
    recovery_ns: u16,
}

const fn entry(cycle_ns: u16, access_ns: u16, recovery_ns: u16) -> CycleEntry {
    CycleEntry {
        cycle_ns,
        access_ns,
        recovery_ns,
    }
}

const PIO_TABLE: [CycleEntry; 11] = [
    entry(900, 300, 600),
    entry(600, 165, 435),
    entry(480, 150, 330),
    entry(383, 125, 258),
    entry(330, 110, 220),
    entry(270, 100, 170),
    entry(240, 100, 140),
    entry(210, 90, 120),
    entry(180, 80, 100),
    entry(150, 75, 75),
    entry(120, 70, 50),
];

const DMA_TABLE: [CycleEntry; 8] = [
    entry(720, 360, 360),
    entry(480, 215, 265),
    entry(360, 180, 180),
    entry(270, 135, 135),
    entry(240, 120, 120),
    entry(180, 90, 90),
    entry(150, 80, 70),
    entry(120, 70, 50),
];

/// UltraDMA (cycle, ready-to-pause) per mode.
const ULTRA_TABLE: [(u16, u16); 6] = [
    (120, 160),
    (80, 125),
    (60, 100),
    (45, 100),
    (30, 100),
    (20, 85),
];

/// Rated minimum cycle time per mode.
const PIO_MODE_CYCLE_NS: [u16; 5] = [600, 383, 240, 180, 120];
const DMA_MODE_CYCLE_NS: [u16; 3] = [480, 150, 120];

// 66 MHz layout.
const KL_PIO_ACCESS_SHIFT: u32 = 0;
const KL_PIO_RECOVERY_SHIFT: u32 = 5;
const KL_DMA_ACCESS_SHIFT: u32 = 11;
const KL_DMA_RECOVERY_SHIFT: u32 = 16;
const KL_ULTRA_ENABLE: u32 = 1 << 21;
const KL_ULTRA_CYCLE_SHIFT: u32 = 22;
const KL_ULTRA_RDY2PAUSE_SHIFT: u32 = 26;

// 100 MHz layout.
const KA_PIO_ACCESS_SHIFT: u32 = 0;
const KA_PIO_RECOVERY_SHIFT: u32 = 6;
const KA_DMA_ACCESS_SHIFT: u32 = 12;
const KA_DMA_RECOVERY_SHIFT: u32 = 18;
const KA_ULTRA_ENABLE: u32 = 1 << 0;
const KA_ULTRA_CYCLE_SHIFT: u32 = 1;
const KA_ULTRA_RDY2PAUSE_SHIFT: u32 = 6;

/// Read-direction UltraDMA on 66 MHz cells needs one extra ready-to-pause clock.
const KL_ULTRA_READ_ERRATUM: u32 = 1 << KL_ULTRA_RDY2PAUSE_SHIFT;

fn mode_bit(mode: u8) -> u8 {
    1u8.checked_shl(u32::from(mode)).unwrap_or(0)
}

fn highest_mode(mask: u8) -> Option<u8> {
    (mask != 0).then(|| 7 - mask.leading_zeros() as u8)
}

/// Index of the fastest entry whose cycle is not faster than `cycle_ns`. Falls back to the
/// slowest entry when even that is faster than requested.
fn nearest_floor(table: &[CycleEntry], cycle_ns: u16) -> usize {
    table
        .iter()
        .rposition(|e| e.cycle_ns >= cycle_ns)
        .unwrap_or(0)
}

fn effective_cycle(requested: u16, rated: u16) -> u16 {
    if requested == 0 {
        rated
    } else {
        requested.max(rated)
    }
}

fn clocks(ns: u16, period: u16, field_bits: u32) -> u32 {
    let max = (1u32 << field_bits) - 1;
    u32::from(ns.div_ceil(period)).min(max)
}

/// Map a mode request onto the register layout of `clock`.
pub fn compute_timing(clock: ClockClass, request: &TimingRequest) -> Result<TimingConfig> {
    if request.dma_modes != 0 && request.ultra_modes != 0 {
        return Err(AtaError::ModeConflict);
    }
    let pio_mode = highest_mode(request.pio_modes)
        .filter(|&mode| mode <= MAX_PIO_MODE)
        .ok_or(AtaError::ModeNotSupported)?;
    let pio = PIO_TABLE[nearest_floor(
        &PIO_TABLE,
        effective_cycle(request.pio_cycle_ns, PIO_MODE_CYCLE_NS[usize::from(pio_mode)]),
    )];

    let dma_mode = highest_mode(request.dma_modes).map(|mode| mode.min(MAX_DMA_MODE));
    let dma = dma_mode.map(|mode| {
        DMA_TABLE[nearest_floor(
            &DMA_TABLE,
            effective_cycle(request.dma_cycle_ns, DMA_MODE_CYCLE_NS[usize::from(mode)]),
        )]
    });
    let ultra_mode =
        highest_mode(request.ultra_modes).map(|mode| mode.min(clock.max_ultra_mode()));

    let period = clock.period_ns();
    let register = match clock {
        ClockClass::Mhz66 => {
            let mut primary = clocks(pio.access_ns, period, 5) << KL_PIO_ACCESS_SHIFT
                | clocks(pio.recovery_ns, period, 6) << KL_PIO_RECOVERY_SHIFT;
            if let Some(dma) = dma {
                primary |= clocks(dma.access_ns, period, 5) << KL_DMA_ACCESS_SHIFT
                    | clocks(dma.recovery_ns, period, 5) << KL_DMA_RECOVERY_SHIFT;
            }
            if let Some(mode) = ultra_mode {
                let (cycle, rdy2pause) = ULTRA_TABLE[usize::from(mode)];
                primary |= KL_ULTRA_ENABLE
                    | clocks(cycle, period, 4) << KL_ULTRA_CYCLE_SHIFT
                    | clocks(rdy2pause, period, 4) << KL_ULTRA_RDY2PAUSE_SHIFT;
            }
            TimingRegister { primary, ultra: 0 }
        }
        ClockClass::Mhz100 => {
            let mut primary = clocks(pio.access_ns, period, 6) << KA_PIO_ACCESS_SHIFT
                | clocks(pio.recovery_ns, period, 6) << KA_PIO_RECOVERY_SHIFT;
            if let Some(dma) = dma {
                primary |= clocks(dma.access_ns, period, 6) << KA_DMA_ACCESS_SHIFT
                    | clocks(dma.recovery_ns, period, 6) << KA_DMA_RECOVERY_SHIFT;
            }
            let ultra = ultra_mode.map_or(0, |mode| {
                let (cycle, rdy2pause) = ULTRA_TABLE[usize::from(mode)];
                KA_ULTRA_ENABLE
                    | clocks(cycle, period, 5) << KA_ULTRA_CYCLE_SHIFT
                    | clocks(rdy2pause, period, 5) << KA_ULTRA_RDY2PAUSE_SHIFT
            });
            TimingRegister { primary, ultra }
        }
    };

    Ok(TimingConfig {
        pio_modes: mode_bit(pio_mode),
        pio_cycle_ns: pio.cycle_ns,
        dma_modes: dma_mode.map_or(0, mode_bit),
        dma_cycle_ns: dma.map_or(0, |e| e.cycle_ns),
        ultra_modes: ultra_mode.map_or(0, mode_bit),
        register,
    })
}

/// Register value to program right before a read-direction UltraDMA activation.
pub fn apply_ultra_read_erratum(clock: ClockClass, register: TimingRegister) -> TimingRegister {
    match clock {
        ClockClass::Mhz66 if register.primary & KL_ULTRA_ENABLE != 0 => TimingRegister {
            primary: register.primary.wrapping_add(KL_ULTRA_READ_ERRATUM),
            ..register
        },
        _ => register,
    }
}
