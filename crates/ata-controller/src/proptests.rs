use crate::{compute_timing, AtaError, ClockClass, TimingRequest};
use proptest::prelude::*;

fn clock_strategy() -> impl Strategy<Value = ClockClass> {
    prop_oneof![Just(ClockClass::Mhz66), Just(ClockClass::Mhz100)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn longer_pio_cycle_never_selects_faster_entry(
        clock in clock_strategy(),
        mode in 0u8..=4,
        a in 0u16..1200,
        b in 0u16..1200,
    ) {
        let (slow, fast) = if a >= b { (a, b) } else { (b, a) };
        let slow = compute_timing(clock, &TimingRequest::pio(mode).with_pio_cycle(slow)).unwrap();
        let fast = compute_timing(clock, &TimingRequest::pio(mode).with_pio_cycle(fast)).unwrap();
        prop_assert!(slow.pio_cycle_ns >= fast.pio_cycle_ns);
    }

    #[test]
    fn longer_dma_cycle_never_selects_faster_entry(
        clock in clock_strategy(),
        mode in 0u8..=2,
        a in 0u16..1000,
        b in 0u16..1000,
    ) {
        let (slow, fast) = if a >= b { (a, b) } else { (b, a) };
        let base = TimingRequest::pio(0).with_dma(mode);
        let slow = compute_timing(clock, &base.with_dma_cycle(slow)).unwrap();
        let fast = compute_timing(clock, &base.with_dma_cycle(fast)).unwrap();
        prop_assert!(slow.dma_cycle_ns >= fast.dma_cycle_ns);
    }

    #[test]
    fn selection_is_idempotent(
        clock in clock_strategy(),
        pio_modes in 1u8..=0x1F,
        pio_cycle in 0u16..1200,
        dma_modes in any::<u8>(),
        dma_cycle in 0u16..1000,
        ultra_modes in any::<u8>(),
        use_ultra in any::<bool>(),
    ) {
        let request = TimingRequest {
            pio_modes,
            pio_cycle_ns: pio_cycle,
            dma_modes: if use_ultra { 0 } else { dma_modes },
            dma_cycle_ns: dma_cycle,
            ultra_modes: if use_ultra { ultra_modes } else { 0 },
        };
        let first = compute_timing(clock, &request).unwrap();
        let second = compute_timing(clock, &first.to_request()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn pio_above_mode_four_is_rejected(clock in clock_strategy(), mode in 5u8..=7) {
        prop_assert_eq!(
            compute_timing(clock, &TimingRequest::pio(mode)),
            Err(AtaError::ModeNotSupported)
        );
    }
}
