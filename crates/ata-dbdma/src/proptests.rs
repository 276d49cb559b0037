use crate::{
    build_chain, ChainScan, ChannelStatus, DbdmaRegisters, Descriptor, DescriptorArena,
    DmaDirection, DmaEngine, DmaState, MemoryRegion, PhysSegment, PhysicalMemory, TransferWindow,
};
use proptest::prelude::*;

const MAX_SEGMENTS: usize = 64;

#[derive(Default)]
struct IdleRegs {
    status: ChannelStatus,
}

impl DbdmaRegisters for IdleRegs {
    fn write_control(&mut self, mask: ChannelStatus, value: ChannelStatus) {
        let control = mask & (ChannelStatus::CONTROL_MASK - ChannelStatus::FLUSH);
        self.status = (self.status - control) | (value & control);
    }

    fn read_channel_status(&mut self) -> ChannelStatus {
        self.status
    }

    fn write_command_ptr(&mut self, _paddr: u32) {}
}

fn region_strategy() -> impl Strategy<Value = MemoryRegion> {
    prop::collection::vec(1u64..=0x8000, 1..MAX_SEGMENTS).prop_map(|lens| {
        let mut addr = 0x1000u64;
        MemoryRegion::new(lens.into_iter().map(|len| {
            let seg = PhysSegment { addr, len };
            addr += len + 0x1000;
            seg
        }))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pass_bytes_sum_to_request_size(
        region in region_strategy(),
        capacity in 3usize..40,
        max_entry in 0x200u32..=0xFFFF,
    ) {
        let mut mem = PhysicalMemory::new(0x10_0000);
        let arena = DescriptorArena::allocate(&mut mem, capacity).unwrap();
        let total = region.len();

        let mut moved = 0u64;
        let mut passes = 0usize;
        loop {
            let window = TransferWindow {
                region: Some(&region),
                offset: moved,
                remaining: total - moved,
                direction: DmaDirection::ToMemory,
            };
            let pass = build_chain(&arena, &mut mem, window, max_entry).unwrap();
            prop_assert!(pass.data_entries <= arena.data_capacity());
            prop_assert!(pass.bytes > 0);
            moved += pass.bytes;
            passes += 1;
            if pass.final_pass {
                break;
            }
            prop_assert!(passes < 1_000_000);
        }
        prop_assert_eq!(moved, total);
    }

    #[test]
    fn fault_never_reports_bytes_past_failing_entry(
        lens in prop::collection::vec(1u64..=0x4000, 1..32),
        fail_at in 0usize..32,
    ) {
        let mut mem = PhysicalMemory::new(0x40_0000);
        let arena = DescriptorArena::allocate(&mut mem, 35).unwrap();
        let mut engine = DmaEngine::new(arena, 0xFE00, 4);
        let mut regs = IdleRegs::default();

        let mut addr = 0x1000u64;
        let region = MemoryRegion::new(lens.iter().map(|&len| {
            let seg = PhysSegment { addr, len };
            addr += 0x4000;
            seg
        }));
        let window = TransferWindow {
            region: Some(&region),
            offset: 0,
            remaining: region.len(),
            direction: DmaDirection::ToMemory,
        };
        let pass = engine.start_transfer(&mut regs, &mut mem, window).unwrap();
        let fail_at = fail_at % pass.data_entries;

        let run = ChannelStatus::RUN | ChannelStatus::ACTIVE;
        for i in 0..fail_at {
            Descriptor::write_result(&mut mem, engine.arena().slot_addr(i), run, 0);
        }
        Descriptor::write_result(
            &mut mem,
            engine.arena().slot_addr(fail_at),
            run | ChannelStatus::DEAD,
            1,
        );
        regs.status.insert(ChannelStatus::DEAD);

        let preceding: u64 = lens[..fail_at].iter().sum();
        match engine.scan_completion_chain(&mut regs, &mut mem) {
            ChainScan::Fault { bytes } => prop_assert!(bytes <= preceding),
            other => prop_assert!(false, "expected fault, got {:?}", other),
        }
        prop_assert_eq!(engine.state(), DmaState::Status);
    }
}
