mod harness;

use ata_controller::{
    AtaError, Completion, ControllerConfig, KeyLargo, TaskFile, TransferRequest,
    ATA_CMD_READ_DMA, ATA_CMD_READ_DMA_EXT, ATA_CMD_WRITE_DMA_EXT, ATA_ERROR_ABRT,
    ATA_STATUS_DRDY, ATA_STATUS_ERR,
};
use ata_dbdma::{DmaError, DmaState, MemoryBus, MemoryRegion};
use ata_emu::{ChannelRun, EmulatedCell, SECTOR_SIZE};
use harness::{patterned_disk, read_region, scattered, Bench, Order, DISK_SECTORS};

#[test]
fn single_pass_read_lands_in_memory() {
    let mut bench = Bench::keylargo();
    let region = MemoryRegion::contiguous(0x1_0000, 8 * SECTOR_SIZE as u64);
    let tf = TaskFile::lba(ATA_CMD_READ_DMA, 4, 8);
    bench
        .submit(TransferRequest::dma_read(0, tf, region.clone(), region.len()))
        .unwrap();
    assert_eq!(bench.ctrl.dma_state(), DmaState::Status);

    bench.settle(Order::DmaFirst);

    assert_eq!(
        bench.completions(),
        vec![Completion {
            unit: 0,
            result: Ok(()),
            bytes_transferred: region.len(),
        }]
    );
    assert_eq!(
        bench.ctrl.dma_history(),
        &[
            DmaState::Starting,
            DmaState::Status,
            DmaState::Complete,
            DmaState::Inactive
        ]
    );
    let expected =
        bench.cell().drive(0).unwrap().media()[4 * SECTOR_SIZE..12 * SECTOR_SIZE].to_vec();
    assert_eq!(read_region(&mut bench.mem, &region), expected);
    assert_eq!(bench.cell().channel().activations(), 1);
    assert_eq!(bench.cell().channel().stops(), 1);
}

#[test]
fn large_scattered_read_chains_without_stopping_the_channel() {
    let mut bench = Bench::keylargo();
    let region = scattered(0, 600, SECTOR_SIZE as u64);
    let tf = TaskFile::lba(ATA_CMD_READ_DMA_EXT, 0, 600);
    bench
        .submit(TransferRequest::dma_read(0, tf, region.clone(), region.len()))
        .unwrap();

    bench.settle(Order::DmaFirst);

    let done = bench.completions();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].result, Ok(()));
    assert_eq!(done[0].bytes_transferred, 600 * SECTOR_SIZE as u64);

    // 33 data entries per chain: ceil(600 / 33) activations, one stop at the very end.
    assert_eq!(bench.cell().channel().activations(), 19);
    assert_eq!(bench.cell().channel().stops(), 1);

    let expected = bench.cell().drive(0).unwrap().media()[..600 * SECTOR_SIZE].to_vec();
    assert_eq!(read_region(&mut bench.mem, &region), expected);
}

#[test]
fn write_reaches_media() {
    let mut bench = Bench::keylargo();
    let region = scattered(0x4_0000, 3, 2 * SECTOR_SIZE as u64);
    let payload: Vec<u8> = (0..region.len()).map(|i| (i * 7) as u8).collect();
    harness::fill_region(&mut bench.mem, &region, &payload);

    let tf = TaskFile::lba(ATA_CMD_WRITE_DMA_EXT, 100, 6);
    bench
        .submit(TransferRequest::dma_write(0, tf, region.clone(), region.len()))
        .unwrap();
    bench.settle(Order::DeviceFirst);

    assert_eq!(bench.completions()[0].result, Ok(()));
    let media = bench.cell().drive(0).unwrap().media();
    assert_eq!(&media[100 * SECTOR_SIZE..106 * SECTOR_SIZE], &payload[..]);
}

#[test]
fn small_descriptor_limit_splits_entries_across_passes() {
    let cell = EmulatedCell::new().with_drive(0, patterned_disk(DISK_SECTORS));
    let config = ControllerConfig {
        descriptor_capacity: 4,
        max_descriptor_bytes: 0x200,
        ..ControllerConfig::default()
    };
    let mut bench = Bench::new(cell, Box::new(KeyLargo), config);
    let region = MemoryRegion::contiguous(0x2_0000, 0x1000);
    let tf = TaskFile::lba(ATA_CMD_READ_DMA, 0, 8);
    bench
        .submit(TransferRequest::dma_read(0, tf, region.clone(), region.len()))
        .unwrap();
    bench.settle(Order::DeviceFirst);

    assert_eq!(bench.completions()[0].result, Ok(()));
    // Two 0x200 entries per chain.
    assert_eq!(bench.cell().channel().activations(), 4);
    assert_eq!(bench.cell().channel().stops(), 1);
}

#[test]
fn dead_channel_reports_bytes_before_the_failing_entry() {
    let mut bench = Bench::keylargo();
    let region = scattered(0, 4, SECTOR_SIZE as u64);
    let tf = TaskFile::lba(ATA_CMD_READ_DMA, 0, 4);
    bench.cell().channel_mut().inject_dead_at(2);
    bench
        .submit(TransferRequest::dma_read(0, tf, region.clone(), region.len()))
        .unwrap();

    assert_eq!(bench.run_dma(), ChannelRun::Dead);
    assert!(bench.deliver_dma());

    let done = bench.completions();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].result, Err(AtaError::Dma(DmaError::HardwareError)));
    assert_eq!(done[0].bytes_transferred, 2 * SECTOR_SIZE as u64);
    assert_eq!(bench.ctrl.dma_state(), DmaState::Inactive);
    assert!(bench.ctrl.dma_history().contains(&DmaState::Error));

    // The drive's abort interrupt finds nothing in flight; the next command still works.
    bench.settle(Order::DeviceFirst);
    let tf = TaskFile::lba(ATA_CMD_READ_DMA, 0, 4);
    bench
        .submit(TransferRequest::dma_read(0, tf, region.clone(), region.len()))
        .unwrap();
    bench.settle(Order::DmaFirst);
    assert_eq!(bench.completions()[1].result, Ok(()));
}

#[test]
fn stalled_chain_interrupt_is_ignored_until_it_finishes() {
    let mut bench = Bench::keylargo();
    let region = scattered(0, 3, SECTOR_SIZE as u64);
    let tf = TaskFile::lba(ATA_CMD_READ_DMA, 0, 3);
    bench.cell().channel_mut().inject_stall_at(1);
    bench
        .submit(TransferRequest::dma_read(0, tf, region.clone(), region.len()))
        .unwrap();

    assert_eq!(bench.run_dma(), ChannelRun::Stalled);
    assert!(bench.deliver_dma());
    assert!(bench.completions().is_empty());
    assert_eq!(bench.ctrl.dma_state(), DmaState::Status);

    bench.settle(Order::DmaFirst);
    assert_eq!(bench.completions()[0].result, Ok(()));
    assert_eq!(bench.completions()[0].bytes_transferred, region.len());
}

#[test]
fn device_error_stops_dma_and_reports_registers() {
    let mut bench = Bench::keylargo();
    bench.cell().drive_mut(0).unwrap().inject_error(ATA_ERROR_ABRT);
    let region = MemoryRegion::contiguous(0x1_0000, SECTOR_SIZE as u64);
    let tf = TaskFile::lba(ATA_CMD_READ_DMA, 0, 1);
    bench
        .submit(TransferRequest::dma_read(0, tf, region.clone(), region.len()))
        .unwrap();

    assert!(bench.deliver_device());
    assert_eq!(
        bench.completions()[0].result,
        Err(AtaError::DeviceError {
            status: ATA_STATUS_DRDY | ATA_STATUS_ERR,
            error: ATA_ERROR_ABRT,
        })
    );
    assert_eq!(bench.ctrl.dma_state(), DmaState::Inactive);
    assert_eq!(bench.cell().channel().stops(), 1);
}

#[test]
fn requests_complete_in_submission_order() {
    let mut bench = Bench::keylargo();
    for lba in 0..3u64 {
        let region = MemoryRegion::contiguous(0x1_0000 * (lba + 1), SECTOR_SIZE as u64);
        let tf = TaskFile::lba(ATA_CMD_READ_DMA, lba, 1);
        bench
            .submit(TransferRequest::dma_read(0, tf, region, SECTOR_SIZE as u64))
            .unwrap();
    }
    assert_eq!(bench.ctrl.queued(), 2);

    bench.settle(Order::DmaFirst);

    let done = bench.completions();
    assert_eq!(done.len(), 3);
    assert!(done.iter().all(|c| c.result.is_ok()));
    assert_eq!(bench.cell().drive(0).unwrap().commands().len(), 3);
    for lba in 0..3u64 {
        let mut got = vec![0u8; SECTOR_SIZE];
        bench.mem.read_physical(0x1_0000 * (lba + 1), &mut got);
        let start = lba as usize * SECTOR_SIZE;
        assert_eq!(got, bench.cell().drive(0).unwrap().media()[start..start + SECTOR_SIZE]);
    }
}
