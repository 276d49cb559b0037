mod harness;

use ata_controller::{
    AtaError, BusEvent, ControllerConfig, InterruptSource, KeyLargo, TaskFile, TimingRequest,
    TransferRequest,
    ATA_CMD_FLUSH_CACHE, ATA_CMD_READ_DMA, ATA_CMD_READ_SECTORS, ATA_CMD_WRITE_SECTORS,
};
use ata_dbdma::{DmaAllocator, DmaState, MemoryRegion};
use ata_emu::{EmulatedCell, EmulatedDrive, SECTOR_SIZE};
use harness::{Bench, Order};

const MS: u64 = 1_000_000;

fn dma_read(lba: u64) -> TransferRequest {
    let region = MemoryRegion::contiguous(0x1_0000 + lba * 0x1000, SECTOR_SIZE as u64);
    TransferRequest::dma_read(0, TaskFile::lba(ATA_CMD_READ_DMA, lba, 1), region, 512)
}

#[test]
fn hung_drive_times_out_and_bus_is_reset() {
    let mut bench = Bench::keylargo();
    bench.cell().drive_mut(0).unwrap().inject_hang();
    bench.submit(dma_read(0).timeout_ms(5)).unwrap();
    bench.submit(dma_read(1)).unwrap();

    bench.ctrl.tick(&mut bench.mem, 4 * MS);
    assert!(bench.completions().is_empty());
    assert!(!bench.ctrl.timed_out(4 * MS));

    bench.ctrl.tick(&mut bench.mem, 5 * MS);
    let done = bench.completions();
    assert_eq!(done[0].result, Err(AtaError::Timeout));
    assert_eq!(bench.events(), vec![BusEvent::BusReset]);

    // The reset cleared the hang; the queued read proceeds.
    assert_eq!(bench.ctrl.current_unit(), Some(0));
    bench.settle(Order::DmaFirst);
    assert_eq!(bench.completions()[1].result, Ok(()));
}

#[test]
fn external_reset_interrupts_command_in_flight() {
    let mut bench = Bench::keylargo();
    bench.submit(dma_read(0)).unwrap();
    bench.submit(dma_read(1)).unwrap();

    bench.ctrl.handle_bus_reset(&mut bench.mem).unwrap();

    assert_eq!(bench.completions()[0].result, Err(AtaError::ResetInterrupted));
    assert_eq!(bench.events(), vec![BusEvent::BusReset]);

    bench.settle(Order::DeviceFirst);
    assert_eq!(bench.completions().len(), 2);
    assert_eq!(bench.completions()[1].result, Ok(()));
}

#[test]
fn atapi_device_reset_only_touches_its_unit() {
    let cell = EmulatedCell::new()
        .with_drive(0, EmulatedDrive::new(16))
        .with_drive(1, EmulatedDrive::new(16));
    let mut bench = Bench::new(cell, Box::new(KeyLargo), ControllerConfig::default());

    bench.submit(TransferRequest::device_reset(1)).unwrap();

    assert_eq!(bench.completions()[0].result, Ok(()));
    assert_eq!(bench.events(), vec![BusEvent::UnitReset { unit: 1 }]);
    assert!(bench.cell().drive(0).unwrap().commands().is_empty());
    assert_eq!(bench.cell().drive(1).unwrap().commands().len(), 1);
}

#[test]
fn bus_reset_request_resets_every_unit() {
    let mut bench = Bench::keylargo();
    bench.submit(TransferRequest::bus_reset(0)).unwrap();
    assert_eq!(bench.completions()[0].result, Ok(()));
    assert_eq!(bench.events(), vec![BusEvent::BusReset]);
}

#[test]
fn removal_fails_everything_and_is_idempotent() {
    let mut bench = Bench::keylargo();
    bench.submit(dma_read(0)).unwrap();
    bench.submit(dma_read(1)).unwrap();
    bench.submit(dma_read(2)).unwrap();

    bench.cell().remove();
    bench.ctrl.on_bus_removed();
    bench.ctrl.on_bus_removed();

    let done = bench.completions();
    assert_eq!(done.len(), 3);
    assert!(done.iter().all(|c| c.result == Err(AtaError::Offline)));
    assert_eq!(bench.events(), vec![BusEvent::Terminated]);
    assert!(bench.ctrl.is_terminated());
    assert!(!bench.cell().interrupts_enabled(InterruptSource::Device));
    assert!(!bench.cell().interrupts_enabled(InterruptSource::Dma));

    // Late interrupts and new work are refused without touching the hardware.
    bench.ctrl.handle_dma_interrupt(&mut bench.mem);
    bench.ctrl.handle_device_interrupt(&mut bench.mem);
    assert_eq!(bench.submit(dma_read(3)), Err(AtaError::Offline));
    assert_eq!(bench.completions().len(), 4);
    assert_eq!(bench.completions()[3].result, Err(AtaError::Offline));
    assert_eq!(
        bench.ctrl.handle_bus_reset(&mut bench.mem),
        Err(AtaError::Offline)
    );
    assert!(bench.ctrl.timed_out(0));
}

#[test]
fn mode_select_after_removal_is_offline() {
    let mut bench = Bench::keylargo();
    let before = bench.ctrl.get_config(0).unwrap();
    bench.cell().remove();
    bench.ctrl.on_bus_removed();

    assert_eq!(
        bench
            .ctrl
            .select_config(0, &TimingRequest::pio(4).with_ultra(4)),
        Err(AtaError::Offline)
    );
    assert_eq!(bench.ctrl.get_config(0), Err(AtaError::Offline));
    assert!(bench.cell().timing_writes().is_empty());
    assert_ne!(before.ultra_mode(), Some(4));
}

#[test]
fn teardown_returns_descriptor_memory() {
    let mut bench = Bench::keylargo();
    let allocated = bench.mem.allocated_bytes();
    assert!(allocated > 0);

    bench.submit(dma_read(0)).unwrap();
    let harness::Bench { ctrl, mut mem, done, .. } = bench;
    let cell = ctrl.teardown(&mut mem);

    assert_eq!(mem.allocated_bytes(), 0);
    assert_eq!(done.borrow()[0].result, Err(AtaError::Offline));
    assert_eq!(cell.drive(0).unwrap().commands(), &[ATA_CMD_READ_DMA]);

    // The slot can be handed out again.
    assert!(mem.alloc_contiguous(16, 16).is_some());
}

#[test]
fn pio_round_trip() {
    let mut bench = Bench::keylargo();
    let out = MemoryRegion::contiguous(0x1_0000, 3 * SECTOR_SIZE as u64);
    let payload: Vec<u8> = (0..out.len()).map(|i| (i % 13) as u8 + 1).collect();
    harness::fill_region(&mut bench.mem, &out, &payload);
    let tf = TaskFile::lba(ATA_CMD_WRITE_SECTORS, 40, 3);
    bench
        .submit(TransferRequest::pio_write(0, tf, out.clone(), out.len()))
        .unwrap();
    bench.settle(Order::DeviceFirst);
    assert_eq!(bench.completions()[0].result, Ok(()));
    assert_eq!(bench.completions()[0].bytes_transferred, out.len());

    let back = MemoryRegion::contiguous(0x2_0000, 3 * SECTOR_SIZE as u64);
    let tf = TaskFile::lba(ATA_CMD_READ_SECTORS, 40, 3);
    bench
        .submit(TransferRequest::pio_read(0, tf, back.clone(), back.len()))
        .unwrap();
    bench.settle(Order::DeviceFirst);
    assert_eq!(bench.completions()[1].result, Ok(()));
    assert_eq!(harness::read_region(&mut bench.mem, &back), payload);
}

#[test]
fn non_data_command_completes_on_interrupt() {
    let mut bench = Bench::kauai();
    bench
        .submit(TransferRequest::non_data(0, TaskFile::new(ATA_CMD_FLUSH_CACHE)))
        .unwrap();
    assert!(bench.deliver_device());
    assert_eq!(bench.completions()[0].result, Ok(()));
    assert_eq!(bench.ctrl.dma_history(), &[] as &[DmaState]);
}
