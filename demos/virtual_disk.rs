//! Virtual disk example
//!
//! This example attaches a hard disk (in memory, or backed by the image file
//! given as the first argument) and an empty CD-ROM drive to target 0, then
//! plays the initiator on an in-memory bus: it identifies the drives, writes
//! a block and reads it back.
//!
//! Run with `RUST_LOG=debug` to follow the bus phases.

use scsi_emulator::scsi::{message, scsi_status};
use scsi_emulator::{DeviceConfig, DeviceKind, MemoryBus, ScsiTarget};
use std::sync::Arc;

const INITIATOR_ID: u8 = 7;
const TARGET_ID: u8 = 0;

/// Run one command through the target and return (DATA IN, status)
fn transact(
    bus: &MemoryBus,
    target: &mut ScsiTarget<MemoryBus>,
    lun: u8,
    cdb: &[u8],
    data_out: &[u8],
) -> Result<(Vec<u8>, u8), Box<dyn std::error::Error>> {
    bus.take_sent();
    bus.select(INITIATOR_ID, TARGET_ID, &[message::IDENTIFY | lun]);
    bus.queue(cdb);
    bus.queue(data_out);

    // Bus free -> selection
    target.step()?;
    while !target.controller().is_bus_free() {
        target.step()?;
    }

    let mut sent = bus.take_sent();
    let _complete = sent.pop();
    let status = sent.pop().ok_or("target sent no status")?;
    Ok((sent, status))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let disk = match std::env::args().nth(1) {
        Some(path) => DeviceConfig::new(0).path(path),
        // 16 MiB in memory
        None => DeviceConfig::new(0).kind(DeviceKind::HardDisk).blocks(32768),
    };

    let bus = Arc::new(MemoryBus::new());
    let mut target = ScsiTarget::builder()
        .bus(Arc::clone(&bus))
        .target_id(TARGET_ID)
        .device(disk.identification("EMULATOR:VIRTUAL DISK:0100")?)
        .device(DeviceConfig::new(1).kind(DeviceKind::CdRom))
        .build()?;

    println!("SCSI target {} with {} LUN(s)", TARGET_ID, target.registry().lun_count());

    for lun in 0..2u8 {
        let (inquiry, _) = transact(&bus, &mut target, lun, &[0x12, 0, 0, 0, 36, 0], &[])?;
        println!(
            "  LUN {}: type ${:02X} '{}'",
            lun,
            inquiry[0],
            String::from_utf8_lossy(&inquiry[8..36]).trim_end()
        );
    }

    let (capacity, _) = transact(&bus, &mut target, 0, &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0], &[])?;
    let last_lba = u32::from_be_bytes([capacity[0], capacity[1], capacity[2], capacity[3]]);
    let block_size = u32::from_be_bytes([capacity[4], capacity[5], capacity[6], capacity[7]]);
    println!("\nDisk capacity: {} blocks of {} bytes", u64::from(last_lba) + 1, block_size);

    let block: Vec<u8> = (0..block_size).map(|i| (i % 256) as u8).collect();
    let (_, status) = transact(&bus, &mut target, 0, &[0x2A, 0, 0, 0, 0, 0, 0, 0, 1, 0], &block)?;
    println!("WRITE(10) LBA 0: status ${:02X}", status);

    let (data, status) = transact(&bus, &mut target, 0, &[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0], &[])?;
    println!(
        "READ(10) LBA 0: status ${:02X}, data {}",
        status,
        if data == block { "matches" } else { "differs" }
    );

    let (_, status) = transact(&bus, &mut target, 1, &[0x00; 6], &[])?;
    if status == scsi_status::CHECK_CONDITION {
        let (sense, _) = transact(&bus, &mut target, 1, &[0x03, 0, 0, 0, 18, 0], &[])?;
        println!(
            "\nCD-ROM not ready: sense key ${:02X}, ASC ${:02X}",
            sense[2], sense[12]
        );
    }

    Ok(())
}
