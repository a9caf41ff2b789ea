//! CD-ROM commands
//!
//! A CD-ROM shares the read side of the disk command set and adds READ TOC.
//! The emulated disc always holds a single data track starting at LBA 0.

use super::disk;
use super::{CommandContext, CommandEntry, Device};
use crate::error::ScsiResult;
use crate::scsi::{ScsiOpcode, SenseData};
use byteorder::{BigEndian, ByteOrder};

pub(crate) const COMMANDS: &[CommandEntry] = &[
    (ScsiOpcode::Rezero, disk::rezero),
    (ScsiOpcode::Read6, disk::read_6),
    (ScsiOpcode::Seek6, disk::seek),
    (ScsiOpcode::ModeSelect6, disk::mode_select_6),
    (ScsiOpcode::ModeSense6, disk::mode_sense_6),
    (ScsiOpcode::StartStopUnit, disk::start_stop_unit),
    (ScsiOpcode::PreventAllowMediumRemoval, disk::prevent_allow_medium_removal),
    (ScsiOpcode::ReadCapacity10, disk::read_capacity_10),
    (ScsiOpcode::Read10, disk::read_10),
    (ScsiOpcode::Seek10, disk::seek),
    (ScsiOpcode::SynchronizeCache10, disk::synchronize_cache),
    (ScsiOpcode::ReadDefectData10, disk::read_defect_data_10),
    (ScsiOpcode::ReadToc, read_toc),
    (ScsiOpcode::ModeSelect10, disk::mode_select_10),
    (ScsiOpcode::ModeSense10, disk::mode_sense_10),
    (ScsiOpcode::Read16, disk::read_16),
    (ScsiOpcode::SynchronizeCache16, disk::synchronize_cache),
    (ScsiOpcode::ServiceActionIn16, disk::service_action_in_16),
];

/// ADR 1 (current position), control 4 (data track)
const ADR_CONTROL_DATA: u8 = 0x14;
const LEAD_OUT_TRACK: u8 = 0xAA;

/// Frames per second and the two second pregap in front of track 1
const FRAMES_PER_SECOND: u64 = 75;
const PREGAP_FRAMES: u64 = 150;

/// Track start as a 4 byte TOC address, either LBA or 0/M/S/F
fn toc_address(lba: u64, msf: bool) -> [u8; 4] {
    let mut address = [0u8; 4];
    if msf {
        let frames = lba + PREGAP_FRAMES;
        address[1] = (frames / (60 * FRAMES_PER_SECOND)).min(0xFF) as u8;
        address[2] = ((frames / FRAMES_PER_SECOND) % 60) as u8;
        address[3] = (frames % FRAMES_PER_SECOND) as u8;
    } else {
        BigEndian::write_u32(&mut address, lba.min(u64::from(u32::MAX)) as u32);
    }
    address
}

fn track_descriptor(track: u8, lba: u64, msf: bool) -> [u8; 8] {
    let mut desc = [0u8; 8];
    desc[1] = ADR_CONTROL_DATA;
    desc[2] = track;
    desc[4..8].copy_from_slice(&toc_address(lba, msf));
    desc
}

/// READ TOC (0x43)
fn read_toc(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()?;

    let cdb = ctx.cdb();
    let msf = cdb[1] & 0x02 != 0;
    let start_track = cdb[6];
    let alloc_len = BigEndian::read_u16(&cdb[7..9]) as usize;

    let mut descriptors = Vec::with_capacity(16);
    match start_track {
        0 | 1 => {
            descriptors.extend_from_slice(&track_descriptor(1, 0, msf));
            descriptors.extend_from_slice(&track_descriptor(LEAD_OUT_TRACK, dev.block_count(), msf));
        }
        LEAD_OUT_TRACK => {
            descriptors.extend_from_slice(&track_descriptor(LEAD_OUT_TRACK, dev.block_count(), msf));
        }
        _ => return Err(SenseData::invalid_field().into()),
    }

    let mut data = vec![0u8; 4];
    // TOC data length excludes the length field itself
    BigEndian::write_u16(&mut data[0..2], (2 + descriptors.len()) as u16);
    data[2] = 1; // First track
    data[3] = 1; // Last track
    data.extend_from_slice(&descriptors);

    ctx.data_in(&data, alloc_len);
    Ok(())
}
