//! Direct-access block commands (SCSI-2 chapter 9, a few SBC additions)
//!
//! Data transfers are split into chunks of at most [`CHUNK_BYTES`] so the
//! data buffer stays small for large READs and WRITEs. The buffer's block
//! progress tracks where the next chunk starts and how many blocks are left.

use super::{CommandContext, CommandEntry, Device};
use crate::buffer::TransferBuffer;
use crate::error::ScsiResult;
use crate::mode_page;
use crate::scsi::{
    asc, ascq, parse_rw10_cdb, parse_rw16_cdb, parse_rw6_cdb, sense_key, ScsiOpcode, SenseData,
};
use byteorder::{BigEndian, ByteOrder};

/// Upper bound of a single data phase chunk
pub const CHUNK_BYTES: u32 = 65536;

pub(crate) const COMMANDS: &[CommandEntry] = &[
    (ScsiOpcode::Rezero, rezero),
    (ScsiOpcode::FormatUnit, format_unit),
    (ScsiOpcode::ReassignBlocks, reassign_blocks),
    (ScsiOpcode::Read6, read_6),
    (ScsiOpcode::Write6, write_6),
    (ScsiOpcode::Seek6, seek),
    (ScsiOpcode::ModeSelect6, mode_select_6),
    (ScsiOpcode::ModeSense6, mode_sense_6),
    (ScsiOpcode::StartStopUnit, start_stop_unit),
    (ScsiOpcode::PreventAllowMediumRemoval, prevent_allow_medium_removal),
    (ScsiOpcode::ReadCapacity10, read_capacity_10),
    (ScsiOpcode::Read10, read_10),
    (ScsiOpcode::Write10, write_10),
    (ScsiOpcode::Seek10, seek),
    (ScsiOpcode::Verify10, verify_10),
    (ScsiOpcode::SynchronizeCache10, synchronize_cache),
    (ScsiOpcode::ReadDefectData10, read_defect_data_10),
    (ScsiOpcode::ModeSelect10, mode_select_10),
    (ScsiOpcode::ModeSense10, mode_sense_10),
    (ScsiOpcode::Read16, read_16),
    (ScsiOpcode::Write16, write_16),
    (ScsiOpcode::Verify16, verify_16),
    (ScsiOpcode::SynchronizeCache16, synchronize_cache),
    (ScsiOpcode::ServiceActionIn16, service_action_in_16),
];

fn chunk_blocks(sector_size: u32) -> u32 {
    (CHUNK_BYTES / sector_size.max(1)).max(1)
}

/// REZERO UNIT (0x01)
pub(crate) fn rezero(dev: &mut Device, _ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()
}

/// SEEK (6) - 0x0B / SEEK (10) - 0x2B
pub(crate) fn seek(dev: &mut Device, _ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()
}

/// FORMAT UNIT (0x04)
fn format_unit(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()?;
    dev.check_writable()?;

    // A defect list (FMTDATA) is not supported
    if ctx.cdb()[1] & 0x10 != 0 {
        return Err(SenseData::invalid_field().into());
    }
    Ok(())
}

/// REASSIGN BLOCKS (0x07)
fn reassign_blocks(dev: &mut Device, _ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()
}

/// READ (6) - 0x08
pub(crate) fn read_6(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw6_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_read(dev, ctx, lba, blocks)
}

/// READ (10) - 0x28
pub(crate) fn read_10(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw10_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_read(dev, ctx, lba, blocks)
}

/// READ (16) - 0x88
pub(crate) fn read_16(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw16_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_read(dev, ctx, lba, blocks)
}

fn start_read(dev: &mut Device, ctx: &mut CommandContext<'_>, lba: u64, blocks: u32) -> ScsiResult<()> {
    dev.check_ready()?;

    if blocks == 0 {
        return Ok(());
    }

    dev.check_range(lba, blocks)?;

    log::debug!("LUN {}: reading {} block(s) at LBA {}", dev.lun(), blocks, lba);

    ctx.buffer().set_block_progress(lba, blocks);
    read_chunk(dev, ctx.buffer())?;
    ctx.enter_data_in();
    Ok(())
}

/// Load the next chunk of a read into the buffer window
///
/// On return the block progress points past the loaded chunk.
pub(crate) fn read_chunk(dev: &Device, buffer: &mut TransferBuffer) -> ScsiResult<()> {
    let lba = buffer.next_block();
    let remaining = buffer.blocks();
    let count = remaining.min(chunk_blocks(dev.sector_size()));

    let data = dev.store()?.read(lba, count, dev.sector_size())?;
    buffer.load(&data);
    buffer.set_block_progress(lba + u64::from(count), remaining - count);
    Ok(())
}

/// WRITE (6) - 0x0A
fn write_6(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw6_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_write(dev, ctx, lba, blocks)
}

/// WRITE (10) - 0x2A
fn write_10(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw10_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_write(dev, ctx, lba, blocks)
}

/// WRITE (16) - 0x8A
fn write_16(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw16_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_write(dev, ctx, lba, blocks)
}

fn start_write(dev: &mut Device, ctx: &mut CommandContext<'_>, lba: u64, blocks: u32) -> ScsiResult<()> {
    dev.check_ready()?;
    dev.check_writable()?;

    if blocks == 0 {
        return Ok(());
    }

    dev.check_range(lba, blocks)?;
    dev.store()?;

    log::debug!("LUN {}: writing {} block(s) at LBA {}", dev.lun(), blocks, lba);

    expect_chunk(dev, ctx, lba, blocks);
    Ok(())
}

/// Open a DATA OUT window for the next chunk starting at `lba`
///
/// For incoming data the block progress counts the pending chunk too.
fn expect_chunk(dev: &Device, ctx: &mut CommandContext<'_>, lba: u64, blocks: u32) {
    let count = blocks.min(chunk_blocks(dev.sector_size()));
    let buffer = ctx.buffer();
    buffer.set_block_progress(lba, blocks);
    buffer.expect(count as usize * dev.sector_size() as usize);
    ctx.enter_data_out();
}

/// Take the received chunk off the buffer and advance the block progress
fn received_chunk(dev: &Device, ctx: &mut CommandContext<'_>) -> (u64, Vec<u8>) {
    let lba = ctx.buffer().next_block();
    let remaining = ctx.buffer().blocks();
    let data = ctx.transferred().to_vec();
    let count = (data.len() / dev.sector_size().max(1) as usize) as u32;
    ctx.buffer().set_block_progress(lba + u64::from(count), remaining.saturating_sub(count));
    (lba, data)
}

fn next_chunk_or_complete(dev: &Device, ctx: &mut CommandContext<'_>) {
    let lba = ctx.buffer().next_block();
    let remaining = ctx.buffer().blocks();
    if remaining > 0 {
        expect_chunk(dev, ctx, lba, remaining);
    } else {
        ctx.complete();
    }
}

/// Write a chunk received in DATA OUT and ask for the next one
pub(crate) fn write_chunk(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, data) = received_chunk(dev, ctx);
    let sector_size = dev.sector_size();
    dev.store_mut()?.write(lba, &data, sector_size)?;
    next_chunk_or_complete(dev, ctx);
    Ok(())
}

/// Compare a chunk received in DATA OUT with the medium (VERIFY with BYTCHK)
pub(crate) fn verify_chunk(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, data) = received_chunk(dev, ctx);
    let blocks = (data.len() / dev.sector_size().max(1) as usize) as u32;
    let stored = dev.store()?.read(lba, blocks, dev.sector_size())?;
    if stored != data {
        return Err(SenseData::new(sense_key::MISCOMPARE, asc::MISCOMPARE_DURING_VERIFY, 0)
            .with_info((lba & 0xFFFF_FFFF) as u32)
            .into());
    }
    next_chunk_or_complete(dev, ctx);
    Ok(())
}

/// VERIFY (10) - 0x2F
fn verify_10(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw10_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_verify(dev, ctx, lba, blocks)
}

/// VERIFY (16) - 0x8F
fn verify_16(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let (lba, blocks) = parse_rw16_cdb(ctx.cdb()).ok_or_else(SenseData::invalid_command)?;
    start_verify(dev, ctx, lba, blocks)
}

fn start_verify(dev: &mut Device, ctx: &mut CommandContext<'_>, lba: u64, blocks: u32) -> ScsiResult<()> {
    dev.check_ready()?;
    dev.check_range(lba, blocks)?;

    // Without BYTCHK only the medium is checked, which always succeeds
    if ctx.cdb()[1] & 0x02 == 0 || blocks == 0 {
        return Ok(());
    }

    dev.store()?;
    expect_chunk(dev, ctx, lba, blocks);
    Ok(())
}

/// READ CAPACITY (10) - 0x25
pub(crate) fn read_capacity_10(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()?;

    // Response is 8 bytes: last LBA (4 bytes) + block size (4 bytes)
    let mut data = vec![0u8; 8];

    // Last logical block address (or 0xFFFFFFFF if > 2TB)
    let last_lba = dev.block_count().saturating_sub(1);
    let last_lba_32 = if last_lba > 0xFFFF_FFFE {
        0xFFFF_FFFF_u32 // Signal to use READ CAPACITY 16
    } else {
        last_lba as u32
    };

    BigEndian::write_u32(&mut data[0..4], last_lba_32);
    BigEndian::write_u32(&mut data[4..8], dev.sector_size());

    ctx.data_in(&data, data.len());
    Ok(())
}

/// SERVICE ACTION IN (16) - only READ CAPACITY 16
pub(crate) fn service_action_in_16(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let cdb = ctx.cdb();

    // 0x10 = READ CAPACITY 16
    if cdb[1] & 0x1F != 0x10 {
        return Err(SenseData::invalid_field().into());
    }

    let alloc_len = BigEndian::read_u32(&cdb[10..14]) as usize;

    dev.check_ready()?;

    // Response is 32 bytes for READ CAPACITY 16
    let mut data = vec![0u8; 32];
    BigEndian::write_u64(&mut data[0..8], dev.block_count().saturating_sub(1));
    BigEndian::write_u32(&mut data[8..12], dev.sector_size());

    ctx.data_in(&data, alloc_len);
    Ok(())
}

/// SYNCHRONIZE CACHE (10) - 0x35 / (16) - 0x91
pub(crate) fn synchronize_cache(dev: &mut Device, _ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()?;
    dev.store_mut()?.flush()
}

/// START STOP UNIT (0x1B)
pub(crate) fn start_stop_unit(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let start = ctx.cdb()[4] & 0x01 != 0;
    let load_eject = ctx.cdb()[4] & 0x02 != 0;

    if load_eject && !start {
        if !dev.is_removable() {
            return Err(SenseData::invalid_field().into());
        }
        if dev.is_locked() {
            return Err(SenseData::new(
                sense_key::ILLEGAL_REQUEST,
                asc::MEDIUM_REMOVAL_PREVENTED,
                ascq::MEDIUM_REMOVAL_PREVENTED,
            )
            .into());
        }
        dev.eject();
        return Ok(());
    }

    dev.set_stopped(!start);
    Ok(())
}

/// PREVENT ALLOW MEDIUM REMOVAL (0x1E)
pub(crate) fn prevent_allow_medium_removal(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()?;
    let prevent = ctx.cdb()[4] & 0x01 != 0;
    log::debug!("LUN {}: medium removal {}", dev.lun(), if prevent { "prevented" } else { "allowed" });
    dev.set_locked(prevent);
    Ok(())
}

/// READ DEFECT DATA (10) - 0x37
pub(crate) fn read_defect_data_10(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()?;

    let cdb = ctx.cdb();
    let alloc_len = BigEndian::read_u16(&cdb[7..9]) as usize;

    // Header only: an empty defect list in the requested format
    let data = [0x00, cdb[2] & 0x1F, 0x00, 0x00];
    ctx.data_in(&data, alloc_len);
    Ok(())
}

/// MODE SELECT (6) - 0x15
pub(crate) fn mode_select_6(_dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let length = ctx.cdb()[4] as usize;
    if length > 0 {
        ctx.data_out(length);
    }
    Ok(())
}

/// MODE SELECT (10) - 0x55
pub(crate) fn mode_select_10(_dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let length = BigEndian::read_u16(&ctx.cdb()[7..9]) as usize;
    if length > 0 {
        ctx.data_out(length);
    }
    Ok(())
}

/// MODE SENSE (6) - 0x1A
pub(crate) fn mode_sense_6(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let alloc_len = ctx.cdb()[4] as usize;
    let data = mode_page::mode_sense_6(dev, ctx.cdb())?;
    ctx.data_in(&data, alloc_len);
    Ok(())
}

/// MODE SENSE (10) - 0x5A
pub(crate) fn mode_sense_10(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let alloc_len = BigEndian::read_u16(&ctx.cdb()[7..9]) as usize;
    let data = mode_page::mode_sense_10(dev, ctx.cdb())?;
    ctx.data_in(&data, alloc_len);
    Ok(())
}
