//! Commands every device kind implements

use super::{CommandContext, CommandEntry, Device, Reservation};
use crate::error::ScsiResult;
use crate::mode_page;
use crate::scsi::{ScsiOpcode, SenseData};
use byteorder::{BigEndian, ByteOrder};

pub(crate) const COMMANDS: &[CommandEntry] = &[
    (ScsiOpcode::TestUnitReady, test_unit_ready),
    (ScsiOpcode::RequestSense, request_sense),
    (ScsiOpcode::Inquiry, inquiry),
    (ScsiOpcode::Reserve6, reserve),
    (ScsiOpcode::Release6, release),
    (ScsiOpcode::SendDiagnostic, send_diagnostic),
    (ScsiOpcode::ReportLuns, report_luns),
];

/// TEST UNIT READY (0x00)
fn test_unit_ready(dev: &mut Device, _ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    dev.check_ready()
}

/// REQUEST SENSE (0x03)
fn request_sense(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let alloc_len = ctx.cdb()[4] as usize;

    let sense = match dev.take_sense() {
        Some(sense) => sense,
        None if !dev.is_ready() => SenseData::medium_not_present(),
        None => SenseData::no_sense(),
    };

    ctx.data_in(&sense.to_bytes(), alloc_len);
    Ok(())
}

/// INQUIRY (0x12)
fn inquiry(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let cdb = ctx.cdb();

    // SCSI-2 devices have no vital product data pages
    if cdb[1] & 0x01 != 0 {
        return Err(SenseData::invalid_field().into());
    }

    let alloc_len = BigEndian::read_u16(&cdb[3..5]) as usize;
    let data = mode_page::build_inquiry_response(dev, alloc_len);
    ctx.data_in(&data, alloc_len);
    Ok(())
}

/// RESERVE (6) - 0x16
fn reserve(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    // Extent reservations are not supported
    if ctx.cdb()[1] & 0x01 != 0 {
        return Err(SenseData::invalid_field().into());
    }

    log::debug!("LUN {}: reserved by initiator {:?}", dev.lun(), ctx.initiator_id());
    dev.set_reservation(Reservation::HeldBy(ctx.initiator_id()));
    Ok(())
}

/// RELEASE (6) - 0x17
fn release(dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    // Releasing somebody else's reservation is not an error, it just has no effect
    if dev.reservation() == Reservation::HeldBy(ctx.initiator_id()) {
        log::debug!("LUN {}: released by initiator {:?}", dev.lun(), ctx.initiator_id());
        dev.set_reservation(Reservation::Free);
    }
    Ok(())
}

/// SEND DIAGNOSTIC (0x1D)
fn send_diagnostic(_dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let cdb = ctx.cdb();

    // Diagnostic pages are not supported
    if cdb[1] & 0x10 != 0 && BigEndian::read_u16(&cdb[3..5]) != 0 {
        return Err(SenseData::invalid_field().into());
    }
    Ok(())
}

/// REPORT LUNS (0xA0)
fn report_luns(_dev: &mut Device, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
    let cdb = ctx.cdb();

    if cdb[2] > 2 {
        return Err(SenseData::invalid_field().into());
    }

    let alloc_len = BigEndian::read_u32(&cdb[6..10]) as usize;

    let luns = ctx.luns();
    let mut data = vec![0u8; 8 + 8 * luns.len()];
    BigEndian::write_u32(&mut data[0..4], (luns.len() * 8) as u32); // LUN list length
    // data[4..8] reserved
    for (i, &lun) in luns.iter().enumerate() {
        // Single level LUN structure, peripheral device addressing
        data[8 + i * 8 + 1] = lun;
    }

    ctx.data_in(&data, alloc_len);
    Ok(())
}
