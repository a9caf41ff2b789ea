//! INQUIRY data, mode pages and MODE SELECT parameter lists
//!
//! Mode pages are not stored anywhere. They are computed from the device
//! state whenever MODE SENSE asks for them, either as current values or as
//! the mask of bits an initiator may change. Every page starts with its page
//! code and the number of bytes that follow.

use crate::device::Device;
use crate::error::{ScsiError, ScsiResult};
use crate::scsi::{asc, device_type, sense_key, ScsiLevel, SenseData};
use byteorder::{BigEndian, ByteOrder};
use std::collections::BTreeMap;

/// Adds the pages of one device family to the page map
pub type PageBuilder = fn(&Device, bool, &mut BTreeMap<u8, Vec<u8>>);

/// Standard INQUIRY data length
pub const INQUIRY_LENGTH: usize = 36;

/// Page code requesting all pages
pub const ALL_PAGES: u8 = 0x3F;

/// Page control field of MODE SENSE
const PC_CHANGEABLE: u8 = 1;
const PC_SAVED: u8 = 3;

/// Vendor string of the Apple compatibility page
const APPLE_VENDOR: &[u8] = b"APPLE COMPUTER, INC   ";

// ============================================================================
// INQUIRY
// ============================================================================

/// Standard INQUIRY data, truncated to `allocation_length`
///
/// Levels above SCSI-2 are reported as SCSI-2.
pub fn build_inquiry_response(device: &Device, allocation_length: usize) -> Vec<u8> {
    let mut data = vec![0u8; INQUIRY_LENGTH];

    data[0] = device.device_type();
    data[1] = if device.is_removable() { 0x80 } else { 0x00 };

    let level = device.scsi_level().min(ScsiLevel::Scsi2) as u8;
    data[2] = level;
    data[3] = level;
    data[4] = device.kind().additional_length();

    data[8..36].copy_from_slice(&device.identification());

    data.truncate(allocation_length);
    data
}

/// INQUIRY data for a LUN without a device
pub fn build_not_present_inquiry(allocation_length: usize) -> Vec<u8> {
    let mut data = vec![0u8; INQUIRY_LENGTH];
    data[0] = device_type::NOT_PRESENT;
    data[2] = ScsiLevel::Scsi2 as u8;
    data[3] = ScsiLevel::Scsi2 as u8;
    data[4] = (INQUIRY_LENGTH - 5) as u8;
    data.truncate(allocation_length);
    data
}

// ============================================================================
// Mode pages
// ============================================================================

fn page(code: u8, size: usize) -> Vec<u8> {
    let mut page = vec![0u8; size];
    page[0] = code;
    page[1] = (size - 2) as u8;
    page
}

/// Read-write error recovery page (0x01)
fn error_recovery_page() -> Vec<u8> {
    page(0x01, 12)
}

/// Format device page (0x03)
fn format_page(device: &Device, changeable: bool) -> Vec<u8> {
    let mut buf = page(0x03, 24);

    if changeable {
        // The sector size can be changed
        BigEndian::write_u16(&mut buf[12..14], 0xFFFF);
        return buf;
    }

    if device.is_ready() {
        // Tracks per zone
        BigEndian::write_u16(&mut buf[2..4], 8);
        // Sectors per track
        BigEndian::write_u16(&mut buf[10..12], 25);
        // Interleave, track skew and cylinder skew
        BigEndian::write_u16(&mut buf[14..16], 1);
        BigEndian::write_u16(&mut buf[16..18], 11);
        BigEndian::write_u16(&mut buf[18..20], 20);
    }

    BigEndian::write_u16(&mut buf[12..14], device.sector_size() as u16);

    // Hard-sectored
    buf[20] = 0x40;
    if device.is_removable() {
        buf[20] |= 0x20;
    }

    buf
}

/// Rigid disk drive geometry page (0x04)
fn drive_page(device: &Device, changeable: bool) -> Vec<u8> {
    let mut buf = page(0x04, 24);

    if !changeable && device.is_ready() {
        // 25 sectors per track, 8 heads
        let cylinders = ((device.block_count() >> 3) / 25).min(0xFF_FFFF) as u32;
        buf[2] = (cylinders >> 16) as u8;
        buf[3] = (cylinders >> 8) as u8;
        buf[4] = cylinders as u8;
        buf[5] = 8;

        // Medium rotation rate
        BigEndian::write_u16(&mut buf[20..22], 7200);
    }

    buf
}

/// Caching page (0x08)
fn caching_page(changeable: bool) -> Vec<u8> {
    let mut buf = page(0x08, 12);

    if !changeable {
        // Disable pre-fetch transfer length, maximum pre-fetch and its ceiling
        BigEndian::write_u16(&mut buf[4..6], 0xFFFF);
        BigEndian::write_u16(&mut buf[8..10], 0xFFFF);
        BigEndian::write_u16(&mut buf[10..12], 0xFFFF);
    }

    buf
}

/// CD-ROM parameters page (0x0D)
fn cdrom_parameters_page(changeable: bool) -> Vec<u8> {
    let mut buf = page(0x0D, 8);

    if !changeable {
        // Inactivity timer multiplier
        buf[3] = 0x05;
        // S units per M unit and F units per S unit (MSF addressing)
        BigEndian::write_u16(&mut buf[4..6], 60);
        BigEndian::write_u16(&mut buf[6..8], 75);
    }

    buf
}

/// CD audio control page (0x0E)
fn cd_audio_page(changeable: bool) -> Vec<u8> {
    let mut buf = page(0x0E, 16);

    if !changeable {
        // Immediate completion of audio commands
        buf[2] = 0x04;
    }

    buf
}

/// DEC special function control page (0x25)
///
/// Reported as saveable; the DEC Alpha SRM console insists on it.
fn dec_page(changeable: bool) -> Vec<u8> {
    let mut buf = page(0x25, 25);
    buf[0] |= 0x80;

    if !changeable {
        buf[2] = 0x01;
    }

    buf
}

/// Apple vendor page (0x30)
fn apple_page(changeable: bool) -> Vec<u8> {
    let mut buf = page(0x30, 30);

    if !changeable {
        buf[2..2 + APPLE_VENDOR.len()].copy_from_slice(APPLE_VENDOR);
    }

    buf
}

/// Pages of hard disks and removable disks
pub fn disk_pages(device: &Device, changeable: bool, pages: &mut BTreeMap<u8, Vec<u8>>) {
    pages.insert(0x01, error_recovery_page());
    pages.insert(0x03, format_page(device, changeable));
    pages.insert(0x04, drive_page(device, changeable));
    pages.insert(0x08, caching_page(changeable));
    pages.insert(0x25, dec_page(changeable));
    pages.insert(0x30, apple_page(changeable));
}

/// Pages of CD-ROM drives
pub fn cdrom_pages(device: &Device, changeable: bool, pages: &mut BTreeMap<u8, Vec<u8>>) {
    pages.insert(0x01, error_recovery_page());
    pages.insert(0x03, format_page(device, changeable));
    pages.insert(0x04, drive_page(device, changeable));
    pages.insert(0x08, caching_page(changeable));
    pages.insert(0x0D, cdrom_parameters_page(changeable));
    pages.insert(0x0E, cd_audio_page(changeable));
}

// ============================================================================
// MODE SENSE
// ============================================================================

/// Pages selected by the page code byte of a MODE SENSE CDB, in page order
fn select_pages(device: &Device, page_byte: u8) -> ScsiResult<Vec<u8>> {
    let page_control = page_byte >> 6;
    let page_code = page_byte & 0x3F;

    if page_control == PC_SAVED && !device.supports_save_parameters() {
        return Err(SenseData::new(
            sense_key::ILLEGAL_REQUEST,
            asc::SAVING_PARAMETERS_NOT_SUPPORTED,
            0,
        )
        .into());
    }

    let pages = device.build_mode_pages(page_control == PC_CHANGEABLE);

    let mut data = Vec::new();
    match page_code {
        ALL_PAGES => {
            for page in pages.values() {
                data.extend_from_slice(page);
            }
        }
        // Page 0 returns only the header and block descriptor
        0x00 => {}
        code => match pages.get(&code) {
            Some(page) => data.extend_from_slice(page),
            None => {
                log::debug!("LUN {}: unsupported mode page ${:02X}", device.lun(), code);
                return Err(SenseData::invalid_field().into());
            }
        },
    }

    Ok(data)
}

/// SCSI-2 general block descriptor (density, 24 bit block count, block length)
fn short_block_descriptor(device: &Device) -> [u8; 8] {
    let mut desc = [0u8; 8];
    let blocks = device.block_count();
    if blocks <= 0xFF_FFFF {
        BigEndian::write_u24(&mut desc[1..4], blocks as u32);
    }
    BigEndian::write_u24(&mut desc[5..8], device.sector_size());
    desc
}

/// Long LBA block descriptor of MODE SENSE(10)
fn long_block_descriptor(device: &Device) -> [u8; 16] {
    let mut desc = [0u8; 16];
    BigEndian::write_u64(&mut desc[0..8], device.block_count());
    BigEndian::write_u32(&mut desc[12..16], device.sector_size());
    desc
}

fn device_specific_parameter(device: &Device) -> u8 {
    if device.is_protected() {
        0x80
    } else {
        0x00
    }
}

/// Complete MODE SENSE(6) response
///
/// The mode data length reports the full size; truncation to the
/// allocation length is left to the caller.
pub fn mode_sense_6(device: &Device, cdb: &[u8]) -> ScsiResult<Vec<u8>> {
    let dbd = cdb[1] & 0x08 != 0;
    let pages = select_pages(device, cdb[2])?;

    let mut data = vec![0u8; 4];
    data[2] = device_specific_parameter(device);

    if !dbd && device.is_ready() {
        data[3] = 8;
        data.extend_from_slice(&short_block_descriptor(device));
    }

    data.extend_from_slice(&pages);

    // Mode data length excludes itself
    data[0] = (data.len() - 1).min(0xFF) as u8;

    Ok(data)
}

/// Complete MODE SENSE(10) response
pub fn mode_sense_10(device: &Device, cdb: &[u8]) -> ScsiResult<Vec<u8>> {
    let llbaa = cdb[1] & 0x10 != 0;
    let dbd = cdb[1] & 0x08 != 0;
    let pages = select_pages(device, cdb[2])?;

    let mut data = vec![0u8; 8];
    data[3] = device_specific_parameter(device);

    if !dbd && device.is_ready() {
        if llbaa && device.block_count() > 0xFFFF_FFFF {
            // LONGLBA
            data[4] = 0x01;
            BigEndian::write_u16(&mut data[6..8], 16);
            data.extend_from_slice(&long_block_descriptor(device));
        } else {
            BigEndian::write_u16(&mut data[6..8], 8);
            data.extend_from_slice(&short_block_descriptor(device));
        }
    }

    data.extend_from_slice(&pages);

    let length = (data.len() - 2).min(0xFFFF) as u16;
    BigEndian::write_u16(&mut data[0..2], length);

    Ok(data)
}

// ============================================================================
// MODE SELECT
// ============================================================================

/// MODE SELECT command flavour, which decides the parameter header layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdbVariant {
    Six,
    Ten,
}

impl CdbVariant {
    /// Length of the mode parameter header
    pub fn header_len(self) -> usize {
        match self {
            CdbVariant::Six => 4,
            CdbVariant::Ten => 8,
        }
    }

    fn block_descriptor_len(self, params: &[u8]) -> usize {
        match self {
            CdbVariant::Six => params[3] as usize,
            CdbVariant::Ten => BigEndian::read_u16(&params[6..8]) as usize,
        }
    }

    /// LONGLBA: 16-byte block descriptors follow the header
    fn long_lba(self, params: &[u8]) -> bool {
        self == CdbVariant::Ten && params[4] & 0x01 != 0
    }
}

fn truncated(what: &str, offset: usize) -> ScsiError {
    ScsiError::ParameterList(format!("{} at offset {} is truncated", what, offset))
}

/// Parse a MODE SELECT parameter list and apply what it changes
///
/// A block descriptor's block length and the sector size of the format
/// device page (0x03) select a new sector size. Other pages are skipped.
/// Parsing stops at the first malformed page; earlier changes stay applied.
pub fn apply_mode_select(
    device: &mut Device,
    variant: CdbVariant,
    cdb: &[u8],
    params: &[u8],
    transfer_length: usize,
) -> ScsiResult<()> {
    let params = &params[..transfer_length.min(params.len())];

    // Save pages
    if cdb[1] & 0x01 != 0 && !device.supports_save_parameters() {
        return Err(SenseData::new(
            sense_key::ILLEGAL_REQUEST,
            asc::SAVING_PARAMETERS_NOT_SUPPORTED,
            0,
        )
        .into());
    }

    // Without PF the pages are in a vendor specific SCSI-1 format
    if cdb[1] & 0x10 == 0 {
        log::debug!("LUN {}: ignoring SCSI-1 MODE SELECT data", device.lun());
        return Ok(());
    }

    let header_len = variant.header_len();
    if params.len() < header_len {
        return Err(truncated("Mode parameter header", 0));
    }

    let mut offset = header_len;

    let descriptor_len = variant.block_descriptor_len(params);
    if descriptor_len > 0 {
        if params.len() < offset + descriptor_len {
            return Err(truncated("Block descriptor", offset));
        }
        let block_length = if variant.long_lba(params) {
            if descriptor_len < 16 {
                return Err(truncated("Long LBA block descriptor", offset));
            }
            BigEndian::read_u32(&params[offset + 12..offset + 16])
        } else if descriptor_len >= 8 {
            BigEndian::read_u24(&params[offset + 5..offset + 8])
        } else {
            0
        };
        if block_length != 0 {
            device.change_sector_size(block_length)?;
        }
        offset += descriptor_len;
    }

    while params.len() - offset >= 2 {
        let code = params[offset] & 0x3F;
        let size = params[offset + 1] as usize + 2;

        if offset + size > params.len() {
            return Err(truncated(&format!("Page ${:02X}", code), offset));
        }

        match code {
            0x03 => {
                if params.len() - offset < 14 {
                    return Err(truncated("Format device page", offset));
                }
                let sector_size = u32::from(BigEndian::read_u16(&params[offset + 12..offset + 14]));
                if sector_size != 0 {
                    device.change_sector_size(sector_size)?;
                }
            }
            _ => log::debug!("LUN {}: ignoring mode page ${:02X}", device.lun(), code),
        }

        offset += size;
    }

    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;

    fn hard_disk(sector_size: u32) -> Device {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        hd.set_sector_size(sector_size).unwrap();
        hd.set_block_count(1 << 16);
        hd.finalize().unwrap();
        hd
    }

    fn check_disk_pages(pages: &BTreeMap<u8, Vec<u8>>) {
        assert_eq!(pages.len(), 6, "Unexpected number of mode pages");
        assert_eq!(pages[&1].len(), 12);
        assert_eq!(pages[&3].len(), 24);
        assert_eq!(pages[&4].len(), 24);
        assert_eq!(pages[&8].len(), 12);
        assert_eq!(pages[&37].len(), 25);
        assert_eq!(pages[&48].len(), 30);
    }

    #[test]
    fn test_disk_pages() {
        let hd = Device::new(DeviceKind::HardDisk, 0);
        check_disk_pages(&hd.build_mode_pages(false));
        check_disk_pages(&hd.build_mode_pages(true));
    }

    #[test]
    fn test_page_headers() {
        let hd = hard_disk(512);
        for (code, page) in hd.build_mode_pages(false) {
            assert_eq!(page[0] & 0x3F, code);
            assert_eq!(page[1] as usize, page.len() - 2);
        }
    }

    #[test]
    fn test_dec_special_function_control_page() {
        let hd = Device::new(DeviceKind::HardDisk, 0);
        let pages = hd.build_mode_pages(false);
        let buf = &pages[&0x25];
        assert_eq!(buf[0], 0x25 | 0x80);
        assert_eq!(buf[1], 0x17);
        assert_eq!(buf[2], 0x01);
    }

    #[test]
    fn test_apple_page() {
        let hd = hard_disk(512);
        let current = hd.build_mode_pages(false);
        assert_eq!(&current[&0x30][2..24], APPLE_VENDOR);
        let changeable = hd.build_mode_pages(true);
        assert!(changeable[&0x30][2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_format_page() {
        let hd = hard_disk(1024);
        let pages = hd.build_mode_pages(false);
        let buf = &pages[&3];
        assert_eq!(BigEndian::read_u16(&buf[10..12]), 25);
        assert_eq!(BigEndian::read_u16(&buf[12..14]), 1024);
        assert_eq!(buf[20], 0x40);

        let changeable = hd.build_mode_pages(true);
        assert_eq!(BigEndian::read_u16(&changeable[&3][12..14]), 0xFFFF);
    }

    #[test]
    fn test_drive_page() {
        let hd = hard_disk(512);
        let pages = hd.build_mode_pages(false);
        let buf = &pages[&4];
        // 65536 blocks / 8 heads / 25 sectors
        assert_eq!(&buf[2..5], &[0x00, 0x01, 0x47]);
        assert_eq!(buf[5], 8);
        assert_eq!(BigEndian::read_u16(&buf[20..22]), 7200);
    }

    #[test]
    fn test_cdrom_pages() {
        let cd = Device::new(DeviceKind::CdRom, 0);
        let pages = cd.build_mode_pages(false);
        assert!(pages.contains_key(&0x0D));
        assert!(pages.contains_key(&0x0E));
        assert!(!pages.contains_key(&0x25));
        assert!(!pages.contains_key(&0x30));
        assert_eq!(pages[&0x0D].len(), 8);
        assert_eq!(BigEndian::read_u16(&pages[&0x0D][4..6]), 60);
        assert_eq!(BigEndian::read_u16(&pages[&0x0D][6..8]), 75);
        assert_eq!(pages[&0x0E].len(), 16);
        assert_eq!(pages[&0x0E][2], 0x04);
    }

    #[test]
    fn test_inquiry() {
        let hd = hard_disk(512);
        let data = build_inquiry_response(&hd, 255);
        assert_eq!(data.len(), INQUIRY_LENGTH);
        assert_eq!(data[0], device_type::DIRECT_ACCESS);
        assert_eq!(data[1], 0x00);
        assert_eq!(data[2], 2);
        assert_eq!(data[3], 2);
        assert_eq!(data[4], 0x1F);
        assert_eq!(&data[8..36], &hd.identification());
    }

    #[test]
    fn test_inquiry_level_is_capped() {
        let mut hd = hard_disk(512);
        hd.set_scsi_level(ScsiLevel::Spc3);
        let data = build_inquiry_response(&hd, 255);
        assert_eq!(data[2], ScsiLevel::Scsi2 as u8);
        assert_eq!(data[3], ScsiLevel::Scsi2 as u8);

        hd.set_scsi_level(ScsiLevel::Scsi1Ccs);
        let data = build_inquiry_response(&hd, 255);
        assert_eq!(data[2], 1);
        assert_eq!(data[3], 1);
    }

    #[test]
    fn test_inquiry_version_stamp() {
        let hd = hard_disk(512);
        let data = build_inquiry_response(&hd, 255);
        let stamp = format!(
            "{:0>2}{:0>2}",
            env!("CARGO_PKG_VERSION_MAJOR"),
            env!("CARGO_PKG_VERSION_MINOR")
        );
        assert_eq!(&data[32..36], stamp.as_bytes());
    }

    #[test]
    fn test_inquiry_truncated() {
        let hd = hard_disk(512);
        assert_eq!(build_inquiry_response(&hd, 5).len(), 5);
        assert!(build_inquiry_response(&hd, 0).is_empty());
    }

    #[test]
    fn test_not_present_inquiry() {
        let data = build_not_present_inquiry(36);
        assert_eq!(data[0], 0x7F);
    }

    #[test]
    fn test_mode_sense_6_all_pages() {
        let hd = hard_disk(512);
        let data = mode_sense_6(&hd, &[0x1A, 0, 0x3F, 0, 255, 0]).unwrap();
        let expected = 4 + 8 + 12 + 24 + 24 + 12 + 25 + 30;
        assert_eq!(data.len(), expected);
        assert_eq!(data[0] as usize, expected - 1);
        assert_eq!(data[2], 0x00);
        assert_eq!(data[3], 8);
        assert_eq!(BigEndian::read_u24(&data[5..8]), 1 << 16);
        assert_eq!(BigEndian::read_u24(&data[9..12]), 512);
        // Pages follow in ascending order
        assert_eq!(data[12], 0x01);
        assert_eq!(data[24], 0x03);
    }

    #[test]
    fn test_mode_sense_6_single_page_without_descriptor() {
        let hd = hard_disk(512);
        let data = mode_sense_6(&hd, &[0x1A, 0x08, 0x08, 0, 255, 0]).unwrap();
        assert_eq!(data.len(), 4 + 12);
        assert_eq!(data[3], 0);
        assert_eq!(data[4], 0x08);
    }

    #[test]
    fn test_mode_sense_unknown_page() {
        let hd = hard_disk(512);
        let err = mode_sense_6(&hd, &[0x1A, 0, 0x1C, 0, 255, 0]).unwrap_err();
        assert_eq!(err.sense().asc, asc::INVALID_FIELD_IN_CDB);
    }

    #[test]
    fn test_mode_sense_write_protected() {
        let mut hd = hard_disk(512);
        hd.set_protected(true);
        let data = mode_sense_6(&hd, &[0x1A, 0, 0x3F, 0, 255, 0]).unwrap();
        assert_eq!(data[2], 0x80);
    }

    #[test]
    fn test_mode_sense_saved_values() {
        let hd = hard_disk(512);
        assert!(mode_sense_6(&hd, &[0x1A, 0, 0xFF, 0, 255, 0]).is_ok());

        let mut cd = Device::new(DeviceKind::CdRom, 0);
        cd.set_sector_size(2048).unwrap();
        cd.set_block_count(100);
        cd.finalize().unwrap();
        let err = mode_sense_6(&cd, &[0x1A, 0, 0xFF, 0, 255, 0]).unwrap_err();
        assert_eq!(err.sense().asc, asc::SAVING_PARAMETERS_NOT_SUPPORTED);
    }

    #[test]
    fn test_mode_sense_10() {
        let hd = hard_disk(512);
        let data = mode_sense_10(&hd, &[0x5A, 0, 0x03, 0, 0, 0, 0, 0x01, 0, 0]).unwrap();
        assert_eq!(data.len(), 8 + 8 + 24);
        assert_eq!(BigEndian::read_u16(&data[0..2]) as usize, data.len() - 2);
        assert_eq!(BigEndian::read_u16(&data[6..8]), 8);
        assert_eq!(data[16], 0x03);
    }

    #[test]
    fn test_mode_sense_10_long_lba() {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        hd.set_sector_size(512).unwrap();
        hd.set_block_count(0x1_0000_0000);
        hd.finalize().unwrap();

        let data = mode_sense_10(&hd, &[0x5A, 0x10, 0x01, 0, 0, 0, 0, 0x01, 0, 0]).unwrap();
        assert_eq!(data[4], 0x01);
        assert_eq!(BigEndian::read_u16(&data[6..8]), 16);
        assert_eq!(BigEndian::read_u64(&data[8..16]), 0x1_0000_0000);
        assert_eq!(BigEndian::read_u32(&data[20..24]), 512);

        // Without LLBAA the block count does not fit and is reported as 0
        let data = mode_sense_10(&hd, &[0x5A, 0, 0x01, 0, 0, 0, 0, 0x01, 0, 0]).unwrap();
        assert_eq!(BigEndian::read_u16(&data[6..8]), 8);
        assert_eq!(BigEndian::read_u24(&data[9..12]), 0);
    }

    #[test]
    fn test_mode_select_10_long_lba_descriptor() {
        for blocks in [0x1_0000_0400u64, 0x1_0000_0007] {
            let mut hd = Device::new(DeviceKind::HardDisk, 0);
            hd.set_sector_size(512).unwrap();
            hd.set_block_count(blocks);
            hd.finalize().unwrap();

            // Current values of all pages with LLBAA, sent back unchanged
            let data = mode_sense_10(&hd, &[0x5A, 0x10, 0x3F, 0, 0, 0, 0, 0xFF, 0xFF, 0]).unwrap();
            assert_eq!(data[4], 0x01);

            let mut cmd = [0x55, 0x10, 0, 0, 0, 0, 0, 0, 0, 0];
            BigEndian::write_u16(&mut cmd[7..9], data.len() as u16);
            apply_mode_select(&mut hd, CdbVariant::Ten, &cmd, &data, data.len()).unwrap();
            assert_eq!(hd.sector_size(), 512);
            assert_eq!(hd.block_count(), blocks);
        }
    }

    #[test]
    fn test_mode_select_10_long_lba_changes_sector_size() {
        let mut hd = hard_disk(512);
        let cmd = [0x55, 0x10, 0, 0, 0, 0, 0, 0, 24, 0];
        let mut buf = [0u8; 24];
        buf[4] = 0x01;
        buf[7] = 16;
        BigEndian::write_u64(&mut buf[8..16], 1 << 15);
        BigEndian::write_u32(&mut buf[20..24], 1024);

        apply_mode_select(&mut hd, CdbVariant::Ten, &cmd, &buf, buf.len()).unwrap();
        assert_eq!(hd.sector_size(), 1024);

        // LONGLBA with a short descriptor
        let mut buf = [0u8; 16];
        buf[4] = 0x01;
        buf[7] = 8;
        let err = apply_mode_select(&mut hd, CdbVariant::Ten, &cmd, &buf, buf.len()).unwrap_err();
        assert!(matches!(err, ScsiError::ParameterList(_)));
    }

    #[test]
    fn test_mode_select() {
        let mut hd = hard_disk(512);
        let mut cmd = [0u8; 10];
        let mut buf = [0u8; 255];

        // PF
        cmd[1] = 0x10;
        // Page 3 (format device page)
        buf[4] = 0x03;
        // 512 bytes per sector
        buf[16] = 0x02;
        assert!(apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, 255).is_ok());
        assert_eq!(hd.sector_size(), 512);
        buf[4] = 0;
        buf[16] = 0;

        buf[8] = 0x03;
        buf[20] = 0x02;
        assert!(apply_mode_select(&mut hd, CdbVariant::Ten, &cmd, &buf, 255).is_ok());
        assert_eq!(hd.sector_size(), 512);
    }

    #[test]
    fn test_mode_select_block_descriptor_sets_sector_size() {
        // As sent by the DEC Alpha SRM console
        let mut hd = hard_disk(4096);
        let cmd = [0x15, 0x10, 0x00, 0x00, 0x0C, 0x00];
        let buf = [0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00];

        apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).unwrap();
        assert_eq!(hd.sector_size(), 512);
        assert_eq!(hd.block_count(), 8 << 16);
    }

    #[test]
    fn test_mode_select_format_page_changes_sector_size() {
        let mut hd = hard_disk(512);
        let cmd = [0x15, 0x10, 0, 0, 28, 0];
        let mut buf = vec![0u8; 28];
        buf[4] = 0x03;
        buf[5] = 0x16;
        BigEndian::write_u16(&mut buf[16..18], 2048);

        apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).unwrap();
        assert_eq!(hd.sector_size(), 2048);
    }

    #[test]
    fn test_mode_select_unsupported_sector_size() {
        let mut hd = hard_disk(512);
        let cmd = [0x15, 0x10, 0, 0, 28, 0];
        let mut buf = vec![0u8; 28];
        buf[4] = 0x03;
        buf[5] = 0x16;
        BigEndian::write_u16(&mut buf[16..18], 520);

        let err = apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).unwrap_err();
        assert!(matches!(err, ScsiError::ParameterList(_)));
        assert_eq!(hd.sector_size(), 512);
    }

    #[test]
    fn test_mode_select_truncated_page() {
        let mut hd = hard_disk(512);
        let cmd = [0x15, 0x10, 0, 0, 12, 0];
        let mut buf = vec![0u8; 12];
        buf[4] = 0x08;
        buf[5] = 0x0A;

        let err = apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).unwrap_err();
        assert!(matches!(err, ScsiError::ParameterList(_)));
        assert_eq!(err.sense().asc, asc::INVALID_FIELD_IN_PARAMETER_LIST);
    }

    #[test]
    fn test_mode_select_truncated_header() {
        let mut hd = hard_disk(512);
        let cmd = [0x55, 0x10, 0, 0, 0, 0, 0, 0, 4, 0];
        let err = apply_mode_select(&mut hd, CdbVariant::Ten, &cmd, &[0; 4], 4).unwrap_err();
        assert!(matches!(err, ScsiError::ParameterList(_)));
    }

    #[test]
    fn test_mode_select_ignores_unknown_pages() {
        let mut hd = hard_disk(512);
        let cmd = [0x15, 0x10, 0, 0, 16, 0];
        let mut buf = vec![0u8; 16];
        buf[4] = 0x21;
        buf[5] = 0x0A;

        assert!(apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).is_ok());
        assert_eq!(hd.sector_size(), 512);
    }

    #[test]
    fn test_mode_select_without_pf_is_ignored() {
        let mut hd = hard_disk(512);
        let cmd = [0x15, 0x00, 0, 0, 12, 0];
        let buf = [0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00];
        apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).unwrap();
        assert_eq!(hd.sector_size(), 512);
    }

    #[test]
    fn test_mode_select_is_idempotent() {
        let mut hd = hard_disk(512);
        let cmd = [0x15, 0x10, 0, 0, 12, 0];
        let buf = [0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00];
        apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).unwrap();
        apply_mode_select(&mut hd, CdbVariant::Six, &cmd, &buf, buf.len()).unwrap();
        assert_eq!(hd.sector_size(), 1024);
        assert_eq!(hd.block_count(), 1 << 15);
    }
}
