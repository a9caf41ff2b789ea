//! SCSI command set definitions
//!
//! Opcodes, status codes, sense data and CDB field helpers shared by the
//! controller and the emulated devices (SCSI-2 with a few SBC/SPC additions).

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// SCSI command opcodes understood by at least one emulated device
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScsiOpcode {
    TestUnitReady = 0x00,
    Rezero = 0x01,
    RequestSense = 0x03,
    FormatUnit = 0x04,
    ReassignBlocks = 0x07,
    Read6 = 0x08,
    Write6 = 0x0A,
    Seek6 = 0x0B,
    Inquiry = 0x12,
    ModeSelect6 = 0x15,
    Reserve6 = 0x16,
    Release6 = 0x17,
    ModeSense6 = 0x1A,
    StartStopUnit = 0x1B,
    SendDiagnostic = 0x1D,
    PreventAllowMediumRemoval = 0x1E,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Write10 = 0x2A,
    Seek10 = 0x2B,
    Verify10 = 0x2F,
    SynchronizeCache10 = 0x35,
    ReadDefectData10 = 0x37,
    ReadToc = 0x43,
    ModeSelect10 = 0x55,
    ModeSense10 = 0x5A,
    Read16 = 0x88,
    Write16 = 0x8A,
    Verify16 = 0x8F,
    SynchronizeCache16 = 0x91,
    ServiceActionIn16 = 0x9E, // READ CAPACITY 16 uses this
    ReportLuns = 0xA0,
}

impl ScsiOpcode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(ScsiOpcode::TestUnitReady),
            0x01 => Some(ScsiOpcode::Rezero),
            0x03 => Some(ScsiOpcode::RequestSense),
            0x04 => Some(ScsiOpcode::FormatUnit),
            0x07 => Some(ScsiOpcode::ReassignBlocks),
            0x08 => Some(ScsiOpcode::Read6),
            0x0A => Some(ScsiOpcode::Write6),
            0x0B => Some(ScsiOpcode::Seek6),
            0x12 => Some(ScsiOpcode::Inquiry),
            0x15 => Some(ScsiOpcode::ModeSelect6),
            0x16 => Some(ScsiOpcode::Reserve6),
            0x17 => Some(ScsiOpcode::Release6),
            0x1A => Some(ScsiOpcode::ModeSense6),
            0x1B => Some(ScsiOpcode::StartStopUnit),
            0x1D => Some(ScsiOpcode::SendDiagnostic),
            0x1E => Some(ScsiOpcode::PreventAllowMediumRemoval),
            0x25 => Some(ScsiOpcode::ReadCapacity10),
            0x28 => Some(ScsiOpcode::Read10),
            0x2A => Some(ScsiOpcode::Write10),
            0x2B => Some(ScsiOpcode::Seek10),
            0x2F => Some(ScsiOpcode::Verify10),
            0x35 => Some(ScsiOpcode::SynchronizeCache10),
            0x37 => Some(ScsiOpcode::ReadDefectData10),
            0x43 => Some(ScsiOpcode::ReadToc),
            0x55 => Some(ScsiOpcode::ModeSelect10),
            0x5A => Some(ScsiOpcode::ModeSense10),
            0x88 => Some(ScsiOpcode::Read16),
            0x8A => Some(ScsiOpcode::Write16),
            0x8F => Some(ScsiOpcode::Verify16),
            0x91 => Some(ScsiOpcode::SynchronizeCache16),
            0x9E => Some(ScsiOpcode::ServiceActionIn16),
            0xA0 => Some(ScsiOpcode::ReportLuns),
            _ => None,
        }
    }
}

/// Number of CDB bytes for an opcode, derived from its group code
pub fn command_length(opcode: u8) -> usize {
    match opcode >> 5 {
        1 | 2 => 10,
        4 => 16,
        5 => 12,
        _ => 6,
    }
}

/// Value reported in the INQUIRY version byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScsiLevel {
    Scsi1Ccs = 1,
    Scsi2 = 2,
    Spc = 3,
    Spc2 = 4,
    Spc3 = 5,
}

/// Peripheral device type codes (INQUIRY byte 0)
pub mod device_type {
    pub const DIRECT_ACCESS: u8 = 0x00;
    pub const CD_ROM: u8 = 0x05;
    /// Peripheral qualifier 3: no device at this LUN
    pub const NOT_PRESENT: u8 = 0x7F;
}

/// SCSI status codes
pub mod scsi_status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const BUSY: u8 = 0x08;
    pub const RESERVATION_CONFLICT: u8 = 0x18;
}

/// SCSI message codes exchanged in the message phases
pub mod message {
    pub const COMMAND_COMPLETE: u8 = 0x00;
    pub const EXTENDED_MESSAGE: u8 = 0x01;
    pub const ABORT: u8 = 0x06;
    pub const BUS_DEVICE_RESET: u8 = 0x0C;
    pub const IDENTIFY: u8 = 0x80;
}

/// SCSI sense key codes
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
    pub const MISCOMPARE: u8 = 0x0E;
}

/// Additional Sense Code (ASC) values
pub mod asc {
    pub const NO_ADDITIONAL_SENSE: u8 = 0x00;
    pub const LUN_NOT_READY: u8 = 0x04;
    pub const UNRECOVERED_READ_ERROR: u8 = 0x11;
    pub const INVALID_COMMAND_OPERATION_CODE: u8 = 0x20;
    pub const LBA_OUT_OF_RANGE: u8 = 0x21;
    pub const INVALID_FIELD_IN_CDB: u8 = 0x24;
    pub const LOGICAL_UNIT_NOT_SUPPORTED: u8 = 0x25;
    pub const INVALID_FIELD_IN_PARAMETER_LIST: u8 = 0x26;
    pub const WRITE_PROTECTED: u8 = 0x27;
    pub const NOT_READY_TO_READY_CHANGE: u8 = 0x28;
    pub const SAVING_PARAMETERS_NOT_SUPPORTED: u8 = 0x39;
    pub const MEDIUM_NOT_PRESENT: u8 = 0x3A;
    pub const INTERNAL_TARGET_FAILURE: u8 = 0x44;
    pub const MISCOMPARE_DURING_VERIFY: u8 = 0x1D;
    pub const MEDIUM_REMOVAL_PREVENTED: u8 = 0x53;
}

/// Additional Sense Code Qualifiers
pub mod ascq {
    pub const INITIALIZING_COMMAND_REQUIRED: u8 = 0x02;
    pub const MEDIUM_REMOVAL_PREVENTED: u8 = 0x02;
}

/// SCSI sense data (fixed format)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseData {
    pub sense_key: u8,
    pub asc: u8,        // Additional Sense Code
    pub ascq: u8,       // Additional Sense Code Qualifier
    pub information: u32,
}

impl SenseData {
    /// Length of fixed format sense data
    pub const SIZE: usize = 18;

    pub fn new(sense_key: u8, asc: u8, ascq: u8) -> Self {
        SenseData {
            sense_key,
            asc,
            ascq,
            information: 0,
        }
    }

    pub fn with_info(mut self, info: u32) -> Self {
        self.information = info;
        self
    }

    /// Serialize to fixed format sense data (18 bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; Self::SIZE];

        // Response code: 0x70 = current error, fixed format
        data[0] = 0x70;
        if self.information != 0 {
            // VALID bit: the information field is meaningful
            data[0] |= 0x80;
        }

        data[2] = self.sense_key & 0x0F;
        BigEndian::write_u32(&mut data[3..7], self.information);

        // Additional sense length
        data[7] = 10; // Remaining bytes after this field

        data[12] = self.asc;
        data[13] = self.ascq;

        data
    }

    pub fn no_sense() -> Self {
        SenseData::new(sense_key::NO_SENSE, asc::NO_ADDITIONAL_SENSE, 0)
    }

    /// Create sense data for invalid/unsupported command opcode
    pub fn invalid_command() -> Self {
        SenseData::new(sense_key::ILLEGAL_REQUEST, asc::INVALID_COMMAND_OPERATION_CODE, 0)
    }

    pub fn invalid_field() -> Self {
        SenseData::new(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB, 0)
    }

    /// Create sense data for LBA out of range
    pub fn lba_out_of_range(lba: u64) -> Self {
        SenseData::new(sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE, 0)
            .with_info((lba & 0xFFFF_FFFF) as u32)
    }

    /// Create sense data for medium error
    pub fn medium_error() -> Self {
        SenseData::new(sense_key::MEDIUM_ERROR, asc::UNRECOVERED_READ_ERROR, 0)
    }

    /// Create sense data for write protected
    pub fn write_protected() -> Self {
        SenseData::new(sense_key::DATA_PROTECT, asc::WRITE_PROTECTED, 0)
    }

    pub fn medium_not_present() -> Self {
        SenseData::new(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT, 0)
    }

    pub fn lun_not_supported() -> Self {
        SenseData::new(sense_key::ILLEGAL_REQUEST, asc::LOGICAL_UNIT_NOT_SUPPORTED, 0)
    }
}

impl fmt::Display for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sense key ${:02X}, ASC ${:02X}, ASCQ ${:02X}",
            self.sense_key, self.asc, self.ascq
        )
    }
}

/// Parse LBA and transfer length from a READ/WRITE 6 CDB
///
/// A transfer length of 0 means 256 blocks.
pub fn parse_rw6_cdb(cdb: &[u8]) -> Option<(u64, u32)> {
    if cdb.len() < 6 {
        return None;
    }
    let lba = (u64::from(cdb[1] & 0x1F) << 16) | u64::from(BigEndian::read_u16(&cdb[2..4]));
    let length = if cdb[4] == 0 { 256 } else { u32::from(cdb[4]) };
    Some((lba, length))
}

/// Parse LBA and transfer length from READ/WRITE 10 CDB
pub fn parse_rw10_cdb(cdb: &[u8]) -> Option<(u64, u32)> {
    if cdb.len() < 10 {
        return None;
    }
    let lba = BigEndian::read_u32(&cdb[2..6]) as u64;
    let length = BigEndian::read_u16(&cdb[7..9]) as u32;
    Some((lba, length))
}

/// Parse LBA and transfer length from READ/WRITE 16 CDB
pub fn parse_rw16_cdb(cdb: &[u8]) -> Option<(u64, u32)> {
    if cdb.len() < 16 {
        return None;
    }
    let lba = BigEndian::read_u64(&cdb[2..10]);
    let length = BigEndian::read_u32(&cdb[10..14]);
    Some((lba, length))
}

// ============================================================================
// Unit Tests
// ============================================================================
