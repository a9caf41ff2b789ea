//! Error types for SCSI target emulation

use crate::scsi::{asc, sense_key, SenseData};
use thiserror::Error;

/// SCSI emulator errors
#[derive(Debug, Error)]
pub enum ScsiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Illegal bus phase for target mode or a broken handshake
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported command: ${0:02X}")]
    UnsupportedCommand(u8),

    /// Malformed MODE SELECT parameter list
    #[error("Parameter list error: {0}")]
    ParameterList(String),

    #[error("Command failed: {0}")]
    Sense(SenseData),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScsiError {
    /// Fatal errors leave the core; everything else ends up as CHECK CONDITION.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScsiError::Io(_) | ScsiError::Protocol(_) | ScsiError::Geometry(_) | ScsiError::Config(_)
        )
    }

    /// Sense data reported to the initiator for a command-level failure
    pub fn sense(&self) -> SenseData {
        match self {
            ScsiError::UnsupportedCommand(_) => SenseData::invalid_command(),
            ScsiError::ParameterList(_) => SenseData::new(
                sense_key::ILLEGAL_REQUEST,
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
                0,
            ),
            ScsiError::Sense(sense) => sense.clone(),
            ScsiError::Storage(_) => SenseData::medium_error(),
            _ => SenseData::new(sense_key::HARDWARE_ERROR, asc::INTERNAL_TARGET_FAILURE, 0),
        }
    }
}

impl From<SenseData> for ScsiError {
    fn from(sense: SenseData) -> Self {
        ScsiError::Sense(sense)
    }
}

/// Result type for SCSI operations
pub type ScsiResult<T> = Result<T, ScsiError>;
