//! SCSI bus phases
//!
//! A phase is decoded from the BSY, SEL, MSG, C/D and I/O signal lines
//! (SCSI-2 section 5.1).

use std::fmt;

/// Bus phase as seen by a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// No device owns the bus; initial and idle state
    #[default]
    BusFree,
    Selection,
    /// Target reconnecting to an initiator; not supported in target mode
    Reselection,
    Command,
    DataIn,
    DataOut,
    Status,
    MsgIn,
    MsgOut,
    /// MSG asserted with C/D released; undefined by the standard
    Reserved,
}

impl Phase {
    /// Decode the phase from the bus signal lines
    pub fn from_signals(bsy: bool, sel: bool, msg: bool, cd: bool, io: bool) -> Self {
        if sel {
            return if io { Phase::Reselection } else { Phase::Selection };
        }
        if !bsy {
            return Phase::BusFree;
        }
        match (msg, cd, io) {
            (false, false, false) => Phase::DataOut,
            (false, false, true) => Phase::DataIn,
            (false, true, false) => Phase::Command,
            (false, true, true) => Phase::Status,
            (true, false, _) => Phase::Reserved,
            (true, true, false) => Phase::MsgOut,
            (true, true, true) => Phase::MsgIn,
        }
    }

    /// MSG, C/D and I/O levels a target drives for an information phase
    pub fn signals(self) -> Option<(bool, bool, bool)> {
        match self {
            Phase::DataOut => Some((false, false, false)),
            Phase::DataIn => Some((false, false, true)),
            Phase::Command => Some((false, true, false)),
            Phase::Status => Some((false, true, true)),
            Phase::MsgOut => Some((true, true, false)),
            Phase::MsgIn => Some((true, true, true)),
            _ => None,
        }
    }

    pub fn is_information_transfer(self) -> bool {
        self.signals().is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::BusFree => "busfree",
            Phase::Selection => "selection",
            Phase::Reselection => "reselection",
            Phase::Command => "command",
            Phase::DataIn => "datain",
            Phase::DataOut => "dataout",
            Phase::Status => "status",
            Phase::MsgIn => "msgin",
            Phase::MsgOut => "msgout",
            Phase::Reserved => "reserved",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
