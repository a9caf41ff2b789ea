//! Bus interface consumed by the controller
//!
//! The electrical side of the bus (GPIO access, REQ/ACK timing) lives behind
//! the [`Bus`] trait. Several controllers may share one bus, so
//! implementations serialize access internally and take `&self`.

use crate::phase::Phase;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Signal-level access to the SCSI bus
pub trait Bus: Send + Sync {
    /// Phase currently presented on the bus
    fn current_phase(&self) -> Phase;

    /// Drive MSG, C/D and I/O for `phase` (or release them for bus free)
    fn set_phase(&self, phase: Phase);

    fn is_bus_free(&self) -> bool {
        self.current_phase() == Phase::BusFree
    }

    /// Data lines sampled during selection, one bit per participating ID
    fn data_lines(&self) -> u8;

    /// ATN asserted by the initiator
    fn is_attention(&self) -> bool;

    /// RST asserted
    fn is_reset(&self) -> bool {
        false
    }

    fn set_busy(&self, busy: bool);

    /// Handshake bytes from the initiator into `buf`, returning the count received
    fn receive(&self, buf: &mut [u8]) -> usize;

    /// Handshake `buf` to the initiator, returning the count sent
    fn send(&self, buf: &[u8]) -> usize;
}

#[derive(Debug, Default)]
struct BusState {
    phase: Phase,
    data_lines: u8,
    /// Message bytes the initiator still holds ATN for
    attention: usize,
    reset: bool,
    busy: bool,
    incoming: VecDeque<u8>,
    sent: Vec<u8>,
}

/// In-memory bus standing in for the initiator side
///
/// Bytes queued with [`MemoryBus::queue`] are what the initiator hands over
/// in MSG OUT, COMMAND and DATA OUT; everything the target sends is
/// collected and can be taken with [`MemoryBus::take_sent`].
#[derive(Debug, Default)]
pub struct MemoryBus {
    state: Mutex<BusState>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a selection of `target_id` by `initiator_id`
    ///
    /// `messages` are sent with ATN asserted before the command, typically
    /// an IDENTIFY message.
    pub fn select(&self, initiator_id: u8, target_id: u8, messages: &[u8]) {
        let mut state = self.state();
        state.phase = Phase::Selection;
        state.data_lines = (1 << initiator_id) | (1 << target_id);
        state.attention = messages.len();
        state.incoming.extend(messages);
    }

    /// Present an arbitrary selection mask
    pub fn select_mask(&self, mask: u8) {
        let mut state = self.state();
        state.phase = Phase::Selection;
        state.data_lines = mask;
    }

    /// Queue bytes the initiator will hand over
    pub fn queue(&self, bytes: &[u8]) {
        self.state().incoming.extend(bytes);
    }

    pub fn take_sent(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().sent)
    }

    pub fn set_reset(&self, reset: bool) {
        self.state().reset = reset;
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    /// Bytes queued by the initiator that the target has not read yet
    pub fn pending(&self) -> usize {
        self.state().incoming.len()
    }
}

impl Bus for MemoryBus {
    fn current_phase(&self) -> Phase {
        self.state().phase
    }

    fn set_phase(&self, phase: Phase) {
        let mut state = self.state();
        state.phase = phase;
        if phase == Phase::BusFree {
            state.data_lines = 0;
            state.busy = false;
        }
    }

    fn data_lines(&self) -> u8 {
        self.state().data_lines
    }

    fn is_attention(&self) -> bool {
        self.state().attention > 0
    }

    fn is_reset(&self) -> bool {
        self.state().reset
    }

    fn set_busy(&self, busy: bool) {
        self.state().busy = busy;
    }

    fn receive(&self, buf: &mut [u8]) -> usize {
        let mut state = self.state();
        let mut count = 0;
        for slot in buf.iter_mut() {
            match state.incoming.pop_front() {
                Some(byte) => {
                    *slot = byte;
                    count += 1;
                }
                None => break,
            }
        }
        if state.phase == Phase::MsgOut {
            state.attention = state.attention.saturating_sub(count);
        }
        count
    }

    fn send(&self, buf: &[u8]) -> usize {
        self.state().sent.extend_from_slice(buf);
        buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_sets_mask_and_attention() {
        let bus = MemoryBus::new();
        bus.select(7, 1, &[0x80]);
        assert_eq!(bus.current_phase(), Phase::Selection);
        assert_eq!(bus.data_lines(), 0b1000_0010);
        assert!(bus.is_attention());

        bus.set_phase(Phase::MsgOut);
        let mut msg = [0u8; 1];
        assert_eq!(bus.receive(&mut msg), 1);
        assert_eq!(msg[0], 0x80);
        assert!(!bus.is_attention());
    }

    #[test]
    fn test_short_receive() {
        let bus = MemoryBus::new();
        bus.queue(&[1, 2]);
        let mut buf = [0u8; 4];
        assert_eq!(bus.receive(&mut buf), 2);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn test_bus_free_releases_lines() {
        let bus = MemoryBus::new();
        bus.select(7, 0, &[]);
        bus.set_busy(true);
        bus.set_phase(Phase::BusFree);
        assert!(bus.is_bus_free());
        assert!(!bus.is_busy());
        assert_eq!(bus.data_lines(), 0);
    }

    #[test]
    fn test_sent_bytes_collected() {
        let bus = MemoryBus::new();
        bus.send(&[0x00]);
        bus.send(&[0x12, 0x34]);
        assert_eq!(bus.take_sent(), vec![0x00, 0x12, 0x34]);
        assert!(bus.take_sent().is_empty());
    }
}
