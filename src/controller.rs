//! Target-mode controller for one SCSI ID
//!
//! The controller follows the bus through the phases of a transaction:
//! selection, an optional IDENTIFY message, the command, an optional data
//! phase, status and COMMAND COMPLETE. Each call of
//! [`Controller::process_phase`] runs the handler of the current phase once.

use crate::bus::Bus;
use crate::buffer::TransferBuffer;
use crate::device::{CommandContext, Device};
use crate::error::{ScsiError, ScsiResult};
use crate::mode_page;
use crate::phase::Phase;
use crate::registry::{lock_device, LunRegistry, SharedDevice, MAX_LUNS};
use crate::scsi::{command_length, message, scsi_status, ScsiOpcode, SenseData};
use byteorder::{BigEndian, ByteOrder};
use std::sync::Arc;

/// Initiator ID from a selection mask
///
/// The mask has one bit per device taking part in the selection. The lowest
/// set bit other than `own_id` wins; `None` if only `own_id` is set.
pub fn extract_initiator_id(mask: u8, own_id: u8) -> Option<u8> {
    let foreign = mask & !id_bit(own_id);
    (foreign != 0).then(|| foreign.trailing_zeros() as u8)
}

/// Data line of `id` during selection; none for IDs beyond a narrow bus
fn id_bit(id: u8) -> u8 {
    1u8.checked_shl(u32::from(id)).unwrap_or(0)
}

type PhaseHandler<B> = fn(&mut Controller<B>) -> ScsiResult<()>;

/// Emulated SCSI target with up to 32 logical units
pub struct Controller<B: Bus> {
    bus: Arc<B>,
    target_id: u8,
    registry: Arc<LunRegistry>,
    buffer: TransferBuffer,
    phase: Phase,
    status: u8,
    initiator_id: Option<u8>,
    /// LUN from an IDENTIFY message, preferred over the CDB LUN
    identified_lun: Option<u8>,
    /// Device of the command in progress
    current_device: Option<SharedDevice>,
}

impl<B: Bus> Controller<B> {
    pub fn new(bus: Arc<B>, target_id: u8) -> Self {
        Self::with_registry(bus, target_id, Arc::new(LunRegistry::new()))
    }

    /// Create a controller serving the devices of an existing registry
    pub fn with_registry(bus: Arc<B>, target_id: u8, registry: Arc<LunRegistry>) -> Self {
        Controller {
            bus,
            target_id,
            registry,
            buffer: TransferBuffer::new(),
            phase: Phase::BusFree,
            status: scsi_status::GOOD,
            initiator_id: None,
            identified_lun: None,
            current_device: None,
        }
    }

    pub fn target_id(&self) -> u8 {
        self.target_id
    }

    pub fn max_luns(&self) -> usize {
        MAX_LUNS
    }

    // ------------------------------------------------------------------------
    // Phase state machine
    // ------------------------------------------------------------------------

    pub fn get_phase(&self) -> Phase {
        self.phase
    }

    /// Store a phase without driving the bus
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn is_bus_free(&self) -> bool {
        self.phase == Phase::BusFree
    }

    fn phase_handler(phase: Phase) -> Option<PhaseHandler<B>> {
        match phase {
            Phase::BusFree => Some(Self::on_busfree),
            Phase::Selection => Some(Self::on_selection),
            Phase::MsgOut => Some(Self::on_msg_out),
            Phase::Command => Some(Self::on_command),
            Phase::DataIn => Some(Self::on_data_in),
            Phase::DataOut => Some(Self::on_data_out),
            Phase::Status => Some(Self::on_status),
            Phase::MsgIn => Some(Self::on_msg_in),
            Phase::Reselection | Phase::Reserved => None,
        }
    }

    /// Run the handler of the current phase
    ///
    /// Fatal errors reset the controller before they are returned, so the
    /// controller is always ready for the next selection afterwards.
    pub fn process_phase(&mut self) -> ScsiResult<()> {
        if self.bus.is_reset() {
            log::info!("Target {}: bus reset", self.target_id);
            self.reset();
            return Ok(());
        }

        let Some(handler) = Self::phase_handler(self.phase) else {
            let phase = self.phase;
            log::error!("Target {}: {} phase is not supported", self.target_id, phase);
            self.reset();
            return Err(ScsiError::Protocol(format!(
                "{} phase is not supported in target mode",
                phase
            )));
        };

        match handler(self) {
            Err(e) if e.is_fatal() => {
                log::error!("Target {}: {}", self.target_id, e);
                self.reset();
                Err(e)
            }
            result => result,
        }
    }

    /// Abandon whatever is in progress and release the bus
    pub fn reset(&mut self) {
        self.phase = Phase::BusFree;
        self.bus.set_phase(Phase::BusFree);
        self.status = scsi_status::GOOD;
        self.buffer.clear();
        self.initiator_id = None;
        self.identified_lun = None;
        self.current_device = None;

        for device in self.registry.devices() {
            lock_device(&device).reset();
        }
    }

    /// Drive the bus into `phase`
    fn enter(&mut self, phase: Phase) {
        log::trace!("Target {}: {} -> {}", self.target_id, self.phase, phase);
        self.phase = phase;
        self.bus.set_phase(phase);
    }

    /// End the transaction
    fn release_bus(&mut self) {
        self.initiator_id = None;
        self.identified_lun = None;
        self.current_device = None;
        self.bus.set_busy(false);
        self.enter(Phase::BusFree);
    }

    fn on_busfree(&mut self) -> ScsiResult<()> {
        if self.bus.current_phase() == Phase::Selection {
            self.phase = Phase::Selection;
        }
        Ok(())
    }

    fn on_selection(&mut self) -> ScsiResult<()> {
        let mask = self.bus.data_lines();

        // Another target is being selected
        if mask & id_bit(self.target_id) == 0 {
            self.phase = Phase::BusFree;
            return Ok(());
        }

        self.initiator_id = self.extract_initiator_id(mask);
        log::debug!(
            "Target {}: selected by initiator {:?}",
            self.target_id,
            self.initiator_id
        );

        self.bus.set_busy(true);
        self.status = scsi_status::GOOD;
        self.buffer.clear();
        self.identified_lun = None;

        if self.bus.is_attention() {
            self.enter(Phase::MsgOut);
        } else {
            self.enter(Phase::Command);
        }
        Ok(())
    }

    fn receive_exact(&mut self, len: usize, what: &str) -> ScsiResult<Vec<u8>> {
        let mut bytes = vec![0u8; len];
        let received = self.bus.receive(&mut bytes);
        if received != len {
            return Err(ScsiError::Protocol(format!(
                "{}: received {} of {} bytes",
                what, received, len
            )));
        }
        Ok(bytes)
    }

    fn on_msg_out(&mut self) -> ScsiResult<()> {
        let msg = self.receive_exact(1, "MESSAGE OUT")?[0];

        match msg {
            m if m & message::IDENTIFY != 0 => {
                self.identified_lun = Some(m & 0x1F);
                log::trace!("Target {}: IDENTIFY LUN {}", self.target_id, m & 0x1F);
            }
            message::ABORT => {
                log::debug!("Target {}: ABORT", self.target_id);
                self.release_bus();
                return Ok(());
            }
            message::BUS_DEVICE_RESET => {
                log::info!("Target {}: BUS DEVICE RESET", self.target_id);
                self.reset();
                return Ok(());
            }
            message::EXTENDED_MESSAGE => {
                let len = self.receive_exact(1, "Extended message length")?[0];
                // A length of 0 stands for 256
                let len = if len == 0 { 256 } else { usize::from(len) };
                let ext = self.receive_exact(len, "Extended message")?;
                log::debug!("Target {}: ignoring extended message {}", self.target_id, hex::encode(&ext));
            }
            other => log::debug!("Target {}: ignoring message ${:02X}", self.target_id, other),
        }

        if !self.bus.is_attention() {
            self.enter(Phase::Command);
        }
        Ok(())
    }

    fn on_command(&mut self) -> ScsiResult<()> {
        let opcode = self.receive_exact(1, "COMMAND")?[0];
        let len = command_length(opcode);

        self.buffer.allocate_command(len);
        self.buffer.cmd_mut()[0] = opcode;
        let received = self.bus.receive(&mut self.buffer.cmd_mut()[1..len]);
        if received != len - 1 {
            return Err(ScsiError::Protocol(format!(
                "COMMAND ${:02X}: received {} of {} bytes",
                opcode,
                received + 1,
                len
            )));
        }
        self.buffer.set_command_length(len);

        log::debug!(
            "Target {}: received CDB {}",
            self.target_id,
            hex::encode(self.buffer.cdb())
        );

        self.execute()
    }

    /// Run the command in the command buffer
    fn execute(&mut self) -> ScsiResult<()> {
        self.buffer.reset_offset();
        self.buffer.set_length(0);
        self.buffer.set_block_progress(0, 0);

        let lun = self.identified_lun.unwrap_or_else(|| self.get_lun());

        let Some(device) = self.registry.get_device_for_lun(i32::from(lun)) else {
            self.execute_without_device(lun);
            return Ok(());
        };

        self.current_device = Some(device);
        self.with_device(|dev, ctx| dev.execute(ctx))
    }

    /// Answer a command for a LUN that has no device
    fn execute_without_device(&mut self, lun: u8) {
        let opcode = self.get_opcode();
        log::debug!(
            "Target {}: ${:02X} for LUN {} without a device",
            self.target_id,
            opcode,
            lun
        );

        let cdb = self.buffer.cmd();
        match ScsiOpcode::from_u8(opcode) {
            Some(ScsiOpcode::Inquiry) => {
                let alloc_len = BigEndian::read_u16(&cdb[3..5]) as usize;
                let data = mode_page::build_not_present_inquiry(alloc_len);
                self.buffer.load(&data);
                self.status = scsi_status::GOOD;
                self.enter(Phase::DataIn);
            }
            Some(ScsiOpcode::RequestSense) => {
                let alloc_len = cdb[4] as usize;
                let mut data = SenseData::lun_not_supported().to_bytes();
                data.truncate(alloc_len);
                self.buffer.load(&data);
                self.status = scsi_status::GOOD;
                self.enter(Phase::DataIn);
            }
            _ => {
                self.status = scsi_status::CHECK_CONDITION;
                self.enter(Phase::Status);
            }
        }
    }

    /// Let the device of the current command work on the buffer
    ///
    /// The registry lock is not held here, only the device lock, and only
    /// for the duration of `f`.
    fn with_device<F>(&mut self, f: F) -> ScsiResult<()>
    where
        F: FnOnce(&mut Device, &mut CommandContext<'_>) -> ScsiResult<()>,
    {
        let Some(device) = self.current_device.clone() else {
            return Err(ScsiError::Protocol(format!(
                "{} phase without a command in progress",
                self.phase
            )));
        };

        let luns = self.registry.luns();
        let (phase, status) = {
            let mut ctx = CommandContext::new(&mut self.buffer, self.initiator_id).with_luns(luns);
            let mut dev = lock_device(&device);
            f(&mut *dev, &mut ctx)?;
            (ctx.phase(), ctx.status())
        };

        self.status = status;
        self.enter(phase);
        Ok(())
    }

    fn on_data_in(&mut self) -> ScsiResult<()> {
        let expected = self.buffer.window().len();
        let sent = self.bus.send(self.buffer.window());
        if sent != expected {
            return Err(ScsiError::Protocol(format!(
                "DATA IN: sent {} of {} bytes",
                sent, expected
            )));
        }
        self.buffer.update_offset_and_length();

        if self.buffer.blocks() > 0 {
            self.with_device(|dev, ctx| dev.continue_data_in(ctx))
        } else {
            self.enter(Phase::Status);
            Ok(())
        }
    }

    fn on_data_out(&mut self) -> ScsiResult<()> {
        let expected = self.buffer.window().len();
        let received = self.bus.receive(self.buffer.window_mut());
        if received != expected {
            return Err(ScsiError::Protocol(format!(
                "DATA OUT: received {} of {} bytes",
                received, expected
            )));
        }
        self.buffer.update_offset_and_length();

        self.with_device(|dev, ctx| dev.complete_data_out(ctx))
    }

    fn on_status(&mut self) -> ScsiResult<()> {
        log::trace!("Target {}: status ${:02X}", self.target_id, self.status);
        if self.bus.send(&[self.status]) != 1 {
            return Err(ScsiError::Protocol("STATUS byte was not accepted".into()));
        }
        self.enter(Phase::MsgIn);
        Ok(())
    }

    fn on_msg_in(&mut self) -> ScsiResult<()> {
        if self.bus.send(&[message::COMMAND_COMPLETE]) != 1 {
            return Err(ScsiError::Protocol("COMMAND COMPLETE was not accepted".into()));
        }
        self.release_bus();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Command access
    // ------------------------------------------------------------------------

    pub fn get_status(&self) -> u8 {
        self.status
    }

    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    /// Raw command buffer
    pub fn get_cmd(&self) -> &[u8] {
        self.buffer.cmd()
    }

    /// Raw data buffer
    pub fn get_buffer(&self) -> &[u8] {
        self.buffer.data()
    }

    pub fn buffer(&self) -> &TransferBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut TransferBuffer {
        &mut self.buffer
    }

    pub fn get_opcode(&self) -> u8 {
        self.buffer.cmd()[0]
    }

    /// LUN in bits 5-7 of CDB byte 1 (SCSI-1/SCSI-2 addressing)
    pub fn get_lun(&self) -> u8 {
        self.buffer.cmd()[1] >> 5
    }

    pub fn get_initiator_id(&self) -> Option<u8> {
        self.initiator_id
    }

    pub fn extract_initiator_id(&self, mask: u8) -> Option<u8> {
        extract_initiator_id(mask, self.target_id)
    }

    // ------------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------------

    pub fn registry(&self) -> &Arc<LunRegistry> {
        &self.registry
    }

    pub fn add_device(&self, device: SharedDevice) -> bool {
        self.registry.add_device(device)
    }

    pub fn remove_device(&self, device: &SharedDevice) -> bool {
        self.registry.remove_device(device)
    }

    pub fn has_device_for_lun(&self, lun: i32) -> bool {
        self.registry.has_device_for_lun(lun)
    }

    pub fn get_device_for_lun(&self, lun: i32) -> Option<SharedDevice> {
        self.registry.get_device_for_lun(lun)
    }

    pub fn get_lun_count(&self) -> usize {
        self.registry.lun_count()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::device::DeviceKind;
    use std::sync::Mutex;

    fn controller(target_id: u8) -> Controller<MemoryBus> {
        Controller::new(Arc::new(MemoryBus::new()), target_id)
    }

    fn shared(lun: i32) -> SharedDevice {
        Arc::new(Mutex::new(Device::new(DeviceKind::HardDisk, lun)))
    }

    #[test]
    fn test_allocate_cmd() {
        let mut controller = controller(0);
        assert_eq!(controller.get_cmd().len(), 16);
        controller.buffer_mut().allocate_command(1234);
        assert_eq!(controller.get_cmd().len(), 1234);
        controller.buffer_mut().allocate_command(20);
        assert_eq!(controller.get_cmd().len(), 1234);
    }

    #[test]
    fn test_allocate_buffer() {
        let mut controller = controller(0);
        controller.buffer_mut().allocate_data(1);
        assert!(controller.get_buffer().len() >= 1);
        controller.buffer_mut().allocate_data(10_000);
        assert!(controller.get_buffer().len() >= 10_000);
    }

    #[test]
    fn test_reset() {
        let mut controller = controller(0);
        controller.set_phase(Phase::Status);
        controller.set_status(scsi_status::CHECK_CONDITION);
        controller.buffer_mut().set_length(100);

        controller.reset();
        assert!(controller.is_bus_free());
        assert_eq!(controller.get_phase(), Phase::BusFree);
        assert_eq!(controller.get_status(), scsi_status::GOOD);
        assert_eq!(controller.buffer().get_length(), 0);
        assert!(!controller.buffer().has_valid_length());
    }

    #[test]
    fn test_set_get_status() {
        let mut controller = controller(0);
        controller.set_status(scsi_status::BUSY);
        assert_eq!(controller.get_status(), scsi_status::BUSY);
    }

    #[test]
    fn test_set_get_phase() {
        let mut controller = controller(0);
        controller.set_phase(Phase::Selection);
        assert_eq!(controller.get_phase(), Phase::Selection);
        assert!(!controller.is_bus_free());
    }

    #[test]
    fn test_process_phase_rejects_unsupported_phases() {
        let mut controller = controller(0);

        controller.set_phase(Phase::Reselection);
        assert!(matches!(controller.process_phase(), Err(ScsiError::Protocol(_))));
        assert!(controller.is_bus_free());

        controller.set_phase(Phase::Reserved);
        assert!(matches!(controller.process_phase(), Err(ScsiError::Protocol(_))));
        assert!(controller.is_bus_free());
    }

    #[test]
    fn test_bus_free_waits_for_selection() {
        let mut controller = controller(0);
        controller.process_phase().unwrap();
        assert!(controller.is_bus_free());
    }

    #[test]
    fn test_selection_of_other_target_is_ignored() {
        let bus = Arc::new(MemoryBus::new());
        let mut controller = Controller::new(Arc::clone(&bus), 0);
        bus.select(7, 3, &[]);

        controller.process_phase().unwrap();
        assert_eq!(controller.get_phase(), Phase::Selection);
        controller.process_phase().unwrap();
        assert!(controller.is_bus_free());
        assert!(!bus.is_busy());
    }

    #[test]
    fn test_selection_ignored_for_id_beyond_narrow_bus() {
        let bus = Arc::new(MemoryBus::new());
        let mut controller = Controller::new(Arc::clone(&bus), 8);
        bus.select_mask(0x80);

        controller.process_phase().unwrap();
        controller.process_phase().unwrap();
        assert!(controller.is_bus_free());
        assert!(!bus.is_busy());
        assert_eq!(extract_initiator_id(0x81, 8), Some(0));
    }

    #[test]
    fn test_selection_with_attention() {
        let bus = Arc::new(MemoryBus::new());
        let mut controller = Controller::new(Arc::clone(&bus), 0);
        bus.select(7, 0, &[0x80 | 2]);

        controller.process_phase().unwrap();
        controller.process_phase().unwrap();
        assert_eq!(controller.get_phase(), Phase::MsgOut);
        assert_eq!(controller.get_initiator_id(), Some(7));
        assert!(bus.is_busy());

        controller.process_phase().unwrap();
        assert_eq!(controller.get_phase(), Phase::Command);
    }

    #[test]
    fn test_short_command_is_protocol_error() {
        let bus = Arc::new(MemoryBus::new());
        let mut controller = Controller::new(Arc::clone(&bus), 0);
        bus.select(7, 0, &[]);
        bus.queue(&[0x28, 0, 0]);

        controller.process_phase().unwrap();
        controller.process_phase().unwrap();
        assert_eq!(controller.get_phase(), Phase::Command);
        assert!(matches!(controller.process_phase(), Err(ScsiError::Protocol(_))));
        assert!(controller.is_bus_free());
    }

    #[test]
    fn test_bus_reset() {
        let bus = Arc::new(MemoryBus::new());
        let mut controller = Controller::new(Arc::clone(&bus), 0);
        controller.set_phase(Phase::DataIn);
        controller.set_status(scsi_status::CHECK_CONDITION);

        bus.set_reset(true);
        controller.process_phase().unwrap();
        assert!(controller.is_bus_free());
        assert_eq!(controller.get_status(), scsi_status::GOOD);
    }

    #[test]
    fn test_get_max_luns() {
        assert_eq!(controller(0).max_luns(), 32);
    }

    #[test]
    fn test_lun_lifecycle() {
        let controller = controller(0);
        let device = shared(4);

        assert_eq!(controller.get_lun_count(), 0);
        assert!(!controller.has_device_for_lun(0));
        assert!(!controller.has_device_for_lun(-1));
        assert!(controller.get_device_for_lun(0).is_none());

        assert!(controller.add_device(device.clone()));
        assert_eq!(controller.get_lun_count(), 1);
        assert!(controller.has_device_for_lun(4));
        assert!(controller.get_device_for_lun(4).is_some());

        assert!(!controller.add_device(shared(32)));
        assert!(!controller.add_device(shared(-1)));

        assert!(controller.remove_device(&device));
        assert_eq!(controller.get_lun_count(), 0);
        assert!(!controller.remove_device(&device));
    }

    #[test]
    fn test_extract_initiator_id() {
        let controller = controller(1);
        assert_eq!(controller.extract_initiator_id((1 << 7) | (1 << 1)), Some(7));
        assert_eq!(controller.extract_initiator_id(1 << 1), None);
    }

    #[test]
    fn test_extract_initiator_id_lowest_bit_wins() {
        assert_eq!(extract_initiator_id(0b1010_0001, 0), Some(5));
        assert_eq!(extract_initiator_id(0b0000_0000, 3), None);
    }

    #[test]
    fn test_get_opcode() {
        let mut controller = controller(0);
        controller.buffer_mut().cmd_mut()[0] = 0x12;
        assert_eq!(controller.get_opcode(), 0x12);
    }

    #[test]
    fn test_get_lun() {
        let mut controller = controller(0);
        controller.buffer_mut().cmd_mut()[1] = 3 << 5;
        assert_eq!(controller.get_lun(), 3);
        controller.buffer_mut().cmd_mut()[1] = 0xFF;
        assert_eq!(controller.get_lun(), 7);
    }

    #[test]
    fn test_length() {
        let mut controller = controller(0);
        assert!(!controller.buffer().has_valid_length());
        assert_eq!(controller.buffer().get_length(), 0);

        controller.buffer_mut().set_length(1);
        assert_eq!(controller.buffer().get_length(), 1);
        assert!(controller.buffer().has_valid_length());

        controller.buffer_mut().set_length(0);
        assert_eq!(controller.buffer().get_length(), 0);
        assert!(controller.buffer().has_valid_length());
    }

    #[test]
    fn test_update_offset_and_length() {
        let mut controller = controller(0);
        assert!(!controller.buffer().has_valid_length());

        controller.buffer_mut().update_offset_and_length();
        assert_eq!(controller.buffer().get_length(), 0);
        assert_eq!(controller.buffer().offset(), 0);
    }

    #[test]
    fn test_reset_offset() {
        let mut controller = controller(0);
        controller.buffer_mut().set_length(8);
        controller.buffer_mut().update_offset_and_length();
        assert_eq!(controller.buffer().offset(), 8);
        controller.buffer_mut().reset_offset();
        assert_eq!(controller.buffer().offset(), 0);
    }
}
