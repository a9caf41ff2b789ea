//! Emulated SCSI devices
//!
//! A [`Device`] is one logical unit. Its behaviour is selected by a closed
//! set of [`DeviceKind`]s; each kind supplies identity constants, a mode
//! page builder and the command tables the dispatcher looks opcodes up in.

pub mod cdrom;
pub mod disk;
pub mod factory;
pub mod primary;

use crate::buffer::TransferBuffer;
use crate::error::{ScsiError, ScsiResult};
use crate::mode_page::{self, CdbVariant, PageBuilder};
use crate::phase::Phase;
use crate::scsi::{asc, ascq, scsi_status, sense_key, ScsiLevel, ScsiOpcode, SenseData};
use crate::store::BlockStore;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use factory::DeviceFactory;

/// Vendor reported by INQUIRY unless configured otherwise
pub const DEFAULT_VENDOR: &str = "RSCSI";

/// Signature of a command handler in a dispatch table
pub type CommandHandler = fn(&mut Device, &mut CommandContext<'_>) -> ScsiResult<()>;

/// One dispatch table entry
pub type CommandEntry = (ScsiOpcode, CommandHandler);

const DISK_TABLES: &[&[CommandEntry]] = &[primary::COMMANDS, disk::COMMANDS];
const CDROM_TABLES: &[&[CommandEntry]] = &[primary::COMMANDS, cdrom::COMMANDS];

const DISK_SECTOR_SIZES: &[u32] = &[512, 1024, 2048, 4096];
const CDROM_SECTOR_SIZES: &[u32] = &[512, 2048];

/// Device families that can be emulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Fixed direct-access disk (SCHD)
    HardDisk,
    /// Direct-access disk with removable medium (SCRM)
    RemovableDisk,
    /// Read-only CD-ROM drive (SCCD)
    CdRom,
}

impl DeviceKind {
    pub fn code(self) -> &'static str {
        match self {
            DeviceKind::HardDisk => "SCHD",
            DeviceKind::RemovableDisk => "SCRM",
            DeviceKind::CdRom => "SCCD",
        }
    }

    /// Peripheral device type reported by INQUIRY
    pub fn device_type(self) -> u8 {
        match self {
            DeviceKind::HardDisk | DeviceKind::RemovableDisk => crate::scsi::device_type::DIRECT_ACCESS,
            DeviceKind::CdRom => crate::scsi::device_type::CD_ROM,
        }
    }

    pub fn is_removable(self) -> bool {
        !matches!(self, DeviceKind::HardDisk)
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, DeviceKind::CdRom)
    }

    pub fn default_product(self) -> &'static str {
        match self {
            DeviceKind::HardDisk => "SCSI HD",
            DeviceKind::RemovableDisk => "SCSI HD (REM.)",
            DeviceKind::CdRom => "SCSI CD-ROM",
        }
    }

    pub fn supported_sector_sizes(self) -> &'static [u32] {
        match self {
            DeviceKind::HardDisk | DeviceKind::RemovableDisk => DISK_SECTOR_SIZES,
            DeviceKind::CdRom => CDROM_SECTOR_SIZES,
        }
    }

    pub fn default_sector_size(self) -> u32 {
        match self {
            DeviceKind::HardDisk | DeviceKind::RemovableDisk => 512,
            DeviceKind::CdRom => 2048,
        }
    }

    /// INQUIRY additional length
    pub fn additional_length(self) -> u8 {
        0x1F
    }

    pub fn supports_save_parameters(self) -> bool {
        !matches!(self, DeviceKind::CdRom)
    }

    fn command_tables(self) -> &'static [&'static [CommandEntry]] {
        match self {
            DeviceKind::HardDisk | DeviceKind::RemovableDisk => DISK_TABLES,
            DeviceKind::CdRom => CDROM_TABLES,
        }
    }

    fn page_builder(self) -> PageBuilder {
        match self {
            DeviceKind::HardDisk | DeviceKind::RemovableDisk => mode_page::disk_pages,
            DeviceKind::CdRom => mode_page::cdrom_pages,
        }
    }

    /// Handler registered for `opcode`, if any
    pub fn handler(self, opcode: ScsiOpcode) -> Option<CommandHandler> {
        self.command_tables()
            .iter()
            .flat_map(|table| table.iter())
            .find(|(op, _)| *op == opcode)
            .map(|(_, handler)| *handler)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DeviceKind {
    type Err = ScsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCHD" => Ok(DeviceKind::HardDisk),
            "SCRM" => Ok(DeviceKind::RemovableDisk),
            "SCCD" => Ok(DeviceKind::CdRom),
            _ => Err(ScsiError::Config(format!("unknown device type '{}'", s))),
        }
    }
}

/// Reservation state set by RESERVE(6) and cleared by RELEASE(6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reservation {
    #[default]
    Free,
    /// Held by an initiator; `None` when its ID could not be determined
    HeldBy(Option<u8>),
}

/// Per-command view of the controller state a handler works on
///
/// Handlers read the CDB, fill or expect data through the shared
/// [`TransferBuffer`] and pick the next phase and status.
pub struct CommandContext<'a> {
    buffer: &'a mut TransferBuffer,
    initiator_id: Option<u8>,
    luns: Vec<u8>,
    phase: Phase,
    status: u8,
}

impl<'a> CommandContext<'a> {
    pub fn new(buffer: &'a mut TransferBuffer, initiator_id: Option<u8>) -> Self {
        CommandContext {
            buffer,
            initiator_id,
            luns: Vec::new(),
            phase: Phase::Status,
            status: scsi_status::GOOD,
        }
    }

    /// LUNs populated on the controller, for REPORT LUNS
    pub fn with_luns(mut self, luns: Vec<u8>) -> Self {
        self.luns = luns;
        self
    }

    /// The command buffer; always at least 16 bytes long
    pub fn cdb(&self) -> &[u8] {
        self.buffer.cmd()
    }

    pub fn opcode(&self) -> u8 {
        self.buffer.cmd()[0]
    }

    pub fn buffer(&mut self) -> &mut TransferBuffer {
        self.buffer
    }

    pub fn initiator_id(&self) -> Option<u8> {
        self.initiator_id
    }

    pub fn luns(&self) -> &[u8] {
        &self.luns
    }

    /// Bytes received in DATA OUT so far
    pub fn transferred(&self) -> &[u8] {
        self.buffer.transferred()
    }

    /// Send `data` to the initiator, truncated to `allocation_length`
    pub fn data_in(&mut self, data: &[u8], allocation_length: usize) {
        let len = data.len().min(allocation_length);
        self.buffer.load(&data[..len]);
        self.phase = Phase::DataIn;
    }

    /// Send whatever window the buffer currently holds
    pub fn enter_data_in(&mut self) {
        self.phase = Phase::DataIn;
    }

    /// Receive `length` bytes from the initiator
    pub fn data_out(&mut self, length: usize) {
        self.buffer.expect(length);
        self.phase = Phase::DataOut;
    }

    pub fn enter_data_out(&mut self) {
        self.phase = Phase::DataOut;
    }

    /// Finish the command with GOOD status
    pub fn complete(&mut self) {
        self.buffer.set_length(0);
        self.phase = Phase::Status;
    }

    fn finish(&mut self, status: u8) {
        self.status = status;
        self.buffer.set_length(0);
        self.buffer.set_block_progress(0, 0);
        self.phase = Phase::Status;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> u8 {
        self.status
    }
}

/// One emulated logical unit
pub struct Device {
    kind: DeviceKind,
    lun: i32,
    scsi_level: ScsiLevel,
    vendor: String,
    product: String,
    revision: String,
    product_configured: bool,
    sector_size: u32,
    block_count: u64,
    store: Option<Box<dyn BlockStore>>,
    ready: bool,
    stopped: bool,
    removed: bool,
    locked: bool,
    protected: bool,
    sense: Option<SenseData>,
    attention: Option<SenseData>,
    reservation: Reservation,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("kind", &self.kind)
            .field("lun", &self.lun)
            .field("product", &self.product)
            .field("sector_size", &self.sector_size)
            .field("block_count", &self.block_count)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

fn version_stamp() -> String {
    format!(
        "{:0>2}{:0>2}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    )
}

fn pad_field(dst: &mut [u8], value: &str) {
    dst.fill(b' ');
    for (d, &b) in dst.iter_mut().zip(value.as_bytes()) {
        *d = b;
    }
}

impl Device {
    /// Create an unconfigured device; geometry is set before [`Device::finalize`]
    pub fn new(kind: DeviceKind, lun: i32) -> Self {
        Device {
            kind,
            lun,
            scsi_level: ScsiLevel::Scsi2,
            vendor: DEFAULT_VENDOR.to_string(),
            product: kind.default_product().to_string(),
            revision: version_stamp(),
            product_configured: false,
            sector_size: 0,
            block_count: 0,
            store: None,
            ready: false,
            stopped: false,
            removed: false,
            locked: false,
            protected: false,
            sense: None,
            attention: None,
            reservation: Reservation::Free,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn lun(&self) -> i32 {
        self.lun
    }

    pub fn device_type(&self) -> u8 {
        self.kind.device_type()
    }

    pub fn scsi_level(&self) -> ScsiLevel {
        self.scsi_level
    }

    pub fn set_scsi_level(&mut self, level: ScsiLevel) {
        self.scsi_level = level;
    }

    pub fn is_removable(&self) -> bool {
        self.kind.is_removable()
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn set_vendor(&mut self, vendor: &str) -> ScsiResult<()> {
        self.vendor = checked_identifier("vendor", vendor, 8)?;
        Ok(())
    }

    pub fn set_product(&mut self, product: &str) -> ScsiResult<()> {
        self.product = checked_identifier("product", product, 16)?;
        self.product_configured = true;
        Ok(())
    }

    pub fn set_revision(&mut self, revision: &str) -> ScsiResult<()> {
        self.revision = checked_identifier("revision", revision, 4)?;
        Ok(())
    }

    /// Vendor, product and revision as the 28 space-padded INQUIRY bytes
    pub fn identification(&self) -> [u8; 28] {
        let mut id = [b' '; 28];
        pad_field(&mut id[0..8], &self.vendor);
        pad_field(&mut id[8..24], &self.product);
        pad_field(&mut id[24..28], &self.revision);
        id
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn supported_sector_sizes(&self) -> &'static [u32] {
        self.kind.supported_sector_sizes()
    }

    pub fn set_sector_size(&mut self, size: u32) -> ScsiResult<()> {
        if !self.supported_sector_sizes().contains(&size) {
            return Err(ScsiError::Config(format!(
                "{} does not support a sector size of {} bytes",
                self.kind, size
            )));
        }
        self.sector_size = size;
        Ok(())
    }

    /// Switch to another supported sector size, keeping the capacity
    pub(crate) fn change_sector_size(&mut self, size: u32) -> ScsiResult<()> {
        if size == self.sector_size {
            return Ok(());
        }
        if !self.supported_sector_sizes().contains(&size) {
            return Err(ScsiError::ParameterList(format!(
                "unsupported sector size {}",
                size
            )));
        }
        if self.sector_size != 0 {
            let capacity = self.block_count * u64::from(self.sector_size);
            self.block_count = capacity / u64::from(size);
        }
        log::info!(
            "LUN {}: sector size changed from {} to {} bytes",
            self.lun,
            self.sector_size,
            size
        );
        self.sector_size = size;
        Ok(())
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn set_block_count(&mut self, blocks: u64) {
        self.block_count = blocks;
    }

    /// Attach the medium; the block count follows from its capacity at finalize
    pub fn attach_store(&mut self, store: Box<dyn BlockStore>) {
        self.store = Some(store);
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Validate the geometry and make the device ready
    pub fn finalize(&mut self) -> ScsiResult<()> {
        if self.sector_size == 0 {
            return Err(ScsiError::Geometry(format!(
                "LUN {}: sector size is not set",
                self.lun
            )));
        }
        if let Some(store) = &self.store {
            self.block_count = store.capacity() / u64::from(self.sector_size);
        }
        if self.block_count == 0 {
            return Err(ScsiError::Geometry(format!("LUN {}: device has 0 blocks", self.lun)));
        }

        if !self.is_removable() && !self.product_configured {
            self.product = self.capacity_product();
        }

        self.ready = true;
        self.removed = false;
        log::debug!(
            "LUN {}: {} ready, {} blocks of {} bytes",
            self.lun,
            self.kind,
            self.block_count,
            self.sector_size
        );
        Ok(())
    }

    fn capacity_product(&self) -> String {
        let capacity = self.block_count * u64::from(self.sector_size);
        let (value, unit) = if capacity >= 10 * 1024 * 1024 * 1024 {
            (capacity / (1024 * 1024 * 1024), "GiB")
        } else if capacity >= 1024 * 1024 {
            (capacity / (1024 * 1024), "MiB")
        } else {
            (capacity / 1024, "KiB")
        };
        format!("{} {} {}", self.kind.default_product(), value, unit)
    }

    pub fn is_ready(&self) -> bool {
        self.ready && !self.removed
    }

    pub fn is_protected(&self) -> bool {
        self.protected
            || self.kind.is_read_only()
            || self.store.as_ref().is_some_and(|s| s.is_read_only())
    }

    pub fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub(crate) fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    /// Remove the medium of a removable device
    pub fn eject(&mut self) -> bool {
        if !self.is_removable() || self.locked || self.removed {
            return false;
        }
        self.store = None;
        self.ready = false;
        self.removed = true;
        self.block_count = 0;
        log::info!("LUN {}: medium ejected", self.lun);
        true
    }

    /// Insert a new medium into a removable device
    pub fn insert(&mut self, store: Box<dyn BlockStore>) -> ScsiResult<()> {
        if !self.is_removable() {
            return Err(ScsiError::Config(format!(
                "LUN {}: {} has no removable medium",
                self.lun, self.kind
            )));
        }
        self.store = Some(store);
        self.stopped = false;
        self.finalize()?;
        self.attention = Some(SenseData::new(
            sense_key::UNIT_ATTENTION,
            asc::NOT_READY_TO_READY_CHANGE,
            0,
        ));
        log::info!("LUN {}: medium inserted", self.lun);
        Ok(())
    }

    pub(crate) fn store(&self) -> ScsiResult<&dyn BlockStore> {
        self.store
            .as_deref()
            .ok_or_else(|| ScsiError::Sense(SenseData::medium_not_present()))
    }

    pub(crate) fn store_mut(&mut self) -> ScsiResult<&mut (dyn BlockStore + 'static)> {
        self.store
            .as_deref_mut()
            .ok_or_else(|| ScsiError::Sense(SenseData::medium_not_present()))
    }

    pub(crate) fn check_ready(&self) -> ScsiResult<()> {
        if !self.is_ready() {
            return Err(SenseData::medium_not_present().into());
        }
        if self.stopped {
            return Err(SenseData::new(
                sense_key::NOT_READY,
                asc::LUN_NOT_READY,
                ascq::INITIALIZING_COMMAND_REQUIRED,
            )
            .into());
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> ScsiResult<()> {
        if self.is_protected() {
            return Err(SenseData::write_protected().into());
        }
        Ok(())
    }

    pub(crate) fn check_range(&self, lba: u64, blocks: u32) -> ScsiResult<()> {
        match lba.checked_add(u64::from(blocks)) {
            Some(end) if end <= self.block_count => Ok(()),
            _ => Err(SenseData::lba_out_of_range(lba).into()),
        }
    }

    /// Sense data waiting for REQUEST SENSE
    pub fn sense(&self) -> Option<&SenseData> {
        self.sense.as_ref()
    }

    pub(crate) fn take_sense(&mut self) -> Option<SenseData> {
        self.sense.take()
    }

    pub fn set_sense(&mut self, sense: SenseData) {
        self.sense = Some(sense);
    }

    pub fn reservation(&self) -> Reservation {
        self.reservation
    }

    pub(crate) fn set_reservation(&mut self, reservation: Reservation) {
        self.reservation = reservation;
    }

    /// Bus reset: drop the reservation and any pending sense
    pub fn reset(&mut self) {
        self.reservation = Reservation::Free;
        self.sense = None;
        self.locked = false;
    }

    pub fn supports_save_parameters(&self) -> bool {
        self.kind.supports_save_parameters()
    }

    /// Mode pages keyed by page code
    pub fn build_mode_pages(&self, changeable: bool) -> BTreeMap<u8, Vec<u8>> {
        let mut pages = BTreeMap::new();
        (self.kind.page_builder())(self, changeable, &mut pages);
        pages
    }

    pub fn supports(&self, opcode: u8) -> bool {
        ScsiOpcode::from_u8(opcode).is_some_and(|op| self.kind.handler(op).is_some())
    }

    /// Run the handler registered for `opcode`
    ///
    /// Fails with [`ScsiError::UnsupportedCommand`] when this kind of device
    /// has no handler for the opcode.
    pub fn dispatch(&mut self, opcode: u8, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
        let handler = ScsiOpcode::from_u8(opcode)
            .and_then(|op| self.kind.handler(op))
            .ok_or(ScsiError::UnsupportedCommand(opcode))?;
        log::trace!("LUN {}: dispatching ${:02X}", self.lun, opcode);
        handler(self, ctx)
    }

    fn reservation_allows(&self, opcode: u8, ctx: &CommandContext<'_>) -> bool {
        match self.reservation {
            Reservation::Free => true,
            Reservation::HeldBy(holder) if holder == ctx.initiator_id() => true,
            Reservation::HeldBy(_) => match ScsiOpcode::from_u8(opcode) {
                Some(ScsiOpcode::Inquiry | ScsiOpcode::RequestSense | ScsiOpcode::Release6) => true,
                Some(ScsiOpcode::PreventAllowMediumRemoval) => ctx.cdb()[4] & 0x01 == 0,
                _ => false,
            },
        }
    }

    /// Execute the command in the context's CDB
    ///
    /// Command-level failures end in CHECK CONDITION with the sense data kept
    /// for REQUEST SENSE; only fatal errors are returned.
    pub fn execute(&mut self, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
        let opcode = ctx.opcode();
        let op = ScsiOpcode::from_u8(opcode);

        if op != Some(ScsiOpcode::RequestSense) {
            self.sense = None;
        }

        if !self.reservation_allows(opcode, ctx) {
            log::debug!(
                "LUN {}: ${:02X} from initiator {:?} conflicts with reservation",
                self.lun,
                opcode,
                ctx.initiator_id()
            );
            ctx.finish(scsi_status::RESERVATION_CONFLICT);
            return Ok(());
        }

        if !matches!(op, Some(ScsiOpcode::Inquiry | ScsiOpcode::RequestSense)) {
            if let Some(attention) = self.attention.take() {
                self.fail(ctx, attention);
                return Ok(());
            }
        }

        let result = self.dispatch(opcode, ctx);
        self.absorb(ctx, result)
    }

    /// Produce the next DATA IN chunk of a multi-block read
    pub fn continue_data_in(&mut self, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
        let result = disk::read_chunk(self, ctx.buffer()).map(|()| ctx.enter_data_in());
        self.absorb(ctx, result)
    }

    /// Consume the bytes received in DATA OUT
    pub fn complete_data_out(&mut self, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
        let result = match ScsiOpcode::from_u8(ctx.opcode()) {
            Some(ScsiOpcode::Write6 | ScsiOpcode::Write10 | ScsiOpcode::Write16) => {
                disk::write_chunk(self, ctx)
            }
            Some(ScsiOpcode::Verify10 | ScsiOpcode::Verify16) => disk::verify_chunk(self, ctx),
            Some(ScsiOpcode::ModeSelect6) => self.mode_select(CdbVariant::Six, ctx),
            Some(ScsiOpcode::ModeSelect10) => self.mode_select(CdbVariant::Ten, ctx),
            _ => {
                ctx.complete();
                Ok(())
            }
        };
        self.absorb(ctx, result)
    }

    fn mode_select(&mut self, variant: CdbVariant, ctx: &mut CommandContext<'_>) -> ScsiResult<()> {
        let transfer_length = ctx.transferred().len();
        mode_page::apply_mode_select(self, variant, ctx.cdb(), ctx.transferred(), transfer_length)?;
        ctx.complete();
        Ok(())
    }

    fn absorb(&mut self, ctx: &mut CommandContext<'_>, result: ScsiResult<()>) -> ScsiResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("LUN {}: command ${:02X} failed: {}", self.lun, ctx.opcode(), e);
                self.fail(ctx, e.sense());
                Ok(())
            }
        }
    }

    fn fail(&mut self, ctx: &mut CommandContext<'_>, sense: SenseData) {
        self.sense = Some(sense);
        ctx.finish(scsi_status::CHECK_CONDITION);
    }
}

fn checked_identifier(field: &str, value: &str, max: usize) -> ScsiResult<String> {
    if value.is_empty() || value.len() > max || !value.is_ascii() {
        return Err(ScsiError::Config(format!(
            "{} '{}' must be 1 to {} ASCII characters",
            field, value, max
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn context<'a>(buffer: &'a mut TransferBuffer, cdb: &[u8]) -> CommandContext<'a> {
        buffer.set_command(cdb);
        CommandContext::new(buffer, Some(7))
    }

    fn ready_disk() -> Device {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        hd.set_sector_size(512).unwrap();
        hd.attach_store(Box::new(MemoryStore::new(512 * 100)));
        hd.finalize().unwrap();
        hd
    }

    #[test]
    fn test_finalize_without_blocks_fails() {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        hd.set_sector_size(1024).unwrap();
        assert!(matches!(hd.finalize(), Err(ScsiError::Geometry(_))));
        assert!(!hd.is_ready());
    }

    #[test]
    fn test_finalize_without_sector_size_fails() {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        hd.set_block_count(10);
        assert!(matches!(hd.finalize(), Err(ScsiError::Geometry(_))));
    }

    #[test]
    fn test_product_data() {
        let mut hd_kb = Device::new(DeviceKind::HardDisk, 0);
        hd_kb.set_sector_size(1024).unwrap();
        hd_kb.set_block_count(1);
        hd_kb.finalize().unwrap();
        assert!(hd_kb.product().contains("1 KiB"));

        let mut hd_mb = Device::new(DeviceKind::HardDisk, 0);
        hd_mb.set_sector_size(1024).unwrap();
        hd_mb.set_block_count(1_048_576 / 1024);
        hd_mb.finalize().unwrap();
        assert!(hd_mb.product().contains("1 MiB"));

        let mut hd_gb = Device::new(DeviceKind::HardDisk, 0);
        hd_gb.set_sector_size(1024).unwrap();
        hd_gb.set_block_count(10_737_418_240 / 1024);
        hd_gb.finalize().unwrap();
        assert!(hd_gb.product().contains("10 GiB"));
    }

    #[test]
    fn test_configured_product_survives_finalize() {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        hd.set_product("MY DISK").unwrap();
        hd.set_sector_size(512).unwrap();
        hd.set_block_count(100);
        hd.finalize().unwrap();
        assert_eq!(hd.product(), "MY DISK");
    }

    #[test]
    fn test_sector_sizes() {
        let hd = Device::new(DeviceKind::HardDisk, 0);
        let sizes = hd.supported_sector_sizes();
        assert_eq!(sizes.len(), 4);
        for size in [512, 1024, 2048, 4096] {
            assert!(sizes.contains(&size));
        }

        let mut cd = Device::new(DeviceKind::CdRom, 0);
        assert!(cd.set_sector_size(1024).is_err());
        assert!(cd.set_sector_size(2048).is_ok());
    }

    #[test]
    fn test_identification_padding() {
        let hd = Device::new(DeviceKind::HardDisk, 0);
        let id = hd.identification();
        assert_eq!(&id[0..8], b"RSCSI   ");
        assert_eq!(&id[8..24], b"SCSI HD         ");
        assert_eq!(id[24..28].len(), 4);
    }

    #[test]
    fn test_identifier_validation() {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        assert!(hd.set_vendor("TOOLONGVENDOR").is_err());
        assert!(hd.set_vendor("").is_err());
        assert!(hd.set_revision("1.0").is_ok());
        assert!(hd.set_revision("1.000").is_err());
    }

    #[test]
    fn test_dispatch_unsupported_command() {
        let mut hd = Device::new(DeviceKind::HardDisk, 0);
        let mut buffer = TransferBuffer::new();
        let mut ctx = context(&mut buffer, &[0x43, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            hd.dispatch(0x43, &mut ctx),
            Err(ScsiError::UnsupportedCommand(0x43))
        ));
        assert!(matches!(
            hd.dispatch(0xFF, &mut ctx),
            Err(ScsiError::UnsupportedCommand(0xFF))
        ));
        assert!(!hd.supports(0x43));
        assert!(hd.supports(0x12));
    }

    #[test]
    fn test_execute_absorbs_unsupported_command() {
        let mut hd = ready_disk();
        let mut buffer = TransferBuffer::new();
        let mut ctx = context(&mut buffer, &[0xFF, 0, 0, 0, 0, 0]);
        hd.execute(&mut ctx).unwrap();
        assert_eq!(ctx.status(), scsi_status::CHECK_CONDITION);
        assert_eq!(ctx.phase(), Phase::Status);
        assert_eq!(hd.sense().unwrap().asc, asc::INVALID_COMMAND_OPERATION_CODE);
    }

    #[test]
    fn test_reservation_conflict() {
        let mut hd = ready_disk();
        hd.set_reservation(Reservation::HeldBy(Some(6)));

        let mut buffer = TransferBuffer::new();
        let mut ctx = context(&mut buffer, &[0x00, 0, 0, 0, 0, 0]);
        hd.execute(&mut ctx).unwrap();
        assert_eq!(ctx.status(), scsi_status::RESERVATION_CONFLICT);

        let mut ctx = context(&mut buffer, &[0x12, 0, 0, 0, 36, 0]);
        hd.execute(&mut ctx).unwrap();
        assert_eq!(ctx.status(), scsi_status::GOOD);
        assert_eq!(ctx.phase(), Phase::DataIn);
    }

    #[test]
    fn test_unit_attention_after_insert() {
        let mut rm = Device::new(DeviceKind::RemovableDisk, 0);
        rm.set_sector_size(512).unwrap();
        rm.insert(Box::new(MemoryStore::new(512 * 8))).unwrap();

        let mut buffer = TransferBuffer::new();
        let mut ctx = context(&mut buffer, &[0x00, 0, 0, 0, 0, 0]);
        rm.execute(&mut ctx).unwrap();
        assert_eq!(ctx.status(), scsi_status::CHECK_CONDITION);
        assert_eq!(rm.sense().unwrap().asc, asc::NOT_READY_TO_READY_CHANGE);

        let mut ctx = context(&mut buffer, &[0x00, 0, 0, 0, 0, 0]);
        rm.execute(&mut ctx).unwrap();
        assert_eq!(ctx.status(), scsi_status::GOOD);
    }

    #[test]
    fn test_eject() {
        let mut hd = ready_disk();
        assert!(!hd.eject());

        let mut rm = Device::new(DeviceKind::RemovableDisk, 0);
        rm.set_sector_size(512).unwrap();
        rm.insert(Box::new(MemoryStore::new(512 * 8))).unwrap();
        rm.set_locked(true);
        assert!(!rm.eject());
        rm.set_locked(false);
        assert!(rm.eject());
        assert!(!rm.is_ready());
    }

    #[test]
    fn test_change_sector_size_keeps_capacity() {
        let mut hd = ready_disk();
        hd.change_sector_size(1024).unwrap();
        assert_eq!(hd.sector_size(), 1024);
        assert_eq!(hd.block_count(), 50);
        assert!(matches!(hd.change_sector_size(520), Err(ScsiError::ParameterList(_))));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("schd".parse::<DeviceKind>().unwrap(), DeviceKind::HardDisk);
        assert_eq!("SCCD".parse::<DeviceKind>().unwrap(), DeviceKind::CdRom);
        assert!("SCXX".parse::<DeviceKind>().is_err());
    }
}
