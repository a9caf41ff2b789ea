//! Device configuration
//!
//! A [`DeviceConfig`] describes one logical unit before it exists. The
//! [`DeviceFactory`](crate::device::DeviceFactory) validates it and turns it
//! into a ready [`Device`](crate::device::Device).

use crate::device::DeviceKind;
use crate::error::{ScsiError, ScsiResult};
use crate::registry::MAX_LUNS;
use crate::scsi::ScsiLevel;
use std::path::{Path, PathBuf};

/// Configuration of one emulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub lun: i32,
    /// Device kind; derived from the image extension when not given
    pub kind: Option<DeviceKind>,
    /// Image file backing the medium
    pub path: Option<PathBuf>,
    /// Sector size in bytes (default depends on the kind)
    pub sector_size: Option<u32>,
    /// Capacity in blocks for a memory-backed medium
    pub blocks: Option<u64>,
    pub scsi_level: Option<ScsiLevel>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub revision: Option<String>,
    pub protected: bool,
}

impl DeviceConfig {
    pub fn new(lun: i32) -> Self {
        DeviceConfig {
            lun,
            kind: None,
            path: None,
            sector_size: None,
            blocks: None,
            scsi_level: None,
            vendor: None,
            product: None,
            revision: None,
            protected: false,
        }
    }

    pub fn kind(mut self, kind: DeviceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Back the medium with an image file
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn sector_size(mut self, size: u32) -> Self {
        self.sector_size = Some(size);
        self
    }

    /// Back the medium with `blocks` blocks of memory
    pub fn blocks(mut self, blocks: u64) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn scsi_level(mut self, level: ScsiLevel) -> Self {
        self.scsi_level = Some(level);
        self
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    /// Set vendor, product and revision from `VENDOR:PRODUCT:REVISION`
    ///
    /// Trailing parts may be omitted and empty parts keep their defaults,
    /// so `":MY DISK"` only sets the product.
    pub fn identification(mut self, ident: &str) -> ScsiResult<Self> {
        let parts: Vec<&str> = ident.split(':').collect();
        if parts.len() > 3 {
            return Err(ScsiError::Config(format!(
                "'{}' is not of the form VENDOR:PRODUCT:REVISION",
                ident
            )));
        }

        let field = |i: usize| {
            parts
                .get(i)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        self.vendor = field(0).or(self.vendor);
        self.product = field(1).or(self.product);
        self.revision = field(2).or(self.revision);
        Ok(self)
    }

    /// The configured kind, or the one implied by the image extension
    pub fn resolved_kind(&self) -> ScsiResult<DeviceKind> {
        if let Some(kind) = self.kind {
            return Ok(kind);
        }
        self.path
            .as_deref()
            .and_then(kind_for_path)
            .ok_or_else(|| ScsiError::Config(format!("LUN {}: cannot determine device type", self.lun)))
    }

    /// Check everything that can be checked without creating the device
    pub fn validate(&self) -> ScsiResult<()> {
        if self.lun < 0 || self.lun >= MAX_LUNS as i32 {
            return Err(ScsiError::Config(format!(
                "invalid LUN {} (0-{})",
                self.lun,
                MAX_LUNS - 1
            )));
        }

        let kind = self.resolved_kind()?;

        if let Some(size) = self.sector_size {
            if !kind.supported_sector_sizes().contains(&size) {
                return Err(ScsiError::Config(format!(
                    "{} does not support a sector size of {} bytes",
                    kind, size
                )));
            }
        }

        if self.path.is_some() && self.blocks.is_some() {
            return Err(ScsiError::Config(format!(
                "LUN {}: give either an image path or a block count, not both",
                self.lun
            )));
        }

        Ok(())
    }
}

/// Device kind implied by an image file name
///
/// `.hds`, `.hda` and `.hd1` are hard disks, `.hdr` a removable disk and
/// `.iso` or `.cdr` a CD-ROM.
pub fn kind_for_path(path: &Path) -> Option<DeviceKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "hds" | "hda" | "hd1" => Some(DeviceKind::HardDisk),
        "hdr" => Some(DeviceKind::RemovableDisk),
        "iso" | "cdr" => Some(DeviceKind::CdRom),
        _ => None,
    }
}

/// SCSI level implied by an image file name (`.hd1` images are SCSI-1-CCS)
pub fn level_for_path(path: &Path) -> Option<ScsiLevel> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    (ext == "hd1").then_some(ScsiLevel::Scsi1Ccs)
}
