//! Creation of devices from their configuration

use super::{Device, DeviceKind};
use crate::config::{kind_for_path, level_for_path, DeviceConfig};
use crate::error::{ScsiError, ScsiResult};
use crate::store::{BlockStore, FileStore, MemoryStore};
use std::path::Path;

/// Turns a [`DeviceConfig`] into a ready [`Device`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceFactory;

impl DeviceFactory {
    pub fn new() -> Self {
        DeviceFactory
    }

    /// Device kind implied by an image file name
    pub fn kind_for_path(&self, path: &Path) -> Option<DeviceKind> {
        kind_for_path(path)
    }

    /// Create a device, opening its image file or allocating a memory medium
    ///
    /// Removable devices configured without a medium are created empty and
    /// report NOT READY until one is inserted.
    pub fn create(&self, config: &DeviceConfig) -> ScsiResult<Device> {
        config.validate()?;
        let kind = config.resolved_kind()?;

        let store: Option<Box<dyn BlockStore>> = match (&config.path, config.blocks) {
            (Some(path), _) => {
                let read_only = config.protected || kind.is_read_only();
                Some(Box::new(FileStore::open(path, read_only)?))
            }
            (None, Some(blocks)) => {
                let sector_size = config.sector_size.unwrap_or(kind.default_sector_size());
                let bytes = blocks
                    .checked_mul(u64::from(sector_size))
                    .and_then(|b| usize::try_from(b).ok())
                    .ok_or_else(|| {
                        ScsiError::Config(format!(
                            "LUN {}: {} blocks do not fit in memory",
                            config.lun, blocks
                        ))
                    })?;
                Some(Box::new(MemoryStore::new(bytes)))
            }
            (None, None) => None,
        };

        self.create_with_store(config, store)
    }

    /// Create a device around a medium supplied by the caller
    pub fn create_with_store(
        &self,
        config: &DeviceConfig,
        store: Option<Box<dyn BlockStore>>,
    ) -> ScsiResult<Device> {
        config.validate()?;
        let kind = config.resolved_kind()?;

        let mut device = Device::new(kind, config.lun);

        let level = config
            .scsi_level
            .or_else(|| config.path.as_deref().and_then(level_for_path));
        if let Some(level) = level {
            device.set_scsi_level(level);
        }

        device.set_sector_size(config.sector_size.unwrap_or(kind.default_sector_size()))?;

        if let Some(vendor) = &config.vendor {
            device.set_vendor(vendor)?;
        }
        if let Some(product) = &config.product {
            device.set_product(product)?;
        }
        if let Some(revision) = &config.revision {
            device.set_revision(revision)?;
        }
        device.set_protected(config.protected);

        match store {
            Some(store) => {
                device.attach_store(store);
                device.finalize()?;
            }
            // No medium in the drive yet
            None if kind.is_removable() => {}
            None => device.finalize()?,
        }

        log::info!(
            "Created {} at LUN {}: {}",
            device.kind(),
            device.lun(),
            String::from_utf8_lossy(&device.identification())
        );
        Ok(device)
    }
}
