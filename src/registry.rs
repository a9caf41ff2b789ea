//! Logical unit registry of a controller
//!
//! Devices are shared: the registry holds one reference and a command in
//! progress captures another, so removing a device never invalidates the
//! device a running command works on.

use crate::device::Device;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of logical units per target
pub const MAX_LUNS: usize = 32;

/// A device as held by the registry and by commands in progress
pub type SharedDevice = Arc<Mutex<Device>>;

/// Lock a shared device, recovering the guard if a holder panicked
pub fn lock_device(device: &SharedDevice) -> MutexGuard<'_, Device> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps LUNs 0-31 to devices
///
/// Lookups and mutations are serialized by one lock that is only held for
/// the slot access itself, never while a device is locked or the bus is
/// being driven.
#[derive(Debug, Default)]
pub struct LunRegistry {
    slots: Mutex<[Option<SharedDevice>; MAX_LUNS]>,
}

impl LunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, [Option<SharedDevice>; MAX_LUNS]> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_index(lun: i32) -> Option<usize> {
        usize::try_from(lun).ok().filter(|&l| l < MAX_LUNS)
    }

    /// Register a device under its own LUN
    ///
    /// Returns `false` if the LUN is out of range or already taken.
    pub fn add_device(&self, device: SharedDevice) -> bool {
        let lun = lock_device(&device).lun();

        let Some(index) = Self::slot_index(lun) else {
            log::warn!("Cannot add device: invalid LUN {}", lun);
            return false;
        };

        let mut slots = self.slots();
        if slots[index].is_some() {
            log::warn!("Cannot add device: LUN {} is already in use", lun);
            return false;
        }
        slots[index] = Some(device);
        log::info!("Attached device at LUN {}", lun);
        true
    }

    /// Remove `device` if it is the one registered under its LUN
    pub fn remove_device(&self, device: &SharedDevice) -> bool {
        let lun = lock_device(device).lun();

        let Some(index) = Self::slot_index(lun) else {
            return false;
        };

        let mut slots = self.slots();
        match &slots[index] {
            Some(registered) if Arc::ptr_eq(registered, device) => {
                slots[index] = None;
                log::info!("Detached device at LUN {}", lun);
                true
            }
            _ => false,
        }
    }

    pub fn has_device_for_lun(&self, lun: i32) -> bool {
        Self::slot_index(lun).is_some_and(|index| self.slots()[index].is_some())
    }

    pub fn get_device_for_lun(&self, lun: i32) -> Option<SharedDevice> {
        let index = Self::slot_index(lun)?;
        self.slots()[index].clone()
    }

    pub fn lun_count(&self) -> usize {
        self.slots().iter().filter(|slot| slot.is_some()).count()
    }

    /// Occupied LUNs in ascending order
    pub fn luns(&self) -> Vec<u8> {
        self.slots()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(lun, _)| lun as u8)
            .collect()
    }

    /// Snapshot of all registered devices
    pub fn devices(&self) -> Vec<SharedDevice> {
        self.slots().iter().flatten().cloned().collect()
    }
}
