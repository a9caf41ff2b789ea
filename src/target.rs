//! SCSI target implementation
//!
//! This module provides the target structure, its run loop and the builder
//! pattern used to configure it.

use crate::bus::Bus;
use crate::config::DeviceConfig;
use crate::controller::Controller;
use crate::device::{Device, DeviceFactory};
use crate::error::{ScsiError, ScsiResult};
use crate::registry::{lock_device, LunRegistry, SharedDevice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Highest SCSI ID on a narrow bus
pub const MAX_TARGET_ID: u8 = 7;

/// Emulated SCSI target
pub struct ScsiTarget<B: Bus> {
    controller: Controller<B>,
    idle_poll: Duration,
}

impl<B: Bus> ScsiTarget<B> {
    /// Create a new builder for configuring the target
    pub fn builder() -> ScsiTargetBuilder<B> {
        ScsiTargetBuilder::new()
    }

    pub fn target_id(&self) -> u8 {
        self.controller.target_id()
    }

    pub fn controller(&self) -> &Controller<B> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller<B> {
        &mut self.controller
    }

    /// Registry shared with management callers
    pub fn registry(&self) -> Arc<LunRegistry> {
        Arc::clone(self.controller.registry())
    }

    /// Attach a device while the target is running
    pub fn attach(&self, device: Device) -> ScsiResult<SharedDevice> {
        attach(self.controller.registry(), device)
    }

    /// Detach the device at `lun`
    ///
    /// A command already working on the device finishes with it.
    pub fn detach(&self, lun: i32) -> Option<SharedDevice> {
        let device = self.controller.get_device_for_lun(lun)?;
        self.controller.remove_device(&device).then_some(device)
    }

    /// Process the current bus phase once
    pub fn step(&mut self) -> ScsiResult<()> {
        self.controller.process_phase()
    }

    /// Run the target until `shutdown` is set
    ///
    /// Protocol errors only abort the transaction they happened in. Any other
    /// fatal error stops the target.
    pub fn run(&mut self, shutdown: &AtomicBool) -> ScsiResult<()> {
        log::info!(
            "SCSI target {} starting with {} LUN(s)",
            self.target_id(),
            self.controller.get_lun_count()
        );

        while !shutdown.load(Ordering::Relaxed) {
            match self.controller.process_phase() {
                Ok(()) => {}
                Err(ScsiError::Protocol(msg)) => {
                    log::warn!("Target {}: transaction aborted: {}", self.target_id(), msg);
                }
                Err(e) => {
                    log::error!("Target {}: stopping: {}", self.target_id(), e);
                    return Err(e);
                }
            }

            if self.controller.is_bus_free() {
                std::thread::sleep(self.idle_poll);
            }
        }

        log::info!("SCSI target {} stopped", self.target_id());
        Ok(())
    }
}

fn attach(registry: &LunRegistry, device: Device) -> ScsiResult<SharedDevice> {
    let lun = device.lun();
    let device = Arc::new(Mutex::new(device));
    if !registry.add_device(Arc::clone(&device)) {
        return Err(ScsiError::Config(format!(
            "cannot attach device at LUN {}: invalid or in use",
            lun
        )));
    }
    Ok(device)
}

/// Builder for configuring a SCSI target
pub struct ScsiTargetBuilder<B: Bus> {
    bus: Option<Arc<B>>,
    target_id: Option<u8>,
    configs: Vec<DeviceConfig>,
    devices: Vec<Device>,
    idle_poll: Option<Duration>,
}

impl<B: Bus> ScsiTargetBuilder<B> {
    fn new() -> Self {
        Self {
            bus: None,
            target_id: None,
            configs: Vec::new(),
            devices: Vec::new(),
            idle_poll: None,
        }
    }

    /// Set the bus the target is attached to
    pub fn bus(mut self, bus: Arc<B>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the SCSI ID of the target (default: 0)
    pub fn target_id(mut self, id: u8) -> Self {
        self.target_id = Some(id);
        self
    }

    /// Add a device to be created from its configuration
    pub fn device(mut self, config: DeviceConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Add an already created device
    pub fn attach(mut self, device: Device) -> Self {
        self.devices.push(device);
        self
    }

    /// Sleep between polls of an idle bus (default: 1 ms)
    pub fn idle_poll(mut self, interval: Duration) -> Self {
        self.idle_poll = Some(interval);
        self
    }

    /// Build the target with the configured devices
    pub fn build(self) -> ScsiResult<ScsiTarget<B>> {
        let bus = self
            .bus
            .ok_or_else(|| ScsiError::Config("a bus is required".to_string()))?;

        let target_id = self.target_id.unwrap_or(0);
        if target_id > MAX_TARGET_ID {
            return Err(ScsiError::Config(format!(
                "target_id must be 0-{}, got {}",
                MAX_TARGET_ID, target_id
            )));
        }

        let controller = Controller::new(bus, target_id);

        let factory = DeviceFactory::new();
        for config in &self.configs {
            attach(controller.registry(), factory.create(config)?)?;
        }
        for device in self.devices {
            attach(controller.registry(), device)?;
        }

        for device in controller.registry().devices() {
            let device = lock_device(&device);
            log::info!(
                "Target {} LUN {}: {} ({})",
                target_id,
                device.lun(),
                device.kind(),
                device.product()
            );
        }

        Ok(ScsiTarget {
            controller,
            idle_poll: self.idle_poll.unwrap_or(Duration::from_millis(1)),
        })
    }
}
