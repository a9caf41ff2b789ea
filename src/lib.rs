//! A pure Rust SCSI target emulator
//!
//! This library emulates the target side of a parallel SCSI bus: a
//! controller that walks the bus phases, a registry of up to 32 logical
//! units, and hard disk, removable disk and CD-ROM devices with their
//! command sets and mode pages. Users implement the `Bus` trait to connect
//! the controller to real signal lines, and may implement `BlockStore` to
//! provide their own medium.
//!
//! # Example
//!
//! ```no_run
//! use scsi_emulator::{DeviceConfig, DeviceKind, MemoryBus, ScsiTarget};
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(MemoryBus::new());
//! let mut target = ScsiTarget::builder()
//!     .bus(bus)
//!     .target_id(0)
//!     .device(DeviceConfig::new(0).kind(DeviceKind::HardDisk).blocks(2048))
//!     .device(DeviceConfig::new(1).path("disc.iso"))
//!     .build()?;
//!
//! let shutdown = AtomicBool::new(false);
//! target.run(&shutdown)?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod bus;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod mode_page;
pub mod phase;
pub mod registry;
pub mod scsi;
pub mod store;
pub mod target;

pub use buffer::TransferBuffer;
pub use bus::{Bus, MemoryBus};
pub use config::DeviceConfig;
pub use controller::Controller;
pub use device::{Device, DeviceFactory, DeviceKind};
pub use error::{ScsiError, ScsiResult};
pub use phase::Phase;
pub use registry::{LunRegistry, SharedDevice};
pub use scsi::{ScsiLevel, ScsiOpcode, SenseData};
pub use store::{BlockStore, FileStore, MemoryStore};
pub use target::{ScsiTarget, ScsiTargetBuilder};

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
