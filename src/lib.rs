//! Improv Wi-Fi provisioning over Bluetooth Low Energy.
//!
//! Exposes the controller core for integration testing and embedding.
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each adapter; on other targets the adapters run as simulations.

#![deny(unused_must_use)]

pub mod advertising;
pub mod config;
pub mod error;
pub mod events;
pub mod gatt;
pub mod identity;
pub mod improv;
pub mod ports;
pub mod provisioning;
pub mod server;

pub mod adapters;
pub mod drivers;

pub use advertising::{AdvFields, AdvertisingMode};
pub use config::ServerConfig;
pub use error::{AttError, Error, HostError, HostOp, Result, WifiError};
pub use events::{BdAddr, HostEvent};
pub use gatt::table::CharacteristicId;
pub use identity::DeviceIdentity;
pub use improv::{ProvisioningError, ProvisioningState};
pub use ports::{ConnHandle, HostCallbacks, HostStack, WifiProvisioner};
pub use server::{ImprovServer, ServerTasks};
