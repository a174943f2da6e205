//! Collaborator traits at the edge of the controller.
//!
//! The controller core never touches a radio or a Wi-Fi driver directly;
//! it talks to a [`HostStack`] (BLE host: GATT registration, advertising,
//! notify, terminate) and a [`WifiProvisioner`]. The host adapter calls
//! back into the core through [`HostCallbacks`].

use std::sync::Weak;

use crate::advertising::AdvFields;
use crate::error::{AttError, HostError, WifiError};
use crate::events::HostEvent;
use crate::gatt::dispatch::AttValue;
use crate::gatt::table::{AttributeTable, CharacteristicId, HandleTable};

/// Opaque BLE connection identifier; 0 means no connection.
pub type ConnHandle = u16;

/// Sentinel for "no active connection".
pub const NO_CONNECTION: ConnHandle = 0;

/// Entry points the host adapter invokes from its own context.
pub trait HostCallbacks: Send + Sync {
    fn on_event(&self, event: HostEvent);
    fn on_read(&self, id: CharacteristicId) -> Result<AttValue, AttError>;
    fn on_write(&self, id: CharacteristicId, data: &[u8]) -> Result<(), AttError>;
}

/// BLE host stack as seen by the controller.
pub trait HostStack: Send + Sync + 'static {
    /// Register every service in `table` and return the runtime handles.
    ///
    /// The adapter keeps `callbacks` and routes access and GAP events
    /// through it; a dead weak reference means the controller is gone.
    fn register(
        &self,
        table: &AttributeTable,
        callbacks: Weak<dyn HostCallbacks>,
    ) -> Result<HandleTable, HostError>;

    fn set_device_name(&self, name: &str) -> Result<(), HostError>;
    fn set_adv_fields(&self, fields: &AdvFields) -> Result<(), HostError>;
    fn start_advertising(&self) -> Result<(), HostError>;
    fn stop_advertising(&self) -> Result<(), HostError>;
    fn notify(&self, conn: ConnHandle, attr_handle: u16, value: &[u8]) -> Result<(), HostError>;
    fn terminate(&self, conn: ConnHandle) -> Result<(), HostError>;
}

/// Applies Wi-Fi credentials received over BLE.
///
/// Runs on a helper thread owned by the provisioning worker, so an
/// implementation may block for as long as association takes.
pub trait WifiProvisioner: Send + Sync + 'static {
    fn provision(&self, ssid: &str, password: &str) -> Result<(), WifiError>;
}

impl<F> WifiProvisioner for F
where
    F: Fn(&str, &str) -> Result<(), WifiError> + Send + Sync + 'static,
{
    fn provision(&self, ssid: &str, password: &str) -> Result<(), WifiError> {
        self(ssid, password)
    }
}
