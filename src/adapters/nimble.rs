//! NimBLE host-stack adapter.
//!
//! Implements [`HostStack`] on top of the NimBLE GATT server and advertiser.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp32-nimble` server, characteristics and
//!   advertising. Access callbacks and GAP events are forwarded to the
//!   controller through the registered [`HostCallbacks`].
//! - **all other targets**: a simulation host that logs every call and
//!   records it for inspection.
//!
//! ## Attribute handles
//!
//! Handles handed back from [`HostStack::register`] are adapter-assigned,
//! one per characteristic in table order starting at 1. `notify` resolves
//! them back to the characteristic object.

use std::sync::{Mutex, PoisonError, Weak};

use log::info;

use crate::advertising::AdvFields;
use crate::error::{HostError, HostOp};
use crate::gatt::table::{AttributeTable, HandleTable};
use crate::ports::{ConnHandle, HostCallbacks, HostStack};

// ───────────────────────────────────────────────────────────────
// Recorded calls
// ───────────────────────────────────────────────────────────────

/// One host-stack call, as seen by the simulation host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Register { characteristics: usize },
    SetDeviceName(heapless::String<32>),
    SetAdvFields(AdvFields),
    StartAdvertising,
    StopAdvertising,
    Notify { conn: ConnHandle, attr: u16, value: heapless::Vec<u8, 4> },
    Terminate(ConnHandle),
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

pub struct NimbleHost {
    callbacks: Mutex<Option<Weak<dyn HostCallbacks>>>,
    #[cfg(target_os = "espidf")]
    characteristics: Mutex<Vec<(u16, platform::CharacteristicRef)>>,
    #[cfg(not(target_os = "espidf"))]
    calls: Mutex<Vec<HostCall>>,
}

impl NimbleHost {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(None),
            #[cfg(target_os = "espidf")]
            characteristics: Mutex::new(Vec::new()),
            #[cfg(not(target_os = "espidf"))]
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The controller, if it is still alive.
    fn controller(&self) -> Option<std::sync::Arc<dyn HostCallbacks>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Deliver a host event to the controller (simulation and tests).
    pub fn deliver(&self, event: crate::events::HostEvent) {
        if let Some(cb) = self.controller() {
            cb.on_event(event);
        }
    }
}

impl Default for NimbleHost {
    fn default() -> Self {
        Self::new()
    }
}

// ── Simulation ────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl NimbleHost {
    fn record(&self, call: HostCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Drain the recorded calls.
    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(not(target_os = "espidf"))]
impl HostStack for NimbleHost {
    fn register(
        &self,
        table: &AttributeTable,
        callbacks: Weak<dyn HostCallbacks>,
    ) -> Result<HandleTable, HostError> {
        let mut handles = HandleTable::new();
        let mut count = 0usize;
        for (i, def) in table.characteristics().enumerate() {
            handles.set(def.id, (i + 1) as u16);
            count += 1;
        }
        *self.callbacks.lock().unwrap_or_else(PoisonError::into_inner) = Some(callbacks);
        info!("BLE(sim): registered {} characteristics", count);
        self.record(HostCall::Register {
            characteristics: count,
        });
        Ok(handles)
    }

    fn set_device_name(&self, name: &str) -> Result<(), HostError> {
        let mut owned = heapless::String::new();
        owned
            .push_str(name)
            .map_err(|()| HostError::new(HostOp::SetName, -1))?;
        info!("BLE(sim): device name '{}'", name);
        self.record(HostCall::SetDeviceName(owned));
        Ok(())
    }

    fn set_adv_fields(&self, fields: &AdvFields) -> Result<(), HostError> {
        if fields.encode().is_none() {
            return Err(HostError::new(HostOp::SetFields, -1));
        }
        self.record(HostCall::SetAdvFields(fields.clone()));
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), HostError> {
        info!("BLE(sim): advertising started");
        self.record(HostCall::StartAdvertising);
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), HostError> {
        info!("BLE(sim): advertising stopped");
        self.record(HostCall::StopAdvertising);
        Ok(())
    }

    fn notify(&self, conn: ConnHandle, attr: u16, value: &[u8]) -> Result<(), HostError> {
        let mut v = heapless::Vec::new();
        v.extend_from_slice(value)
            .map_err(|()| HostError::new(HostOp::Notify, -1))?;
        info!("BLE(sim): notify conn={} attr={} value={:02x?}", conn, attr, value);
        self.record(HostCall::Notify {
            conn,
            attr,
            value: v,
        });
        Ok(())
    }

    fn terminate(&self, conn: ConnHandle) -> Result<(), HostError> {
        info!("BLE(sim): terminate conn={}", conn);
        self.record(HostCall::Terminate(conn));
        Ok(())
    }
}

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod platform {
    use std::sync::Arc;

    use esp32_nimble::utilities::BleUuid;
    use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
    use esp32_nimble::{BLECharacteristic, BLEDevice, BLEError, NimbleProperties};

    use crate::error::{HostError, HostOp};
    use crate::gatt::table::{Properties, Uuid};

    pub type CharacteristicRef = Arc<NimbleMutex<BLECharacteristic>>;

    pub fn host_err(op: HostOp, e: &BLEError) -> HostError {
        HostError::new(op, e.code() as i32)
    }

    pub fn to_ble_uuid(uuid: Uuid) -> Result<BleUuid, HostError> {
        match uuid {
            Uuid::U16(v) => Ok(BleUuid::from_uuid16(v)),
            Uuid::U128(_) => BleUuid::from_uuid128_string(&uuid.to_string())
                .map_err(|_| HostError::new(HostOp::Register, -1)),
        }
    }

    pub fn to_nimble_props(props: Properties) -> NimbleProperties {
        let mut out = NimbleProperties::empty();
        if props.contains(Properties::READ) {
            out |= NimbleProperties::READ;
        }
        if props.contains(Properties::WRITE) {
            out |= NimbleProperties::WRITE;
        }
        if props.contains(Properties::NOTIFY) {
            out |= NimbleProperties::NOTIFY;
        }
        out
    }

    pub fn device() -> &'static mut BLEDevice {
        BLEDevice::take()
    }
}

#[cfg(target_os = "espidf")]
impl HostStack for NimbleHost {
    fn register(
        &self,
        table: &AttributeTable,
        callbacks: Weak<dyn HostCallbacks>,
    ) -> Result<HandleTable, HostError> {
        use crate::events::{BdAddr, HostEvent};

        let device = platform::device();
        let server = device.get_server();
        // The controller owns advertising; NimBLE must not restart it.
        server.advertise_on_disconnect(false);

        let cb = callbacks.clone();
        server.on_connect(move |_server, desc| {
            if let Some(c) = cb.upgrade() {
                c.on_event(HostEvent::Connect {
                    conn: desc.conn_handle(),
                    status: 0,
                });
            }
        });
        let cb = callbacks.clone();
        server.on_disconnect(move |desc, reason| {
            let reason = reason.err().map_or(0, |e| e.code() as i32);
            if let Some(c) = cb.upgrade() {
                c.on_event(HostEvent::Disconnect {
                    conn: desc.conn_handle(),
                    reason,
                });
            }
        });

        let mut handles = HandleTable::new();
        let mut chars = self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        chars.clear();
        let mut next_handle: u16 = 1;

        for svc in table.services() {
            let service = server.create_service(platform::to_ble_uuid(svc.uuid)?);
            for def in svc.characteristics {
                let chr = service.lock().create_characteristic(
                    platform::to_ble_uuid(def.uuid)?,
                    platform::to_nimble_props(def.props),
                );
                let id = def.id;
                let handle = next_handle;
                next_handle += 1;

                if def.props.contains(Properties::READ) {
                    let cb = callbacks.clone();
                    chr.lock().on_read(move |value, _desc| {
                        let Some(c) = cb.upgrade() else { return };
                        match c.on_read(id) {
                            Ok(v) => {
                                value.set_value(&v);
                            }
                            Err(e) => log::warn!("BLE: read {:?} refused: {}", id, e),
                        }
                    });
                }
                if def.props.contains(Properties::WRITE) {
                    let cb = callbacks.clone();
                    chr.lock().on_write(move |args| {
                        let Some(c) = cb.upgrade() else { return };
                        if let Err(e) = c.on_write(id, args.recv_data()) {
                            args.reject_with_error_code(e.code());
                        }
                    });
                }
                if def.props.contains(Properties::NOTIFY) {
                    let cb = callbacks.clone();
                    chr.lock().on_subscribe(move |_chr, desc, sub| {
                        if let Some(c) = cb.upgrade() {
                            c.on_event(HostEvent::Subscribe {
                                conn: desc.conn_handle(),
                                attr_handle: handle,
                                notify: sub.contains(esp32_nimble::NimbleSub::NOTIFY),
                            });
                        }
                    });
                }

                handles.set(id, handle);
                chars.push((handle, chr));
            }
        }
        drop(chars);

        *self.callbacks.lock().unwrap_or_else(PoisonError::into_inner) = Some(callbacks.clone());
        info!("BLE: registered {} characteristics", next_handle - 1);

        // BLEDevice::take() returns once the host has synced.
        let address = device.get_addr().ok().map(|a| BdAddr::from_le(a.as_le_bytes()));
        if let Some(c) = callbacks.upgrade() {
            c.on_event(HostEvent::Synced { address });
        }
        Ok(handles)
    }

    fn set_device_name(&self, name: &str) -> Result<(), HostError> {
        esp32_nimble::BLEDevice::set_device_name(name)
            .map_err(|e| platform::host_err(HostOp::SetName, &e))
    }

    fn set_adv_fields(&self, fields: &AdvFields) -> Result<(), HostError> {
        let payload = fields
            .encode()
            .ok_or(HostError::new(HostOp::SetFields, -1))?;
        platform::device()
            .get_advertising()
            .lock()
            .set_raw_data(&payload)
            .map_err(|e| platform::host_err(HostOp::SetFields, &e))
    }

    fn start_advertising(&self) -> Result<(), HostError> {
        platform::device()
            .get_advertising()
            .lock()
            .start()
            .map_err(|e| platform::host_err(HostOp::AdvStart, &e))
    }

    fn stop_advertising(&self) -> Result<(), HostError> {
        platform::device()
            .get_advertising()
            .lock()
            .stop()
            .map_err(|e| platform::host_err(HostOp::AdvStop, &e))
    }

    fn notify(&self, _conn: ConnHandle, attr: u16, value: &[u8]) -> Result<(), HostError> {
        // Single-link model: notifying subscribers reaches exactly `conn`.
        let chars = self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (_, chr) = chars
            .iter()
            .find(|(h, _)| *h == attr)
            .ok_or(HostError::new(HostOp::Notify, -1))?;
        chr.lock().set_value(value).notify();
        Ok(())
    }

    fn terminate(&self, conn: ConnHandle) -> Result<(), HostError> {
        platform::device()
            .get_server()
            .disconnect(conn)
            .map_err(|e| platform::host_err(HostOp::Terminate, &e))
    }
}

#[cfg(target_os = "espidf")]
use crate::gatt::table::Properties;

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
