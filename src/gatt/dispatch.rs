//! GATT access dispatch.
//!
//! Reads are pure projections of a [`ReadView`] snapshot. The RPC-command
//! write is the only mutating entry point from the peer; it copies the
//! payload out of the transport buffer and hands it to an [`RpcSink`].
//! Status and error notifications are captured under the state lock and
//! sent after it is released, since the host may call back into a read
//! while a notify holds its characteristic.

use std::sync::{MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::table::{Access, AttributeTable, CharacteristicId};
use crate::error::AttError;
use crate::identity::DeviceIdentity;
use crate::improv::{ProvisioningError, ProvisioningState};
use crate::ports::{ConnHandle, HostStack, NO_CONNECTION};
use crate::provisioning::{Job, RpcRejection};
use crate::server::{Inner, SharedState};

/// Largest value a read handler produces.
pub const ATT_VALUE_CAP: usize = 64;

/// Outbound characteristic value.
pub type AttValue = heapless::Vec<u8, ATT_VALUE_CAP>;

/// Inbound RPC payload copy.
pub type RpcBuffer = heapless::Vec<u8, { crate::config::MAX_RPC_LEN }>;

pub type ReadFn = fn(&ReadView<'_>) -> Result<AttValue, AttError>;
pub type WriteFn = fn(&dyn RpcSink, &[u8]) -> Result<(), AttError>;

/// Everything a read handler may observe.
#[derive(Debug, Clone, Copy)]
pub struct ReadView<'a> {
    pub state: ProvisioningState,
    pub error: ProvisioningError,
    pub capabilities: u8,
    pub identity: &'a DeviceIdentity,
}

/// Receiver of decoded-later RPC payloads.
pub trait RpcSink {
    fn submit_rpc(&self, raw: &[u8]) -> Result<(), AttError>;
}

// ─── Table dispatch ───────────────────────────────────────────

pub fn read(
    table: &AttributeTable,
    id: CharacteristicId,
    view: &ReadView<'_>,
) -> Result<AttValue, AttError> {
    match table.characteristic(id).map(|c| c.access) {
        Some(Access::Read(f)) => f(view),
        Some(Access::Write(_)) | None => Err(AttError::ReadNotPermitted),
    }
}

pub fn write(
    table: &AttributeTable,
    id: CharacteristicId,
    sink: &dyn RpcSink,
    data: &[u8],
) -> Result<(), AttError> {
    match table.characteristic(id).map(|c| c.access) {
        Some(Access::Write(f)) => f(sink, data),
        Some(Access::Read(_)) | None => Err(AttError::WriteNotPermitted),
    }
}

// ─── Read handlers ────────────────────────────────────────────

fn append(out: &mut AttValue, bytes: &[u8]) -> Result<(), AttError> {
    out.extend_from_slice(bytes)
        .map_err(|()| AttError::InsufficientResources)
}

fn single(byte: u8) -> Result<AttValue, AttError> {
    let mut out = AttValue::new();
    append(&mut out, &[byte])?;
    Ok(out)
}

pub fn read_status(view: &ReadView<'_>) -> Result<AttValue, AttError> {
    single(view.state.as_byte())
}

pub fn read_error(view: &ReadView<'_>) -> Result<AttValue, AttError> {
    single(view.error.as_byte())
}

pub fn read_capabilities(view: &ReadView<'_>) -> Result<AttValue, AttError> {
    single(view.capabilities)
}

/// RPC results are not produced; peers read two zero bytes.
pub fn read_rpc_result(_view: &ReadView<'_>) -> Result<AttValue, AttError> {
    warn!("RPC result read not supported");
    let mut out = AttValue::new();
    append(&mut out, &[0, 0])?;
    Ok(out)
}

pub fn read_manufacturer(view: &ReadView<'_>) -> Result<AttValue, AttError> {
    let mut out = AttValue::new();
    append(&mut out, view.identity.manufacturer().as_bytes())?;
    Ok(out)
}

pub fn read_model(view: &ReadView<'_>) -> Result<AttValue, AttError> {
    let mut out = AttValue::new();
    append(&mut out, view.identity.model().as_bytes())?;
    Ok(out)
}

// ─── Write handler ────────────────────────────────────────────

/// RPC-command write. Empty writes succeed without side effects.
pub fn write_rpc_command(sink: &dyn RpcSink, data: &[u8]) -> Result<(), AttError> {
    if data.is_empty() {
        return Ok(());
    }
    let mut owned = RpcBuffer::new();
    owned.extend_from_slice(data).map_err(|()| {
        warn!("RPC write of {} bytes exceeds buffer", data.len());
        AttError::InsufficientResources
    })?;
    sink.submit_rpc(&owned)
}

// ─── Controller binding ───────────────────────────────────────

impl<H: HostStack> RpcSink for Inner<H> {
    fn submit_rpc(&self, raw: &[u8]) -> Result<(), AttError> {
        if raw.len() > self.config.max_rpc_len {
            warn!(
                "RPC write of {} bytes exceeds limit {}",
                raw.len(),
                self.config.max_rpc_len
            );
            return Err(AttError::InsufficientResources);
        }

        let mut shared = self.lock();
        let before = shared.machine;
        let (result, pending) = match shared.machine.accept_rpc(raw, self.codec.as_ref()) {
            Ok(job) => {
                info!(
                    "Provisioning Wi-Fi '{}' (password {} bytes, attempt {})",
                    job.credentials.ssid,
                    job.credentials.password.len(),
                    job.attempt.id
                );
                if self.jobs.try_send(Job::Provision(job)).is_err() {
                    warn!("Provisioning queue full, rejecting write");
                    shared.machine = before;
                    (Err(AttError::Unlikely), None)
                } else {
                    (Ok(()), self.status_notification(&shared))
                }
            }
            Err(RpcRejection::NotConnected) => {
                warn!("RPC write without an active connection");
                (Err(AttError::Unlikely), None)
            }
            Err(RpcRejection::Busy) => {
                warn!("RPC write while attempt is outstanding");
                (Err(AttError::Unlikely), None)
            }
            Err(RpcRejection::Decode(e)) => {
                warn!("Invalid RPC command: {}", e);
                (Err(AttError::Unlikely), self.error_notification(&shared))
            }
        };
        self.send_notification(shared, pending);
        result
    }
}

/// A notification captured under the state lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingNotification {
    pub id: CharacteristicId,
    pub conn: ConnHandle,
    pub attr: u16,
    pub value: u8,
}

impl<H: HostStack> Inner<H> {
    /// Current state byte for the connected peer, if any.
    pub(crate) fn status_notification(&self, shared: &SharedState) -> Option<PendingNotification> {
        self.notification(
            shared,
            CharacteristicId::Status,
            shared.machine.state().as_byte(),
        )
    }

    /// Current error byte for the connected peer, if any.
    pub(crate) fn error_notification(&self, shared: &SharedState) -> Option<PendingNotification> {
        self.notification(
            shared,
            CharacteristicId::Error,
            shared.machine.error().as_byte(),
        )
    }

    fn notification(
        &self,
        shared: &SharedState,
        id: CharacteristicId,
        value: u8,
    ) -> Option<PendingNotification> {
        let conn = shared.machine.conn();
        if conn == NO_CONNECTION {
            return None;
        }
        let Some(attr) = self.handles.get().and_then(|h| h.get(id)) else {
            debug!("No handle for {:?}, skipping notify", id);
            return None;
        };
        Some(PendingNotification {
            id,
            conn,
            attr,
            value,
        })
    }

    /// Release the state lock, then send `pending`.
    ///
    /// The notify gate is taken before the state lock is dropped, so
    /// notifications leave in transition order without the state lock
    /// being held across the host call.
    pub(crate) fn send_notification(
        &self,
        shared: MutexGuard<'_, SharedState>,
        pending: Option<PendingNotification>,
    ) {
        let Some(p) = pending else {
            return;
        };
        let _gate = self
            .notify_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(shared);
        if let Err(e) = self.host.notify(p.conn, p.attr, &[p.value]) {
            warn!("Notify {:?} failed: {}", p.id, e);
        }
    }

    pub(crate) fn read_view<'a>(&'a self, shared: &SharedState) -> ReadView<'a> {
        ReadView {
            state: shared.machine.state(),
            error: shared.machine.error(),
            capabilities: self.config.capabilities,
            identity: &self.identity,
        }
    }
}
