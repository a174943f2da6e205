//! Unified error types for the Improv BLE controller.
//!
//! A single `Error` enum that every subsystem converts into, so the bootstrap
//! path in `main.rs` can propagate with `?` and the background loops can log
//! uniformly. All variants are `Copy`: they cross the host-callback boundary
//! and the provisioning worker thread without allocation.

use core::fmt;

use crate::improv::codec::DecodeError;

// ---------------------------------------------------------------------------
// Top-level controller error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The BLE host stack rejected a call.
    Host(HostError),
    /// A GATT access was refused with an ATT error code.
    Att(AttError),
    /// An Improv RPC frame could not be decoded.
    Decode(DecodeError),
    /// The Wi-Fi provisioner failed.
    Wifi(WifiError),
    /// Configuration or identity is invalid.
    Config(&'static str),
    /// A background task could not be started.
    Spawn(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(e) => write!(f, "host: {e}"),
            Self::Att(e) => write!(f, "att: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Wifi(e) => write!(f, "wifi: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Host stack errors
// ---------------------------------------------------------------------------

/// Which host-stack call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    SetFields,
    AdvStart,
    AdvStop,
    Notify,
    Terminate,
    Register,
    SetName,
    Address,
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SetFields => "set advertising fields",
            Self::AdvStart => "start advertising",
            Self::AdvStop => "stop advertising",
            Self::Notify => "notify",
            Self::Terminate => "terminate connection",
            Self::Register => "register GATT services",
            Self::SetName => "set device name",
            Self::Address => "infer address",
        };
        f.write_str(s)
    }
}

/// A host-stack call returned a non-zero status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostError {
    pub op: HostOp,
    pub code: i32,
}

impl HostError {
    pub const fn new(op: HostOp, code: i32) -> Self {
        Self { op, code }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed (rc={})", self.op, self.code)
    }
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        Self::Host(e)
    }
}

// ---------------------------------------------------------------------------
// ATT errors
// ---------------------------------------------------------------------------

/// ATT protocol error codes returned to the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    /// The attribute has no read access.
    ReadNotPermitted,
    /// The attribute has no write access.
    WriteNotPermitted,
    /// The request could not be handled in the current state.
    Unlikely,
    /// The response or the inbound payload does not fit.
    InsufficientResources,
}

impl AttError {
    /// Wire value as defined by the ATT protocol.
    pub const fn code(self) -> u8 {
        match self {
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::Unlikely => 0x0E,
            Self::InsufficientResources => 0x11,
        }
    }
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadNotPermitted => write!(f, "read not permitted"),
            Self::WriteNotPermitted => write!(f, "write not permitted"),
            Self::Unlikely => write!(f, "unlikely error"),
            Self::InsufficientResources => write!(f, "insufficient resources"),
        }
    }
}

impl From<AttError> for Error {
    fn from(e: AttError) -> Self {
        Self::Att(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Wi-Fi errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    /// SSID or passphrase rejected before reaching the driver.
    InvalidCredentials,
    /// The driver reported a failed association.
    ConnectFailed,
    /// No result within the provisioning deadline.
    Timeout,
    /// A timed-out attempt is still holding the driver.
    Busy,
    /// Raw driver error code.
    Driver(i32),
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::Timeout => write!(f, "timed out"),
            Self::Busy => write!(f, "previous attempt still running"),
            Self::Driver(code) => write!(f, "driver error {code}"),
        }
    }
}

impl From<WifiError> for Error {
    fn from(e: WifiError) -> Self {
        Self::Wifi(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
