//! Improv Wi-Fi protocol definitions.
//!
//! UUIDs, state and error byte values, and the service-data marker used by
//! the provisioning service. The RPC framing lives in [`codec`].

pub mod codec;

use core::fmt;

// ─── UUIDs ────────────────────────────────────────────────────

/// Improv provisioning service: 00467768-6228-2272-4663-277478268000
pub const SERVICE_UUID: u128 = 0x0046_7768_6228_2272_4663_2774_7826_8000;
/// Current provisioning state (read, notify).
pub const STATUS_UUID: u128 = 0x0046_7768_6228_2272_4663_2774_7826_8001;
/// Last provisioning error (read, notify).
pub const ERROR_UUID: u128 = 0x0046_7768_6228_2272_4663_2774_7826_8002;
/// RPC command input (write).
pub const RPC_COMMAND_UUID: u128 = 0x0046_7768_6228_2272_4663_2774_7826_8003;
/// RPC result output (read, notify).
pub const RPC_RESULT_UUID: u128 = 0x0046_7768_6228_2272_4663_2774_7826_8004;
/// Capabilities bitmap (read).
pub const CAPABILITIES_UUID: u128 = 0x0046_7768_6228_2272_4663_2774_7826_8005;

/// Device Information service.
pub const DEVICE_INFO_UUID: u16 = 0x180A;
/// Manufacturer Name String.
pub const MANUFACTURER_UUID: u16 = 0x2A29;
/// Model Number String.
pub const MODEL_UUID: u16 = 0x2A24;

// ─── Service data ─────────────────────────────────────────────

/// 16-bit service-data UUID 0x4677, little endian on air.
pub const SERVICE_DATA_MARKER: [u8; 2] = [0x77, 0x46];
/// Marker, state byte, five reserved zero bytes.
pub const SERVICE_DATA_LEN: usize = 8;

/// Build the 8-byte service-data block advertised in ServiceData mode.
pub const fn service_data(state: ProvisioningState) -> [u8; SERVICE_DATA_LEN] {
    [
        SERVICE_DATA_MARKER[0],
        SERVICE_DATA_MARKER[1],
        state.as_byte(),
        0,
        0,
        0,
        0,
        0,
    ]
}

// ─── State / error ────────────────────────────────────────────

/// Provisioning dialog state as exposed on the Status characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProvisioningState {
    #[default]
    Authorized = 0x02,
    Provisioning = 0x03,
    Provisioned = 0x04,
}

impl ProvisioningState {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x02 => Some(Self::Authorized),
            0x03 => Some(Self::Provisioning),
            0x04 => Some(Self::Provisioned),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorized => write!(f, "authorized"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Provisioned => write!(f, "provisioned"),
        }
    }
}

/// Last failure as exposed on the Error characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProvisioningError {
    #[default]
    None = 0x00,
    InvalidRpc = 0x01,
    UnableToConnect = 0x03,
}

impl ProvisioningError {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::None),
            0x01 => Some(Self::InvalidRpc),
            0x03 => Some(Self::UnableToConnect),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::InvalidRpc => write!(f, "invalid RPC"),
            Self::UnableToConnect => write!(f, "unable to connect"),
        }
    }
}
