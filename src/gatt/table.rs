//! Attribute table: the two services, their characteristics, and the
//! handler each characteristic is bound to.
//!
//! The table is static. Each characteristic carries a capability-typed
//! [`Access`] resolved here, so the dispatcher never switches on UUIDs.
//! Runtime attribute handles are assigned by the host stack during
//! registration and recorded in a [`HandleTable`].

use core::fmt;

use super::dispatch;
use crate::improv;

// ─── Identity ─────────────────────────────────────────────────

/// Logical characteristic names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    Status,
    Error,
    RpcCommand,
    RpcResult,
    Capabilities,
    Manufacturer,
    Model,
}

impl CharacteristicId {
    pub const ALL: [Self; 7] = [
        Self::Status,
        Self::Error,
        Self::RpcCommand,
        Self::RpcResult,
        Self::Capabilities,
        Self::Manufacturer,
        Self::Model,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uuid {
    U16(u16),
    U128(u128),
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::U16(v) => write!(f, "0x{v:04X}"),
            Self::U128(v) => write!(
                f,
                "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
                (v >> 96) as u32,
                (v >> 80) as u16,
                (v >> 64) as u16,
                (v >> 48) as u16,
                v & 0xFFFF_FFFF_FFFF
            ),
        }
    }
}

/// GATT characteristic property bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties(u8);

impl Properties {
    pub const READ: Self = Self(0x02);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

// ─── Definitions ──────────────────────────────────────────────

/// Handler bound to a characteristic.
#[derive(Clone, Copy)]
pub enum Access {
    Read(dispatch::ReadFn),
    Write(dispatch::WriteFn),
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(_) => f.write_str("Read"),
            Self::Write(_) => f.write_str("Write"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacteristicDef {
    pub id: CharacteristicId,
    pub uuid: Uuid,
    pub props: Properties,
    pub access: Access,
}

#[derive(Debug)]
pub struct ServiceDef {
    pub uuid: Uuid,
    pub characteristics: &'static [CharacteristicDef],
}

const READ_NOTIFY: Properties = Properties::READ.union(Properties::NOTIFY);

static PROVISIONING_CHARACTERISTICS: [CharacteristicDef; 5] = [
    CharacteristicDef {
        id: CharacteristicId::Status,
        uuid: Uuid::U128(improv::STATUS_UUID),
        props: READ_NOTIFY,
        access: Access::Read(dispatch::read_status),
    },
    CharacteristicDef {
        id: CharacteristicId::Error,
        uuid: Uuid::U128(improv::ERROR_UUID),
        props: READ_NOTIFY,
        access: Access::Read(dispatch::read_error),
    },
    CharacteristicDef {
        id: CharacteristicId::RpcCommand,
        uuid: Uuid::U128(improv::RPC_COMMAND_UUID),
        props: Properties::WRITE,
        access: Access::Write(dispatch::write_rpc_command),
    },
    CharacteristicDef {
        id: CharacteristicId::RpcResult,
        uuid: Uuid::U128(improv::RPC_RESULT_UUID),
        props: READ_NOTIFY,
        access: Access::Read(dispatch::read_rpc_result),
    },
    CharacteristicDef {
        id: CharacteristicId::Capabilities,
        uuid: Uuid::U128(improv::CAPABILITIES_UUID),
        props: Properties::READ,
        access: Access::Read(dispatch::read_capabilities),
    },
];

static DEVICE_INFO_CHARACTERISTICS: [CharacteristicDef; 2] = [
    CharacteristicDef {
        id: CharacteristicId::Manufacturer,
        uuid: Uuid::U16(improv::MANUFACTURER_UUID),
        props: Properties::READ,
        access: Access::Read(dispatch::read_manufacturer),
    },
    CharacteristicDef {
        id: CharacteristicId::Model,
        uuid: Uuid::U16(improv::MODEL_UUID),
        props: Properties::READ,
        access: Access::Read(dispatch::read_model),
    },
];

static SERVICES: [ServiceDef; 2] = [
    ServiceDef {
        uuid: Uuid::U128(improv::SERVICE_UUID),
        characteristics: &PROVISIONING_CHARACTERISTICS,
    },
    ServiceDef {
        uuid: Uuid::U16(improv::DEVICE_INFO_UUID),
        characteristics: &DEVICE_INFO_CHARACTERISTICS,
    },
];

/// The provisioning and Device Information services.
#[derive(Debug, Clone, Copy)]
pub struct AttributeTable {
    services: &'static [ServiceDef],
}

impl AttributeTable {
    pub fn services(&self) -> &'static [ServiceDef] {
        self.services
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &'static CharacteristicDef> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }

    pub fn characteristic(&self, id: CharacteristicId) -> Option<&'static CharacteristicDef> {
        self.characteristics().find(|c| c.id == id)
    }
}

pub fn build_attribute_table() -> AttributeTable {
    AttributeTable { services: &SERVICES }
}

// ─── Runtime handles ──────────────────────────────────────────

/// Attribute value handles assigned by the host stack.
///
/// Written once during registration. A zero entry means the handle is
/// unknown; notifying through it is a silent no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleTable {
    handles: [u16; CharacteristicId::ALL.len()],
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: CharacteristicId, handle: u16) {
        self.handles[id.index()] = handle;
    }

    pub fn get(&self, id: CharacteristicId) -> Option<u16> {
        match self.handles[id.index()] {
            0 => None,
            h => Some(h),
        }
    }

    /// Reverse lookup for adapters that only see a raw handle.
    pub fn lookup(&self, handle: u16) -> Option<CharacteristicId> {
        if handle == 0 {
            return None;
        }
        CharacteristicId::ALL
            .into_iter()
            .find(|id| self.handles[id.index()] == handle)
    }
}
