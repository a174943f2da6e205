//! Controller configuration parameters
//!
//! All tunable timings for the advertising loop and provisioning worker,
//! plus the opaque capabilities byte served to peers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on an RPC-command write, enforced before decoding.
pub const MAX_RPC_LEN: usize = 256;

/// Core controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    // --- Advertising cycle ---
    /// Time spent in ServiceData mode before switching to NameOnly (ms)
    pub name_every_ms: u32,
    /// Time spent in NameOnly mode per cycle (ms)
    pub name_for_ms: u32,
    /// Advertising loop baseline tick (ms)
    pub poll_interval_ms: u32,
    /// TX power level carried in the NameOnly payload (dBm)
    pub tx_power_dbm: i8,

    // --- Provisioning ---
    /// Wait after reaching Provisioned before disconnecting the peer (ms)
    pub settle_delay_ms: u32,
    /// Deadline for the Wi-Fi provisioner; expiry reports UnableToConnect (ms)
    pub provision_timeout_ms: u32,
    /// Largest RPC-command write accepted (bytes)
    pub max_rpc_len: usize,

    // --- GATT ---
    /// Capabilities bitmap served by the capabilities characteristic
    pub capabilities: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Advertising
            name_every_ms: 5000,
            name_for_ms: 1000,
            poll_interval_ms: 100, // 10 Hz
            tx_power_dbm: 3,

            // Provisioning
            settle_delay_ms: 2500,
            provision_timeout_ms: 30_000,
            max_rpc_len: MAX_RPC_LEN,

            // GATT
            capabilities: 0x00,
        }
    }
}

impl ServerConfig {
    /// Length of one full ServiceData → NameOnly cycle.
    pub const fn cycle_ms(&self) -> u32 {
        self.name_every_ms.saturating_add(self.name_for_ms)
    }

    /// Reject configurations the advertising loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll interval must be non-zero"));
        }
        if self.name_every_ms == 0 || self.name_for_ms == 0 {
            return Err(Error::Config("advertising windows must be non-zero"));
        }
        if self.name_for_ms >= self.cycle_ms() {
            return Err(Error::Config("name window must be shorter than the cycle"));
        }
        if self.provision_timeout_ms == 0 {
            return Err(Error::Config("provision timeout must be non-zero"));
        }
        if self.max_rpc_len < 3 || self.max_rpc_len > MAX_RPC_LEN {
            return Err(Error::Config("RPC bound out of range"));
        }
        Ok(())
    }
}
