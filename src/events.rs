//! Host-stack event bridge.
//!
//! Maps GAP events onto provisioning transitions and advertising re-arm.
//! Re-arming only clears `advertising_active`; the advertising loop is the
//! sole issuer of start/stop calls and picks it up on its next tick.

use core::fmt;

use log::{info, warn};

use crate::ports::{ConnHandle, HostStack};
use crate::server::{Inner, SharedState};

/// Events delivered by the host adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Host and controller are in sync; advertising may begin.
    Synced { address: Option<BdAddr> },
    /// Host stack reset itself; a new `Synced` follows.
    Reset { reason: i32 },
    /// Connection established (`status == 0`) or attempt failed.
    Connect { conn: ConnHandle, status: i32 },
    Disconnect { conn: ConnHandle, reason: i32 },
    /// The radio stopped advertising on its own.
    AdvertiseComplete { reason: i32 },
    Subscribe {
        conn: ConnHandle,
        attr_handle: u16,
        notify: bool,
    },
    MtuChanged { conn: ConnHandle, mtu: u16 },
}

/// Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    /// Build from the little-endian byte order host stacks report.
    pub fn from_le(bytes: [u8; 6]) -> Self {
        let mut be = bytes;
        be.reverse();
        Self(be)
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl SharedState {
    /// The radio is no longer advertising (connection or timeout).
    pub(crate) fn rearm(&mut self) {
        self.advertising_active = false;
        self.arm_epoch = self.arm_epoch.wrapping_add(1);
    }
}

impl<H: HostStack> Inner<H> {
    pub(crate) fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::Synced { address } => {
                match address {
                    Some(addr) => info!("BLE host synced, address {}", addr),
                    None => warn!("BLE host synced, address unavailable"),
                }
                self.lock().synced = true;
                self.ready.signal(());
            }
            HostEvent::Reset { reason } => {
                warn!("BLE host reset; reason={}", reason);
            }
            HostEvent::Connect { conn, status } => {
                let mut shared = self.lock();
                if status == 0 {
                    info!("Connection established; handle={}", conn);
                    shared.machine.on_connect(conn);
                } else {
                    warn!("Connection failed; status={}", status);
                    shared.machine.on_connect_failed();
                }
                shared.rearm();
            }
            HostEvent::Disconnect { conn, reason } => {
                info!("Disconnect; handle={} reason={}", conn, reason);
                let mut shared = self.lock();
                shared.machine.on_disconnect();
                shared.rearm();
            }
            HostEvent::AdvertiseComplete { reason } => {
                info!("Advertising complete; reason={}", reason);
                self.lock().rearm();
            }
            HostEvent::Subscribe {
                conn,
                attr_handle,
                notify,
            } => {
                let id = self.handles.get().and_then(|h| h.lookup(attr_handle));
                info!(
                    "Subscribe; handle={} attr={} ({:?}) notify={}",
                    conn, attr_handle, id, notify
                );
            }
            HostEvent::MtuChanged { conn, mtu } => {
                info!("MTU update; handle={} mtu={}", conn, mtu);
            }
        }
    }
}
