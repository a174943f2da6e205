//! Advertising controller.
//!
//! A periodic loop reconciles the external on/off flag, whether the radio
//! is currently advertising, and the provisioning state. Each tick takes
//! one action, in priority order:
//!
//! 1. **Stop** if the radio is on but advertising was disabled.
//! 2. **Settle** after a successful provisioning (then continue the tick).
//! 3. **Start** in ServiceData mode if enabled but not on air.
//! 4. **Cycle** ServiceData → NameOnly → ServiceData while steady.
//! 5. **Idle** for one poll interval.
//!
//! The full name and the 128-bit service UUID plus service data do not fit
//! one 31-byte legacy advertisement, so the two payloads alternate.
//! Waits are sliced into poll-interval steps and end early when the
//! advertising inputs change underneath them.

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::identity::{DeviceIdentity, IdentityString};
use crate::improv::{self, ProvisioningState, SERVICE_DATA_LEN};
use crate::ports::{HostStack, NO_CONNECTION};
use crate::server::{Inner, SharedState};

// ─── Payload ──────────────────────────────────────────────────

/// Which advertisement payload is on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertisingMode {
    #[default]
    ServiceData,
    NameOnly,
}

/// Legacy advertising PDU payload limit.
pub const MAX_ADV_PAYLOAD: usize = 31;

pub type AdvPayload = heapless::Vec<u8, MAX_ADV_PAYLOAD>;

/// General discoverable mode.
pub const FLAG_DISC_GEN: u8 = 0x02;
/// BR/EDR not supported.
pub const FLAG_BREDR_UNSUP: u8 = 0x04;

const AD_FLAGS: u8 = 0x01;
const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_TX_POWER: u8 = 0x0A;
const AD_SERVICE_DATA_UUID16: u8 = 0x16;

/// Advertisement content for one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvFields {
    pub flags: u8,
    pub name: Option<IdentityString>,
    pub tx_power_dbm: Option<i8>,
    pub service_uuid128: Option<u128>,
    /// Service data including its leading 16-bit UUID.
    pub service_data: Option<[u8; SERVICE_DATA_LEN]>,
}

impl AdvFields {
    pub fn for_mode(
        mode: AdvertisingMode,
        identity: &DeviceIdentity,
        state: ProvisioningState,
        config: &ServerConfig,
    ) -> Self {
        let flags = FLAG_DISC_GEN | FLAG_BREDR_UNSUP;
        match mode {
            AdvertisingMode::ServiceData => Self {
                flags,
                name: None,
                tx_power_dbm: None,
                service_uuid128: Some(improv::SERVICE_UUID),
                service_data: Some(improv::service_data(state)),
            },
            AdvertisingMode::NameOnly => {
                let mut name = IdentityString::new();
                // Same capacity as the identity string, cannot overflow.
                let _ = name.push_str(identity.name());
                Self {
                    flags,
                    name: Some(name),
                    tx_power_dbm: Some(config.tx_power_dbm),
                    service_uuid128: None,
                    service_data: None,
                }
            }
        }
    }

    pub fn mode(&self) -> AdvertisingMode {
        if self.name.is_some() {
            AdvertisingMode::NameOnly
        } else {
            AdvertisingMode::ServiceData
        }
    }

    /// Serialize as AD structures. A name that does not fit is sent as a
    /// shortened name; anything else that overflows yields `None`.
    pub fn encode(&self) -> Option<AdvPayload> {
        let mut out = AdvPayload::new();
        push_ad(&mut out, AD_FLAGS, &[self.flags])?;
        if let Some(uuid) = self.service_uuid128 {
            push_ad(&mut out, AD_INCOMPLETE_UUID128, &uuid.to_le_bytes())?;
        }
        if let Some(dbm) = self.tx_power_dbm {
            push_ad(&mut out, AD_TX_POWER, &[dbm as u8])?;
        }
        if let Some(name) = &self.name {
            let reserved = self.service_data.map_or(0, |d| d.len() + 2);
            let room = MAX_ADV_PAYLOAD.checked_sub(out.len() + 2 + reserved)?;
            if name.len() <= room {
                push_ad(&mut out, AD_COMPLETE_NAME, name.as_bytes())?;
            } else {
                let mut cut = room;
                while !name.is_char_boundary(cut) {
                    cut -= 1;
                }
                push_ad(&mut out, AD_SHORT_NAME, &name.as_bytes()[..cut])?;
            }
        }
        if let Some(data) = &self.service_data {
            push_ad(&mut out, AD_SERVICE_DATA_UUID16, data)?;
        }
        Some(out)
    }
}

fn push_ad(out: &mut AdvPayload, ad_type: u8, data: &[u8]) -> Option<()> {
    out.push((data.len() + 1) as u8).ok()?;
    out.push(ad_type).ok()?;
    out.extend_from_slice(data).ok()
}

// ─── Policy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdvSnapshot {
    pub synced: bool,
    pub enabled: bool,
    pub active: bool,
    pub state: ProvisioningState,
    pub epoch: u32,
}

impl AdvSnapshot {
    pub(crate) fn of(shared: &SharedState) -> Self {
        Self {
            synced: shared.synced,
            enabled: shared.advertising_enabled,
            active: shared.advertising_active,
            state: shared.machine.state(),
            epoch: shared.arm_epoch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickAction {
    Stop,
    Settle,
    Start,
    Cycle,
    Idle,
}

/// Decide the action for one tick.
pub(crate) fn next_action(s: &AdvSnapshot) -> TickAction {
    if !s.synced {
        return TickAction::Idle;
    }
    if s.active && !s.enabled {
        return TickAction::Stop;
    }
    if s.state == ProvisioningState::Provisioned {
        return TickAction::Settle;
    }
    match (s.enabled, s.active) {
        (true, false) => TickAction::Start,
        (true, true) => TickAction::Cycle,
        _ => TickAction::Idle,
    }
}

// ─── Loop ─────────────────────────────────────────────────────

impl<H: HostStack> Inner<H> {
    fn adv_snapshot(&self) -> AdvSnapshot {
        AdvSnapshot::of(&self.lock())
    }

    /// Advertising task body. Returns once the controller shuts down.
    pub(crate) fn run_advertising(&self, delay: &mut impl DelayNs) {
        info!("BLE advertise task: waiting to start...");
        futures_lite::future::block_on(self.ready.wait());
        info!("BLE advertise task: started");
        while self.is_running() {
            self.advertising_tick(delay);
        }
        if self.adv_snapshot().active {
            if let Err(e) = self.host.stop_advertising() {
                warn!("BLE advertise task: stop on exit failed: {}", e);
            }
        }
        info!("BLE advertise task: stopped");
    }

    /// Run one controller decision.
    pub(crate) fn advertising_tick(&self, delay: &mut impl DelayNs) {
        let mut snap = self.adv_snapshot();
        let mut action = next_action(&snap);

        if action == TickAction::Settle {
            self.settle(delay);
            snap = self.adv_snapshot();
            action = next_action(&snap);
        }

        match action {
            TickAction::Stop => {
                info!("Stopping advertising.");
                if let Err(e) = self.host.stop_advertising() {
                    error!("BLE advertise task: failed to stop advertising: {}", e);
                }
                self.lock().advertising_active = false;
            }
            // Another provisioning finished during the settle window.
            TickAction::Settle => {}
            TickAction::Start => {
                info!("Starting advertising.");
                if self.start_mode(AdvertisingMode::ServiceData) {
                    self.confirm_started(snap.epoch);
                } else {
                    // Back off one cycle window before the next attempt.
                    self.wait_sliced(self.config.name_every_ms, snap.epoch, delay);
                }
            }
            TickAction::Cycle => self.run_cycle(snap.epoch, delay),
            TickAction::Idle => delay.delay_ms(self.config.poll_interval_ms),
        }
    }

    /// Hold Provisioned for the settle delay, drop the peer, reset.
    fn settle(&self, delay: &mut impl DelayNs) {
        let Some(settling) = self.lock().machine.provisioned_by() else {
            return;
        };
        info!("Just provisioned, waiting and resetting state...");
        delay.delay_ms(self.config.settle_delay_ms);

        // A newer attempt restarts the window on the next tick.
        if self.lock().machine.provisioned_by() != Some(settling) {
            debug!("Settle of attempt {} superseded", settling.id);
            return;
        }
        if settling.conn != NO_CONNECTION {
            info!("Disconnecting client, handle={}", settling.conn);
            if let Err(e) = self.host.terminate(settling.conn) {
                warn!("Failed to disconnect client: {}", e);
            }
        }
        self.lock().machine.finish_settle(settling);
    }

    fn run_cycle(&self, epoch: u32, delay: &mut impl DelayNs) {
        // An interrupted cycle may have left the name payload on air.
        if self.lock().mode == AdvertisingMode::NameOnly
            && !self.switch_mode(AdvertisingMode::ServiceData, epoch)
        {
            return;
        }
        if !self.wait_sliced(self.config.name_every_ms, epoch, delay) {
            return;
        }
        debug!("BLE advertise task: starting to advertise name.");
        if !self.switch_mode(AdvertisingMode::NameOnly, epoch) {
            return;
        }
        if !self.wait_sliced(self.config.name_for_ms, epoch, delay) {
            return;
        }
        debug!("BLE advertise task: starting to advertise service and service data.");
        self.switch_mode(AdvertisingMode::ServiceData, epoch);
    }

    /// Stop the live advertisement and restart it in `mode`.
    fn switch_mode(&self, mode: AdvertisingMode, epoch: u32) -> bool {
        if let Err(e) = self.host.stop_advertising() {
            error!("BLE advertise task: failed to stop advertising: {}", e);
            return false;
        }
        if self.start_mode(mode) {
            return self.confirm_started(epoch);
        }
        let mut shared = self.lock();
        if shared.arm_epoch == epoch {
            shared.advertising_active = false;
        }
        false
    }

    /// Record a successful start made under `epoch`. If the inputs were
    /// re-armed meanwhile the radio is stopped again so it never
    /// advertises while the state says it is idle.
    fn confirm_started(&self, epoch: u32) -> bool {
        {
            let mut shared = self.lock();
            if shared.arm_epoch == epoch {
                shared.advertising_active = true;
                return true;
            }
        }
        debug!("BLE advertise task: re-armed during start, stopping");
        if let Err(e) = self.host.stop_advertising() {
            warn!("BLE advertise task: failed to stop advertising: {}", e);
        }
        false
    }

    /// Program the payload for `mode` and start the radio.
    fn start_mode(&self, mode: AdvertisingMode) -> bool {
        let fields = {
            let shared = self.lock();
            AdvFields::for_mode(mode, &self.identity, shared.machine.state(), &self.config)
        };
        if let Err(e) = self.host.set_adv_fields(&fields) {
            error!("Error setting advertisement data: {}", e);
            return false;
        }
        if let Err(e) = self.host.start_advertising() {
            error!("Error enabling advertisement: {}", e);
            return false;
        }
        self.lock().mode = mode;
        true
    }

    /// Wait `total_ms` in poll-interval slices. Returns `false` if the
    /// wait was cut short because the advertising inputs changed.
    fn wait_sliced(&self, total_ms: u32, epoch: u32, delay: &mut impl DelayNs) -> bool {
        let step = self.config.poll_interval_ms.max(1);
        let mut remaining = total_ms;
        while remaining > 0 {
            let slice = remaining.min(step);
            delay.delay_ms(slice);
            remaining -= slice;

            let s = self.adv_snapshot();
            if !self.is_running()
                || !s.enabled
                || s.epoch != epoch
                || s.state == ProvisioningState::Provisioned
            {
                return false;
            }
        }
        true
    }
}
