//! Mock BLE host stack for integration tests.
//!
//! Records every host-stack call with the virtual time it was issued at,
//! so tests can assert on the full call history and on advertising timing.
//! Start/stop failures can be injected, handles can be withheld, and the
//! mock can call back into the controller the way a real host does.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use embedded_hal::delay::DelayNs;
use improv_ble::gatt::table::{AttributeTable, HandleTable};
use improv_ble::{
    AdvFields, AdvertisingMode, CharacteristicId, ConnHandle, DeviceIdentity, HostCallbacks,
    HostError, HostEvent, HostOp, HostStack, ImprovServer, ServerConfig, WifiError,
};

// ── Virtual clock ─────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Clock(Arc<AtomicU64>);

impl Clock {
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Delay that advances the virtual clock and fires scheduled hooks.
pub struct VirtualDelay {
    clock: Clock,
    hooks: Vec<(u64, Hook)>,
}

#[allow(dead_code)]
impl VirtualDelay {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            hooks: Vec::new(),
        }
    }

    /// Run `f` once the virtual clock reaches `at_ms`.
    pub fn at(&mut self, at_ms: u64, f: impl FnOnce() + Send + 'static) {
        self.hooks.push((at_ms, Box::new(f)));
    }

    fn fire_due(&mut self) {
        let now = self.clock.now();
        let (due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.hooks).into_iter().partition(|(t, _)| *t <= now);
        self.hooks = pending;
        for (_, f) in due {
            f();
        }
    }
}

impl DelayNs for VirtualDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.advance(u64::from(ns.div_ceil(1_000_000)));
        self.fire_due();
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(u64::from(ms));
        self.fire_due();
    }
}

// ── Host call record ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Register,
    SetName(String),
    SetFields(AdvFields),
    Start,
    Stop,
    Notify { conn: ConnHandle, attr: u16, value: Vec<u8> },
    Terminate(ConnHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timed {
    pub at_ms: u64,
    pub call: Call,
}

// ── MockHost ──────────────────────────────────────────────────

/// Base value for adapter-assigned attribute handles.
pub const HANDLE_BASE: u16 = 0x10;

pub struct MockHost {
    clock: Clock,
    calls: Mutex<Vec<Timed>>,
    fail_starts: AtomicU32,
    fail_stops: AtomicU32,
    withheld: Vec<CharacteristicId>,
    callbacks: Mutex<Option<Weak<dyn HostCallbacks>>>,
    read_during_notify: AtomicBool,
    event_on_start: Mutex<Option<HostEvent>>,
}

#[allow(dead_code)]
impl MockHost {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            calls: Mutex::new(Vec::new()),
            fail_starts: AtomicU32::new(0),
            fail_stops: AtomicU32::new(0),
            withheld: Vec::new(),
            callbacks: Mutex::new(None),
            read_during_notify: AtomicBool::new(false),
            event_on_start: Mutex::new(None),
        }
    }

    /// Leave the handles of `ids` unassigned at registration.
    pub fn without_handles(mut self, ids: &[CharacteristicId]) -> Self {
        self.withheld = ids.to_vec();
        self
    }

    /// Read Status back through the controller from inside every notify,
    /// as a host access callback racing the notify would.
    pub fn read_during_notify(&self) {
        self.read_during_notify.store(true, Ordering::SeqCst);
    }

    /// Deliver `event` from inside the next successful advertise start.
    pub fn event_on_next_start(&self, event: HostEvent) {
        *self.event_on_start.lock().unwrap() = Some(event);
    }

    fn controller(&self) -> Option<Arc<dyn HostCallbacks>> {
        self.callbacks.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    /// Fail the next `n` advertise-start calls.
    pub fn fail_next_starts(&self, n: u32) {
        self.fail_starts.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` advertise-stop calls.
    pub fn fail_next_stops(&self, n: u32) {
        self.fail_stops.store(n, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(Timed {
            at_ms: self.clock.now(),
            call,
        });
    }

    pub fn timed_calls(&self) -> Vec<Timed> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.timed_calls().into_iter().map(|t| t.call).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn starts(&self) -> usize {
        self.count(|c| *c == Call::Start)
    }

    pub fn stops(&self) -> usize {
        self.count(|c| *c == Call::Stop)
    }

    /// Values notified on `attr`, in order.
    pub fn notified(&self, attr: u16) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Notify { attr: a, value, .. } if a == attr => value.first().copied(),
                _ => None,
            })
            .collect()
    }

    /// Modes of every advertisement started, in order.
    pub fn started_modes(&self) -> Vec<AdvertisingMode> {
        let mut last = None;
        let mut out = Vec::new();
        for c in self.calls() {
            match c {
                Call::SetFields(f) => last = Some(f.mode()),
                Call::Start => out.extend(last),
                _ => {}
            }
        }
        out
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl HostStack for MockHost {
    fn register(
        &self,
        table: &AttributeTable,
        callbacks: Weak<dyn HostCallbacks>,
    ) -> Result<HandleTable, HostError> {
        let mut handles = HandleTable::new();
        for (i, def) in table.characteristics().enumerate() {
            if !self.withheld.contains(&def.id) {
                handles.set(def.id, HANDLE_BASE + i as u16);
            }
        }
        *self.callbacks.lock().unwrap() = Some(callbacks);
        self.record(Call::Register);
        Ok(handles)
    }

    fn set_device_name(&self, name: &str) -> Result<(), HostError> {
        self.record(Call::SetName(name.to_owned()));
        Ok(())
    }

    fn set_adv_fields(&self, fields: &AdvFields) -> Result<(), HostError> {
        self.record(Call::SetFields(fields.clone()));
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), HostError> {
        if Self::take_failure(&self.fail_starts) {
            return Err(HostError::new(HostOp::AdvStart, 6));
        }
        self.record(Call::Start);
        let event = self.event_on_start.lock().unwrap().take();
        if let (Some(event), Some(cb)) = (event, self.controller()) {
            cb.on_event(event);
        }
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), HostError> {
        if Self::take_failure(&self.fail_stops) {
            return Err(HostError::new(HostOp::AdvStop, 2));
        }
        self.record(Call::Stop);
        Ok(())
    }

    fn notify(&self, conn: ConnHandle, attr: u16, value: &[u8]) -> Result<(), HostError> {
        self.record(Call::Notify {
            conn,
            attr,
            value: value.to_vec(),
        });
        if self.read_during_notify.load(Ordering::SeqCst) {
            if let Some(cb) = self.controller() {
                let _ = cb.on_read(CharacteristicId::Status);
            }
        }
        Ok(())
    }

    fn terminate(&self, conn: ConnHandle) -> Result<(), HostError> {
        self.record(Call::Terminate(conn));
        Ok(())
    }
}

// ── Fixtures ──────────────────────────────────────────────────

/// Provisioner that counts calls and answers with a fixed outcome.
#[derive(Clone)]
pub struct ScriptedWifi {
    pub calls: Arc<AtomicUsize>,
    pub outcome: Result<(), WifiError>,
    pub latency_ms: u64,
    pub seen: Arc<Mutex<Vec<(String, String)>>>,
}

#[allow(dead_code)]
impl ScriptedWifi {
    pub fn ok() -> Self {
        Self::with(Ok(()))
    }

    pub fn failing() -> Self {
        Self::with(Err(WifiError::ConnectFailed))
    }

    pub fn with(outcome: Result<(), WifiError>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            outcome,
            latency_ms: 0,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn slow(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl improv_ble::WifiProvisioner for ScriptedWifi {
    fn provision(&self, ssid: &str, password: &str) -> Result<(), WifiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((ssid.to_owned(), password.to_owned()));
        if self.latency_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.latency_ms));
        }
        self.outcome
    }
}

pub struct Fixture {
    pub server: ImprovServer<MockHost>,
    pub clock: Clock,
    pub wifi: ScriptedWifi,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new(wifi: ScriptedWifi) -> Self {
        Self::with_config(wifi, ServerConfig::default())
    }

    pub fn with_config(wifi: ScriptedWifi, config: ServerConfig) -> Self {
        Self::with_host(wifi, config, MockHost::new)
    }

    /// Build the controller on a host made by `build` from the shared clock.
    pub fn with_host(
        wifi: ScriptedWifi,
        config: ServerConfig,
        build: impl FnOnce(Clock) -> MockHost,
    ) -> Self {
        let clock = Clock::default();
        let identity = DeviceIdentity::new("improv-test", "Acme", "Widget").unwrap();
        let server =
            ImprovServer::initialize(identity, config, build(clock.clone()), wifi.clone())
                .unwrap();
        server.host().clear();
        Self {
            server,
            clock,
            wifi,
        }
    }

    pub fn host(&self) -> &MockHost {
        self.server.host()
    }

    pub fn delay(&self) -> VirtualDelay {
        VirtualDelay::new(self.clock.clone())
    }

    pub fn handle(&self, id: CharacteristicId) -> u16 {
        self.server.handles().unwrap().get(id).unwrap()
    }

    pub fn status_notifications(&self) -> Vec<u8> {
        self.host().notified(self.handle(CharacteristicId::Status))
    }

    pub fn error_notifications(&self) -> Vec<u8> {
        self.host().notified(self.handle(CharacteristicId::Error))
    }

    pub fn sync(&self) {
        self.server.handle_event(HostEvent::Synced { address: None });
    }

    pub fn connect(&self, conn: ConnHandle) {
        self.server.handle_event(HostEvent::Connect { conn, status: 0 });
    }

    pub fn disconnect(&self, conn: ConnHandle) {
        self.server.handle_event(HostEvent::Disconnect { conn, reason: 0x13 });
    }

    pub fn tick(&self, delay: &mut VirtualDelay) {
        self.server.tick_advertising(delay);
    }

    /// Tick until the virtual clock reaches `until_ms`.
    pub fn run_until(&self, delay: &mut VirtualDelay, until_ms: u64) {
        while self.clock.now() < until_ms {
            self.tick(delay);
        }
    }
}
