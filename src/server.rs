//! Improv BLE controller.
//!
//! [`ImprovServer`] owns every piece of controller state: the identity,
//! the attribute table and its runtime handles, and one mutex-guarded
//! [`SharedState`] block touched by the host callbacks, the advertising
//! task and the provisioning worker. Notifications are captured under
//! that lock and sent after it is released; a separate gate keeps them
//! in transition order.
//!
//! ```text
//!  host callbacks ──► events / dispatch ──┐
//!                                         ├──► SharedState (Mutex)
//!  advertising task ──► advertising ──────┤
//!                                         │
//!  provisioning worker ◄── jobs (depth 1) ┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::advertising::AdvertisingMode;
use crate::config::ServerConfig;
use crate::drivers::delay::TaskDelay;
use crate::drivers::task_pin::{self, Core};
use crate::error::{AttError, Error, Result};
use crate::events::HostEvent;
use crate::gatt::dispatch::{self, AttValue};
use crate::gatt::table::{AttributeTable, CharacteristicId, HandleTable, build_attribute_table};
use crate::identity::DeviceIdentity;
use crate::improv::codec::{ImprovCodec, RpcCodec};
use crate::improv::{ProvisioningError, ProvisioningState};
use crate::ports::{ConnHandle, HostCallbacks, HostStack, WifiProvisioner};
use crate::provisioning::{Job, ProvisioningMachine};

// ─── Shared state ─────────────────────────────────────────────

/// Mutable controller state, guarded by one mutex.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub machine: ProvisioningMachine,
    /// External on/off control.
    pub advertising_enabled: bool,
    /// Whether the radio is believed to be advertising.
    pub advertising_active: bool,
    pub mode: AdvertisingMode,
    /// Host stack reported ready.
    pub synced: bool,
    /// Bumped on every re-arm; in-flight advertising waits compare it.
    pub arm_epoch: u32,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            machine: ProvisioningMachine::new(),
            advertising_enabled: false,
            advertising_active: false,
            mode: AdvertisingMode::ServiceData,
            synced: false,
            arm_epoch: 0,
        }
    }
}

pub(crate) struct Inner<H: HostStack> {
    pub identity: DeviceIdentity,
    pub config: ServerConfig,
    pub table: AttributeTable,
    pub handles: OnceLock<HandleTable>,
    pub host: H,
    pub provisioner: Arc<dyn WifiProvisioner>,
    pub codec: Box<dyn RpcCodec>,
    pub shared: Mutex<SharedState>,
    pub jobs: Channel<CriticalSectionRawMutex, Job, 1>,
    pub ready: Signal<CriticalSectionRawMutex, ()>,
    pub running: AtomicBool,
    /// Serialises host notifies; taken before the state lock is released.
    pub notify_gate: Mutex<()>,
    /// Set while a provisioner helper thread is alive.
    pub provisioner_busy: Arc<AtomicBool>,
}

impl<H: HostStack> Inner<H> {
    /// Lock the state block. A panic elsewhere must not wedge the radio,
    /// so a poisoned lock is recovered.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl<H: HostStack> HostCallbacks for Inner<H> {
    fn on_event(&self, event: HostEvent) {
        self.handle_event(event);
    }

    fn on_read(&self, id: CharacteristicId) -> core::result::Result<AttValue, AttError> {
        let shared = self.lock();
        let view = self.read_view(&shared);
        dispatch::read(&self.table, id, &view)
    }

    fn on_write(&self, id: CharacteristicId, data: &[u8]) -> core::result::Result<(), AttError> {
        dispatch::write(&self.table, id, self, data)
    }
}

// ─── Controller ───────────────────────────────────────────────

/// Stack sizes and priorities for the controller tasks.
const ADVERTISE_STACK_KB: usize = 4;
const ADVERTISE_PRIORITY: u8 = 5;
const WORKER_STACK_KB: usize = 4;
const WORKER_PRIORITY: u8 = 5;

/// Handle to the controller. Cheap to clone; all clones share state.
pub struct ImprovServer<H: HostStack> {
    inner: Arc<Inner<H>>,
}

impl<H: HostStack> Clone for ImprovServer<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: HostStack> ImprovServer<H> {
    /// Build the attribute table, register it with `host`, and set the
    /// GAP device name. Advertising stays off until
    /// [`start_advertising`](Self::start_advertising).
    pub fn initialize(
        identity: DeviceIdentity,
        config: ServerConfig,
        host: H,
        provisioner: impl WifiProvisioner,
    ) -> Result<Self> {
        Self::initialize_with_codec(identity, config, host, provisioner, ImprovCodec)
    }

    /// As [`initialize`](Self::initialize) with a caller-supplied RPC codec.
    pub fn initialize_with_codec(
        identity: DeviceIdentity,
        config: ServerConfig,
        host: H,
        provisioner: impl WifiProvisioner,
        codec: impl RpcCodec + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(Inner {
            identity,
            config,
            table: build_attribute_table(),
            handles: OnceLock::new(),
            host,
            provisioner: Arc::new(provisioner),
            codec: Box::new(codec),
            shared: Mutex::new(SharedState::new()),
            jobs: Channel::new(),
            ready: Signal::new(),
            running: AtomicBool::new(true),
            notify_gate: Mutex::new(()),
            provisioner_busy: Arc::new(AtomicBool::new(false)),
        });

        let weak: Weak<Inner<H>> = Arc::downgrade(&inner);
        let callbacks: Weak<dyn HostCallbacks> = weak;
        let handles = inner.host.register(&inner.table, callbacks)?;
        for id in [
            CharacteristicId::Status,
            CharacteristicId::Error,
            CharacteristicId::RpcResult,
            CharacteristicId::Capabilities,
        ] {
            if handles.get(id).is_none() {
                warn!("No attribute handle for {:?}", id);
            }
        }
        // Freshly created cell, cannot already be set.
        let _ = inner.handles.set(handles);

        inner.host.set_device_name(inner.identity.name())?;
        info!(
            "Improv server initialised as '{}' ({} / {})",
            inner.identity.name(),
            inner.identity.manufacturer(),
            inner.identity.model()
        );
        Ok(Self { inner })
    }

    /// Start the advertising task and the provisioning worker.
    pub fn spawn(&self) -> Result<ServerTasks<H>> {
        let adv = Arc::clone(&self.inner);
        let advertising = task_pin::spawn_on_core(
            Core::App,
            ADVERTISE_PRIORITY,
            ADVERTISE_STACK_KB,
            "improv-adv\0",
            move || adv.run_advertising(&mut TaskDelay::new()),
        )?;

        let worker = Arc::clone(&self.inner);
        let provisioning = match task_pin::spawn_on_core(
            Core::App,
            WORKER_PRIORITY,
            WORKER_STACK_KB,
            "improv-prov\0",
            move || worker.run_worker(),
        ) {
            Ok(h) => h,
            Err(e) => {
                // Unblock the advertising task so it can exit.
                self.inner.running.store(false, Ordering::Release);
                self.inner.ready.signal(());
                return Err(e);
            }
        };

        Ok(ServerTasks {
            inner: Arc::clone(&self.inner),
            advertising: Some(advertising),
            provisioning: Some(provisioning),
        })
    }

    /// Allow advertising. Takes effect on the next controller tick.
    pub fn start_advertising(&self) {
        self.inner.lock().advertising_enabled = true;
    }

    /// Disallow advertising. Takes effect on the next controller tick.
    pub fn stop_advertising(&self) {
        self.inner.lock().advertising_enabled = false;
    }

    /// Feed a host-stack event.
    pub fn handle_event(&self, event: HostEvent) {
        self.inner.handle_event(event);
    }

    /// Serve a GATT read.
    pub fn read(&self, id: CharacteristicId) -> core::result::Result<AttValue, AttError> {
        self.inner.on_read(id)
    }

    /// Serve a GATT write.
    pub fn write(&self, id: CharacteristicId, data: &[u8]) -> core::result::Result<(), AttError> {
        self.inner.on_write(id, data)
    }

    /// Run one advertising decision on the calling thread.
    pub fn tick_advertising(&self, delay: &mut impl DelayNs) {
        self.inner.advertising_tick(delay);
    }

    /// Process one queued provisioning job on the calling thread.
    /// Returns `false` if the queue was empty.
    pub fn run_pending_job(&self) -> bool {
        self.inner.run_pending_job()
    }

    pub fn state(&self) -> ProvisioningState {
        self.inner.lock().machine.state()
    }

    pub fn error(&self) -> ProvisioningError {
        self.inner.lock().machine.error()
    }

    pub fn connection_handle(&self) -> ConnHandle {
        self.inner.lock().machine.conn()
    }

    pub fn advertising_mode(&self) -> AdvertisingMode {
        self.inner.lock().mode
    }

    /// Whether the controller believes the radio is advertising.
    pub fn is_advertising(&self) -> bool {
        self.inner.lock().advertising_active
    }

    pub fn is_advertising_enabled(&self) -> bool {
        self.inner.lock().advertising_enabled
    }

    pub fn handles(&self) -> Option<&HandleTable> {
        self.inner.handles.get()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }
}

// ─── Background tasks ─────────────────────────────────────────

/// Running advertising task and provisioning worker.
pub struct ServerTasks<H: HostStack> {
    inner: Arc<Inner<H>>,
    advertising: Option<JoinHandle<()>>,
    provisioning: Option<JoinHandle<()>>,
}

impl<H: HostStack> ServerTasks<H> {
    /// Stop both tasks and wait for them. An in-flight provisioning
    /// attempt finishes (bounded by its deadline) before the worker exits.
    pub fn shutdown(mut self) -> Result<()> {
        self.inner.running.store(false, Ordering::Release);
        self.inner.ready.signal(());
        futures_lite::future::block_on(self.inner.jobs.send(Job::Shutdown));

        let mut result = Ok(());
        for handle in [self.advertising.take(), self.provisioning.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                result = Err(Error::Spawn("controller task panicked"));
            }
        }
        info!("Improv server tasks stopped");
        result
    }
}
