//! Provisioning state machine and worker.
//!
//! ```text
//!  Authorized ──(valid RPC)──► Provisioning ──(Wi-Fi ok)──► Provisioned
//!      ▲                           │                            │
//!      │                     (Wi-Fi fails:                 (settle delay,
//!      │                   error=UnableToConnect)           terminate link)
//!      └──────── connect / disconnect ◄─────────────────────────┘
//! ```
//!
//! [`ProvisioningMachine`] is pure and holds no locks; the controller keeps
//! it inside its shared state block. Accepted RPCs become a
//! [`ProvisionJob`] tagged with an [`Attempt`]. The worker runs the
//! provisioner with a deadline and feeds the outcome back through
//! [`ProvisioningMachine::complete`], which discards results from attempts
//! that are no longer current.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use log::{error, info, warn};

use crate::drivers::task_pin::{self, Core};
use crate::error::WifiError;
use crate::improv::codec::{DecodeError, RpcCodec, WifiCredentials};
use crate::improv::{ProvisioningError, ProvisioningState};
use crate::ports::{ConnHandle, HostStack, NO_CONNECTION, WifiProvisioner};
use crate::server::Inner;

// ─── Machine ──────────────────────────────────────────────────

/// One accepted RPC, identified by a monotonically increasing id and the
/// connection it arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub id: u32,
    pub conn: ConnHandle,
}

/// Work item handed to the provisioning worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionJob {
    pub attempt: Attempt,
    pub credentials: WifiCredentials,
}

/// Why an RPC write was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcRejection {
    NotConnected,
    Busy,
    Decode(DecodeError),
}

/// Result of applying a provisioner outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The attempt was superseded; nothing changed.
    Stale,
    Provisioned,
    Failed(WifiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProvisioningMachine {
    state: ProvisioningState,
    error: ProvisioningError,
    conn: ConnHandle,
    attempt: Option<Attempt>,
    /// Attempt that reached Provisioned and awaits its settle window.
    provisioned: Option<Attempt>,
    next_attempt: u32,
}

impl ProvisioningMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn error(&self) -> ProvisioningError {
        self.error
    }

    pub fn conn(&self) -> ConnHandle {
        self.conn
    }

    pub fn is_connected(&self) -> bool {
        self.conn != NO_CONNECTION
    }

    pub fn attempt(&self) -> Option<Attempt> {
        self.attempt
    }

    /// The attempt holding the Provisioned state, if any.
    pub fn provisioned_by(&self) -> Option<Attempt> {
        self.provisioned
            .filter(|_| self.state == ProvisioningState::Provisioned)
    }

    fn reset(&mut self) {
        self.state = ProvisioningState::Authorized;
        self.error = ProvisioningError::None;
        self.attempt = None;
        self.provisioned = None;
    }

    /// A peer connected; the dialog restarts from Authorized.
    pub fn on_connect(&mut self, conn: ConnHandle) {
        self.conn = conn;
        self.reset();
    }

    /// A connection attempt failed.
    pub fn on_connect_failed(&mut self) {
        self.conn = NO_CONNECTION;
        self.reset();
    }

    pub fn on_disconnect(&mut self) {
        self.conn = NO_CONNECTION;
        self.reset();
    }

    /// Decode an RPC write and, on success, move to Provisioning.
    ///
    /// Decoding is never attempted without a connection or while an
    /// attempt is outstanding. A decode failure sets `InvalidRpc` and
    /// leaves the state untouched.
    pub fn accept_rpc(
        &mut self,
        raw: &[u8],
        codec: &dyn RpcCodec,
    ) -> Result<ProvisionJob, RpcRejection> {
        if !self.is_connected() {
            return Err(RpcRejection::NotConnected);
        }
        if self.attempt.is_some() {
            return Err(RpcRejection::Busy);
        }
        let credentials = codec.decode(raw).map_err(|e| {
            self.error = ProvisioningError::InvalidRpc;
            RpcRejection::Decode(e)
        })?;

        let attempt = Attempt {
            id: self.next_attempt,
            conn: self.conn,
        };
        self.next_attempt = self.next_attempt.wrapping_add(1);
        self.attempt = Some(attempt);
        self.state = ProvisioningState::Provisioning;
        Ok(ProvisionJob {
            attempt,
            credentials,
        })
    }

    /// Apply a provisioner outcome for `attempt`.
    pub fn complete(&mut self, attempt: Attempt, outcome: Result<(), WifiError>) -> Completion {
        if self.attempt != Some(attempt) || self.conn != attempt.conn {
            return Completion::Stale;
        }
        self.attempt = None;
        match outcome {
            Ok(()) => {
                self.state = ProvisioningState::Provisioned;
                self.provisioned = Some(attempt);
                Completion::Provisioned
            }
            Err(e) => {
                self.error = ProvisioningError::UnableToConnect;
                Completion::Failed(e)
            }
        }
    }

    /// End of the settle window opened by `attempt`. Returns `false`
    /// and changes nothing if another attempt has since taken over.
    pub fn finish_settle(&mut self, attempt: Attempt) -> bool {
        if self.provisioned_by() != Some(attempt) {
            return false;
        }
        self.state = ProvisioningState::Authorized;
        self.provisioned = None;
        true
    }
}

// ─── Worker ───────────────────────────────────────────────────

/// Provisioning worker queue message.
#[derive(Debug)]
pub(crate) enum Job {
    Provision(ProvisionJob),
    Shutdown,
}

/// Stack for the thread that runs one provisioner call.
const PROVISIONER_STACK_KB: usize = 8;

/// Marks the provisioner helper thread as running until dropped.
struct HelperGuard(Arc<AtomicBool>);

impl HelperGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self(Arc::clone(flag)))
    }
}

impl Drop for HelperGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<H: HostStack> Inner<H> {
    /// Drain the job queue until a shutdown message arrives.
    pub(crate) fn run_worker(&self) {
        info!("Provisioning worker started");
        loop {
            match futures_lite::future::block_on(self.jobs.receive()) {
                Job::Provision(job) => self.run_job(job),
                Job::Shutdown => break,
            }
        }
        info!("Provisioning worker stopped");
    }

    /// Process one queued job on the calling thread, if any.
    pub(crate) fn run_pending_job(&self) -> bool {
        match self.jobs.try_receive() {
            Ok(Job::Provision(job)) => {
                self.run_job(job);
                true
            }
            Ok(Job::Shutdown) | Err(_) => false,
        }
    }

    fn run_job(&self, job: ProvisionJob) {
        let outcome = self.provision_with_deadline(&job.credentials);
        self.finish_attempt(job.attempt, outcome);
    }

    fn provision_with_deadline(&self, credentials: &WifiCredentials) -> Result<(), WifiError> {
        // At most one helper: a timed-out call may still be blocked in the driver.
        let Some(guard) = HelperGuard::acquire(&self.provisioner_busy) else {
            warn!("Provisioner still busy with a timed-out attempt");
            return Err(WifiError::Busy);
        };
        let (tx, rx) = mpsc::sync_channel(1);
        let provisioner: Arc<dyn WifiProvisioner> = Arc::clone(&self.provisioner);
        let credentials = credentials.clone();
        let spawned = task_pin::spawn_on_core(
            Core::Pro,
            5,
            PROVISIONER_STACK_KB,
            "improv-wifi\0",
            move || {
                let _guard = guard;
                let outcome = provisioner.provision(&credentials.ssid, &credentials.password);
                // Receiver is gone once the deadline has passed.
                let _ = tx.send(outcome);
            },
        );
        if let Err(e) = spawned {
            error!("Could not start provisioner thread: {}", e);
            return Err(WifiError::ConnectFailed);
        }

        let deadline = Duration::from_millis(u64::from(self.config.provision_timeout_ms));
        match rx.recv_timeout(deadline) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Provisioner exceeded {} ms deadline",
                    self.config.provision_timeout_ms
                );
                Err(WifiError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("Provisioner thread exited without a result");
                Err(WifiError::ConnectFailed)
            }
        }
    }

    fn finish_attempt(&self, attempt: Attempt, outcome: Result<(), WifiError>) {
        let mut shared = self.lock();
        let pending = match shared.machine.complete(attempt, outcome) {
            Completion::Stale => {
                warn!(
                    "Discarding result of attempt {} (conn {}): superseded",
                    attempt.id, attempt.conn
                );
                None
            }
            Completion::Provisioned => {
                info!("Wi-Fi provisioned (attempt {})", attempt.id);
                self.status_notification(&shared)
            }
            Completion::Failed(e) => {
                error!("Failed to provision Wi-Fi (attempt {}): {}", attempt.id, e);
                self.error_notification(&shared)
            }
        };
        self.send_notification(shared, pending);
    }
}
