//! # Worker construction seam.
//!
//! How isolated units are detected and created is environment business, so it
//! lives behind the [`Spawn`] trait:
//!
//! - [`Spawn::supports_isolation`] — the capability probe. `false` routes
//!   every task through the in-process backend.
//! - [`Spawn::spawn`] — builds one isolated unit from a [`Bootstrap`] and
//!   returns a [`SpawnedWorker`]: an opaque send/terminate handle plus the
//!   worker's outbound signal stream.
//!
//! Two implementations ship with the crate:
//! - [`OsThreadSpawner`] — a dedicated OS thread per worker, message passing
//!   only, no shared state with the creator. The default.
//! - [`InProcessSpawner`] — reports no isolation support, forcing the
//!   in-process deferred backend (useful for constrained targets and tests).
//!
//! ## Signal stream
//! A worker's only way to reach its creator is the signal stream:
//! [`WorkerSignal::Message`] carries protocol envelopes (FIFO, send order
//! preserved); [`WorkerSignal::Fault`] reports a boundary-level failure that
//! escaped the bootstrap entirely, after which no further signals follow.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::bootstrap;
use crate::error::SpawnError;
use crate::events::panic_message;
use crate::programs::ProgramRegistry;
use crate::protocol::Envelope;

/// Outbound traffic from a worker to its creator.
#[derive(Debug)]
pub enum WorkerSignal {
    /// A protocol envelope (readiness, task events, results).
    Message(Envelope),
    /// A failure that escaped the bootstrap's own handling; the worker is
    /// unusable and must be discarded.
    Fault(String),
}

/// Sending half of a worker's outbound stream.
pub type SignalSender = mpsc::UnboundedSender<WorkerSignal>;

/// Receiving half of a worker's outbound stream.
pub type SignalReceiver = mpsc::UnboundedReceiver<WorkerSignal>;

/// Everything a fresh worker needs to boot: the registry its `source`
/// envelopes resolve against.
pub struct Bootstrap {
    pub(crate) registry: Arc<ProgramRegistry>,
}

impl Bootstrap {
    /// Bundles the bootstrap inputs for one worker.
    pub fn new(registry: Arc<ProgramRegistry>) -> Self {
        Self { registry }
    }
}

/// Opaque handle to a live worker: send envelopes in, terminate.
#[derive(Clone)]
pub struct WorkerHandle {
    inbound: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
}

impl WorkerHandle {
    /// Builds a handle from a worker's inbound channel and termination token.
    ///
    /// Custom [`Spawn`] implementations use this to describe their unit;
    /// the unit is expected to stop promptly once `cancel` fires.
    pub fn new(inbound: mpsc::UnboundedSender<Envelope>, cancel: CancellationToken) -> Self {
        Self { inbound, cancel }
    }

    /// Delivers an envelope to the worker. Returns `false` if the worker is
    /// gone; envelopes are delivered in send order otherwise.
    pub fn send(&self, envelope: Envelope) -> bool {
        self.inbound.send(envelope).is_ok()
    }

    /// Requests unconditional termination. Takes effect at the worker's next
    /// scheduling point; in-flight synchronous work is not preempted.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("terminated", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A freshly constructed worker: its handle and its outbound signal stream.
pub struct SpawnedWorker {
    /// Send/terminate handle.
    pub handle: WorkerHandle,
    /// Outbound signals; the receiver is consumed by the pool's pump.
    pub signals: SignalReceiver,
}

/// # Environment seam for isolated-unit construction.
pub trait Spawn: Send + Sync + 'static {
    /// Whether this environment can provide real isolated units.
    fn supports_isolation(&self) -> bool;

    /// Builds one isolated unit running the bootstrap loop.
    fn spawn(&self, bootstrap: Bootstrap) -> Result<SpawnedWorker, SpawnError>;
}

/// Default spawner: one dedicated OS thread per worker.
///
/// Each worker thread runs a current-thread async runtime hosting the
/// bootstrap loop; the only connection to the creator is a pair of channels.
pub struct OsThreadSpawner {
    stack_size: Option<usize>,
    counter: AtomicU64,
}

impl OsThreadSpawner {
    /// Creates a spawner using the platform default stack size.
    pub fn new() -> Self {
        Self::with_stack_size(None)
    }

    /// Creates a spawner with an explicit worker stack size.
    pub fn with_stack_size(stack_size: Option<usize>) -> Self {
        Self {
            stack_size,
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for OsThreadSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl Spawn for OsThreadSpawner {
    fn supports_isolation(&self) -> bool {
        true
    }

    fn spawn(&self, bootstrap: Bootstrap) -> Result<SpawnedWorker, SpawnError> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Envelope>();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<WorkerSignal>();
        let cancel = CancellationToken::new();

        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut builder = std::thread::Builder::new().name(format!("offthread-worker-{seq}"));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let fault_tx = signal_tx.clone();
        let token = cancel.clone();
        builder.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                bootstrap::run(bootstrap, inbound_rx, signal_tx, token)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(description)) => {
                    let _ = fault_tx.send(WorkerSignal::Fault(description));
                }
                Err(panic) => {
                    let _ = fault_tx.send(WorkerSignal::Fault(panic_message(panic.as_ref())));
                }
            }
        })?;

        Ok(SpawnedWorker {
            handle: WorkerHandle {
                inbound: inbound_tx,
                cancel,
            },
            signals: signal_rx,
        })
    }
}

/// Spawner for environments without isolation support.
///
/// `supports_isolation()` is `false`, so a runtime built over this spawner
/// executes every task on the caller's async scheduler instead. Asking it for
/// a worker directly yields [`SpawnError::Unsupported`].
#[derive(Debug, Default)]
pub struct InProcessSpawner;

impl Spawn for InProcessSpawner {
    fn supports_isolation(&self) -> bool {
        false
    }

    fn spawn(&self, _bootstrap: Bootstrap) -> Result<SpawnedWorker, SpawnError> {
        Err(SpawnError::Unsupported)
    }
}
