//! # Threads runtime: program registry, worker pool, backend selection.
//!
//! One [`Threads`] value is the entry point of the crate. At construction it
//! probes its spawner: if the environment supports isolation, tasks are
//! dispatched to pooled workers over the envelope protocol; otherwise every
//! task runs in-process on the caller's async scheduler, deferred by one
//! scheduling point so `start` stays non-blocking either way.
//!
//! ## Start sequence (isolated backend)
//! 1. fresh task id + event channel, terminal listeners wired;
//! 2. worker acquired (oldest idle, or freshly spawned);
//! 3. task registered on the worker for demultiplexing;
//! 4. `source` envelope sent (queued until the readiness handshake).
//!
//! The terminal listeners are wired before any dispatch, so a result emitted
//! from another scheduler thread can never be missed.

use std::sync::Arc;

use futures::FutureExt;

use crate::config::Config;
use crate::context::Context;
use crate::core::pool::Pool;
use crate::core::spawn::{OsThreadSpawner, Spawn};
use crate::error::{StartError, TaskError};
use crate::events::{EventChannel, panic_message};
use crate::programs::{Args, Invocation, Outcome, ProgramFn, ProgramRegistry, TaskProgram, invoke};
use crate::protocol::{Envelope, TaskId};
use crate::threads::thread::{Binding, Thread, wire_terminal};

/// Task runtime: owns the program registry and the worker pool, and decides
/// the execution backend once at construction.
///
/// Cheap to clone; clones share the registry and the pool.
///
/// # Example
/// ```no_run
/// use offthread::{Outcome, Threads};
///
/// # async fn demo() -> Result<(), offthread::StartError> {
/// let threads = Threads::default();
/// threads.register("double", |_ctx, args| {
///     let n = args[0].as_i64().unwrap_or(0);
///     Ok(Outcome::value(n * 2))
/// });
///
/// let thread = threads.start("double", vec![21.into()])?;
/// let value = thread.join().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Threads {
    registry: Arc<ProgramRegistry>,
    pool: Arc<Pool>,
    isolated: bool,
}

impl Threads {
    /// Builds a runtime over the default OS-thread spawner.
    pub fn new(cfg: Config) -> Self {
        let stack_size = cfg.stack_size;
        Self::with_spawner(cfg, Arc::new(OsThreadSpawner::with_stack_size(stack_size)))
    }

    /// Builds a runtime over an explicit spawner.
    ///
    /// The spawner's [`supports_isolation`](Spawn::supports_isolation) answer
    /// is taken once, here: `false` routes every task through the in-process
    /// backend for the runtime's whole life.
    pub fn with_spawner(cfg: Config, spawner: Arc<dyn Spawn>) -> Self {
        let isolated = spawner.supports_isolation();
        if !isolated {
            tracing::info!(target: "offthread", "isolation unavailable; tasks will run in-process");
        }
        let registry = Arc::new(ProgramRegistry::new());
        let pool = Pool::new(spawner, Arc::clone(&registry), cfg.max_idle);
        Self {
            registry,
            pool,
            isolated,
        }
    }

    /// Registers a program under `name`, making it startable by name on both
    /// backends. Re-registering a name replaces the previous program.
    pub fn register<F>(&self, name: impl Into<String>, program: F)
    where
        F: Fn(Context, Args) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        self.registry.register(name, program);
    }

    /// The shared program registry.
    pub fn registry(&self) -> &Arc<ProgramRegistry> {
        &self.registry
    }

    /// Whether tasks run on isolated workers (`false` = in-process backend).
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    /// Workers currently idle and available for reuse. Always 0 in-process.
    pub fn idle_workers(&self) -> usize {
        self.pool.idle_count()
    }

    /// Total workers spawned over this runtime's life. Always 0 in-process.
    pub fn spawned_workers(&self) -> u64 {
        self.pool.spawned_count()
    }

    /// Starts `program` with `args` on a fresh [`Thread`].
    ///
    /// Never blocks on the task body: on the isolated backend the body runs on
    /// a worker; in-process it is deferred past the current scheduling point.
    ///
    /// ### Errors
    /// - [`StartError::NotPortable`] — a closure-backed program on the
    ///   isolated backend;
    /// - [`StartError::Unresolved`] — an unregistered name, in-process (on
    ///   the isolated backend the same miss surfaces as a task-level `error`
    ///   event instead, since resolution happens inside the worker);
    /// - [`StartError::Spawn`] — the pool could not build a fresh worker.
    pub fn start<P: TaskProgram>(&self, program: P, args: Args) -> Result<Thread, StartError> {
        let id = TaskId::new();
        let channel = Arc::new(EventChannel::new());
        let (terminal_tx, terminal_rx) = wire_terminal(&channel);

        let binding = if self.isolated {
            let name = program.source().ok_or(StartError::NotPortable)?;
            let slot = self.pool.acquire()?;
            slot.register(id, Arc::clone(&channel));
            slot.send(Envelope::source(id, name, args));
            tracing::debug!(target: "offthread", %id, program = name, "task dispatched to worker");
            Binding::Worker {
                pool: Arc::clone(&self.pool),
                slot,
            }
        } else {
            let func = program.materialize(&self.registry)?;
            let context = Context::forwarding(id, Arc::clone(&channel));
            tokio::spawn(run_local(func, context.clone(), args));
            tracing::debug!(target: "offthread", %id, "task scheduled in-process");
            Binding::Local { context }
        };

        Ok(Thread::from_parts(
            id,
            channel,
            binding,
            terminal_tx,
            terminal_rx,
        ))
    }
}

impl Default for Threads {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for Threads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Threads")
            .field("isolated", &self.isolated)
            .field("idle_workers", &self.idle_workers())
            .field("spawned_workers", &self.spawned_workers())
            .finish()
    }
}

/// In-process task body: deferred one scheduling point, panics contained.
async fn run_local(func: ProgramFn, context: Context, args: Args) {
    // The caller gets its Thread back before any listener can fire.
    tokio::task::yield_now().await;

    match invoke(&func, &context, args) {
        Invocation::Done(value) => context.complete(Ok(value)),
        Invocation::Failed(description) => context.complete(Err(description)),
        Invocation::Pending(fut) => {
            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => context.complete(Ok(value)),
                Ok(Err(err)) => context.complete(Err(err.as_message())),
                Err(panic) => context.complete(Err(panic_message(panic.as_ref()))),
            }
        }
    }
}
