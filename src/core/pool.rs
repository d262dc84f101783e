//! # Worker pool: reuse, readiness queuing, and demultiplexing.
//!
//! The [`Pool`] owns every worker on the creator side. One signal pump task
//! per worker consumes the worker's outbound stream and routes each envelope
//! by task id to the registered thread's channel.
//!
//! ## Rules
//! - **Reuse**: `acquire` pops the *oldest* idle worker; only `done` puts a
//!   worker back. A worker is never handed out while a task is live on it.
//! - **Readiness**: a fresh worker starts not-ready; outbound envelopes are
//!   queued and flushed FIFO when `worker_ready` arrives.
//! - **Demultiplexing**: every non-ready envelope must carry an id that maps
//!   to a live registration; unresolvable envelopes are dropped with a
//!   diagnostic.
//! - **Special cases** (after the task-channel emit): `done` releases the
//!   worker; `error` retires it (terminated, never re-pooled); `log` goes to
//!   the diagnostic sink.
//! - **Faults**: a [`WorkerSignal::Fault`] — or the stream severing while the
//!   worker was live — terminates the worker, removes it from rotation, and
//!   emits `error` to every still-registered task, located strictly by id.
//!
//! Idle-list and per-worker state are mutex-guarded: pumps run as independent
//! tasks and `acquire`/`release` run from caller context, so handler
//! non-interleaving is never assumed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::spawn::{Bootstrap, SignalReceiver, Spawn, WorkerHandle, WorkerSignal};
use crate::error::SpawnError;
use crate::events::EventChannel;
use crate::programs::ProgramRegistry;
use crate::protocol::{Envelope, EnvelopeKind, TaskId, TYPE_ERROR};

/// One worker as the creator sees it.
pub(crate) struct WorkerSlot {
    seq: u64,
    handle: WorkerHandle,
    state: Mutex<SlotState>,
}

struct SlotState {
    /// Readiness handshake observed; queued envelopes flushed.
    ready: bool,
    /// Outbound envelopes held back until readiness.
    queue: VecDeque<Envelope>,
    /// Live task registrations: id → the owning thread's channel.
    tasks: HashMap<TaskId, Arc<EventChannel>>,
    /// Currently sitting in the idle list.
    pooled: bool,
    /// Terminated; never reused, sends are dropped.
    terminated: bool,
}

impl WorkerSlot {
    fn new(seq: u64, handle: WorkerHandle) -> Arc<Self> {
        Arc::new(Self {
            seq,
            handle,
            state: Mutex::new(SlotState {
                ready: false,
                queue: VecDeque::new(),
                tasks: HashMap::new(),
                pooled: false,
                terminated: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends an envelope, queuing it if the worker is not ready yet.
    /// Envelopes to a terminated worker are dropped.
    ///
    /// The slot lock is held across the channel push: the readiness flush
    /// does the same, so an envelope sent here can never slip in ahead of
    /// queued predecessors. The push is a non-blocking unbounded-mpsc send.
    pub(crate) fn send(&self, envelope: Envelope) {
        let mut st = self.lock();
        if st.terminated {
            tracing::debug!(target: "offthread::pool", worker = self.seq, kind = %envelope.kind, "dropping envelope for terminated worker");
            return;
        }
        if st.ready {
            let _ = self.handle.send(envelope);
        } else {
            st.queue.push_back(envelope);
        }
    }

    /// Registers a task on this worker.
    pub(crate) fn register(&self, id: TaskId, channel: Arc<EventChannel>) {
        self.lock().tasks.insert(id, channel);
    }

    fn unregister(&self, id: TaskId) {
        self.lock().tasks.remove(&id);
    }

    fn lookup(&self, id: TaskId) -> Option<Arc<EventChannel>> {
        self.lock().tasks.get(&id).cloned()
    }

    /// Marks the worker ready and flushes the held-back queue in FIFO order.
    ///
    /// The flag flip and the flush happen under one lock acquisition; a
    /// sender observing `ready == true` is therefore ordered after the whole
    /// flush, preserving per-connection FIFO.
    fn mark_ready(&self) {
        let mut st = self.lock();
        st.ready = true;
        for envelope in st.queue.drain(..) {
            let _ = self.handle.send(envelope);
        }
    }

    fn terminate(&self) {
        self.lock().terminated = true;
        self.handle.terminate();
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.lock().terminated
    }
}

impl std::fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("WorkerSlot")
            .field("seq", &self.seq)
            .field("ready", &st.ready)
            .field("tasks", &st.tasks.len())
            .field("pooled", &st.pooled)
            .field("terminated", &st.terminated)
            .finish()
    }
}

/// Creator-side owner of all workers.
pub(crate) struct Pool {
    idle: Mutex<VecDeque<Arc<WorkerSlot>>>,
    spawner: Arc<dyn Spawn>,
    registry: Arc<ProgramRegistry>,
    max_idle: usize,
    spawned: AtomicU64,
}

impl Pool {
    pub(crate) fn new(
        spawner: Arc<dyn Spawn>,
        registry: Arc<ProgramRegistry>,
        max_idle: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(VecDeque::new()),
            spawner,
            registry,
            max_idle,
            spawned: AtomicU64::new(0),
        })
    }

    fn idle_lock(&self) -> MutexGuard<'_, VecDeque<Arc<WorkerSlot>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total workers ever spawned by this pool.
    pub(crate) fn spawned_count(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Workers currently idle and available for reuse.
    pub(crate) fn idle_count(&self) -> usize {
        self.idle_lock().len()
    }

    /// Hands out the oldest idle worker, or spawns a fresh one.
    ///
    /// A fresh worker starts not-ready; its pump is registered here and runs
    /// for the worker's whole life.
    pub(crate) fn acquire(self: &Arc<Self>) -> Result<Arc<WorkerSlot>, SpawnError> {
        if let Some(slot) = self.idle_lock().pop_front() {
            slot.lock().pooled = false;
            return Ok(slot);
        }

        let spawned = self
            .spawner
            .spawn(Bootstrap::new(Arc::clone(&self.registry)))?;
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        let slot = WorkerSlot::new(seq, spawned.handle);
        tokio::spawn(pump(Arc::clone(self), Arc::clone(&slot), spawned.signals));
        Ok(slot)
    }

    /// Returns a worker to the idle list after a clean completion.
    ///
    /// Terminated workers and workers over the idle cap are dropped instead
    /// (the latter terminated, mirroring an explicit discard).
    fn release(&self, slot: &Arc<WorkerSlot>) {
        {
            let mut st = slot.lock();
            if st.terminated || st.pooled {
                return;
            }
            st.pooled = true;
        }

        let mut idle = self.idle_lock();
        if idle.len() >= self.max_idle {
            drop(idle);
            slot.lock().pooled = false;
            slot.terminate();
            tracing::debug!(target: "offthread::pool", worker = slot.seq, "idle list full; worker terminated");
            return;
        }
        idle.push_back(Arc::clone(slot));
    }

    /// Removes a worker from rotation unconditionally (kill path, retire on
    /// task-level error). Safe to call for workers that were never pooled.
    pub(crate) fn discard(&self, slot: &Arc<WorkerSlot>) {
        self.idle_lock().retain(|w| !Arc::ptr_eq(w, slot));
        slot.terminate();
    }

    /// Boundary-level failure: terminate the worker and surface the failure
    /// as `error` on every task still registered on it, located by id.
    fn fault(&self, slot: &Arc<WorkerSlot>, description: &str) {
        tracing::error!(target: "offthread::pool", worker = slot.seq, %description, "worker fault");

        let registered: Vec<(TaskId, Arc<EventChannel>)> = {
            let mut st = slot.lock();
            st.terminated = true;
            st.tasks.drain().collect()
        };
        self.idle_lock().retain(|w| !Arc::ptr_eq(w, slot));
        slot.handle.terminate();

        let args = [Value::String(description.to_string())];
        for (id, channel) in registered {
            tracing::debug!(target: "offthread::pool", %id, "reporting worker fault to task");
            channel.emit(TYPE_ERROR, &args);
        }
    }

    /// Routes one envelope from a worker to its destination.
    fn dispatch(&self, slot: &Arc<WorkerSlot>, envelope: Envelope) {
        let kind = envelope.classify();
        if kind == EnvelopeKind::Ready {
            slot.mark_ready();
            return;
        }

        let Some(id) = envelope.id else {
            tracing::warn!(target: "offthread::pool", worker = slot.seq, kind = %envelope.kind, "envelope without id dropped");
            return;
        };
        let Some(channel) = slot.lookup(id) else {
            tracing::warn!(target: "offthread::pool", worker = slot.seq, %id, kind = %envelope.kind, "no live task registration for envelope");
            return;
        };

        // The task's listeners see the event first; bookkeeping follows.
        channel.emit(&envelope.kind, &envelope.args);

        match kind {
            EnvelopeKind::Done => {
                slot.unregister(id);
                self.release(slot);
            }
            EnvelopeKind::Error => {
                tracing::error!(target: "offthread::task", %id, args = ?envelope.args, "task error");
                slot.unregister(id);
                // Conservative: state inside the worker may be wedged.
                self.discard(slot);
            }
            EnvelopeKind::Log => {
                tracing::info!(target: "offthread::task", %id, args = ?envelope.args);
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle_count())
            .field("spawned", &self.spawned_count())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// Per-worker signal pump: the single inbound handler for one worker.
async fn pump(pool: Arc<Pool>, slot: Arc<WorkerSlot>, mut signals: SignalReceiver) {
    while let Some(signal) = signals.recv().await {
        match signal {
            WorkerSignal::Message(envelope) => pool.dispatch(&slot, envelope),
            WorkerSignal::Fault(description) => {
                pool.fault(&slot, &description);
                return;
            }
        }
    }
    // Stream severed without a fault signal: clean only if we terminated it.
    if !slot.is_terminated() {
        pool.fault(&slot, "worker exited unexpectedly");
    }
}
