//! # Thread: the caller-side handle to one task.
//!
//! A [`Thread`] is created by [`Threads::start`](crate::Threads::start) and is
//! never reused: one task, one identity, one lifetime.
//!
//! ## Event surface
//! - `on`/`once`/`off` observe events coming *from* the task (`done`,
//!   `error`, `log`, and custom events the program emits).
//! - `emit` sends an event *into* the running program; it fires the
//!   program's `ctx.on(...)` listeners, never the thread's own.
//! - `join` awaits the terminal event. Terminal state is recorded from
//!   internal listeners wired before the task is dispatched, so `join` never
//!   misses a result and can be awaited after completion.
//!
//! ## State machine
//! created → (queued | dispatched) → running → {done, error} (terminal)
//! │ killed (terminal, reachable from any non-terminal state).
//!
//! `kill` terminates the underlying worker unconditionally and removes it
//! from rotation; on the in-process backend it is a no-op (there is nothing
//! to interrupt — the task still runs to completion).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::context::Context;
use crate::core::pool::{Pool, WorkerSlot};
use crate::error::TaskError;
use crate::events::{EventChannel, ListenerId};
use crate::protocol::{Envelope, TaskId, TYPE_DONE, TYPE_ERROR};

/// Recorded terminal state of a task.
pub(crate) type Terminal = Option<Result<Value, TaskError>>;

/// How a thread reaches its running program.
pub(crate) enum Binding {
    /// Isolated backend: events are serialized to the bound worker.
    Worker {
        pool: Arc<Pool>,
        slot: Arc<WorkerSlot>,
    },
    /// In-process backend: events go straight to the task's context channel.
    Local { context: Context },
}

/// Caller-side handle to one running (or finished) task. Cheap to clone.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    id: TaskId,
    channel: Arc<EventChannel>,
    binding: Binding,
    terminal_tx: watch::Sender<Terminal>,
    terminal_rx: watch::Receiver<Terminal>,
}

impl Thread {
    pub(crate) fn from_parts(
        id: TaskId,
        channel: Arc<EventChannel>,
        binding: Binding,
        terminal_tx: watch::Sender<Terminal>,
        terminal_rx: watch::Receiver<Terminal>,
    ) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id,
                channel,
                binding,
                terminal_tx,
                terminal_rx,
            }),
        }
    }

    /// This task's identity.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Listens for an event dispatched from the task.
    pub fn on<F>(&self, kind: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.channel.on(kind, listener)
    }

    /// Listens for the next occurrence of an event from the task.
    pub fn once<F>(&self, kind: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.channel.once(kind, listener)
    }

    /// Stops a single listener.
    pub fn off(&self, kind: &str, id: ListenerId) -> bool {
        self.inner.channel.off(kind, id)
    }

    /// Removes every listener for `kind`.
    pub fn off_all(&self, kind: &str) {
        self.inner.channel.off_all(kind)
    }

    /// Future resolving with the arguments of the next `kind` event from the
    /// task.
    pub fn next_event(
        &self,
        kind: &str,
    ) -> impl std::future::Future<Output = Vec<Value>> + Send + 'static {
        self.inner.channel.next_event(kind)
    }

    /// Fires an event *inside* the running program, forwarding `args` to its
    /// `ctx.on(...)` listeners.
    ///
    /// On the isolated backend the event is queued if the worker has not
    /// completed its readiness handshake yet, preserving send order.
    pub fn emit(&self, kind: &str, args: Vec<Value>) {
        match &self.inner.binding {
            Binding::Worker { slot, .. } => {
                slot.send(Envelope::event(self.inner.id, kind, args));
            }
            Binding::Local { context } => context.channel().emit(kind, &args),
        }
    }

    /// Kills the task by terminating its worker; the worker never returns to
    /// the pool. No-op on the in-process backend.
    ///
    /// Termination is all-or-nothing: no cancellation signal is delivered
    /// into the boundary, and a synchronous section already in flight is not
    /// preempted.
    pub fn kill(&self) {
        match &self.inner.binding {
            Binding::Worker { pool, slot } => {
                pool.discard(slot);
                self.inner.terminal_tx.send_if_modified(|terminal| {
                    if terminal.is_none() {
                        *terminal = Some(Err(TaskError::Killed));
                        true
                    } else {
                        false
                    }
                });
            }
            Binding::Local { .. } => {}
        }
    }

    /// Whether a terminal event has been observed.
    pub fn is_finished(&self) -> bool {
        self.inner.terminal_rx.borrow().is_some()
    }

    /// The recorded terminal state, if any.
    pub fn result(&self) -> Option<Result<Value, TaskError>> {
        self.inner.terminal_rx.borrow().clone()
    }

    /// Awaits the task's terminal event: the `done` value or the `error`
    /// failure. Resolves immediately if the task already finished.
    pub async fn join(&self) -> Result<Value, TaskError> {
        let mut rx = self.inner.terminal_rx.clone();
        let terminal = rx
            .wait_for(|terminal| terminal.is_some())
            .await
            .map_err(|_| TaskError::Killed)?;
        terminal.clone().unwrap_or(Err(TaskError::Killed))
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.inner.binding {
            Binding::Worker { .. } => "worker",
            Binding::Local { .. } => "local",
        };
        f.debug_struct("Thread")
            .field("id", &self.inner.id)
            .field("backend", &backend)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Registers the internal `done`/`error` listeners that record terminal
/// state. Must run before the task is dispatched so no result can be missed.
pub(crate) fn wire_terminal(
    channel: &EventChannel,
) -> (watch::Sender<Terminal>, watch::Receiver<Terminal>) {
    let (tx, rx) = watch::channel(None);

    let done_tx = tx.clone();
    channel.once(TYPE_DONE, move |args| {
        let value = args.first().cloned().unwrap_or(Value::Null);
        done_tx.send_if_modified(|terminal| {
            if terminal.is_none() {
                *terminal = Some(Ok(value.clone()));
                true
            } else {
                false
            }
        });
    });

    let error_tx = tx.clone();
    channel.once(TYPE_ERROR, move |args| {
        let description = args.first().map(describe).unwrap_or_default();
        error_tx.send_if_modified(|terminal| {
            if terminal.is_none() {
                *terminal = Some(Err(TaskError::Failed {
                    error: description.clone(),
                }));
                true
            } else {
                false
            }
        });
    });

    (tx, rx)
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
