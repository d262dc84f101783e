//! # Execution context: the identity and event surface of a running task.
//!
//! A [`Context`] is created when a task body begins executing and handed to
//! the program as its first argument. It carries the task's identity, an
//! inbound channel for events sent *into* the program, and an outbound route
//! for events the program emits *out* to its creator.
//!
//! Two variants share one type:
//! - **forwarding** (in-process backend): `emit` is a direct synchronous call
//!   into the parent thread's channel; `log` writes to the diagnostic sink.
//! - **boundary** (isolated backend): `emit` serializes into an [`Envelope`]
//!   on the worker's outbound stream; `log` becomes `emit("log", ...)`.
//!
//! Directionality note: `ctx.emit("foo", ...)` fires listeners *outside* the
//! task (`thread.on("foo", ...)`), never the program's own
//! `ctx.on("foo", ...)` listeners. The inbound channel is fed exclusively by
//! the creator's `thread.emit(...)`.

use std::sync::Arc;

use serde_json::Value;

use crate::core::spawn::{SignalSender, WorkerSignal};
use crate::events::{EventChannel, ListenerId};
use crate::protocol::{Envelope, TaskId, TYPE_DONE, TYPE_ERROR, TYPE_LOG};

/// Identity + event surface handed to a running program. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: TaskId,
    /// Inbound events (demultiplexed by id, or forwarded from the thread).
    channel: Arc<EventChannel>,
    route: Route,
}

enum Route {
    /// In-process: emits go straight into the parent thread's channel.
    Forward(Arc<EventChannel>),
    /// Isolated: emits are serialized into envelopes on the worker's
    /// outbound stream.
    Boundary(SignalSender),
}

impl Context {
    pub(crate) fn forwarding(id: TaskId, parent: Arc<EventChannel>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                channel: Arc::new(EventChannel::new()),
                route: Route::Forward(parent),
            }),
        }
    }

    pub(crate) fn boundary(id: TaskId, outbound: SignalSender) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                channel: Arc::new(EventChannel::new()),
                route: Route::Boundary(outbound),
            }),
        }
    }

    /// This task's identity.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The context's inbound channel (events sent into the program).
    pub(crate) fn channel(&self) -> &Arc<EventChannel> {
        &self.inner.channel
    }

    /// Listens for an event dispatched from the creator thread.
    pub fn on<F>(&self, kind: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.channel.on(kind, listener)
    }

    /// Listens for the next occurrence of an event from the creator thread.
    pub fn once<F>(&self, kind: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.channel.once(kind, listener)
    }

    /// Stops a single listener registered with [`on`](Self::on)/[`once`](Self::once).
    pub fn off(&self, kind: &str, id: ListenerId) -> bool {
        self.inner.channel.off(kind, id)
    }

    /// Removes every listener for `kind`.
    pub fn off_all(&self, kind: &str) {
        self.inner.channel.off_all(kind)
    }

    /// Future resolving with the arguments of the next `kind` event sent into
    /// the program.
    pub fn next_event(
        &self,
        kind: &str,
    ) -> impl std::future::Future<Output = Vec<Value>> + Send + 'static {
        self.inner.channel.next_event(kind)
    }

    /// Fires an event on the creator thread, forwarding `args` to its
    /// listeners.
    pub fn emit(&self, kind: &str, args: Vec<Value>) {
        match &self.inner.route {
            Route::Forward(parent) => parent.emit(kind, &args),
            Route::Boundary(outbound) => {
                let env = Envelope::event(self.inner.id, kind, args);
                let _ = outbound.send(WorkerSignal::Message(env));
            }
        }
    }

    /// Diagnostic passthrough: forwarded as a `log` envelope on the isolated
    /// backend, written to the diagnostic sink directly in-process.
    pub fn log(&self, args: Vec<Value>) {
        match &self.inner.route {
            Route::Forward(_) => {
                tracing::info!(target: "offthread::task", id = %self.inner.id, args = ?args)
            }
            Route::Boundary(_) => self.emit(TYPE_LOG, args),
        }
    }

    /// Emits the task's terminal event: `done` with the value, or `error`
    /// with the failure description.
    pub(crate) fn complete(&self, result: Result<Value, String>) {
        match result {
            Ok(value) => self.emit(TYPE_DONE, vec![value]),
            Err(description) => self.emit(TYPE_ERROR, vec![Value::String(description)]),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self.inner.route {
            Route::Forward(_) => "forwarding",
            Route::Boundary(_) => "boundary",
        };
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("variant", &variant)
            .finish()
    }
}
