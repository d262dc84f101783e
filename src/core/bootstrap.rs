//! # Bootstrap loop: what runs inside every isolated worker.
//!
//! One bootstrap per worker, for the worker's whole life. It is the only code
//! on the far side of the boundary that is not a task program.
//!
//! ## Responsibilities
//! - Announce `worker_ready` exactly once, before accepting any input.
//! - On a `source` envelope: create a fresh boundary [`Context`] bound to the
//!   envelope's id, resolve `src` against the bootstrapped
//!   [`ProgramRegistry`](crate::ProgramRegistry), and run the program.
//!   Synchronous failures (error return, contained panic, unresolved name)
//!   emit `error` and nothing else — no `done` follows. An immediate value
//!   emits `done` right away; a pending outcome is awaited on the worker's
//!   local scheduler and emits `done`/`error` when it settles, while other
//!   envelopes keep flowing.
//! - On any other envelope: look up the context by id and re-emit the event
//!   on its inbound channel; a missing registration is reported as an `error`
//!   envelope for that id.
//!
//! ## Flow
//! ```text
//! spawn ──► worker_ready ──► loop {
//!     source{id, src, args} ─► Context(id) ─► registry.resolve(src)
//!         ├─ unresolved      ─► error{id}
//!         ├─ sync failure    ─► error{id}
//!         ├─ immediate value ─► done{id, value}
//!         └─ pending         ─► spawn_local ─► done{id}/error{id} on settle
//!     other{id, type, args} ─► contexts[id].channel.emit(type, args)
//!         └─ no context      ─► error{id}
//! } until terminated / channel severed
//! ```
//!
//! Errors never leave this loop as panics; anything that does escape is a
//! boundary fault handled by the spawner's outer guard.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;

use super::spawn::{Bootstrap, SignalSender, WorkerSignal};
use crate::context::Context;
use crate::events::panic_message;
use crate::programs::{self, Invocation};
use crate::protocol::{Envelope, EnvelopeKind, TaskId};

/// Entry point for the worker thread: builds the local runtime and serves
/// envelopes until termination. A `Err` return is a boundary fault.
pub(crate) fn run(
    bootstrap: Bootstrap,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    signals: SignalSender,
    cancel: CancellationToken,
) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| format!("worker runtime construction failed: {err}"))?;

    let local = LocalSet::new();
    local.block_on(&runtime, serve(bootstrap, inbound, signals, cancel));
    Ok(())
}

async fn serve(
    bootstrap: Bootstrap,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    signals: SignalSender,
    cancel: CancellationToken,
) {
    let contexts: Rc<RefCell<HashMap<TaskId, Context>>> = Rc::new(RefCell::new(HashMap::new()));

    // Readiness handshake; the creator queues outbound envelopes until this
    // arrives. If the creator is already gone there is nothing to serve.
    if signals.send(WorkerSignal::Message(Envelope::ready())).is_err() {
        return;
    }

    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            received = inbound.recv() => match received {
                Some(envelope) => envelope,
                None => break,
            },
        };

        match envelope.classify() {
            EnvelopeKind::Source => {
                let Some(id) = envelope.id else {
                    tracing::warn!(target: "offthread::worker", "source envelope without id dropped");
                    continue;
                };
                let context = Context::boundary(id, signals.clone());
                contexts.borrow_mut().insert(id, context.clone());

                let name = envelope.src.unwrap_or_default();
                let Some(program) = bootstrap.registry.resolve(&name) else {
                    context.complete(Err(format!("program {name:?} is not registered")));
                    contexts.borrow_mut().remove(&id);
                    continue;
                };

                match programs::invoke(&program, &context, envelope.args) {
                    Invocation::Done(value) => {
                        context.complete(Ok(value));
                        contexts.borrow_mut().remove(&id);
                    }
                    Invocation::Failed(description) => {
                        context.complete(Err(description));
                        contexts.borrow_mut().remove(&id);
                    }
                    Invocation::Pending(fut) => {
                        let contexts = Rc::clone(&contexts);
                        tokio::task::spawn_local(async move {
                            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                                Ok(settled) => settled.map_err(|err| err.as_message()),
                                Err(panic) => Err(panic_message(panic.as_ref())),
                            };
                            context.complete(result);
                            contexts.borrow_mut().remove(&id);
                        });
                    }
                }
            }

            // The creator never sends these inward; ignore rather than guess.
            EnvelopeKind::Ready => {}

            _ => {
                let Some(id) = envelope.id else {
                    tracing::warn!(target: "offthread::worker", kind = %envelope.kind, "envelope without id dropped");
                    continue;
                };
                let context = contexts.borrow().get(&id).cloned();
                match context {
                    // The channel isolates listener panics itself.
                    Some(context) => context.channel().emit(&envelope.kind, &envelope.args),
                    None => {
                        let description =
                            format!("no live task {id} for event {:?}", envelope.kind);
                        let _ = signals
                            .send(WorkerSignal::Message(Envelope::error(id, description)));
                    }
                }
            }
        }
    }
}
