//! # Ordered publish/subscribe channel.
//!
//! [`EventChannel`] maps event names to ordered listener lists and delivers
//! events synchronously, in registration order.
//!
//! ## Rules
//! - **Ordering**: listeners fire in registration order; listeners registered
//!   for the same event *during* an emit are picked up by that emit.
//! - **Once semantics**: a `once` listener is removed strictly after its
//!   single invocation, even if the invocation panics.
//! - **Panic isolation**: a panicking listener never prevents the remaining
//!   listeners from running; the panic is reported via `tracing` and does not
//!   propagate to the emitter.
//! - **Reentrancy**: listeners may call `on`/`once`/`off`/`off_all` on the
//!   channel they are being delivered from. The emit loop tracks the ids it
//!   has already invoked and always resumes at the first not-yet-invoked
//!   subscription, so in-place removal anywhere in the list never skips or
//!   double-fires a listener.
//!
//! The channel is internally synchronized (`std::sync::Mutex`); the lock is
//! never held across a listener invocation.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

/// Shared listener callback. Receives the emit arguments beyond the event name.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle identifying a single registered listener.
///
/// Returned by [`EventChannel::on`]/[`EventChannel::once`]; pass it to
/// [`EventChannel::off`] for targeted removal. Ids are unique per channel and
/// never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Subscription {
    id: ListenerId,
    listener: Listener,
    once: bool,
}

#[derive(Default)]
struct ChannelState {
    next_id: u64,
    events: HashMap<String, Vec<Subscription>>,
}

/// Named-event channel with registration-ordered synchronous delivery.
pub struct EventChannel {
    state: Mutex<ChannelState>,
}

impl EventChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // A poisoned lock here means a panic between lock and unlock inside
        // this module; state mutations are single-step, so recover the guard.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, kind: &str, listener: Listener, once: bool) -> ListenerId {
        let mut st = self.lock();
        st.next_id += 1;
        let id = ListenerId(st.next_id);
        st.events
            .entry(kind.to_string())
            .or_default()
            .push(Subscription { id, listener, once });
        id
    }

    /// Registers a persistent listener for `kind`.
    pub fn on<F>(&self, kind: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.add(kind, Arc::new(listener), false)
    }

    /// Registers a single-fire listener for `kind`.
    ///
    /// The listener is unregistered strictly after its first invocation, even
    /// if the invocation panics.
    pub fn once<F>(&self, kind: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.add(kind, Arc::new(listener), true)
    }

    /// Removes the listener identified by `id` from `kind`.
    ///
    /// Returns `true` if the listener was present. Other listeners for the
    /// same event are untouched.
    pub fn off(&self, kind: &str, id: ListenerId) -> bool {
        let mut st = self.lock();
        let Some(subs) = st.events.get_mut(kind) else {
            return false;
        };
        let Some(pos) = subs.iter().position(|s| s.id == id) else {
            return false;
        };
        subs.remove(pos);
        if subs.is_empty() {
            st.events.remove(kind);
        }
        true
    }

    /// Removes every listener registered for `kind`.
    pub fn off_all(&self, kind: &str) {
        self.lock().events.remove(kind);
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: &str) -> usize {
        self.lock().events.get(kind).map_or(0, Vec::len)
    }

    /// Synchronously delivers `args` to every current listener of `kind`,
    /// in registration order.
    ///
    /// The internal lock is released around each invocation, so listeners may
    /// freely mutate the channel. A panicking listener is contained: the
    /// panic is logged and delivery continues with the next listener.
    pub fn emit(&self, kind: &str, args: &[Value]) {
        // Positions are unreliable across invocations (a listener may remove
        // any mix of entries, itself included), so delivery is driven by the
        // set of ids already invoked: each round picks the first subscription
        // not in that set.
        let mut invoked: Vec<ListenerId> = Vec::new();
        loop {
            let (id, listener, once) = {
                let mut st = self.lock();
                let Some(subs) = st.events.get_mut(kind) else {
                    return;
                };
                let Some(sub) = subs.iter().find(|s| !invoked.contains(&s.id)) else {
                    return;
                };
                (sub.id, Arc::clone(&sub.listener), sub.once)
            };
            invoked.push(id);

            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(args))) {
                tracing::error!(
                    target: "offthread::events",
                    event = kind,
                    panic = %panic_message(panic.as_ref()),
                    "listener panicked during emit"
                );
            }

            // Once listeners leave strictly after firing, even on panic.
            if once {
                let mut st = self.lock();
                let Some(subs) = st.events.get_mut(kind) else {
                    return;
                };
                if let Some(pos) = subs.iter().position(|s| s.id == id) {
                    subs.remove(pos);
                }
                if subs.is_empty() {
                    st.events.remove(kind);
                    return;
                }
            }
        }
    }

    /// Returns a future resolving with the arguments of the next `kind` event.
    ///
    /// Registers a `once` listener internally. If the channel is dropped
    /// before the event fires, the future resolves with no arguments.
    pub fn next_event(&self, kind: &str) -> impl Future<Output = Vec<Value>> + Send + 'static {
        let (tx, rx) = oneshot::channel::<Vec<Value>>();
        let slot = Mutex::new(Some(tx));
        self.once(kind, move |args| {
            let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(tx) = taken {
                let _ = tx.send(args.to_vec());
            }
        });
        async move { rx.await.unwrap_or_default() }
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("EventChannel")
            .field("events", &st.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Renders a recovered panic payload as a human-readable string.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |tag: &str| -> Listener {
            let log = Arc::clone(&log2);
            let tag = tag.to_string();
            Arc::new(move |_args: &[Value]| {
                log.lock().unwrap().push(tag.clone());
            })
        };
        (log, make)
    }

    #[test]
    fn test_listeners_fire_in_registration_order_with_args() {
        let ch = EventChannel::new();
        let seen: Arc<Mutex<Vec<(String, Vec<Value>)>>> = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            let tag = tag.to_string();
            ch.on("ping", move |args| {
                seen.lock().unwrap().push((tag.clone(), args.to_vec()));
            });
        }

        ch.emit("ping", &[json!(1), json!("two")]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        let tags: Vec<&str> = seen.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, ["a", "b", "c"]);
        for (_, args) in seen.iter() {
            assert_eq!(args, &[json!(1), json!("two")]);
        }
    }

    #[test]
    fn test_once_fires_at_most_once() {
        let ch = EventChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        ch.once("tick", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        ch.emit("tick", &[]);
        ch.emit("tick", &[]);
        ch.emit("tick", &[]);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(ch.listener_count("tick"), 0);
    }

    #[test]
    fn test_off_removes_only_the_identified_listener() {
        let ch = EventChannel::new();
        let (log, make) = recorder();

        let _a = ch.on("ev", {
            let l = make("a");
            move |args| l(args)
        });
        let b = ch.on("ev", {
            let l = make("b");
            move |args| l(args)
        });
        let _c = ch.on("ev", {
            let l = make("c");
            move |args| l(args)
        });

        assert!(ch.off("ev", b));
        assert!(!ch.off("ev", b));
        ch.emit("ev", &[]);

        assert_eq!(*log.lock().unwrap(), ["a", "c"]);
    }

    #[test]
    fn test_off_all_clears_the_event() {
        let ch = EventChannel::new();
        let (log, make) = recorder();
        ch.on("ev", {
            let l = make("a");
            move |args| l(args)
        });
        ch.on("ev", {
            let l = make("b");
            move |args| l(args)
        });

        ch.off_all("ev");
        ch.emit("ev", &[]);

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(ch.listener_count("ev"), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_siblings() {
        let ch = EventChannel::new();
        let (log, make) = recorder();
        ch.on("ev", {
            let l = make("first");
            move |args| l(args)
        });
        ch.on("ev", |_| panic!("listener exploded"));
        ch.on("ev", {
            let l = make("last");
            move |args| l(args)
        });

        ch.emit("ev", &[]);

        assert_eq!(*log.lock().unwrap(), ["first", "last"]);
    }

    #[test]
    fn test_panicking_once_listener_is_still_removed() {
        let ch = EventChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        ch.once("ev", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        });

        ch.emit("ev", &[]);
        ch.emit("ev", &[]);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(ch.listener_count("ev"), 0);
    }

    #[test]
    fn test_listener_registered_during_emit_is_picked_up() {
        let ch = Arc::new(EventChannel::new());
        let (log, make) = recorder();

        let ch2 = Arc::clone(&ch);
        let late = make("late");
        ch.once("ev", move |_| {
            let l = late.clone();
            ch2.on("ev", move |args| l(args));
        });

        ch.emit("ev", &[]);
        assert_eq!(*log.lock().unwrap(), ["late"]);

        // Persistent listener stays for subsequent emits.
        ch.emit("ev", &[]);
        assert_eq!(*log.lock().unwrap(), ["late", "late"]);
    }

    #[test]
    fn test_self_removal_during_emit_does_not_skip_next() {
        let ch = Arc::new(EventChannel::new());
        let (log, make) = recorder();

        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let ch2 = Arc::clone(&ch);
        let slot2 = Arc::clone(&slot);
        let first = make("first");
        let id = ch.on("ev", move |args| {
            first(args);
            if let Some(id) = *slot2.lock().unwrap() {
                ch2.off("ev", id);
            }
        });
        *slot.lock().unwrap() = Some(id);
        ch.on("ev", {
            let l = make("second");
            move |args| l(args)
        });

        ch.emit("ev", &[]);

        assert_eq!(*log.lock().unwrap(), ["first", "second"]);
        assert_eq!(ch.listener_count("ev"), 1);
    }

    #[test]
    fn test_removing_an_earlier_listener_and_itself_does_not_skip_next() {
        let ch = Arc::new(EventChannel::new());
        let (log, make) = recorder();

        let a = ch.on("ev", {
            let l = make("a");
            move |args| l(args)
        });
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let ch2 = Arc::clone(&ch);
        let slot2 = Arc::clone(&slot);
        let second = make("b");
        let b = ch.on("ev", move |args| {
            second(args);
            // Shrinks the list by two entries, both at or before this one.
            ch2.off("ev", a);
            if let Some(own) = *slot2.lock().unwrap() {
                ch2.off("ev", own);
            }
        });
        *slot.lock().unwrap() = Some(b);
        ch.on("ev", {
            let l = make("c");
            move |args| l(args)
        });

        ch.emit("ev", &[]);

        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
        assert_eq!(ch.listener_count("ev"), 1);
    }

    #[tokio::test]
    async fn test_next_event_resolves_with_args() {
        let ch = Arc::new(EventChannel::new());
        let fut = ch.next_event("ready");
        ch.emit("ready", &[json!("payload")]);
        assert_eq!(fut.await, vec![json!("payload")]);
    }
}
