//! Event primitives: the ordered publish/subscribe channel.
//!
//! This module contains [`EventChannel`], the primitive every other layer is
//! built from. A thread's public event surface, a running task's context, and
//! the demultiplexed inbound side of a worker all own one.
//!
//! ## Contents
//! - [`EventChannel`] — named events, registration-ordered synchronous delivery
//! - [`ListenerId`] — handle for targeted removal of a single listener
//!
//! ## Quick reference
//! - **Publishers**: contexts (forwarding variant), the pool's per-worker
//!   signal pump (demultiplexed envelopes), [`Thread::emit`](crate::Thread::emit)
//!   on the in-process backend.
//! - **Consumers**: caller listeners on a [`Thread`](crate::Thread), program
//!   listeners on a [`Context`](crate::Context).

mod channel;

pub use channel::{EventChannel, ListenerId};

pub(crate) use channel::panic_message;
