//! Wire protocol: envelopes and task identity.
//!
//! Everything that crosses the isolation boundary is an [`Envelope`] — a
//! JSON-serializable `{type, id, args, src}` record. There is no other return
//! path from a worker: results, failures, logs, and custom events all travel
//! as envelopes and are demultiplexed by [`TaskId`] on the receiving side.

mod envelope;

pub use envelope::{Envelope, EnvelopeKind, TaskId};

pub(crate) use envelope::{TYPE_DONE, TYPE_ERROR, TYPE_LOG};
