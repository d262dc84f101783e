//! # Message envelope crossing the isolation boundary.
//!
//! ## Wire format
//! ```json
//! { "type": "source", "id": "…", "args": [1, "two"], "src": "fibonacci" }
//! ```
//!
//! Reserved `type` values:
//! - `"source"` — initiates a task; carries `id`, `src` (program name) and
//!   the initial `args`.
//! - `"worker_ready"` — announces the worker accepts input; carries no `id`
//!   and is sent exactly once per worker, before anything else.
//! - `"done"` — the task completed; `args[0]` is the result value.
//! - `"error"` — the task failed; `args[0]` is a human-readable description.
//! - `"log"` — diagnostic passthrough from inside the boundary.
//!
//! Any other `type` is a user-defined event, demultiplexed to the owning
//! task's channel.
//!
//! ## Invariant
//! Every envelope except `worker_ready` carries an `id` that must resolve to
//! a live task registration on the receiving side; unresolvable envelopes are
//! dropped with a diagnostic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque, unique per-task identity. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Classification of an envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Task initiation (program name + initial args).
    Source,
    /// Readiness handshake; the only id-less envelope.
    Ready,
    /// Task completed with a value.
    Done,
    /// Task failed with a description.
    Error,
    /// Diagnostic passthrough.
    Log,
    /// User-defined event, forwarded to the task's channel.
    User,
}

/// Structured message exchanged across the isolation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name; reserved values listed in the module docs.
    #[serde(rename = "type")]
    pub kind: String,

    /// Owning task identity; absent only for `worker_ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,

    /// Ordered event arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,

    /// Program source (name registered with the bootstrap); `source` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

pub(crate) const TYPE_SOURCE: &str = "source";
pub(crate) const TYPE_READY: &str = "worker_ready";
pub(crate) const TYPE_DONE: &str = "done";
pub(crate) const TYPE_ERROR: &str = "error";
pub(crate) const TYPE_LOG: &str = "log";

impl Envelope {
    /// Builds the task-initiating envelope.
    pub fn source(id: TaskId, src: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: TYPE_SOURCE.to_string(),
            id: Some(id),
            args,
            src: Some(src.into()),
        }
    }

    /// Builds the readiness control envelope (no id).
    pub fn ready() -> Self {
        Self {
            kind: TYPE_READY.to_string(),
            id: None,
            args: Vec::new(),
            src: None,
        }
    }

    /// Builds a `done` envelope carrying the task's result.
    pub fn done(id: TaskId, value: Value) -> Self {
        Self::event(id, TYPE_DONE, vec![value])
    }

    /// Builds an `error` envelope carrying a failure description.
    pub fn error(id: TaskId, description: impl Into<String>) -> Self {
        Self::event(id, TYPE_ERROR, vec![Value::String(description.into())])
    }

    /// Builds an arbitrary per-task event envelope.
    pub fn event(id: TaskId, kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id),
            args,
            src: None,
        }
    }

    /// Classifies this envelope's `type` field.
    pub fn classify(&self) -> EnvelopeKind {
        match self.kind.as_str() {
            TYPE_SOURCE => EnvelopeKind::Source,
            TYPE_READY => EnvelopeKind::Ready,
            TYPE_DONE => EnvelopeKind::Done,
            TYPE_ERROR => EnvelopeKind::Error,
            TYPE_LOG => EnvelopeKind::Log,
            _ => EnvelopeKind::User,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_envelope_omits_id_on_the_wire() {
        let wire = serde_json::to_value(Envelope::ready()).unwrap();
        assert_eq!(wire, json!({ "type": "worker_ready" }));
    }

    #[test]
    fn test_source_envelope_wire_fields() {
        let id = TaskId::new();
        let env = Envelope::source(id, "fib", vec![json!(10)]);
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["type"], json!("source"));
        assert_eq!(wire["src"], json!("fib"));
        assert_eq!(wire["args"], json!([10]));
        assert_eq!(wire["id"], json!(id.to_string()));
    }

    #[test]
    fn test_classification_of_reserved_and_user_types() {
        let id = TaskId::new();
        assert_eq!(Envelope::ready().classify(), EnvelopeKind::Ready);
        assert_eq!(
            Envelope::done(id, json!(null)).classify(),
            EnvelopeKind::Done
        );
        assert_eq!(Envelope::error(id, "x").classify(), EnvelopeKind::Error);
        assert_eq!(
            Envelope::event(id, "log", vec![]).classify(),
            EnvelopeKind::Log
        );
        assert_eq!(
            Envelope::event(id, "ping", vec![]).classify(),
            EnvelopeKind::User
        );
    }

    #[test]
    fn test_error_envelope_carries_description_as_first_arg() {
        let env = Envelope::error(TaskId::new(), "it broke");
        assert_eq!(env.args.first(), Some(&json!("it broke")));
    }
}
