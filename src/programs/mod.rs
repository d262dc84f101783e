//! # Task programs: the unit of work handed to a thread.
//!
//! A program is the body of a task. Two representations exist, behind the
//! [`TaskProgram`] capability trait:
//!
//! - [`InlineProgram`] — wraps a closure directly. Valid only on the
//!   in-process backend: a closure cannot cross the isolation boundary.
//! - [`SourceProgram`] — refers to a program by name. The name travels in the
//!   `src` field of a `source` envelope and is re-materialized from the
//!   [`ProgramRegistry`] inside the boundary. `&'static str` implements
//!   [`TaskProgram`] the same way for convenience.
//!
//! ## Self-containment contract
//! A program that crosses the boundary must be fully self-contained: it is
//! transported as a name and rebuilt from the registry the worker was
//! bootstrapped with, so it cannot close over state from its creator's scope.
//! Handing an [`InlineProgram`] to the isolated backend is a caller error
//! ([`StartError::NotPortable`]), not a framework bug.
//!
//! ## Results
//! A program returns [`Outcome`]: either an immediate [`Value`] (emitted as
//! `done` right away) or a pending future — the thenable analog — whose
//! settlement produces the terminal `done`/`error` event.

mod registry;

pub use registry::ProgramRegistry;

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::Context;
use crate::error::{StartError, TaskError};
use crate::events::panic_message;

/// Ordered task arguments, as carried by envelopes.
pub type Args = Vec<Value>;

/// Materialized program callable.
///
/// Receives the task's [`Context`] (identity + event surface) and the initial
/// arguments; returns an [`Outcome`] or a task-level error.
pub type ProgramFn = Arc<dyn Fn(Context, Args) -> Result<Outcome, TaskError> + Send + Sync>;

/// Result shape of a program body.
pub enum Outcome {
    /// Immediate result; `done` fires with it right away.
    Value(Value),

    /// Deferred result (the thenable analog); `done`/`error` fire only once
    /// the future settles, matching the settlement's value or failure.
    Pending(BoxFuture<'static, Result<Value, TaskError>>),
}

impl Outcome {
    /// Wraps an immediate value.
    pub fn value(value: impl Into<Value>) -> Self {
        Outcome::Value(value.into())
    }

    /// Wraps a deferred result.
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Outcome::Pending(fut.boxed())
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome::Value(value)
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Outcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// # Capability trait over the two program representations.
///
/// The backend decides which capability it needs: the isolated backend reads
/// [`source`](TaskProgram::source) to build the initial envelope; the
/// in-process backend calls [`materialize`](TaskProgram::materialize) and
/// runs the callable directly.
pub trait TaskProgram: Send + Sync + 'static {
    /// Portable source (a registered program name), if this program can cross
    /// the isolation boundary.
    fn source(&self) -> Option<&str> {
        None
    }

    /// Resolves this program to a callable for in-process execution.
    fn materialize(&self, registry: &ProgramRegistry) -> Result<ProgramFn, StartError>;
}

/// Closure-backed program; in-process backend only.
///
/// # Example
/// ```
/// use offthread::{InlineProgram, Outcome};
///
/// let p = InlineProgram::new(|_ctx, args| Ok(Outcome::value(args.len())));
/// ```
pub struct InlineProgram {
    func: ProgramFn,
}

impl InlineProgram {
    /// Wraps a closure as a program.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Context, Args) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }
}

impl TaskProgram for InlineProgram {
    fn materialize(&self, _registry: &ProgramRegistry) -> Result<ProgramFn, StartError> {
        Ok(Arc::clone(&self.func))
    }
}

/// Name-backed program, resolved from the [`ProgramRegistry`] on either side
/// of the boundary.
pub struct SourceProgram {
    name: String,
}

impl SourceProgram {
    /// Refers to the registered program called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TaskProgram for SourceProgram {
    fn source(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn materialize(&self, registry: &ProgramRegistry) -> Result<ProgramFn, StartError> {
        registry
            .resolve(&self.name)
            .ok_or_else(|| StartError::Unresolved {
                name: self.name.clone(),
            })
    }
}

impl TaskProgram for &'static str {
    fn source(&self) -> Option<&str> {
        Some(self)
    }

    fn materialize(&self, registry: &ProgramRegistry) -> Result<ProgramFn, StartError> {
        registry
            .resolve(self)
            .ok_or_else(|| StartError::Unresolved {
                name: (*self).to_string(),
            })
    }
}

/// Synchronous portion of one program invocation.
pub(crate) enum Invocation {
    /// The body returned an immediate value.
    Done(Value),
    /// The body failed synchronously (error return or contained panic).
    Failed(String),
    /// The body returned a deferred outcome still to be awaited.
    Pending(BoxFuture<'static, Result<Value, TaskError>>),
}

/// Runs the synchronous part of a program, containing panics.
///
/// Never unwinds into the caller; panics and error returns become
/// [`Invocation::Failed`] descriptions.
pub(crate) fn invoke(program: &ProgramFn, ctx: &Context, args: Args) -> Invocation {
    let call = {
        let ctx = ctx.clone();
        AssertUnwindSafe(move || program(ctx, args))
    };
    match catch_unwind(call) {
        Ok(Ok(Outcome::Value(value))) => Invocation::Done(value),
        Ok(Ok(Outcome::Pending(fut))) => Invocation::Pending(fut),
        Ok(Err(err)) => Invocation::Failed(err.as_message()),
        Err(panic) => Invocation::Failed(panic_message(panic.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inline_program_has_no_portable_source() {
        let p = InlineProgram::new(|_ctx, _args| Ok(Outcome::value(1)));
        assert!(p.source().is_none());
    }

    #[test]
    fn test_source_program_resolves_from_registry() {
        let registry = ProgramRegistry::new();
        registry.register("answer", |_ctx, _args| Ok(Outcome::value(42)));

        let p = SourceProgram::new("answer");
        assert_eq!(p.source(), Some("answer"));
        assert!(p.materialize(&registry).is_ok());
    }

    #[test]
    fn test_unregistered_name_fails_to_materialize() {
        let registry = ProgramRegistry::new();
        let Err(err) = "missing".materialize(&registry) else {
            panic!("materialize resolved a name that was never registered");
        };
        assert_eq!(err.as_label(), "start_unresolved");
    }

    #[test]
    fn test_outcome_from_value() {
        let o: Outcome = json!({"k": 1}).into();
        assert!(matches!(o, Outcome::Value(_)));
    }
}
