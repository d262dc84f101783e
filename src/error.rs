//! Error types used by the offthread runtime and tasks.
//!
//! This module defines three error enums:
//!
//! - [`TaskError`] — failures of an individual task, surfaced as `error` events.
//! - [`StartError`] — failures raised synchronously when starting a thread.
//! - [`SpawnError`] — failures constructing an isolated worker.
//!
//! Each type provides an `as_label` helper (short stable snake_case name) for
//! logs and metrics.
//!
//! Task failures never cross the isolation boundary as native error values;
//! they travel as human-readable descriptions inside `error` envelopes and are
//! re-materialized as [`TaskError`] on the caller side.

use thiserror::Error;

/// # Errors produced by task execution.
///
/// These surface on a thread's channel as `error` events, and from
/// [`Thread::join`](crate::Thread::join). They are never thrown back into
/// caller code.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The task's `error` event fired: the program body returned an error,
    /// panicked, its pending outcome failed, or its worker died under it.
    /// The distinction only exists inside the boundary; on the caller side
    /// all of these arrive as one description string.
    #[error("task failed: {error}")]
    Failed {
        /// Human-readable failure description.
        error: String,
    },

    /// The thread was killed before a terminal event was observed.
    #[error("thread killed before completion")]
    Killed,
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use offthread::TaskError;
    ///
    /// let err = TaskError::Failed { error: "boom".into() };
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Failed { .. } => "task_failed",
            TaskError::Killed => "task_killed",
        }
    }

    /// Returns the failure description carried by this error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Failed { error } => error.clone(),
            TaskError::Killed => "killed".to_string(),
        }
    }
}

/// # Errors raised synchronously by [`Threads::start`](crate::Threads::start).
///
/// These are caller errors or environment failures detected before the task
/// body runs; once a task is dispatched, failures arrive as `error` events.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StartError {
    /// An inline (closure-backed) program was handed to the isolated backend.
    ///
    /// Programs that cross the isolation boundary travel as source names and
    /// must be registered with the runtime's [`ProgramRegistry`](crate::ProgramRegistry).
    #[error("program has no portable source; the isolated backend requires a registered program")]
    NotPortable,

    /// A named program was not found in the registry (in-process backend;
    /// on the isolated backend the lookup happens inside the worker and
    /// surfaces as a task-level `error` event instead).
    #[error("program {name:?} is not registered")]
    Unresolved {
        /// The name that failed to resolve.
        name: String,
    },

    /// Spawning a fresh worker failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl StartError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StartError::NotPortable => "start_not_portable",
            StartError::Unresolved { .. } => "start_unresolved",
            StartError::Spawn(_) => "start_spawn_failed",
        }
    }
}

/// # Errors constructing an isolated worker.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to create the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Io(#[from] std::io::Error),

    /// The spawner does not support isolated execution.
    ///
    /// Returned by spawners whose `supports_isolation()` is `false`; the
    /// runtime routes around this by using the in-process backend, so seeing
    /// this error means a worker was requested from such a spawner directly.
    #[error("this spawner does not provide isolated workers")]
    Unsupported,
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Io(_) => "spawn_io",
            SpawnError::Unsupported => "spawn_unsupported",
        }
    }
}
