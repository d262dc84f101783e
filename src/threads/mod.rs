//! # Public units: the [`Threads`] runtime and the [`Thread`] handle.
//!
//! [`Threads`] owns the program registry, the worker pool, and the backend
//! decision (isolated vs in-process); [`Thread`] is the caller's handle to
//! one running task — its event surface, its inbound `emit` path, `kill`,
//! and `join`.

mod runtime;
mod thread;

pub use runtime::Threads;
pub use thread::Thread;
