//! # offthread
//!
//! **Offthread** is a pooled task-execution library for Rust.
//!
//! It runs programs on isolated workers (dedicated OS threads that share no
//! state with their creator), speaks a small envelope protocol across the
//! boundary, and falls back to an in-process backend on environments without
//! isolation support. The crate is designed as a building block for
//! off-main-thread work queues and background computation.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  caller code
//!      │ start(program, args)
//!      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Threads (runtime)                                                │
//! │  - ProgramRegistry (named, self-contained program bodies)         │
//! │  - Pool (oldest-first idle reuse, readiness queuing)              │
//! │  - backend decision: Spawn::supports_isolation(), taken once      │
//! └──────┬──────────────────────┬─────────────────────────┬───────────┘
//!        ▼                      ▼                         ▼
//! ┌──────────────┐       ┌──────────────┐          ┌──────────────┐
//! │  WorkerSlot  │       │  WorkerSlot  │          │  WorkerSlot  │
//! │ (OS thread)  │       │ (OS thread)  │          │ (OS thread)  │
//! └┬─────────────┘       └┬─────────────┘          └┬─────────────┘
//!  │ envelopes:            │                         │
//!  │  worker_ready         │                         │
//!  │  done / error / log   │                         │
//!  │  custom events        │                         │
//!  ▼                       ▼                         ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │            per-worker signal pump (demultiplex by task id)        │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  Thread (EventChannel) │
//!                       │  on / once / off       │
//!                       │  emit  / kill / join   │
//!                       └────────────────────────┘
//! ```
//!
//! ### Task lifecycle
//! ```text
//! Threads::start ──► acquire worker (oldest idle, or spawn fresh)
//!   ├─► register task id on the worker
//!   ├─► send source{id, src, args}   (queued until worker_ready)
//!   └─► return Thread immediately
//!
//! inside the worker:
//!   resolve src ──► run program(ctx, args)
//!       ├─ immediate value ─► done{id, value}          ─► worker re-pooled
//!       ├─ error / panic   ─► error{id, description}   ─► worker retired
//!       ├─ pending future  ─► done/error on settlement
//!       └─ ctx.emit(...)   ─► custom event ─► thread.on(...) listeners
//!
//! thread.emit(...) ──► event{id, type, args} ──► ctx.on(...) listeners
//! thread.kill()    ──► worker terminated, removed from rotation
//! worker fault     ──► error emitted to every task registered on it, by id
//! ```
//!
//! ## Features
//! | Area          | Description                                                   | Key types / traits                       |
//! |---------------|---------------------------------------------------------------|------------------------------------------|
//! | **Runtime**   | Start tasks, pick the backend, observe pool counters.         | [`Threads`], [`Config`]                  |
//! | **Handles**   | Per-task event surface, inbound emit, kill, join.             | [`Thread`]                               |
//! | **Programs**  | Closure-backed or registry-named task bodies.                 | [`TaskProgram`], [`InlineProgram`], [`SourceProgram`], [`ProgramRegistry`] |
//! | **Contexts**  | What a running program sees: identity plus events both ways.  | [`Context`], [`Outcome`]                 |
//! | **Events**    | The listener primitive shared by threads and contexts.        | [`EventChannel`], [`ListenerId`]         |
//! | **Spawning**  | The environment seam for isolated-unit construction.          | [`Spawn`], [`OsThreadSpawner`], [`InProcessSpawner`] |
//! | **Errors**    | Typed errors for starting, spawning, and task execution.      | [`TaskError`], [`StartError`], [`SpawnError`] |
//!
//! ## Example
//! ```no_run
//! use offthread::{Outcome, Threads, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let threads = Threads::default();
//!
//!     // Programs cross the boundary by name; bodies must be self-contained.
//!     threads.register("sum", |_ctx, args| {
//!         let total: i64 = args.iter().filter_map(Value::as_i64).sum();
//!         Ok(Outcome::value(total))
//!     });
//!
//!     let thread = threads.start("sum", vec![1.into(), 2.into(), 3.into()])?;
//!     thread.on("log", |args| println!("task says: {args:?}"));
//!
//!     let value = thread.join().await?;
//!     assert_eq!(value, Value::from(6));
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod core;
mod error;
mod events;
mod programs;
mod protocol;
mod threads;

// ---- Public re-exports ----

pub use config::Config;
pub use context::Context;
pub use core::{
    Bootstrap, InProcessSpawner, OsThreadSpawner, SignalReceiver, SignalSender, Spawn,
    SpawnedWorker, WorkerHandle, WorkerSignal,
};
pub use error::{SpawnError, StartError, TaskError};
pub use events::{EventChannel, ListenerId};
pub use programs::{Args, InlineProgram, Outcome, ProgramFn, ProgramRegistry, SourceProgram, TaskProgram};
pub use protocol::{Envelope, EnvelopeKind, TaskId};
pub use threads::{Thread, Threads};

/// Task argument and result payloads are plain JSON values.
pub use serde_json::Value;
