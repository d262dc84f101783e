//! Runtime core: worker construction, bootstrap, and pooling.
//!
//! Internal modules:
//! - [`spawn`]: the environment seam ([`Spawn`], [`WorkerHandle`]) plus the
//!   shipped OS-thread and in-process spawners;
//! - [`bootstrap`]: the loop served inside every isolated worker;
//! - [`pool`]: creator-side worker ownership, reuse, and demultiplexing.
//!
//! The public API from this module is the spawner seam; the pool and
//! bootstrap are wired up by [`Threads`](crate::Threads).

pub(crate) mod bootstrap;
pub(crate) mod pool;
pub(crate) mod spawn;

pub use spawn::{
    Bootstrap, InProcessSpawner, OsThreadSpawner, SignalReceiver, SignalSender, Spawn,
    SpawnedWorker, WorkerHandle, WorkerSignal,
};
