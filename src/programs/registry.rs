//! # Program registry: named, self-contained program bodies.
//!
//! The registry is the boundary-crossing representation of program code. A
//! worker is bootstrapped with a handle to the registry; a `source` envelope
//! carries only a name, and the bootstrap re-materializes the callable from
//! the registry inside the boundary. This keeps the transported form inert —
//! nothing from the caller's scope rides along.
//!
//! Registration is expected at runtime construction time, but the registry is
//! internally synchronized, so late registration is safe; workers observe it
//! on their next `source` envelope.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Args, Outcome, ProgramFn};
use crate::context::Context;
use crate::error::TaskError;

/// Shared map from program name to program body.
pub struct ProgramRegistry {
    programs: RwLock<HashMap<String, ProgramFn>>,
}

impl ProgramRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            programs: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `func` under `name`, replacing any previous registration.
    ///
    /// The body must be self-contained with respect to the task: everything
    /// it needs arrives through its [`Context`] and arguments.
    pub fn register<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Context, Args) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(func));
    }

    /// Looks up the program registered under `name`.
    pub fn resolve(&self, name: &str) -> Option<ProgramFn> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ProgramRegistry")
            .field("programs", &names)
            .finish()
    }
}
