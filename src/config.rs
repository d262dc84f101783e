//! # Global runtime configuration.
//!
//! Provides [`Config`], centralized settings for a [`Threads`](crate::Threads)
//! runtime.
//!
//! ## Sentinel values
//! - `max_idle = 0` → idle workers are never retained (every released worker
//!   is terminated; a fresh one is spawned per task).
//! - `stack_size = None` → platform default worker stack.

/// Global configuration for a [`Threads`](crate::Threads) runtime.
///
/// ## Field semantics
/// - `max_idle`: how many idle workers the pool retains for reuse. Workers
///   released while the idle list is full are terminated instead of pooled.
/// - `stack_size`: stack size for spawned worker threads (`None` = platform
///   default).
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of idle workers retained in the pool.
    pub max_idle: usize,

    /// Stack size for worker threads, in bytes.
    pub stack_size: Option<usize>,
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `max_idle = 8` (bounded reuse; unbounded retention leaks workers
    ///   under error-heavy load)
    /// - `stack_size = None` (platform default)
    fn default() -> Self {
        Self {
            max_idle: 8,
            stack_size: None,
        }
    }
}
