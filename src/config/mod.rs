//! Configuration management for ensemble evaluation.
//!
//! Evaluation parameters live in [`ApplyConfig`]; [`build_thread_pool`]
//! turns a thread count into the rayon pool every batch call runs on.

pub mod core;

pub use self::core::{ApplyConfig, ApplyConfigBuilder};

use crate::core::error::{EnsembleError, Result};

/// Configuration file name looked up by convention
pub const DEFAULT_CONFIG_FILE: &str = "tree_ensemble.toml";

/// Build a dedicated rayon pool with the given number of threads.
///
/// A count of zero yields one thread per logical core.
pub fn build_thread_pool(thread_count: usize) -> Result<rayon::ThreadPool> {
    let num_threads = if thread_count == 0 {
        num_cpus::get()
    } else {
        thread_count
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|idx| format!("tree-ensemble-{}", idx))
        .build()
        .map_err(|e| EnsembleError::thread_pool(format!("Failed to create thread pool: {}", e)))
}
