//! Core infrastructure: fundamental types, constants and error handling.
//!
//! - [`types`]: feature kinds, NaN policies, prediction types and index aliases
//! - [`constants`]: tuning constants and persisted-format markers
//! - [`error`]: the library error type and [`Result`] alias

pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::{EnsembleError, Result};
pub use types::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static CORE_INIT: Once = Once::new();
static CORE_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the logging subsystem once per process.
///
/// Installs `env_logger` honoring `RUST_LOG`. A logger installed by the host
/// application takes precedence and is left untouched.
pub fn initialize_core() -> Result<()> {
    CORE_INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or("info");
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("Logger already installed by the host application");
        }
        CORE_INITIALIZED.store(true, Ordering::Release);
        log::debug!("tree-ensemble {} initialized", TREE_ENSEMBLE_VERSION);
    });
    Ok(())
}

/// Check if the core module is initialized
pub fn is_core_initialized() -> bool {
    CORE_INITIALIZED.load(Ordering::Acquire)
}
