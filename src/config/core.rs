//! Evaluation configuration and its builder.
//!
//! [`ApplyConfig`] carries the knobs of whole-batch evaluation: worker count,
//! block size, default prediction type and tree range. It can be built in
//! code, read from a `.json`/`.toml` file or taken from the environment.

use crate::core::constants::*;
use crate::core::error::{EnsembleError, Result};
use crate::core::types::PredictionType;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of batch evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Number of worker threads (0 means one per logical core)
    pub thread_count: usize,
    /// Number of objects evaluated together by one worker
    pub block_size: usize,
    /// Output transformation used when the caller does not pass one
    pub prediction_type: PredictionType,
    /// First tree to evaluate
    pub tree_begin: usize,
    /// One past the last tree to evaluate, `None` for all trees
    pub tree_end: Option<usize>,
    /// Log block partitioning at info level instead of debug
    pub verbose: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        ApplyConfig {
            thread_count: DEFAULT_THREAD_COUNT,
            block_size: FORMULA_EVALUATION_BLOCK_SIZE,
            prediction_type: PredictionType::RawFormulaVal,
            tree_begin: 0,
            tree_end: None,
            verbose: false,
        }
    }
}

impl ApplyConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.validate_block_size()?;

        if let Some(end) = self.tree_end {
            if self.tree_begin > end {
                return Err(EnsembleError::invalid_parameter(
                    "tree_begin",
                    self.tree_begin.to_string(),
                    format!("must not exceed tree_end = {}", end),
                ));
            }
        }

        Ok(())
    }

    /// Check only the evaluation block size. Used by calls that take an
    /// explicit tree range instead of `tree_begin`/`tree_end`.
    pub fn validate_block_size(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(EnsembleError::invalid_parameter(
                "block_size",
                self.block_size.to_string(),
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EnsembleError::config(format!("Failed to read config file: {}", e)))?;

        let config: ApplyConfig = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| EnsembleError::config(format!("Failed to parse JSON config: {}", e)))?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| EnsembleError::config(format!("Failed to parse TOML config: {}", e)))?,
            _ => {
                return Err(EnsembleError::config(
                    "Unsupported config file format. Use .json or .toml",
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)
                .map_err(|e| EnsembleError::config(format!("Failed to serialize to JSON: {}", e)))?,
            Some("toml") => toml::to_string_pretty(self)
                .map_err(|e| EnsembleError::config(format!("Failed to serialize to TOML: {}", e)))?,
            _ => {
                return Err(EnsembleError::config(
                    "Unsupported config file format. Use .json or .toml",
                ))
            }
        };

        std::fs::write(path, content)
            .map_err(|e| EnsembleError::config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load configuration from environment variables
    pub fn load_from_environment() -> Result<Self> {
        let mut config = ApplyConfig::default();
        config.apply_environment_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides to existing configuration
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        let thread_count_var = format!("{}THREAD_COUNT", ENV_PREFIX);
        if let Ok(val) = std::env::var(&thread_count_var) {
            self.thread_count = val
                .parse()
                .map_err(|_| EnsembleError::config(format!("Invalid {}", thread_count_var)))?;
        }

        let block_size_var = format!("{}BLOCK_SIZE", ENV_PREFIX);
        if let Ok(val) = std::env::var(&block_size_var) {
            self.block_size = val
                .parse()
                .map_err(|_| EnsembleError::config(format!("Invalid {}", block_size_var)))?;
        }

        let prediction_type_var = format!("{}PREDICTION_TYPE", ENV_PREFIX);
        if let Ok(val) = std::env::var(&prediction_type_var) {
            self.prediction_type = val
                .parse()
                .map_err(|_| EnsembleError::config(format!("Invalid {}", prediction_type_var)))?;
        }

        self.validate()
    }

    /// Get the effective number of threads (0 means use all available cores)
    pub fn effective_thread_count(&self) -> usize {
        if self.thread_count == 0 {
            num_cpus::get()
        } else {
            self.thread_count
        }
    }
}

/// Builder for [`ApplyConfig`].
#[derive(Debug, Clone)]
pub struct ApplyConfigBuilder {
    config: ApplyConfig,
}

impl ApplyConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        ApplyConfigBuilder {
            config: ApplyConfig::default(),
        }
    }

    /// Set number of worker threads
    pub fn thread_count(mut self, threads: usize) -> Self {
        self.config.thread_count = threads;
        self
    }

    /// Set evaluation block size
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Set default prediction type
    pub fn prediction_type(mut self, prediction_type: PredictionType) -> Self {
        self.config.prediction_type = prediction_type;
        self
    }

    /// Set the evaluated tree range
    pub fn tree_range(mut self, begin: usize, end: Option<usize>) -> Self {
        self.config.tree_begin = begin;
        self.config.tree_end = end;
        self
    }

    /// Set verbose logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ApplyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ApplyConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
