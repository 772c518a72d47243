//! Error handling and error types for the tree ensemble library.
//!
//! Every fallible operation returns [`Result`], and every failure is reported
//! to the immediate caller. Nothing is retried internally.

use std::io;
use thiserror::Error;

use crate::core::types::FeatureType;

/// Main error type for the library.
///
/// Covers precondition violations detected while building or evaluating an
/// ensemble, schema-compatibility failures between training and inference
/// layouts, and persistence failures.
#[derive(Error, Debug)]
pub enum EnsembleError {
    /// Configuration and validation errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid input parameters
    #[error("Invalid parameter: {parameter} = {value}, {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Dimension mismatch errors
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// Out of bounds access
    #[error("Index out of bounds: index {index}, length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    /// A tree node that is neither a well-formed leaf nor a well-formed split
    #[error("Malformed tree node: {message}")]
    MalformedTreeNode { message: String },

    /// A child offset that does not fit into a step node
    #[error("Step node offset overflow: child is {offset} nodes away, maximum is {max}")]
    StepNodeOffsetOverflow { offset: usize, max: usize },

    /// Training and inference schemas disagree
    #[error("Schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// Two features share the same non-empty name
    #[error("All feature names should be different, but '{name}' used more than once")]
    DuplicateFeatureName { name: String },

    /// Prediction errors
    #[error("Prediction error: {message}")]
    Prediction { message: String },

    /// Model serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Worker pool construction errors
    #[error("Thread pool error: {message}")]
    ThreadPool { message: String },

    /// File I/O errors
    #[error("I/O error: {source}")]
    IO {
        #[from]
        source: io::Error,
    },

    /// JSON serialization errors
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// Bincode serialization errors
    #[error("Bincode error: {source}")]
    Bincode {
        #[from]
        source: bincode::Error,
    },

    /// TOML parsing errors
    #[error("TOML error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    /// Internal library errors (should not occur in normal usage)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results using EnsembleError
pub type Result<T> = std::result::Result<T, EnsembleError>;

impl EnsembleError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        EnsembleError::Config {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<P, V, R>(parameter: P, value: V, reason: R) -> Self
    where
        P: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        EnsembleError::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a dimension mismatch error
    pub fn dimension_mismatch<E, A>(expected: E, actual: A) -> Self
    where
        E: Into<String>,
        A: Into<String>,
    {
        EnsembleError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an index out of bounds error
    pub fn index_out_of_bounds(index: usize, length: usize) -> Self {
        EnsembleError::IndexOutOfBounds { index, length }
    }

    /// Create a malformed tree node error
    pub fn malformed_tree_node<S: Into<String>>(message: S) -> Self {
        EnsembleError::MalformedTreeNode {
            message: message.into(),
        }
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch<S: Into<String>>(message: S) -> Self {
        EnsembleError::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Create a schema mismatch error for a feature whose type differs
    pub fn feature_type_mismatch(
        feature_idx: usize,
        learn_type: FeatureType,
        apply_type: FeatureType,
        apply_data_name: &str,
    ) -> Self {
        Self::schema_mismatch(format!(
            "Feature #{} has '{}' type in training data, but '{}' type in {}",
            feature_idx, learn_type, apply_type, apply_data_name
        ))
    }

    /// Create a duplicate feature name error
    pub fn duplicate_feature_name<S: Into<String>>(name: S) -> Self {
        EnsembleError::DuplicateFeatureName { name: name.into() }
    }

    /// Create a prediction error
    pub fn prediction<S: Into<String>>(message: S) -> Self {
        EnsembleError::Prediction {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        EnsembleError::Serialization {
            message: message.into(),
        }
    }

    /// Create a thread pool error
    pub fn thread_pool<S: Into<String>>(message: S) -> Self {
        EnsembleError::ThreadPool {
            message: message.into(),
        }
    }

    /// Create an internal error (should be used sparingly)
    pub fn internal<S: Into<String>>(message: S) -> Self {
        EnsembleError::Internal {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller violating a documented precondition
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            EnsembleError::InvalidParameter { .. }
                | EnsembleError::DimensionMismatch { .. }
                | EnsembleError::IndexOutOfBounds { .. }
                | EnsembleError::MalformedTreeNode { .. }
                | EnsembleError::StepNodeOffsetOverflow { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            EnsembleError::Config { .. } => "config",
            EnsembleError::InvalidParameter { .. } => "invalid_parameter",
            EnsembleError::DimensionMismatch { .. } => "dimension_mismatch",
            EnsembleError::IndexOutOfBounds { .. } => "index_out_of_bounds",
            EnsembleError::MalformedTreeNode { .. } => "malformed_tree_node",
            EnsembleError::StepNodeOffsetOverflow { .. } => "step_node_offset_overflow",
            EnsembleError::SchemaMismatch { .. } => "schema_mismatch",
            EnsembleError::DuplicateFeatureName { .. } => "duplicate_feature_name",
            EnsembleError::Prediction { .. } => "prediction",
            EnsembleError::Serialization { .. } => "serialization",
            EnsembleError::ThreadPool { .. } => "thread_pool",
            EnsembleError::IO { .. } => "io",
            EnsembleError::Json { .. } => "json",
            EnsembleError::Bincode { .. } => "bincode",
            EnsembleError::Toml { .. } => "toml",
            EnsembleError::Internal { .. } => "internal",
        }
    }
}

/// Return early with an error if the condition does not hold.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err.into());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EnsembleError::config("test configuration error");
        assert_eq!(err.category(), "config");
        assert!(!err.is_precondition_violation());

        let err = EnsembleError::malformed_tree_node("leaf with children");
        assert_eq!(err.category(), "malformed_tree_node");
        assert!(err.is_precondition_violation());
    }

    #[test]
    fn test_parameter_errors() {
        let err = EnsembleError::invalid_parameter("block_size", "0", "must be positive");
        assert_eq!(err.category(), "invalid_parameter");
        assert!(err.to_string().contains("block_size = 0"));
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = EnsembleError::feature_type_mismatch(
            3,
            FeatureType::Float,
            FeatureType::Categorical,
            "test data",
        );
        let message = err.to_string();
        assert!(message.contains("Feature #3"));
        assert!(message.contains("'Float' type in training data"));
        assert!(message.contains("'Categorical' type in test data"));
    }

    #[test]
    fn test_duplicate_name_display() {
        let err = EnsembleError::duplicate_feature_name("age");
        assert!(err.to_string().contains("'age' used more than once"));
    }

    #[test]
    fn test_ensure_macro() {
        fn check(value: usize) -> Result<()> {
            ensure!(value < 2, EnsembleError::index_out_of_bounds(value, 2));
            Ok(())
        }
        assert!(check(1).is_ok());
        assert!(matches!(
            check(5),
            Err(EnsembleError::IndexOutOfBounds { index: 5, length: 2 })
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: EnsembleError = io_err.into();
        assert!(matches!(err, EnsembleError::IO { .. }));
        assert_eq!(err.category(), "io");
    }
}
