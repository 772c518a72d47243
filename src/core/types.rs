//! Core data types shared across the library.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::EnsembleError;

/// Dense id of a bin feature in the ensemble-wide bin feature space.
pub type BinFeatureId = u32;

/// Leaf index returned by leaf-index evaluation.
pub type LeafIndex = u32;

/// Kind of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureType {
    /// Numerical feature
    Float,
    /// Categorical feature
    Categorical,
    /// Text feature
    Text,
}

impl Default for FeatureType {
    fn default() -> Self {
        FeatureType::Float
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureType::Float => write!(f, "Float"),
            FeatureType::Categorical => write!(f, "Categorical"),
            FeatureType::Text => write!(f, "Text"),
        }
    }
}

/// How a float split treats NaN feature values at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NanValueTreatment {
    /// NaN is compared as is, so every `value > border` check is false
    AsIs,
    /// NaN behaves like negative infinity
    AsFalse,
    /// NaN behaves like positive infinity
    AsTrue,
}

impl Default for NanValueTreatment {
    fn default() -> Self {
        NanValueTreatment::AsIs
    }
}

/// NaN handling mode chosen by the quantization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NanMode {
    /// NaN values are not allowed
    Forbidden,
    /// NaN values are placed below every border
    Min,
    /// NaN values are placed above every border
    Max,
}

impl Default for NanMode {
    fn default() -> Self {
        NanMode::Forbidden
    }
}

/// Output transformation applied to raw ensemble scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionType {
    /// Raw sum of leaf values
    RawFormulaVal,
    /// Sigmoid for one dimension, softmax for several
    Probability,
    /// Predicted class index
    Class,
    /// Exponent of the raw value
    Exponent,
}

impl Default for PredictionType {
    fn default() -> Self {
        PredictionType::RawFormulaVal
    }
}

impl fmt::Display for PredictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionType::RawFormulaVal => write!(f, "RawFormulaVal"),
            PredictionType::Probability => write!(f, "Probability"),
            PredictionType::Class => write!(f, "Class"),
            PredictionType::Exponent => write!(f, "Exponent"),
        }
    }
}

impl FromStr for PredictionType {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rawformulaval" | "raw" => Ok(PredictionType::RawFormulaVal),
            "probability" => Ok(PredictionType::Probability),
            "class" => Ok(PredictionType::Class),
            "exponent" => Ok(PredictionType::Exponent),
            _ => Err(EnsembleError::invalid_parameter(
                "prediction_type",
                s,
                "expected one of RawFormulaVal, Probability, Class, Exponent",
            )),
        }
    }
}
