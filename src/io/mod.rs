//! Model persistence.
//!
//! An ensemble is stored together with a small metadata header in one of
//! three formats: compact bincode behind a magic/version prefix, the same
//! payload gzip-compressed, or JSON. Readers detect the format from the
//! leading bytes.

pub mod model_file;

pub use model_file::{
    load_model, read_model, read_model_with_metadata, save_model, write_model, ModelMetadata,
};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{EnsembleError, Result};

/// Supported model file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFormat {
    /// Magic bytes, format version and a bincode payload
    Bincode,
    /// Gzip-compressed [`ModelFormat::Bincode`]
    CompressedBincode,
    /// Human-readable JSON
    Json,
}

impl Default for ModelFormat {
    fn default() -> Self {
        ModelFormat::Bincode
    }
}

impl ModelFormat {
    /// Guess the format from a file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "bin" | "cbm" => Some(ModelFormat::Bincode),
                "gz" => Some(ModelFormat::CompressedBincode),
                "json" => Some(ModelFormat::Json),
                _ => None,
            })
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFormat::Bincode => write!(f, "bincode"),
            ModelFormat::CompressedBincode => write!(f, "compressed-bincode"),
            ModelFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ModelFormat {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bincode" | "bin" => Ok(ModelFormat::Bincode),
            "compressed-bincode" | "gz" | "gzip" => Ok(ModelFormat::CompressedBincode),
            "json" => Ok(ModelFormat::Json),
            _ => Err(EnsembleError::serialization(format!("Unknown model format: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ModelFormat::from_path("model.bin"), Some(ModelFormat::Bincode));
        assert_eq!(ModelFormat::from_path("model.bin.gz"), Some(ModelFormat::CompressedBincode));
        assert_eq!(ModelFormat::from_path("model.JSON"), Some(ModelFormat::Json));
        assert_eq!(ModelFormat::from_path("model"), None);
    }

    #[test]
    fn test_format_parsing() {
        for format in [ModelFormat::Bincode, ModelFormat::CompressedBincode, ModelFormat::Json] {
            assert_eq!(format.to_string().parse::<ModelFormat>().unwrap(), format);
        }
        assert!("xml".parse::<ModelFormat>().is_err());
    }
}
