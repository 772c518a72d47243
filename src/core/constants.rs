//! System constants and defaults.

/// Library version, recorded in persisted model files.
pub const TREE_ENSEMBLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of objects evaluated together by one worker in whole-batch evaluation.
pub const FORMULA_EVALUATION_BLOCK_SIZE: usize = 128;

/// Deepest balanced tree accepted by the builder.
pub const MAX_OBLIVIOUS_TREE_DEPTH: usize = 16;

/// Largest child offset a step node can encode.
pub const MAX_STEP_NODE_OFFSET: usize = u16::MAX as usize;

/// Node-to-value index stored for split nodes that carry no leaf value.
pub const NO_LEAF_VALUE: u32 = u32::MAX;

/// Internal or external index placeholder for gaps in a reconstructed layout.
pub const INDEX_PLACEHOLDER: u32 = u32::MAX;

/// Largest magnitude up to which `f32` holds every integer; bound for
/// category codes passed in float columns.
pub const MAX_FLOAT_CATEGORY_CODE: f32 = 16_777_216.0;

/// Default number of worker threads (0 means one per logical core).
pub const DEFAULT_THREAD_COUNT: usize = 0;

/// Magic bytes opening a binary model file.
pub const MODEL_FILE_MAGIC: &[u8; 4] = b"TENS";

/// Version of the persisted model envelope.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Prefix for environment variables read by the configuration layer.
pub const ENV_PREFIX: &str = "TREE_ENSEMBLE_";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert!(!TREE_ENSEMBLE_VERSION.is_empty());
        assert!(FORMULA_EVALUATION_BLOCK_SIZE > 0);
        assert_eq!(MAX_STEP_NODE_OFFSET, 65535);
        assert!((1usize << MAX_OBLIVIOUS_TREE_DEPTH) <= u32::MAX as usize);
    }
}
