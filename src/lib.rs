//! # Tree Ensemble
//!
//! Storage, construction and evaluation of gradient-boosted decision tree
//! ensembles.
//!
//! Trees are flattened into a single [`ObliviousTrees`] value: balanced
//! (oblivious) trees store one split per level, general trees store one
//! [`StepNode`] per node with relative child offsets. Both shapes share one
//! evaluation engine that first binarizes objects against every split of the
//! ensemble and then walks the trees over the resulting bytes.
//!
//! ## Features
//!
//! - **Feature layouts**: [`FeaturesLayout`] maps external column indices to
//!   per-type internal indices and checks training/inference compatibility.
//! - **Builders**: [`ObliviousTreeBuilder`] and [`NonSymmetricTreeBuilder`]
//!   assign dense bin feature ids to every distinct split and flatten trees.
//! - **Evaluation**: [`apply_model_multi`] evaluates a batch in parallel
//!   blocks; [`ModelCalcerOnPool`] and [`LeafIndexCalcerOnPool`] serve
//!   repeated application and per-object leaf indexes.
//! - **Persistence**: [`save_model`] and [`load_model`] in bincode,
//!   compressed bincode or JSON.
//!
//! ## Quick Start
//!
//! ```rust
//! use tree_ensemble::{
//!     apply_model_multi, ApplyConfig, FeaturePosition, FeaturesLayout, FloatFeature, ModelSplit,
//!     ObjectsData, ObliviousTreeBuilder, PredictionType,
//! };
//! use ndarray::{array, Array2};
//!
//! # fn main() -> tree_ensemble::Result<()> {
//! let features = vec![FloatFeature::new(FeaturePosition::new(0, 0), "x")];
//! let mut builder = ObliviousTreeBuilder::new(features, vec![], 1)?;
//! builder.add_tree_flat(&[ModelSplit::float(0, 1.5)], &[10.0, 20.0], &[])?;
//! let model = builder.build()?;
//!
//! let objects = ObjectsData::new(
//!     FeaturesLayout::with_feature_count(1),
//!     array![[1.0f32], [2.0]],
//!     Array2::zeros((2, 0)),
//! )?;
//! let predictions = apply_model_multi(
//!     &model,
//!     &objects,
//!     PredictionType::RawFormulaVal,
//!     0,
//!     None,
//!     &ApplyConfig::default(),
//! )?;
//! assert_eq!(predictions, array![[10.0], [20.0]]);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    non_snake_case,
    non_upper_case_globals
)]

// Core infrastructure module - always available
pub mod core;

// Configuration management module
pub mod config;

// Feature layouts and object batches
pub mod dataset;

// Ensemble representation and builders
pub mod model;

// Evaluation engine
pub mod prediction;

// Model persistence
pub mod io;

// Re-export core functionality for convenience
pub use self::core::{
    constants::*,
    error::{EnsembleError, Result},
    types::*,
};

// Re-export configuration functionality
pub use config::{build_thread_pool, ApplyConfig, ApplyConfigBuilder};

// Re-export dataset functionality
pub use dataset::{category_code, check_compatible_for_apply, FeatureMetaInfo, FeaturesLayout, ObjectsData};

// Re-export model functionality
pub use model::{
    collect_split, combine_hash, create_cat_features, create_float_features, BinFeatureIndex, CatFeature,
    CommonModelBuilder, CtrFeature, CtrType, FeatureCombination, FeaturePosition, FeatureQuantization,
    FloatFeature, FloatSplit, ModelCtr, ModelCtrBase, ModelSplit, NodeValue, NonSymmetricTreeBuilder,
    NonSymmetricTreeNode, ObliviousTreeBuilder, ObliviousTrees, OneHotFeature, OneHotSplit, OnlineCtrSplit,
    StepNode,
};

// Re-export prediction functionality
pub use prediction::{
    apply_model, apply_model_multi, calc_leaf_indexes_multi, transform_predictions, CtrProvider, CtrStats,
    CtrTable, LeafIndexCalcerOnPool, ModelCalcerOnPool, ModelEvaluator, QuantizedData, StaticCtrProvider,
};

// Re-export persistence functionality
pub use io::{load_model, read_model, read_model_with_metadata, save_model, write_model, ModelFormat, ModelMetadata};

// Version information
pub use self::core::constants::TREE_ENSEMBLE_VERSION as VERSION;

/// Initialize the library.
///
/// Installs the `env_logger` backend unless the host application already
/// installed a logger. Calling it is optional and idempotent.
///
/// # Examples
///
/// ```rust
/// fn main() -> tree_ensemble::Result<()> {
///     tree_ensemble::init()?;
///     assert!(tree_ensemble::is_initialized());
///     Ok(())
/// }
/// ```
pub fn init() -> Result<()> {
    self::core::initialize_core()
}

/// Check if the library has been initialized.
pub fn is_initialized() -> bool {
    self::core::is_core_initialized()
}
