//! Evaluation engine.
//!
//! - [`evaluator`]: quantization of objects and tree walking
//! - [`apply`]: batch application and repeated application to one batch
//! - [`leaf_index`]: object-by-object leaf index cursor
//! - [`ctr_provider`]: counter tables behind CTR splits

pub mod apply;
pub mod ctr_provider;
pub mod evaluator;
pub mod leaf_index;

pub use apply::{apply_model, apply_model_multi, calc_leaf_indexes_multi, transform_predictions, ModelCalcerOnPool};
pub use ctr_provider::{CtrProvider, CtrStats, CtrTable, StaticCtrProvider};
pub use evaluator::{ModelEvaluator, QuantizedData};
pub use leaf_index::LeafIndexCalcerOnPool;
