//! Ensemble representation and construction.
//!
//! - [`split`]: the split conditions trees are made of
//! - [`ctr`]: online statistic descriptors referenced by CTR splits
//! - [`features`]: feature descriptors owned by an ensemble
//! - [`builder`]: flatteners for balanced and general trees
//! - [`oblivious_trees`]: the flattened ensemble

pub mod builder;
pub mod ctr;
pub mod features;
pub mod oblivious_trees;
pub mod split;

pub use builder::{
    collect_split, BinFeatureIndex, CommonModelBuilder, NodeValue, NonSymmetricTreeBuilder, NonSymmetricTreeNode,
    ObliviousTreeBuilder,
};
pub use ctr::{combine_hash, CtrType, FeatureCombination, ModelCtr, ModelCtrBase};
pub use features::{
    create_cat_features, create_float_features, CatFeature, CtrFeature, FeaturePosition, FeatureQuantization,
    FloatFeature, OneHotFeature,
};
pub use oblivious_trees::{ObliviousTrees, StepNode};
pub use split::{FloatSplit, ModelSplit, OneHotSplit, OnlineCtrSplit};
