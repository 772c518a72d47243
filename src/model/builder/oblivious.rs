//! Builder for ensembles of balanced (oblivious) trees.

use std::collections::BTreeSet;

use crate::core::constants::MAX_OBLIVIOUS_TREE_DEPTH;
use crate::core::error::{EnsembleError, Result};
use crate::ensure;
use crate::model::builder::{collect_split, CommonModelBuilder};
use crate::model::features::{CatFeature, FloatFeature};
use crate::model::oblivious_trees::ObliviousTrees;
use crate::model::split::ModelSplit;

/// Accumulates balanced trees and flattens them into an [`ObliviousTrees`].
///
/// Split `d` of a tree decides bit `d` of the leaf index.
#[derive(Debug, Clone)]
pub struct ObliviousTreeBuilder {
    common: CommonModelBuilder,
    trees: Vec<Vec<ModelSplit>>,
    leaf_values: Vec<f64>,
    leaf_weights: Vec<Vec<f64>>,
}

impl ObliviousTreeBuilder {
    /// Feature descriptors must be sorted by strictly increasing flat index.
    pub fn new(
        float_features: Vec<FloatFeature>,
        cat_features: Vec<CatFeature>,
        approx_dimension: usize,
    ) -> Result<Self> {
        Ok(ObliviousTreeBuilder {
            common: CommonModelBuilder::new(float_features, cat_features, approx_dimension)?,
            trees: Vec::new(),
            leaf_values: Vec::new(),
            leaf_weights: Vec::new(),
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn leaf_count(splits: &[ModelSplit]) -> Result<usize> {
        ensure!(
            splits.len() <= MAX_OBLIVIOUS_TREE_DEPTH,
            EnsembleError::invalid_parameter(
                "tree depth",
                splits.len().to_string(),
                format!("must not exceed {}", MAX_OBLIVIOUS_TREE_DEPTH)
            )
        );
        Ok(1usize << splits.len())
    }

    /// Add a tree whose leaf values are given per output dimension.
    ///
    /// `leaf_values[dim][leaf]` is rearranged into leaf-major order.
    pub fn add_tree(&mut self, splits: &[ModelSplit], leaf_values: &[Vec<f64>], leaf_weights: &[f64]) -> Result<()> {
        let approx_dimension = self.common.approx_dimension();
        ensure!(
            leaf_values.len() == approx_dimension,
            EnsembleError::dimension_mismatch(
                format!("{} leaf value rows", approx_dimension),
                leaf_values.len().to_string()
            )
        );
        let leaf_count = Self::leaf_count(splits)?;
        for row in leaf_values {
            ensure!(
                row.len() == leaf_count,
                EnsembleError::dimension_mismatch(format!("{} leaf values", leaf_count), row.len().to_string())
            );
        }

        let flat: Vec<f64> = (0..leaf_count)
            .flat_map(|leaf| leaf_values.iter().map(move |row| row[leaf]))
            .collect();
        self.add_tree_flat(splits, &flat, leaf_weights)
    }

    /// Add a tree whose leaf values are already leaf-major.
    ///
    /// `leaf_weights` is empty or holds one weight per leaf.
    pub fn add_tree_flat(&mut self, splits: &[ModelSplit], leaf_values: &[f64], leaf_weights: &[f64]) -> Result<()> {
        let leaf_count = Self::leaf_count(splits)?;
        let expected = leaf_count * self.common.approx_dimension();
        ensure!(
            leaf_values.len() == expected,
            EnsembleError::dimension_mismatch(format!("{} leaf values", expected), leaf_values.len().to_string())
        );
        ensure!(
            leaf_weights.is_empty() || leaf_weights.len() == leaf_count,
            EnsembleError::dimension_mismatch(
                format!("{} leaf weights", leaf_count),
                leaf_weights.len().to_string()
            )
        );

        self.leaf_values.extend_from_slice(leaf_values);
        self.leaf_weights.push(leaf_weights.to_vec());
        self.trees.push(splits.to_vec());
        Ok(())
    }

    /// Index the splits of all added trees and produce the ensemble.
    ///
    /// The builder is left untouched, so repeated calls give equal results.
    pub fn build(&self) -> Result<ObliviousTrees> {
        let mut split_set = BTreeSet::new();
        for split in self.trees.iter().flatten() {
            collect_split(&mut split_set, split);
        }
        let indexed = self.common.process_splits_set(&split_set)?;

        let mut tree_splits = Vec::new();
        let mut tree_sizes = Vec::with_capacity(self.trees.len());
        let mut tree_start_offsets = Vec::with_capacity(self.trees.len());
        for tree in &self.trees {
            tree_start_offsets.push(tree_splits.len());
            for split in tree {
                tree_splits.push(indexed.bin_feature_index.require(split)?);
            }
            tree_sizes.push(tree.len());
        }

        let mut trees = ObliviousTrees {
            approx_dimension: self.common.approx_dimension(),
            tree_splits,
            tree_sizes,
            tree_start_offsets,
            leaf_values: self.leaf_values.clone(),
            leaf_weights: self.leaf_weights.clone(),
            float_features: indexed.float_features,
            cat_features: indexed.cat_features,
            one_hot_features: indexed.one_hot_features,
            ctr_features: indexed.ctr_features,
            bin_features: indexed.bin_feature_index.splits().to_vec(),
            ..Default::default()
        };
        trees.update_runtime_data()?;
        log::info!(
            "Built {} balanced trees over {} bin features",
            trees.tree_count(),
            trees.bin_features().len()
        );
        Ok(trees)
    }
}
