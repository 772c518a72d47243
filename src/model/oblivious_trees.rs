//! Flattened tree ensemble.
//!
//! All trees share one split array addressed by per-tree start offsets and
//! sizes, and one leaf value block. Balanced trees store one bin feature id
//! per level and `2^depth * approx_dimension` leaf values. General trees
//! store one entry per node in three parallel arrays: the bin feature id,
//! the [`StepNode`] with relative child offsets, and the index of the node's
//! value in the leaf value block ([`NO_LEAF_VALUE`] when the node has none).

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::core::constants::{MAX_OBLIVIOUS_TREE_DEPTH, MAX_STEP_NODE_OFFSET, NO_LEAF_VALUE};
use crate::core::error::{EnsembleError, Result};
use crate::core::types::BinFeatureId;
use crate::dataset::FeaturesLayout;
use crate::ensure;
use crate::model::features::{CatFeature, CtrFeature, FloatFeature, OneHotFeature};
use crate::model::split::ModelSplit;

/// Relative offsets from a general tree node to its children.
///
/// An offset of 0 means the walk stops at this node when that branch is taken.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepNode {
    pub left_subtree_diff: u16,
    pub right_subtree_diff: u16,
}

static_assertions::assert_eq_size!(StepNode, u32);

impl StepNode {
    pub fn new(left_subtree_diff: u16, right_subtree_diff: u16) -> Self {
        StepNode {
            left_subtree_diff,
            right_subtree_diff,
        }
    }

    /// Both offsets are zero.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.left_subtree_diff == 0 && self.right_subtree_diff == 0
    }

    /// Offset of the child selected by a split outcome.
    #[inline]
    pub fn diff(&self, go_right: bool) -> u16 {
        if go_right {
            self.right_subtree_diff
        } else {
            self.left_subtree_diff
        }
    }
}

/// Encode a child offset, failing when it does not fit.
pub(crate) fn step_offset(child: usize, parent: usize) -> Result<u16> {
    let offset = child - parent;
    ensure!(
        offset <= MAX_STEP_NODE_OFFSET,
        EnsembleError::StepNodeOffsetOverflow {
            offset,
            max: MAX_STEP_NODE_OFFSET,
        }
    );
    Ok(offset as u16)
}

/// Lookup tables derived from the persisted arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RuntimeData {
    first_leaf_offsets: Vec<usize>,
    tree_leaf_counts: Vec<usize>,
    float_feature_slots: Vec<Option<usize>>,
    cat_feature_slots: Vec<Option<usize>>,
}

/// Ensemble of flattened trees and the descriptors of the features they use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObliviousTrees {
    pub(crate) approx_dimension: usize,
    pub(crate) tree_splits: Vec<BinFeatureId>,
    pub(crate) tree_sizes: Vec<usize>,
    pub(crate) tree_start_offsets: Vec<usize>,
    pub(crate) non_symmetric_step_nodes: Vec<StepNode>,
    pub(crate) non_symmetric_node_id_to_leaf_id: Vec<u32>,
    pub(crate) leaf_values: Vec<f64>,
    /// Per tree, one weight per leaf or nothing
    pub(crate) leaf_weights: Vec<Vec<f64>>,
    pub(crate) float_features: Vec<FloatFeature>,
    pub(crate) cat_features: Vec<CatFeature>,
    pub(crate) one_hot_features: Vec<OneHotFeature>,
    pub(crate) ctr_features: Vec<CtrFeature>,
    /// Split behind every bin feature id
    pub(crate) bin_features: Vec<ModelSplit>,
    #[serde(skip)]
    pub(crate) runtime: RuntimeData,
}

fn feature_slots<I: Iterator<Item = u32>>(indices: I) -> Vec<Option<usize>> {
    let mut slots = Vec::new();
    for (slot, index) in indices.enumerate() {
        let index = index as usize;
        if index >= slots.len() {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(slot);
    }
    slots
}

impl ObliviousTrees {
    pub fn tree_count(&self) -> usize {
        self.tree_sizes.len()
    }

    pub fn approx_dimension(&self) -> usize {
        self.approx_dimension
    }

    /// Number of split array entries per tree (depth for balanced trees,
    /// node count for general trees).
    pub fn tree_sizes(&self) -> &[usize] {
        &self.tree_sizes
    }

    pub fn tree_start_offsets(&self) -> &[usize] {
        &self.tree_start_offsets
    }

    pub fn tree_splits(&self) -> &[BinFeatureId] {
        &self.tree_splits
    }

    pub fn non_symmetric_step_nodes(&self) -> &[StepNode] {
        &self.non_symmetric_step_nodes
    }

    pub fn non_symmetric_node_id_to_leaf_id(&self) -> &[u32] {
        &self.non_symmetric_node_id_to_leaf_id
    }

    pub fn leaf_values(&self) -> &[f64] {
        &self.leaf_values
    }

    pub fn leaf_weights(&self) -> &[Vec<f64>] {
        &self.leaf_weights
    }

    pub fn float_features(&self) -> &[FloatFeature] {
        &self.float_features
    }

    pub fn cat_features(&self) -> &[CatFeature] {
        &self.cat_features
    }

    pub fn one_hot_features(&self) -> &[OneHotFeature] {
        &self.one_hot_features
    }

    pub fn ctr_features(&self) -> &[CtrFeature] {
        &self.ctr_features
    }

    pub fn bin_features(&self) -> &[ModelSplit] {
        &self.bin_features
    }

    /// Balanced trees only; general trees carry step nodes.
    pub fn is_oblivious(&self) -> bool {
        self.non_symmetric_step_nodes.is_empty()
    }

    pub fn has_ctr_features(&self) -> bool {
        !self.ctr_features.is_empty()
    }

    /// Offset of each tree's first leaf value in the leaf value block.
    pub fn first_leaf_offsets(&self) -> &[usize] {
        &self.runtime.first_leaf_offsets
    }

    /// Number of leaves of a tree.
    pub fn tree_leaf_count(&self, tree_idx: usize) -> usize {
        self.runtime.tree_leaf_counts[tree_idx]
    }

    /// Float feature descriptor with the given internal index.
    pub fn float_feature(&self, internal_idx: u32) -> Option<&FloatFeature> {
        let slot = self.runtime.float_feature_slots.get(internal_idx as usize).copied().flatten()?;
        self.float_features.get(slot)
    }

    /// Categorical feature descriptor with the given internal index.
    pub fn cat_feature(&self, internal_idx: u32) -> Option<&CatFeature> {
        let slot = self.runtime.cat_feature_slots.get(internal_idx as usize).copied().flatten()?;
        self.cat_features.get(slot)
    }

    /// Number of float features some split refers to.
    pub fn used_float_feature_count(&self) -> usize {
        self.float_features.iter().filter(|f| f.is_used_in_model()).count()
    }

    /// Number of categorical features some split refers to.
    pub fn used_cat_feature_count(&self) -> usize {
        self.cat_features.iter().filter(|f| f.used_in_model).count()
    }

    /// Layout of the features the model was trained on.
    pub fn features_layout(&self) -> Result<FeaturesLayout> {
        FeaturesLayout::from_model_features(&self.float_features, &self.cat_features)
    }

    /// Turn `begin..end` into a checked tree range. `None` means up to the last tree.
    pub fn resolve_tree_range(&self, begin: usize, end: Option<usize>) -> Result<Range<usize>> {
        let tree_count = self.tree_count();
        let end = end.unwrap_or(tree_count);
        ensure!(
            end <= tree_count,
            EnsembleError::invalid_parameter(
                "tree_end",
                end.to_string(),
                format!("model has {} trees", tree_count)
            )
        );
        ensure!(
            begin <= end,
            EnsembleError::invalid_parameter(
                "tree_begin",
                begin.to_string(),
                format!("must not exceed tree_end = {}", end)
            )
        );
        Ok(begin..end)
    }

    /// Validate the persisted arrays and rebuild the derived lookup tables.
    pub fn update_runtime_data(&mut self) -> Result<()> {
        ensure!(
            self.approx_dimension > 0,
            EnsembleError::invalid_parameter("approx_dimension", "0", "must be positive")
        );
        let tree_count = self.tree_sizes.len();
        ensure!(
            self.tree_start_offsets.len() == tree_count,
            EnsembleError::dimension_mismatch(
                format!("{} tree start offsets", tree_count),
                self.tree_start_offsets.len().to_string()
            )
        );
        let mut expected_offset = 0;
        for (&start, &size) in self.tree_start_offsets.iter().zip(&self.tree_sizes) {
            ensure!(
                start == expected_offset,
                EnsembleError::invalid_parameter(
                    "tree_start_offsets",
                    start.to_string(),
                    format!("expected {}", expected_offset)
                )
            );
            expected_offset += size;
        }
        ensure!(
            expected_offset == self.tree_splits.len(),
            EnsembleError::dimension_mismatch(
                format!("{} tree splits", expected_offset),
                self.tree_splits.len().to_string()
            )
        );
        ensure!(
            self.leaf_weights.len() == tree_count,
            EnsembleError::dimension_mismatch(
                format!("leaf weights for {} trees", tree_count),
                self.leaf_weights.len().to_string()
            )
        );

        self.runtime.float_feature_slots = feature_slots(self.float_features.iter().map(|f| f.position.index));
        self.runtime.cat_feature_slots = feature_slots(self.cat_features.iter().map(|f| f.position.index));
        self.validate_bin_features()?;

        let (first_leaf_offsets, tree_leaf_counts) = if self.is_oblivious() {
            self.oblivious_leaf_layout()?
        } else {
            self.non_symmetric_leaf_layout()?
        };
        for (tree_idx, weights) in self.leaf_weights.iter().enumerate() {
            ensure!(
                weights.is_empty() || weights.len() == tree_leaf_counts[tree_idx],
                EnsembleError::dimension_mismatch(
                    format!("{} leaf weights in tree {}", tree_leaf_counts[tree_idx], tree_idx),
                    weights.len().to_string()
                )
            );
        }
        self.runtime.first_leaf_offsets = first_leaf_offsets;
        self.runtime.tree_leaf_counts = tree_leaf_counts;
        Ok(())
    }

    fn validate_bin_features(&self) -> Result<()> {
        let float_known = |idx: u32| self.runtime.float_feature_slots.get(idx as usize).copied().flatten().is_some();
        let cat_known = |idx: u32| self.runtime.cat_feature_slots.get(idx as usize).copied().flatten().is_some();
        for split in &self.bin_features {
            let known = match split {
                ModelSplit::Float(s) => float_known(s.float_feature),
                ModelSplit::OneHot(s) => cat_known(s.cat_feature_idx),
                ModelSplit::OnlineCtr(s) => {
                    let projection = &s.ctr.base.projection;
                    projection.cat_features.iter().all(|&idx| cat_known(idx))
                        && projection.bin_features.iter().all(|b| float_known(b.float_feature))
                        && projection.one_hot_features.iter().all(|o| cat_known(o.cat_feature_idx))
                }
            };
            ensure!(
                known,
                EnsembleError::invalid_parameter(
                    "bin_features",
                    split.to_string(),
                    "refers to a feature without descriptor"
                )
            );
        }
        Ok(())
    }

    fn check_bin_feature_id(&self, id: BinFeatureId) -> Result<()> {
        ensure!(
            (id as usize) < self.bin_features.len(),
            EnsembleError::index_out_of_bounds(id as usize, self.bin_features.len())
        );
        Ok(())
    }

    fn oblivious_leaf_layout(&self) -> Result<(Vec<usize>, Vec<usize>)> {
        ensure!(
            self.non_symmetric_node_id_to_leaf_id.is_empty(),
            EnsembleError::dimension_mismatch("no node values for balanced trees", "node values")
        );
        for &id in &self.tree_splits {
            self.check_bin_feature_id(id)?;
        }
        let mut first_leaf_offsets = Vec::with_capacity(self.tree_count());
        let mut tree_leaf_counts = Vec::with_capacity(self.tree_count());
        let mut offset = 0;
        for &depth in &self.tree_sizes {
            ensure!(
                depth <= MAX_OBLIVIOUS_TREE_DEPTH,
                EnsembleError::invalid_parameter(
                    "tree depth",
                    depth.to_string(),
                    format!("must not exceed {}", MAX_OBLIVIOUS_TREE_DEPTH)
                )
            );
            let leaf_count = 1usize << depth;
            first_leaf_offsets.push(offset);
            tree_leaf_counts.push(leaf_count);
            offset += leaf_count * self.approx_dimension;
        }
        ensure!(
            offset == self.leaf_values.len(),
            EnsembleError::dimension_mismatch(format!("{} leaf values", offset), self.leaf_values.len().to_string())
        );
        Ok((first_leaf_offsets, tree_leaf_counts))
    }

    fn non_symmetric_leaf_layout(&self) -> Result<(Vec<usize>, Vec<usize>)> {
        let node_count = self.tree_splits.len();
        ensure!(
            self.non_symmetric_step_nodes.len() == node_count
                && self.non_symmetric_node_id_to_leaf_id.len() == node_count,
            EnsembleError::dimension_mismatch(
                format!("{} step nodes and node values", node_count),
                format!(
                    "{} step nodes, {} node values",
                    self.non_symmetric_step_nodes.len(),
                    self.non_symmetric_node_id_to_leaf_id.len()
                )
            )
        );

        let dim = self.approx_dimension;
        let mut first_leaf_offsets = Vec::with_capacity(self.tree_count());
        let mut tree_leaf_counts = Vec::with_capacity(self.tree_count());
        let mut value_offset = 0;
        for (tree_idx, (&start, &size)) in self.tree_start_offsets.iter().zip(&self.tree_sizes).enumerate() {
            ensure!(
                size > 0,
                EnsembleError::malformed_tree_node(format!("tree {} has no nodes", tree_idx))
            );
            let end = start + size;
            let mut leaf_count = 0;
            for node in start..end {
                let step = self.non_symmetric_step_nodes[node];
                let value_idx = self.non_symmetric_node_id_to_leaf_id[node];
                if step.is_terminal() {
                    ensure!(
                        value_idx != NO_LEAF_VALUE,
                        EnsembleError::malformed_tree_node(format!("leaf node {} has no value", node))
                    );
                } else {
                    self.check_bin_feature_id(self.tree_splits[node])?;
                    for diff in [step.left_subtree_diff, step.right_subtree_diff] {
                        ensure!(
                            node + (diff as usize) < end,
                            EnsembleError::malformed_tree_node(format!(
                                "node {} steps outside of tree {}",
                                node, tree_idx
                            ))
                        );
                    }
                    ensure!(
                        (step.left_subtree_diff == 0 || step.right_subtree_diff == 0) == (value_idx != NO_LEAF_VALUE),
                        EnsembleError::malformed_tree_node(format!(
                            "split node {} must carry a value exactly when one child is a leaf",
                            node
                        ))
                    );
                }
                if value_idx != NO_LEAF_VALUE {
                    let value_idx = value_idx as usize;
                    let expected = value_offset + leaf_count * dim;
                    ensure!(
                        value_idx == expected,
                        EnsembleError::malformed_tree_node(format!(
                            "node {} value index is {}, expected {}",
                            node, value_idx, expected
                        ))
                    );
                    leaf_count += 1;
                }
            }
            first_leaf_offsets.push(value_offset);
            tree_leaf_counts.push(leaf_count);
            value_offset += leaf_count * dim;
        }
        ensure!(
            value_offset == self.leaf_values.len(),
            EnsembleError::dimension_mismatch(
                format!("{} leaf values", value_offset),
                self.leaf_values.len().to_string()
            )
        );
        Ok((first_leaf_offsets, tree_leaf_counts))
    }

    /// Rewrite balanced trees as general trees.
    ///
    /// Leaf values, leaf weights and leaf numbering are unchanged, so
    /// predictions and leaf indices are preserved. Does nothing for an
    /// ensemble that already holds general trees.
    pub fn convert_oblivious_to_asymmetric(&mut self) -> Result<()> {
        if !self.is_oblivious() {
            return Ok(());
        }
        let mut tree_splits = Vec::new();
        let mut step_nodes = Vec::new();
        let mut node_values = Vec::new();
        let mut tree_sizes = Vec::with_capacity(self.tree_count());
        let mut tree_start_offsets = Vec::with_capacity(self.tree_count());

        for tree_idx in 0..self.tree_count() {
            let start = self.tree_start_offsets[tree_idx];
            let splits = &self.tree_splits[start..start + self.tree_sizes[tree_idx]];
            let first_node = tree_splits.len();
            let mut flattener = ObliviousFlattener {
                splits,
                first_leaf_offset: self.runtime.first_leaf_offsets[tree_idx],
                approx_dimension: self.approx_dimension,
                tree_splits: &mut tree_splits,
                step_nodes: &mut step_nodes,
                node_values: &mut node_values,
            };
            flattener.emit(splits.len(), 0)?;
            tree_start_offsets.push(first_node);
            tree_sizes.push(tree_splits.len() - first_node);
        }

        self.tree_splits = tree_splits;
        self.non_symmetric_step_nodes = step_nodes;
        self.non_symmetric_node_id_to_leaf_id = node_values;
        self.tree_sizes = tree_sizes;
        self.tree_start_offsets = tree_start_offsets;
        log::debug!(
            "Converted {} balanced trees into {} general tree nodes",
            self.tree_count(),
            self.tree_splits.len()
        );
        self.update_runtime_data()
    }

    /// Keep only the trees in `begin..end`.
    pub fn truncate(&mut self, begin: usize, end: usize) -> Result<()> {
        let range = self.resolve_tree_range(begin, Some(end))?;
        let total_values = self.leaf_values.len();
        let value_begin = self.runtime.first_leaf_offsets.get(range.start).copied().unwrap_or(total_values);
        let value_end = self.runtime.first_leaf_offsets.get(range.end).copied().unwrap_or(total_values);
        let split_begin = self.tree_start_offsets.get(range.start).copied().unwrap_or(self.tree_splits.len());
        let split_end = self.tree_start_offsets.get(range.end).copied().unwrap_or(self.tree_splits.len());

        if !self.is_oblivious() {
            self.non_symmetric_step_nodes = self.non_symmetric_step_nodes[split_begin..split_end].to_vec();
            self.non_symmetric_node_id_to_leaf_id = self.non_symmetric_node_id_to_leaf_id[split_begin..split_end]
                .iter()
                .map(|&idx| if idx == NO_LEAF_VALUE { idx } else { idx - value_begin as u32 })
                .collect();
        }
        self.tree_splits = self.tree_splits[split_begin..split_end].to_vec();
        self.tree_sizes = self.tree_sizes[range.clone()].to_vec();
        self.tree_start_offsets = self.tree_start_offsets[range.clone()]
            .iter()
            .map(|&offset| offset - split_begin)
            .collect();
        self.leaf_values = self.leaf_values[value_begin..value_end].to_vec();
        self.leaf_weights = self.leaf_weights[range].to_vec();
        self.update_runtime_data()
    }
}

/// Depth-first emission of one balanced tree as general tree nodes.
struct ObliviousFlattener<'a> {
    splits: &'a [BinFeatureId],
    first_leaf_offset: usize,
    approx_dimension: usize,
    tree_splits: &'a mut Vec<BinFeatureId>,
    step_nodes: &'a mut Vec<StepNode>,
    node_values: &'a mut Vec<u32>,
}

impl ObliviousFlattener<'_> {
    /// Emit the subtree of the remaining `depth` levels whose leaves share the
    /// low bits `leaf_base`; the root tests the deepest remaining level.
    fn emit(&mut self, depth: usize, leaf_base: usize) -> Result<usize> {
        let node_id = self.step_nodes.len();
        if depth == 0 {
            self.tree_splits.push(0);
            self.step_nodes.push(StepNode::default());
            self.node_values
                .push((self.first_leaf_offset + leaf_base * self.approx_dimension) as u32);
            return Ok(node_id);
        }
        let level = depth - 1;
        self.tree_splits.push(self.splits[level]);
        self.step_nodes.push(StepNode::default());
        self.node_values.push(NO_LEAF_VALUE);
        let left = self.emit(level, leaf_base)?;
        let right = self.emit(level, leaf_base | (1 << level))?;
        self.step_nodes[node_id] = StepNode::new(step_offset(left, node_id)?, step_offset(right, node_id)?);
        Ok(node_id)
    }
}
