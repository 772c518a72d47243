//! Builder for ensembles of general (non-symmetric) trees.
//!
//! Trees arrive as owned node graphs and leave as flat arrays. Nodes are
//! emitted depth-first, so every child sits after its parent and is reached
//! through a positive relative offset.

use std::collections::BTreeSet;

use crate::core::constants::NO_LEAF_VALUE;
use crate::core::error::{EnsembleError, Result};
use crate::ensure;
use crate::model::builder::{collect_split, CommonModelBuilder};
use crate::model::features::{CatFeature, FloatFeature};
use crate::model::oblivious_trees::{step_offset, ObliviousTrees, StepNode};
use crate::model::split::ModelSplit;

/// Value stored in a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// Only valid for one-dimensional models
    Scalar(f64),
    /// One value per output dimension
    Vector(Vec<f64>),
}

/// Node of a tree under construction: a split with two children or a leaf.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NonSymmetricTreeNode {
    pub split_condition: Option<ModelSplit>,
    pub left: Option<Box<NonSymmetricTreeNode>>,
    pub right: Option<Box<NonSymmetricTreeNode>>,
    pub value: Option<NodeValue>,
    pub node_weight: Option<f64>,
}

impl NonSymmetricTreeNode {
    /// Leaf of a one-dimensional model.
    pub fn leaf(value: f64) -> Self {
        NonSymmetricTreeNode {
            value: Some(NodeValue::Scalar(value)),
            ..Default::default()
        }
    }

    /// Leaf with one value per output dimension.
    pub fn leaf_vector(values: Vec<f64>) -> Self {
        NonSymmetricTreeNode {
            value: Some(NodeValue::Vector(values)),
            ..Default::default()
        }
    }

    /// Split node. `right` is taken when the condition holds.
    pub fn split(condition: ModelSplit, left: NonSymmetricTreeNode, right: NonSymmetricTreeNode) -> Self {
        NonSymmetricTreeNode {
            split_condition: Some(condition),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.node_weight = Some(weight);
        self
    }

    pub fn is_split_node(&self) -> bool {
        self.split_condition.is_some()
    }

    /// A split node has both children and no value or weight; a leaf has a
    /// value and no children.
    pub fn validate(&self) -> Result<()> {
        if self.is_split_node() {
            ensure!(
                self.left.is_some() && self.right.is_some(),
                EnsembleError::malformed_tree_node("split node must have both children")
            );
            ensure!(
                self.value.is_none() && self.node_weight.is_none(),
                EnsembleError::malformed_tree_node("split node must not carry a value or a weight")
            );
        } else {
            ensure!(
                self.left.is_none() && self.right.is_none(),
                EnsembleError::malformed_tree_node("leaf node must not have children")
            );
            ensure!(
                self.value.is_some(),
                EnsembleError::malformed_tree_node("leaf node must carry a value")
            );
        }
        Ok(())
    }

    fn children(&self) -> Result<(&NonSymmetricTreeNode, &NonSymmetricTreeNode)> {
        match (self.left.as_deref(), self.right.as_deref()) {
            (Some(left), Some(right)) => Ok((left, right)),
            _ => Err(EnsembleError::malformed_tree_node("split node must have both children")),
        }
    }
}

/// Accumulates general trees and flattens them into an [`ObliviousTrees`].
#[derive(Debug, Clone)]
pub struct NonSymmetricTreeBuilder {
    common: CommonModelBuilder,
    split_set: BTreeSet<ModelSplit>,
    flat_splits: Vec<Option<ModelSplit>>,
    step_nodes: Vec<StepNode>,
    node_values: Vec<u32>,
    leaf_values: Vec<f64>,
    leaf_weights: Vec<Vec<f64>>,
    tree_sizes: Vec<usize>,
    tree_start_offsets: Vec<usize>,
}

/// Per-tree state collected during one `add_tree` call.
#[derive(Default)]
struct TreeScratch {
    splits: BTreeSet<ModelSplit>,
    weights: Vec<f64>,
    leaf_count: usize,
}

impl NonSymmetricTreeBuilder {
    /// Feature descriptors must be sorted by strictly increasing flat index.
    pub fn new(
        float_features: Vec<FloatFeature>,
        cat_features: Vec<CatFeature>,
        approx_dimension: usize,
    ) -> Result<Self> {
        Ok(NonSymmetricTreeBuilder {
            common: CommonModelBuilder::new(float_features, cat_features, approx_dimension)?,
            split_set: BTreeSet::new(),
            flat_splits: Vec::new(),
            step_nodes: Vec::new(),
            node_values: Vec::new(),
            leaf_values: Vec::new(),
            leaf_weights: Vec::new(),
            tree_sizes: Vec::new(),
            tree_start_offsets: Vec::new(),
        })
    }

    pub fn tree_count(&self) -> usize {
        self.tree_sizes.len()
    }

    /// Flatten one tree and append it to the ensemble.
    ///
    /// Either every leaf of the tree has a weight or none has. On failure
    /// the builder is left as it was before the call.
    pub fn add_tree(&mut self, head: &NonSymmetricTreeNode) -> Result<()> {
        let node_begin = self.step_nodes.len();
        let value_begin = self.leaf_values.len();
        let mut scratch = TreeScratch::default();

        let result = self.add_tree_node(head, &mut scratch).and_then(|_| {
            ensure!(
                scratch.weights.is_empty() || scratch.weights.len() == scratch.leaf_count,
                EnsembleError::malformed_tree_node(format!(
                    "{} of {} leaves carry a weight",
                    scratch.weights.len(),
                    scratch.leaf_count
                ))
            );
            Ok(())
        });
        if let Err(err) = result {
            self.flat_splits.truncate(node_begin);
            self.step_nodes.truncate(node_begin);
            self.node_values.truncate(node_begin);
            self.leaf_values.truncate(value_begin);
            return Err(err);
        }

        self.split_set.append(&mut scratch.splits);
        self.leaf_weights.push(scratch.weights);
        self.tree_start_offsets.push(node_begin);
        self.tree_sizes.push(self.step_nodes.len() - node_begin);
        log::debug!(
            "Added tree {} with {} nodes and {} leaves",
            self.tree_sizes.len() - 1,
            self.step_nodes.len() - node_begin,
            scratch.leaf_count
        );
        Ok(())
    }

    fn add_tree_node(&mut self, node: &NonSymmetricTreeNode, scratch: &mut TreeScratch) -> Result<usize> {
        node.validate()?;
        let node_id = self.step_nodes.len();
        let condition = match &node.split_condition {
            Some(condition) => condition,
            None => {
                self.flat_splits.push(None);
                self.step_nodes.push(StepNode::default());
                self.insert_node_value(node, scratch)?;
                return Ok(node_id);
            }
        };

        collect_split(&mut scratch.splits, condition);
        self.flat_splits.push(Some(condition.clone()));
        self.step_nodes.push(StepNode::default());
        let (left, right) = node.children()?;

        let step = if left.is_split_node() == right.is_split_node() {
            self.node_values.push(NO_LEAF_VALUE);
            let left_id = self.add_tree_node(left, scratch)?;
            let right_id = self.add_tree_node(right, scratch)?;
            StepNode::new(step_offset(left_id, node_id)?, step_offset(right_id, node_id)?)
        } else if right.is_split_node() {
            left.validate()?;
            self.insert_node_value(left, scratch)?;
            let right_id = self.add_tree_node(right, scratch)?;
            StepNode::new(0, step_offset(right_id, node_id)?)
        } else {
            right.validate()?;
            self.insert_node_value(right, scratch)?;
            let left_id = self.add_tree_node(left, scratch)?;
            StepNode::new(step_offset(left_id, node_id)?, 0)
        };
        self.step_nodes[node_id] = step;
        Ok(node_id)
    }

    fn insert_node_value(&mut self, node: &NonSymmetricTreeNode, scratch: &mut TreeScratch) -> Result<()> {
        let approx_dimension = self.common.approx_dimension();
        let value_idx = self.leaf_values.len();
        ensure!(
            value_idx < NO_LEAF_VALUE as usize,
            EnsembleError::index_out_of_bounds(value_idx, NO_LEAF_VALUE as usize)
        );
        match &node.value {
            Some(NodeValue::Scalar(value)) => {
                ensure!(
                    approx_dimension == 1,
                    EnsembleError::dimension_mismatch(
                        format!("{} leaf values", approx_dimension),
                        "single value for multidimensional model"
                    )
                );
                self.leaf_values.push(*value);
            }
            Some(NodeValue::Vector(values)) => {
                ensure!(
                    values.len() == approx_dimension,
                    EnsembleError::dimension_mismatch(
                        format!("{} leaf values", approx_dimension),
                        values.len().to_string()
                    )
                );
                self.leaf_values.extend_from_slice(values);
            }
            None => return Err(EnsembleError::malformed_tree_node("leaf node must carry a value")),
        }
        self.node_values.push(value_idx as u32);
        if let Some(weight) = node.node_weight {
            scratch.weights.push(weight);
        }
        scratch.leaf_count += 1;
        Ok(())
    }

    /// Index the splits of all added trees and produce the ensemble.
    ///
    /// Leaf slots get bin feature id 0. The builder is left untouched.
    pub fn build(&self) -> Result<ObliviousTrees> {
        let indexed = self.common.process_splits_set(&self.split_set)?;
        let tree_splits = self
            .flat_splits
            .iter()
            .map(|split| match split {
                Some(split) => indexed.bin_feature_index.require(split),
                None => Ok(0),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut trees = ObliviousTrees {
            approx_dimension: self.common.approx_dimension(),
            tree_splits,
            tree_sizes: self.tree_sizes.clone(),
            tree_start_offsets: self.tree_start_offsets.clone(),
            non_symmetric_step_nodes: self.step_nodes.clone(),
            non_symmetric_node_id_to_leaf_id: self.node_values.clone(),
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
            "Built {} general trees with {} nodes over {} bin features",
            trees.tree_count(),
            trees.tree_splits().len(),
            trees.bin_features().len()
        );
        Ok(trees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::features::FeaturePosition;

    fn builder(approx_dimension: usize) -> NonSymmetricTreeBuilder {
        let float_features = (0..2)
            .map(|i| FloatFeature::new(FeaturePosition::new(i, i), format!("f{}", i)))
            .collect();
        NonSymmetricTreeBuilder::new(float_features, vec![], approx_dimension).unwrap()
    }

    fn unbalanced_tree() -> NonSymmetricTreeNode {
        // f0 > 0.5 ? (f1 > 0.5 ? 4 : 3) : 1
        NonSymmetricTreeNode::split(
            ModelSplit::float(0, 0.5),
            NonSymmetricTreeNode::leaf(1.0),
            NonSymmetricTreeNode::split(
                ModelSplit::float(1, 0.5),
                NonSymmetricTreeNode::leaf(3.0),
                NonSymmetricTreeNode::leaf(4.0),
            ),
        )
    }

    #[test]
    fn test_validate() {
        assert!(NonSymmetricTreeNode::leaf(1.0).validate().is_ok());
        assert!(NonSymmetricTreeNode::default().validate().is_err());

        let mut split = unbalanced_tree();
        split.value = Some(NodeValue::Scalar(1.0));
        assert_eq!(split.validate().unwrap_err().category(), "malformed_tree_node");

        let mut split = unbalanced_tree();
        split.right = None;
        assert!(split.validate().is_err());
    }

    #[test]
    fn test_leaf_value_stored_at_split_slot() {
        let mut builder = builder(1);
        builder.add_tree(&unbalanced_tree()).unwrap();
        let model = builder.build().unwrap();

        assert_eq!(model.tree_sizes(), &[4]);
        assert_eq!(
            model.non_symmetric_step_nodes(),
            &[StepNode::new(0, 1), StepNode::new(1, 2), StepNode::new(0, 0), StepNode::new(0, 0)]
        );
        assert_eq!(model.non_symmetric_node_id_to_leaf_id(), &[0, NO_LEAF_VALUE, 1, 2]);
        assert_eq!(model.leaf_values(), &[1.0, 3.0, 4.0]);
        assert_eq!(model.tree_splits(), &[0, 1, 0, 0]);
        assert_eq!(model.tree_leaf_count(0), 3);
    }

    #[test]
    fn test_single_leaf_tree() {
        let mut builder = builder(1);
        builder.add_tree(&NonSymmetricTreeNode::leaf(5.0)).unwrap();
        let model = builder.build().unwrap();
        assert!(!model.is_oblivious());
        assert_eq!(model.tree_sizes(), &[1]);
        assert!(model.bin_features().is_empty());
    }

    #[test]
    fn test_value_dimension_rules() {
        let mut builder = builder(2);
        let err = builder.add_tree(&NonSymmetricTreeNode::leaf(1.0)).unwrap_err();
        assert_eq!(err.category(), "dimension_mismatch");
        assert!(builder.add_tree(&NonSymmetricTreeNode::leaf_vector(vec![1.0])).is_err());
        assert!(builder.add_tree(&NonSymmetricTreeNode::leaf_vector(vec![1.0, 2.0])).is_ok());
        assert_eq!(builder.tree_count(), 1);
    }

    #[test]
    fn test_failed_tree_leaves_builder_unchanged() {
        let mut builder = builder(1);
        builder.add_tree(&NonSymmetricTreeNode::leaf(1.0)).unwrap();
        let before = builder.build().unwrap();

        let broken = NonSymmetricTreeNode::split(
            ModelSplit::float(1, 9.0),
            NonSymmetricTreeNode::leaf(1.0),
            NonSymmetricTreeNode::leaf_vector(vec![1.0, 2.0]),
        );
        assert!(builder.add_tree(&broken).is_err());
        assert_eq!(builder.tree_count(), 1);
        assert_eq!(builder.build().unwrap(), before);
    }

    #[test]
    fn test_partial_weights_rejected() {
        let mut builder = builder(1);
        let tree = NonSymmetricTreeNode::split(
            ModelSplit::float(0, 0.5),
            NonSymmetricTreeNode::leaf(1.0).with_weight(2.0),
            NonSymmetricTreeNode::leaf(2.0),
        );
        assert!(builder.add_tree(&tree).is_err());

        let tree = NonSymmetricTreeNode::split(
            ModelSplit::float(0, 0.5),
            NonSymmetricTreeNode::leaf(1.0).with_weight(2.0),
            NonSymmetricTreeNode::leaf(2.0).with_weight(3.0),
        );
        builder.add_tree(&tree).unwrap();
        let model = builder.build().unwrap();
        assert_eq!(model.leaf_weights(), &[vec![2.0, 3.0]]);
    }

    #[test]
    fn test_offset_overflow_fails_fast() {
        // The root's right child follows the whole left subtree.
        fn full_tree(depth: usize) -> NonSymmetricTreeNode {
            if depth == 0 {
                NonSymmetricTreeNode::leaf(0.0)
            } else {
                NonSymmetricTreeNode::split(
                    ModelSplit::float(0, depth as f32),
                    full_tree(depth - 1),
                    full_tree(depth - 1),
                )
            }
        }
        let mut builder = builder(1);
        let err = builder.add_tree(&full_tree(16)).unwrap_err();
        assert!(matches!(err, EnsembleError::StepNodeOffsetOverflow { .. }));
        assert_eq!(builder.tree_count(), 0);

        builder.add_tree(&full_tree(15)).unwrap();
        assert_eq!(builder.build().unwrap().tree_leaf_count(0), 1 << 15);
    }
}
