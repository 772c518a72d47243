//! Common test utilities for tree ensemble integration tests.

#![allow(dead_code)]

use ndarray::Array2;
use rand::prelude::*;
use tree_ensemble::*;

/// Float feature descriptors at flat indices `0..count`, named `f{i}`.
pub fn float_features(count: u32) -> Vec<FloatFeature> {
    (0..count)
        .map(|idx| FloatFeature::new(FeaturePosition::new(idx, idx), format!("f{}", idx)))
        .collect()
}

/// Layout of `count` float features matching [`float_features`].
pub fn float_layout(count: u32) -> FeaturesLayout {
    let names: Vec<String> = (0..count).map(|idx| format!("f{}", idx)).collect();
    FeaturesLayout::new(count, &[], &[], &names).unwrap()
}

/// Random float matrix, a few values are NaN.
pub fn random_features(rng: &mut StdRng, object_count: usize, feature_count: usize) -> Array2<f32> {
    Array2::from_shape_fn((object_count, feature_count), |_| {
        if rng.gen_bool(0.05) {
            f32::NAN
        } else {
            rng.gen_range(-1.0..1.0)
        }
    })
}

/// Batch of float-only objects.
pub fn float_objects(values: Array2<f32>) -> ObjectsData {
    let object_count = values.nrows();
    let layout = float_layout(values.ncols() as u32);
    ObjectsData::new(layout, values, Array2::zeros((object_count, 0))).unwrap()
}

pub fn random_float_split(rng: &mut StdRng, feature_count: u32) -> ModelSplit {
    // Coarse borders so that distinct trees share splits.
    let border = (rng.gen_range(-4..4) as f32) * 0.25;
    ModelSplit::float(rng.gen_range(0..feature_count), border)
}

/// Balanced tree description: splits by level and leaf-major values.
#[derive(Debug, Clone)]
pub struct BalancedTree {
    pub splits: Vec<ModelSplit>,
    pub leaf_values: Vec<f64>,
}

pub fn random_balanced_trees(
    rng: &mut StdRng,
    tree_count: usize,
    max_depth: usize,
    feature_count: u32,
    dimension: usize,
) -> Vec<BalancedTree> {
    (0..tree_count)
        .map(|_| {
            let depth = rng.gen_range(0..=max_depth);
            let splits = (0..depth).map(|_| random_float_split(rng, feature_count)).collect();
            let leaf_values = (0..(1usize << depth) * dimension)
                .map(|_| rng.gen_range(-1.0..1.0))
                .collect();
            BalancedTree { splits, leaf_values }
        })
        .collect()
}

pub fn build_balanced(trees: &[BalancedTree], feature_count: u32, dimension: usize) -> ObliviousTrees {
    let mut builder = ObliviousTreeBuilder::new(float_features(feature_count), vec![], dimension).unwrap();
    for tree in trees {
        builder.add_tree_flat(&tree.splits, &tree.leaf_values, &[]).unwrap();
    }
    builder.build().unwrap()
}

/// Float split outcome of a row, NaN goes left.
pub fn eval_float_split(split: &ModelSplit, row: &[f32]) -> bool {
    match split {
        ModelSplit::Float(s) => {
            let value = row[s.float_feature as usize];
            !value.is_nan() && value > s.border
        }
        other => panic!("unexpected split {}", other),
    }
}

/// Leaf index of a row in a balanced tree.
pub fn balanced_leaf(tree: &BalancedTree, row: &[f32]) -> usize {
    tree.splits
        .iter()
        .enumerate()
        .map(|(level, split)| (eval_float_split(split, row) as usize) << level)
        .sum()
}

/// Raw prediction of a row computed directly from tree descriptions.
pub fn reference_balanced(trees: &[BalancedTree], row: &[f32], dimension: usize) -> Vec<f64> {
    let mut result = vec![0.0; dimension];
    for tree in trees {
        let leaf = balanced_leaf(tree, row);
        for (dim, value) in result.iter_mut().enumerate() {
            *value += tree.leaf_values[leaf * dimension + dim];
        }
    }
    result
}

pub fn random_general_tree(rng: &mut StdRng, depth: usize, feature_count: u32) -> NonSymmetricTreeNode {
    if depth == 0 || rng.gen_bool(0.3) {
        return NonSymmetricTreeNode::leaf(rng.gen_range(-1.0..1.0));
    }
    NonSymmetricTreeNode::split(
        random_float_split(rng, feature_count),
        random_general_tree(rng, depth - 1, feature_count),
        random_general_tree(rng, depth - 1, feature_count),
    )
}

/// Value of the leaf a row reaches in a general tree.
pub fn reference_general(node: &NonSymmetricTreeNode, row: &[f32]) -> f64 {
    match &node.split_condition {
        Some(split) => {
            let child = if eval_float_split(split, row) {
                &node.right
            } else {
                &node.left
            };
            reference_general(child.as_deref().unwrap(), row)
        }
        None => match &node.value {
            Some(NodeValue::Scalar(value)) => *value,
            Some(NodeValue::Vector(values)) => values[0],
            None => panic!("leaf without value"),
        },
    }
}

pub fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{} != {}", a, e);
    }
}
