//! End-to-end evaluation of balanced and general tree ensembles.

use ndarray::{array, Array2};
use rand::prelude::*;
use tree_ensemble::*;

mod common;
use common::*;

fn raw(model: &ObliviousTrees, objects: &ObjectsData, begin: usize, end: Option<usize>) -> Array2<f64> {
    apply_model_multi(
        model,
        objects,
        PredictionType::RawFormulaVal,
        begin,
        end,
        &ApplyConfig::default(),
    )
    .unwrap()
}

#[test]
fn test_depth_one_tree() {
    assert!(tree_ensemble::init().is_ok());

    let mut builder = ObliviousTreeBuilder::new(float_features(1), vec![], 1).unwrap();
    builder
        .add_tree_flat(&[ModelSplit::float(0, 1.5)], &[10.0, 20.0], &[])
        .unwrap();
    let model = builder.build().unwrap();
    let objects = float_objects(array![[1.0f32], [2.0]]);

    assert_eq!(raw(&model, &objects, 0, None), array![[10.0], [20.0]]);
    let leaves = calc_leaf_indexes_multi(&model, &objects, 0, None, &ApplyConfig::default()).unwrap();
    assert_eq!(leaves, array![[0u32], [1]]);
}

#[test]
fn test_leaf_index_is_binary_encoding_of_split_outcomes() {
    for depth in 0..=6usize {
        let splits: Vec<ModelSplit> = (0..depth as u32).map(|j| ModelSplit::float(j, 0.5)).collect();
        let leaf_count = 1usize << depth;
        let leaf_values: Vec<f64> = (0..leaf_count).map(|leaf| leaf as f64).collect();

        let feature_count = depth.max(1) as u32;
        let mut builder = ObliviousTreeBuilder::new(float_features(feature_count), vec![], 1).unwrap();
        builder.add_tree_flat(&splits, &leaf_values, &[]).unwrap();
        let model = builder.build().unwrap();

        let values = Array2::from_shape_fn((leaf_count, feature_count as usize), |(leaf, j)| {
            ((leaf >> j) & 1) as f32
        });
        let objects = float_objects(values);

        let predictions = raw(&model, &objects, 0, None);
        let leaves = calc_leaf_indexes_multi(&model, &objects, 0, None, &ApplyConfig::default()).unwrap();
        for leaf in 0..leaf_count {
            assert_eq!(predictions[[leaf, 0]], leaf as f64, "depth {}", depth);
            assert_eq!(leaves[[leaf, 0]], leaf as u32, "depth {}", depth);
        }
    }
}

#[test]
fn test_balanced_ensemble_matches_reference() {
    let mut rng = StdRng::seed_from_u64(42);
    let feature_count = 5;
    for dimension in [1usize, 3] {
        let trees = random_balanced_trees(&mut rng, 20, 6, feature_count, dimension);
        let model = build_balanced(&trees, feature_count, dimension);
        let values = random_features(&mut rng, 300, feature_count as usize);
        let objects = float_objects(values.clone());

        let predictions = raw(&model, &objects, 0, None);
        assert_eq!(predictions.dim(), (300, dimension));
        for (row, prediction) in values.rows().into_iter().zip(predictions.rows()) {
            let row = row.to_vec();
            assert_close(&prediction.to_vec(), &reference_balanced(&trees, &row, dimension));
        }

        let evaluator = ModelEvaluator::new(&model).unwrap();
        let single = evaluator.calc_flat_single(&values.row(7).to_vec(), 0..model.tree_count()).unwrap();
        assert_close(&single, &predictions.row(7).to_vec());
    }
}

#[test]
fn test_tree_range_is_additive() {
    let mut rng = StdRng::seed_from_u64(7);
    let trees = random_balanced_trees(&mut rng, 12, 4, 3, 1);
    let model = build_balanced(&trees, 3, 1);
    let objects = float_objects(random_features(&mut rng, 50, 3));

    let all = raw(&model, &objects, 0, None);
    let head = raw(&model, &objects, 0, Some(5));
    let tail = raw(&model, &objects, 5, Some(12));
    let sum = &head + &tail;
    for (a, b) in all.iter().zip(sum.iter()) {
        assert!((a - b).abs() < 1e-9);
    }

    let mut truncated = model.clone();
    truncated.truncate(5, 12).unwrap();
    assert_eq!(truncated.tree_count(), 7);
    let truncated_raw = raw(&truncated, &objects, 0, None);
    for (a, b) in truncated_raw.iter().zip(tail.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn test_general_trees_match_reference() {
    let mut rng = StdRng::seed_from_u64(2024);
    let feature_count = 4;
    let heads: Vec<NonSymmetricTreeNode> = (0..15)
        .map(|_| random_general_tree(&mut rng, 6, feature_count))
        .collect();

    let mut builder = NonSymmetricTreeBuilder::new(float_features(feature_count), vec![], 1).unwrap();
    for head in &heads {
        builder.add_tree(head).unwrap();
    }
    let model = builder.build().unwrap();
    assert!(!model.is_oblivious());

    let values = random_features(&mut rng, 200, feature_count as usize);
    let objects = float_objects(values.clone());
    let predictions = raw(&model, &objects, 0, None);
    let leaves = calc_leaf_indexes_multi(&model, &objects, 0, None, &ApplyConfig::default()).unwrap();

    for (object_idx, row) in values.rows().into_iter().enumerate() {
        let row = row.to_vec();
        let expected: f64 = heads.iter().map(|head| reference_general(head, &row)).sum();
        assert!((predictions[[object_idx, 0]] - expected).abs() < 1e-9);
        for tree_idx in 0..model.tree_count() {
            assert!((leaves[[object_idx, tree_idx]] as usize) < model.tree_leaf_count(tree_idx));
        }
    }

    let mut cursor = LeafIndexCalcerOnPool::new(&model, &objects, 0, None).unwrap();
    let mut object_idx = 0;
    while cursor.can_get() {
        assert_eq!(cursor.get(), leaves.row(object_idx).to_vec());
        object_idx += 1;
        cursor.next();
    }
    assert_eq!(object_idx, 200);
}

#[test]
fn test_conversion_preserves_predictions_and_leaves() {
    let mut rng = StdRng::seed_from_u64(99);
    let feature_count = 4;
    let trees = random_balanced_trees(&mut rng, 10, 5, feature_count, 2);
    let model = build_balanced(&trees, feature_count, 2);
    let objects = float_objects(random_features(&mut rng, 150, feature_count as usize));

    let mut converted = model.clone();
    converted.convert_oblivious_to_asymmetric().unwrap();
    assert!(!converted.is_oblivious());
    assert_eq!(converted.leaf_values(), model.leaf_values());

    assert_eq!(raw(&converted, &objects, 0, None), raw(&model, &objects, 0, None));
    let config = ApplyConfig::default();
    assert_eq!(
        calc_leaf_indexes_multi(&converted, &objects, 0, None, &config).unwrap(),
        calc_leaf_indexes_multi(&model, &objects, 0, None, &config).unwrap()
    );
}

#[test]
fn test_results_do_not_depend_on_parallelism() {
    let mut rng = StdRng::seed_from_u64(5);
    let trees = random_balanced_trees(&mut rng, 8, 4, 3, 1);
    let model = build_balanced(&trees, 3, 1);
    let objects = float_objects(random_features(&mut rng, 1000, 3));

    let sequential = ApplyConfigBuilder::new().thread_count(1).build().unwrap();
    let expected = apply_model(&model, &objects, &sequential).unwrap();
    for (threads, block_size) in [(2, 7), (4, 128), (0, 1000)] {
        let config = ApplyConfigBuilder::new()
            .thread_count(threads)
            .block_size(block_size)
            .build()
            .unwrap();
        assert_eq!(apply_model(&model, &objects, &config).unwrap(), expected);

        let calcer = ModelCalcerOnPool::new(&model, &objects, &config).unwrap();
        assert_eq!(
            calcer.apply_model_multi(PredictionType::RawFormulaVal, 0, None).unwrap(),
            expected
        );
    }
}

#[test]
fn test_multiclass_prediction_types() {
    let mut builder = ObliviousTreeBuilder::new(float_features(1), vec![], 3).unwrap();
    builder
        .add_tree(
            &[ModelSplit::float(0, 0.0)],
            &[vec![1.0, -1.0], vec![0.0, 0.0], vec![-1.0, 2.0]],
            &[],
        )
        .unwrap();
    let model = builder.build().unwrap();
    let objects = float_objects(array![[-1.0f32], [1.0]]);
    let config = ApplyConfig::default();

    let raw = apply_model_multi(&model, &objects, PredictionType::RawFormulaVal, 0, None, &config).unwrap();
    assert_eq!(raw, array![[1.0, 0.0, -1.0], [-1.0, 0.0, 2.0]]);

    let classes = apply_model_multi(&model, &objects, PredictionType::Class, 0, None, &config).unwrap();
    assert_eq!(classes, array![[0.0], [2.0]]);

    let probabilities = apply_model_multi(&model, &objects, PredictionType::Probability, 0, None, &config).unwrap();
    for row in probabilities.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_empty_ensemble_predicts_zero() {
    let builder = ObliviousTreeBuilder::new(float_features(2), vec![], 1).unwrap();
    let model = builder.build().unwrap();
    let objects = float_objects(array![[0.5f32, 0.5], [1.0, -1.0]]);
    assert_eq!(raw(&model, &objects, 0, None), array![[0.0], [0.0]]);
    let leaves = calc_leaf_indexes_multi(&model, &objects, 0, None, &ApplyConfig::default()).unwrap();
    assert_eq!(leaves.dim(), (2, 0));
}

/// Objects over three binary-ish features: f0 in {0, 3}, f1 and f2 in {0, 1}.
fn mixed_tree_objects() -> ObjectsData {
    float_objects(array![
        [0.0f32, 0.0, 0.0],
        [3.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [3.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [3.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [3.0, 1.0, 1.0],
    ])
}

/// Three general trees: leaf-left/split-right, both leaves, split-left/leaf-right.
fn mixed_general_model() -> anyhow::Result<ObliviousTrees> {
    use NonSymmetricTreeNode as Node;

    let mut builder = NonSymmetricTreeBuilder::new(float_features(3), vec![], 1)?;
    builder.add_tree(&Node::split(
        ModelSplit::float(0, 0.5),
        Node::split(ModelSplit::float(1, 0.5), Node::leaf(1.0), Node::leaf(2.0)),
        Node::leaf(3.0),
    ))?;
    builder.add_tree(&Node::split(ModelSplit::float(2, 0.5), Node::leaf(0.0), Node::leaf(10.0)))?;
    builder.add_tree(&Node::split(
        ModelSplit::float(0, 0.5),
        Node::leaf(100.0),
        Node::split(ModelSplit::float(1, 0.5), Node::leaf(200.0), Node::leaf(300.0)),
    ))?;
    Ok(builder.build()?)
}

fn check_mixed_general_model(model: &ObliviousTrees) -> anyhow::Result<()> {
    let expected_values = [101.0, 203.0, 102.0, 303.0, 111.0, 213.0, 112.0, 313.0];
    let expected_leaves: [[u32; 3]; 8] = [
        [1, 0, 0],
        [0, 0, 1],
        [2, 0, 0],
        [0, 0, 2],
        [1, 1, 0],
        [0, 1, 1],
        [2, 1, 0],
        [0, 1, 2],
    ];
    let objects = mixed_tree_objects();
    let config = ApplyConfig::default();

    let predictions = apply_model_multi(model, &objects, PredictionType::RawFormulaVal, 0, None, &config)?;
    assert_eq!(predictions.column(0).to_vec(), expected_values);
    let leaves = calc_leaf_indexes_multi(model, &objects, 0, None, &config)?;
    for (row, expected) in leaves.rows().into_iter().zip(&expected_leaves) {
        assert_eq!(row.to_vec(), expected.to_vec());
    }

    let evaluator = ModelEvaluator::new(model)?;
    let mut cursor = LeafIndexCalcerOnPool::new(model, &objects, 0, None)?;
    for (object_idx, features) in objects.float_features().rows().into_iter().enumerate() {
        let row = features.to_vec();
        assert_eq!(evaluator.calc_flat_single(&row, 0..3)?, vec![expected_values[object_idx]]);
        assert_eq!(evaluator.calc_leaf_indexes_single(&row, 0..3)?, expected_leaves[object_idx].to_vec());

        assert!(cursor.can_get());
        assert_eq!(cursor.get(), expected_leaves[object_idx].to_vec());
        let has_next = cursor.next();
        assert_eq!(has_next, object_idx + 1 != objects.object_count());
        assert_eq!(has_next, cursor.can_get());
    }
    assert!(!cursor.can_get());
    Ok(())
}

#[test]
fn test_mixed_general_trees_exact_values() -> anyhow::Result<()> {
    let model = mixed_general_model()?;
    check_mixed_general_model(&model)?;

    for format in [ModelFormat::Bincode, ModelFormat::CompressedBincode, ModelFormat::Json] {
        let mut bytes = Vec::new();
        write_model(&model, format, &mut bytes)?;
        let loaded = read_model(bytes.as_slice())?;
        assert_eq!(loaded, model, "{}", format);
        check_mixed_general_model(&loaded)?;
    }
    Ok(())
}
