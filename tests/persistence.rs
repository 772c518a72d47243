//! Saving and loading ensembles.

use rand::prelude::*;
use tempfile::tempdir;
use tree_ensemble::*;

mod common;
use common::*;

fn general_model(rng: &mut StdRng) -> ObliviousTrees {
    let mut builder = NonSymmetricTreeBuilder::new(float_features(3), vec![], 1).unwrap();
    for _ in 0..6 {
        builder.add_tree(&random_general_tree(rng, 5, 3)).unwrap();
    }
    builder.build().unwrap()
}

#[test]
fn test_round_trip_preserves_predictions() {
    let mut rng = StdRng::seed_from_u64(11);
    let balanced = build_balanced(&random_balanced_trees(&mut rng, 10, 5, 3, 2), 3, 2);
    let general = general_model(&mut rng);
    let objects = float_objects(random_features(&mut rng, 100, 3));
    let config = ApplyConfig::default();
    let dir = tempdir().unwrap();

    for (name, model) in [("balanced", &balanced), ("general", &general)] {
        let expected = apply_model(model, &objects, &config).unwrap();
        for format in [ModelFormat::Bincode, ModelFormat::CompressedBincode, ModelFormat::Json] {
            let path = dir.path().join(format!("{}.{}", name, format));
            save_model(model, &path, Some(format)).unwrap();
            let loaded = load_model(&path).unwrap();
            assert_eq!(&loaded, model, "{} as {}", name, format);
            assert_eq!(apply_model(&loaded, &objects, &config).unwrap(), expected);
        }
    }
}

#[test]
fn test_format_guessed_from_extension() {
    let mut rng = StdRng::seed_from_u64(3);
    let model = general_model(&mut rng);
    let dir = tempdir().unwrap();

    let json_path = dir.path().join("model.json");
    save_model(&model, &json_path, None).unwrap();
    let text = std::fs::read_to_string(&json_path).unwrap();
    assert!(text.contains("non_symmetric_step_nodes"));

    let gz_path = dir.path().join("model.gz");
    save_model(&model, &gz_path, None).unwrap();
    let bytes = std::fs::read(&gz_path).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    let bin_path = dir.path().join("model");
    save_model(&model, &bin_path, None).unwrap();
    let bytes = std::fs::read(&bin_path).unwrap();
    assert_eq!(&bytes[..4], MODEL_FILE_MAGIC);

    for path in [json_path, gz_path, bin_path] {
        assert_eq!(load_model(&path).unwrap(), model);
    }
}

#[test]
fn test_metadata_is_recorded() {
    let model = build_balanced(&[], 1, 1);
    let mut bytes = Vec::new();
    write_model(&model, ModelFormat::Json, &mut bytes).unwrap();
    let (metadata, loaded) = read_model_with_metadata(bytes.as_slice()).unwrap();
    assert_eq!(metadata.format_version, MODEL_FORMAT_VERSION);
    assert_eq!(metadata.library_version, VERSION);
    assert_eq!(loaded.tree_count(), 0);
}

#[test]
fn test_corrupted_step_nodes_are_rejected() {
    let mut rng = StdRng::seed_from_u64(8);
    let model = general_model(&mut rng);
    let mut bytes = Vec::new();
    write_model(&model, ModelFormat::Json, &mut bytes).unwrap();

    let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let nodes = value["model"]["non_symmetric_step_nodes"].as_array_mut().unwrap();
    let last = nodes.len() - 1;
    nodes[last]["left_subtree_diff"] = serde_json::json!(1000);
    nodes[last]["right_subtree_diff"] = serde_json::json!(1000);
    let corrupted = serde_json::to_vec(&value).unwrap();

    assert!(read_model(corrupted.as_slice()).is_err());
    assert!(read_model(&b""[..]).is_err());
}
