//! Reading and writing model files.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::core::constants::{MODEL_FILE_MAGIC, MODEL_FORMAT_VERSION, TREE_ENSEMBLE_VERSION};
use crate::core::error::{EnsembleError, Result};
use crate::ensure;
use crate::io::ModelFormat;
use crate::model::oblivious_trees::ObliviousTrees;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Header stored next to every persisted ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Version of the envelope layout
    pub format_version: u32,
    /// Library version that wrote the file
    pub library_version: String,
    /// When the file was written
    pub created_at: DateTime<Utc>,
}

impl ModelMetadata {
    fn current() -> Self {
        ModelMetadata {
            format_version: MODEL_FORMAT_VERSION,
            library_version: TREE_ENSEMBLE_VERSION.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    metadata: ModelMetadata,
    model: &'a ObliviousTrees,
}

#[derive(Deserialize)]
struct Envelope {
    metadata: ModelMetadata,
    model: ObliviousTrees,
}

/// Write `model` in the given format.
pub fn write_model<W: Write>(model: &ObliviousTrees, format: ModelFormat, writer: W) -> Result<()> {
    let envelope = EnvelopeRef {
        metadata: ModelMetadata::current(),
        model,
    };
    match format {
        ModelFormat::Bincode => write_bincode(&envelope, writer),
        ModelFormat::CompressedBincode => {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            write_bincode(&envelope, &mut encoder)?;
            encoder.finish()?;
            Ok(())
        }
        ModelFormat::Json => {
            serde_json::to_writer(writer, &envelope)?;
            Ok(())
        }
    }
}

fn write_bincode<W: Write>(envelope: &EnvelopeRef<'_>, mut writer: W) -> Result<()> {
    writer.write_all(MODEL_FILE_MAGIC)?;
    writer.write_all(&MODEL_FORMAT_VERSION.to_le_bytes())?;
    bincode::serialize_into(&mut writer, envelope)?;
    writer.flush()?;
    Ok(())
}

/// Read a model in any supported format.
pub fn read_model<R: Read>(reader: R) -> Result<ObliviousTrees> {
    read_model_with_metadata(reader).map(|(_, model)| model)
}

/// Read a model in any supported format together with its header.
///
/// The runtime lookup tables of the model are rebuilt, so malformed arrays
/// are rejected here rather than during evaluation.
pub fn read_model_with_metadata<R: Read>(mut reader: R) -> Result<(ModelMetadata, ObliviousTrees)> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let envelope = decode(&bytes)?;

    ensure!(
        envelope.metadata.format_version == MODEL_FORMAT_VERSION,
        EnsembleError::serialization(format!(
            "Unsupported model format version {}, expected {}",
            envelope.metadata.format_version, MODEL_FORMAT_VERSION
        ))
    );
    let mut model = envelope.model;
    model.update_runtime_data()?;
    debug!(
        "Read model with {} trees written by version {}",
        model.tree_count(),
        envelope.metadata.library_version
    );
    Ok((envelope.metadata, model))
}

fn decode(bytes: &[u8]) -> Result<Envelope> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decompressed = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut decompressed)?;
        ensure!(
            decompressed.starts_with(MODEL_FILE_MAGIC),
            EnsembleError::serialization("Compressed model does not hold a binary model")
        );
        return decode_bincode(&decompressed);
    }
    if bytes.starts_with(MODEL_FILE_MAGIC) {
        return decode_bincode(bytes);
    }
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'{') {
        return Ok(serde_json::from_slice(bytes)?);
    }
    Err(EnsembleError::serialization("Unrecognized model format"))
}

fn decode_bincode(bytes: &[u8]) -> Result<Envelope> {
    let header_len = MODEL_FILE_MAGIC.len() + 4;
    ensure!(
        bytes.len() >= header_len,
        EnsembleError::serialization("Binary model is truncated")
    );
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[MODEL_FILE_MAGIC.len()..header_len]);
    let version = u32::from_le_bytes(version);
    ensure!(
        version == MODEL_FORMAT_VERSION,
        EnsembleError::serialization(format!(
            "Unsupported model format version {}, expected {}",
            version, MODEL_FORMAT_VERSION
        ))
    );
    Ok(bincode::deserialize(&bytes[header_len..])?)
}

/// Save `model` to a file. Without an explicit format it is guessed from
/// the extension, falling back to [`ModelFormat::Bincode`].
pub fn save_model<P: AsRef<Path>>(model: &ObliviousTrees, path: P, format: Option<ModelFormat>) -> Result<()> {
    let path = path.as_ref();
    let format = format
        .or_else(|| ModelFormat::from_path(path))
        .unwrap_or_default();
    let writer = BufWriter::new(File::create(path)?);
    write_model(model, format, writer)?;
    info!(
        "Saved model with {} trees to {} as {}",
        model.tree_count(),
        path.display(),
        format
    );
    Ok(())
}

/// Load a model file in any supported format.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<ObliviousTrees> {
    let path = path.as_ref();
    let model = read_model(BufReader::new(File::open(path)?))?;
    info!("Loaded model with {} trees from {}", model.tree_count(), path.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::ObliviousTreeBuilder;
    use crate::model::features::{FeaturePosition, FloatFeature};
    use crate::model::split::ModelSplit;
    use tempfile::tempdir;

    fn model() -> ObliviousTrees {
        let features = vec![FloatFeature::new(FeaturePosition::new(0, 0), "x")];
        let mut builder = ObliviousTreeBuilder::new(features, vec![], 1).unwrap();
        builder
            .add_tree_flat(&[ModelSplit::float(0, 1.5)], &[10.0, 20.0], &[1.0, 2.0])
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_round_trip_in_memory() {
        let model = model();
        for format in [ModelFormat::Bincode, ModelFormat::CompressedBincode, ModelFormat::Json] {
            let mut bytes = Vec::new();
            write_model(&model, format, &mut bytes).unwrap();
            let (metadata, restored) = read_model_with_metadata(bytes.as_slice()).unwrap();
            assert_eq!(metadata.format_version, MODEL_FORMAT_VERSION);
            assert_eq!(metadata.library_version, TREE_ENSEMBLE_VERSION);
            assert_eq!(restored, model, "format {}", format);
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let model = model();

        let path = dir.path().join("model.json");
        save_model(&model, &path, None).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with('{'));
        assert_eq!(load_model(&path).unwrap(), model);

        let path = dir.path().join("model.any");
        save_model(&model, &path, Some(ModelFormat::CompressedBincode)).unwrap();
        assert_eq!(load_model(&path).unwrap(), model);
    }

    #[test]
    fn test_rejects_unknown_data() {
        let err = read_model(&b"not a model"[..]).unwrap_err();
        assert_eq!(err.category(), "serialization");

        let mut bytes = Vec::new();
        write_model(&model(), ModelFormat::Bincode, &mut bytes).unwrap();
        bytes[MODEL_FILE_MAGIC.len()] = 99;
        let err = read_model(bytes.as_slice()).unwrap_err();
        assert!(err.to_string().contains("version 99"));

        assert!(read_model(&MODEL_FILE_MAGIC[..]).is_err());
    }

    #[test]
    fn test_load_validates_arrays() {
        let mut broken = model();
        broken.leaf_values.pop();
        let mut bytes = Vec::new();
        write_model(&broken, ModelFormat::Json, &mut bytes).unwrap();
        assert!(read_model(bytes.as_slice()).is_err());
    }
}
