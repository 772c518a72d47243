//! Batch application of an ensemble to a set of objects.

use log::{debug, log, warn, Level};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use std::ops::Range;

use crate::config::{build_thread_pool, ApplyConfig};
use crate::core::error::{EnsembleError, Result};
use crate::core::types::PredictionType;
use crate::dataset::ObjectsData;
use crate::model::oblivious_trees::ObliviousTrees;
use crate::prediction::evaluator::{ModelEvaluator, QuantizedData};

/// Apply trees `begin..end` of `model` to every object.
///
/// `end == None` means all trees. The result has one row per object and
/// `approx_dimension` columns, or a single column for [`PredictionType::Class`].
pub fn apply_model_multi(
    model: &ObliviousTrees,
    objects: &ObjectsData,
    prediction_type: PredictionType,
    begin: usize,
    end: Option<usize>,
    config: &ApplyConfig,
) -> Result<Array2<f64>> {
    ModelEvaluator::new(model)?.apply_model_multi(objects, prediction_type, begin, end, config)
}

/// Apply all trees with the prediction type and tree range taken from `config`.
pub fn apply_model(model: &ObliviousTrees, objects: &ObjectsData, config: &ApplyConfig) -> Result<Array2<f64>> {
    apply_model_multi(
        model,
        objects,
        config.prediction_type,
        config.tree_begin,
        config.tree_end,
        config,
    )
}

impl<'a> ModelEvaluator<'a> {
    /// Apply trees `begin..end` to every object in blocks of
    /// `config.block_size`, one block per task.
    pub fn apply_model_multi(
        &self,
        objects: &ObjectsData,
        prediction_type: PredictionType,
        begin: usize,
        end: Option<usize>,
        config: &ApplyConfig,
    ) -> Result<Array2<f64>> {
        config.validate_block_size()?;
        let trees = self.model().resolve_tree_range(begin, end)?;
        self.check_objects(objects)?;
        if self.model().tree_count() == 0 {
            warn!("Applying an ensemble without trees, every prediction is zero");
        }

        let object_count = objects.object_count();
        let dimension = self.model().approx_dimension();
        let block_size = config.block_size;
        let level = if config.verbose { Level::Info } else { Level::Debug };
        log!(
            level,
            "Applying trees {}..{} to {} objects in blocks of {}",
            trees.start,
            trees.end,
            object_count,
            block_size
        );

        let mut raw = vec![0.0; object_count * dimension];
        let pool = build_thread_pool(config.thread_count)?;
        pool.install(|| {
            raw.par_chunks_mut(block_size * dimension)
                .enumerate()
                .for_each(|(block_idx, out)| {
                    let start = block_idx * block_size;
                    let end = (start + block_size).min(object_count);
                    let data = self.quantize_source(objects, start..end);
                    self.calc_quantized(&data, trees.clone(), out);
                });
        });

        let raw = Array2::from_shape_vec((object_count, dimension), raw)
            .map_err(|e| EnsembleError::internal(format!("Prediction shape: {}", e)))?;
        Ok(transform_predictions(raw, prediction_type))
    }

    /// Leaf index of every object in every tree of `begin..end`, one row per object.
    pub fn calc_leaf_indexes_multi(
        &self,
        objects: &ObjectsData,
        begin: usize,
        end: Option<usize>,
        config: &ApplyConfig,
    ) -> Result<Array2<u32>> {
        config.validate_block_size()?;
        let trees = self.model().resolve_tree_range(begin, end)?;
        self.check_objects(objects)?;

        let object_count = objects.object_count();
        let tree_count = trees.len();
        let mut leaf_indexes = vec![0u32; object_count * tree_count];
        if tree_count > 0 {
            let block_size = config.block_size;
            let pool = build_thread_pool(config.thread_count)?;
            pool.install(|| {
                leaf_indexes
                    .par_chunks_mut(block_size * tree_count)
                    .enumerate()
                    .for_each(|(block_idx, out)| {
                        let start = block_idx * block_size;
                        let end = (start + block_size).min(object_count);
                        let data = self.quantize_source(objects, start..end);
                        self.calc_leaf_indexes_quantized(&data, trees.clone(), out);
                    });
            });
        }
        Array2::from_shape_vec((object_count, tree_count), leaf_indexes)
            .map_err(|e| EnsembleError::internal(format!("Leaf index shape: {}", e)))
    }
}

/// Leaf index of every object in every tree of `begin..end`.
pub fn calc_leaf_indexes_multi(
    model: &ObliviousTrees,
    objects: &ObjectsData,
    begin: usize,
    end: Option<usize>,
    config: &ApplyConfig,
) -> Result<Array2<u32>> {
    ModelEvaluator::new(model)?.calc_leaf_indexes_multi(objects, begin, end, config)
}

/// Turn raw sums into the requested prediction type.
pub fn transform_predictions(raw: Array2<f64>, prediction_type: PredictionType) -> Array2<f64> {
    match prediction_type {
        PredictionType::RawFormulaVal => raw,
        PredictionType::Exponent => raw.mapv(f64::exp),
        PredictionType::Probability => {
            if raw.ncols() == 1 {
                raw.mapv(sigmoid)
            } else {
                let mut probabilities = raw;
                for mut row in probabilities.axis_iter_mut(Axis(0)) {
                    let max = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
                probabilities
            }
        }
        PredictionType::Class => {
            let classes: Vec<f64> = raw
                .axis_iter(Axis(0))
                .map(|row| {
                    if row.len() == 1 {
                        if row[0] > 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    } else {
                        argmax(row.iter().copied()) as f64
                    }
                })
                .collect();
            Array1::from(classes).insert_axis(Axis(1))
        }
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best_idx = 0;
    let mut best = f64::NEG_INFINITY;
    for (idx, value) in values.enumerate() {
        if value > best {
            best = value;
            best_idx = idx;
        }
    }
    best_idx
}

/// Applies one ensemble to one fixed batch repeatedly.
///
/// The batch is split into `thread_count + 1` blocks and quantized once at
/// construction; each [`apply_model_multi`](Self::apply_model_multi) call
/// only walks trees.
#[derive(Debug)]
pub struct ModelCalcerOnPool<'a> {
    evaluator: ModelEvaluator<'a>,
    pool: rayon::ThreadPool,
    blocks: Vec<QuantizedData>,
    block_size: usize,
    object_count: usize,
}

impl<'a> ModelCalcerOnPool<'a> {
    pub fn new(model: &'a ObliviousTrees, objects: &ObjectsData, config: &ApplyConfig) -> Result<Self> {
        Self::with_evaluator(ModelEvaluator::new(model)?, objects, config)
    }

    /// Use a prepared evaluator, e.g. one with a CTR provider attached.
    pub fn with_evaluator(evaluator: ModelEvaluator<'a>, objects: &ObjectsData, config: &ApplyConfig) -> Result<Self> {
        config.validate_block_size()?;
        evaluator.check_objects(objects)?;

        let object_count = objects.object_count();
        let block_count = config.effective_thread_count() + 1;
        let block_size = object_count.div_ceil(block_count).max(1);
        let pool = build_thread_pool(config.thread_count)?;

        let ranges: Vec<Range<usize>> = (0..object_count)
            .step_by(block_size)
            .map(|start| start..(start + block_size).min(object_count))
            .collect();
        let blocks: Vec<QuantizedData> = pool.install(|| {
            ranges
                .into_par_iter()
                .map(|range| evaluator.quantize_source(objects, range))
                .collect()
        });
        debug!(
            "Prepared {} objects in blocks of {} for repeated application",
            object_count, block_size
        );

        Ok(ModelCalcerOnPool {
            evaluator,
            pool,
            blocks,
            block_size,
            object_count,
        })
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    pub fn apply_model_multi(
        &self,
        prediction_type: PredictionType,
        begin: usize,
        end: Option<usize>,
    ) -> Result<Array2<f64>> {
        let trees = self.evaluator.model().resolve_tree_range(begin, end)?;
        let dimension = self.evaluator.model().approx_dimension();
        let mut raw = vec![0.0; self.object_count * dimension];
        self.pool.install(|| {
            raw.par_chunks_mut(self.block_size * dimension)
                .zip(self.blocks.par_iter())
                .for_each(|(out, data)| self.evaluator.calc_quantized(data, trees.clone(), out));
        });
        let raw = Array2::from_shape_vec((self.object_count, dimension), raw)
            .map_err(|e| EnsembleError::internal(format!("Prediction shape: {}", e)))?;
        Ok(transform_predictions(raw, prediction_type))
    }
}
