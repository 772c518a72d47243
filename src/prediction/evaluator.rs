//! Binarization of objects and tree walking.
//!
//! Evaluation runs in two steps. Objects are first quantized: every bin
//! feature of the ensemble is evaluated once per object and stored as one
//! byte. Trees are then walked over the quantized bytes only.

use std::ops::Range;

use crate::core::error::{EnsembleError, Result};
use crate::core::types::NanValueTreatment;
use crate::dataset::{category_code, check_compatible_for_apply, FeaturesLayout, ObjectsData};
use crate::ensure;
use crate::model::ctr::{FeatureCombination, ModelCtr};
use crate::model::oblivious_trees::ObliviousTrees;
use crate::model::split::{FloatSplit, ModelSplit, OneHotSplit};
use crate::prediction::ctr_provider::CtrProvider;

/// Anything objects' feature values can be read from by external flat index.
pub(crate) trait FeatureSource: Sync {
    fn float_value(&self, object_idx: usize, flat_idx: u32) -> f32;
    fn cat_value(&self, object_idx: usize, flat_idx: u32) -> i32;
}

impl FeatureSource for ObjectsData {
    #[inline]
    fn float_value(&self, object_idx: usize, flat_idx: u32) -> f32 {
        ObjectsData::float_value(self, object_idx, flat_idx)
    }

    #[inline]
    fn cat_value(&self, object_idx: usize, flat_idx: u32) -> i32 {
        ObjectsData::cat_value(self, object_idx, flat_idx)
    }
}

/// A single object given as all features in flat order; categorical
/// features hold their integer code, already checked by `check_row`.
struct FlatRow<'r>(&'r [f32]);

impl FeatureSource for FlatRow<'_> {
    #[inline]
    fn float_value(&self, _object_idx: usize, flat_idx: u32) -> f32 {
        self.0[flat_idx as usize]
    }

    #[inline]
    fn cat_value(&self, _object_idx: usize, flat_idx: u32) -> i32 {
        self.0[flat_idx as usize] as i32
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatCondition {
    flat_index: u32,
    border: f32,
    nan_value: bool,
}

impl FloatCondition {
    #[inline]
    fn eval<S: FeatureSource>(&self, source: &S, object_idx: usize) -> bool {
        let value = source.float_value(object_idx, self.flat_index);
        if value.is_nan() {
            self.nan_value
        } else {
            value > self.border
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OneHotCondition {
    flat_index: u32,
    value: i32,
}

impl OneHotCondition {
    #[inline]
    fn eval<S: FeatureSource>(&self, source: &S, object_idx: usize) -> bool {
        source.cat_value(object_idx, self.flat_index) == self.value
    }
}

#[derive(Debug, Clone)]
struct CtrCondition<'a> {
    ctr: &'a ModelCtr,
    border: f32,
    cat_flat_indices: Vec<u32>,
    bin_conditions: Vec<FloatCondition>,
    one_hot_conditions: Vec<OneHotCondition>,
}

/// Projection values of one object, reused across the CTR splits of a block.
#[derive(Default)]
struct CtrScratch {
    cat_codes: Vec<i32>,
    bin_bits: Vec<bool>,
    one_hot_bits: Vec<bool>,
}

impl CtrCondition<'_> {
    fn projection_hash<S: FeatureSource>(&self, source: &S, object_idx: usize, scratch: &mut CtrScratch) -> u64 {
        scratch.cat_codes.clear();
        scratch
            .cat_codes
            .extend(self.cat_flat_indices.iter().map(|&flat_idx| source.cat_value(object_idx, flat_idx)));
        scratch.bin_bits.clear();
        scratch
            .bin_bits
            .extend(self.bin_conditions.iter().map(|b| b.eval(source, object_idx)));
        scratch.one_hot_bits.clear();
        scratch
            .one_hot_bits
            .extend(self.one_hot_conditions.iter().map(|o| o.eval(source, object_idx)));
        FeatureCombination::hash_values(&scratch.cat_codes, &scratch.bin_bits, &scratch.one_hot_bits)
    }
}

#[derive(Debug, Clone)]
enum BinCondition<'a> {
    Float(FloatCondition),
    OneHot(OneHotCondition),
    Ctr(CtrCondition<'a>),
}

/// Bin feature values of a contiguous range of objects, one byte per bin
/// feature per object, object-major.
#[derive(Debug, Clone, Default)]
pub struct QuantizedData {
    object_count: usize,
    bin_feature_count: usize,
    bins: Vec<u8>,
}

impl QuantizedData {
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    pub fn bin_feature_count(&self) -> usize {
        self.bin_feature_count
    }

    /// Bin feature bytes of one object.
    #[inline]
    pub fn object_bins(&self, object_idx: usize) -> &[u8] {
        let start = object_idx * self.bin_feature_count;
        &self.bins[start..start + self.bin_feature_count]
    }
}

/// Evaluates one ensemble over quantized objects.
///
/// Holds the model by reference; any number of evaluators may share a model.
#[derive(Debug, Clone)]
pub struct ModelEvaluator<'a> {
    model: &'a ObliviousTrees,
    layout: FeaturesLayout,
    conditions: Vec<BinCondition<'a>>,
    ctr_provider: Option<&'a dyn CtrProvider>,
    min_row_len: usize,
}

impl<'a> ModelEvaluator<'a> {
    pub fn new(model: &'a ObliviousTrees) -> Result<Self> {
        let float_condition = |split: &FloatSplit| -> Result<FloatCondition> {
            let feature = model
                .float_feature(split.float_feature)
                .ok_or_else(|| EnsembleError::index_out_of_bounds(split.float_feature as usize, model.float_features().len()))?;
            Ok(FloatCondition {
                flat_index: feature.position.flat_index,
                border: split.border,
                nan_value: feature.nan_value_treatment == NanValueTreatment::AsTrue,
            })
        };
        let cat_flat_index = |cat_feature_idx: u32| -> Result<u32> {
            model
                .cat_feature(cat_feature_idx)
                .map(|feature| feature.position.flat_index)
                .ok_or_else(|| EnsembleError::index_out_of_bounds(cat_feature_idx as usize, model.cat_features().len()))
        };
        let one_hot_condition = |split: &OneHotSplit| -> Result<OneHotCondition> {
            Ok(OneHotCondition {
                flat_index: cat_flat_index(split.cat_feature_idx)?,
                value: split.value,
            })
        };

        let conditions = model
            .bin_features()
            .iter()
            .map(|split| {
                Ok(match split {
                    ModelSplit::Float(s) => BinCondition::Float(float_condition(s)?),
                    ModelSplit::OneHot(s) => BinCondition::OneHot(one_hot_condition(s)?),
                    ModelSplit::OnlineCtr(s) => {
                        let projection = &s.ctr.base.projection;
                        BinCondition::Ctr(CtrCondition {
                            ctr: &s.ctr,
                            border: s.border,
                            cat_flat_indices: projection
                                .cat_features
                                .iter()
                                .map(|&idx| cat_flat_index(idx))
                                .collect::<Result<_>>()?,
                            bin_conditions: projection
                                .bin_features
                                .iter()
                                .map(float_condition)
                                .collect::<Result<_>>()?,
                            one_hot_conditions: projection
                                .one_hot_features
                                .iter()
                                .map(one_hot_condition)
                                .collect::<Result<_>>()?,
                        })
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let min_row_len = model
            .float_features()
            .iter()
            .map(|f| f.position.flat_index as usize + 1)
            .chain(model.cat_features().iter().map(|f| f.position.flat_index as usize + 1))
            .max()
            .unwrap_or(0);

        Ok(ModelEvaluator {
            model,
            layout: model.features_layout()?,
            conditions,
            ctr_provider: None,
            min_row_len,
        })
    }

    /// Use `provider` for the counters of CTR splits.
    pub fn with_ctr_provider(mut self, provider: &'a dyn CtrProvider) -> Self {
        self.ctr_provider = Some(provider);
        self
    }

    pub fn model(&self) -> &'a ObliviousTrees {
        self.model
    }

    /// Layout of the features the model was trained on.
    pub fn layout(&self) -> &FeaturesLayout {
        &self.layout
    }

    fn check_ctr_provider(&self) -> Result<()> {
        if !self.model.has_ctr_features() {
            return Ok(());
        }
        let provider = self.ctr_provider.ok_or_else(|| {
            EnsembleError::prediction("Model has CTR features but no CTR provider was given")
        })?;
        for feature in self.model.ctr_features() {
            ensure!(
                provider.has_ctr_table(&feature.ctr.base),
                EnsembleError::prediction(format!(
                    "CTR provider has no table for {:?} over categorical features {:?}",
                    feature.ctr.base.ctr_type, feature.ctr.base.projection.cat_features
                ))
            );
        }
        Ok(())
    }

    /// Check that objects can be fed to the model.
    pub fn check_objects(&self, objects: &ObjectsData) -> Result<()> {
        check_compatible_for_apply(&self.layout, objects.layout(), "apply data")?;
        self.check_ctr_provider()
    }

    pub(crate) fn check_tree_range(&self, trees: &Range<usize>) -> Result<()> {
        ensure!(
            trees.start <= trees.end && trees.end <= self.model.tree_count(),
            EnsembleError::invalid_parameter(
                "tree range",
                format!("{}..{}", trees.start, trees.end),
                format!("model has {} trees", self.model.tree_count())
            )
        );
        Ok(())
    }

    fn check_row(&self, row: &[f32]) -> Result<()> {
        ensure!(
            row.len() >= self.min_row_len,
            EnsembleError::dimension_mismatch(
                format!("at least {} features", self.min_row_len),
                row.len().to_string()
            )
        );
        for feature in self.model.cat_features() {
            category_code(row[feature.position.flat_index as usize])?;
        }
        self.check_ctr_provider()
    }

    /// Evaluate every bin feature for the objects in `objects_range`.
    pub fn quantize(&self, objects: &ObjectsData, objects_range: Range<usize>) -> Result<QuantizedData> {
        ensure!(
            objects_range.start <= objects_range.end && objects_range.end <= objects.object_count(),
            EnsembleError::invalid_parameter(
                "objects range",
                format!("{}..{}", objects_range.start, objects_range.end),
                format!("batch has {} objects", objects.object_count())
            )
        );
        self.check_objects(objects)?;
        Ok(self.quantize_source(objects, objects_range))
    }

    pub(crate) fn quantize_source<S: FeatureSource>(&self, source: &S, objects_range: Range<usize>) -> QuantizedData {
        let bin_feature_count = self.conditions.len();
        let mut bins = Vec::with_capacity(objects_range.len() * bin_feature_count);
        let mut scratch = CtrScratch::default();
        for object_idx in objects_range.clone() {
            for condition in &self.conditions {
                bins.push(self.eval_condition(condition, source, object_idx, &mut scratch) as u8);
            }
        }
        QuantizedData {
            object_count: objects_range.len(),
            bin_feature_count,
            bins,
        }
    }

    #[inline]
    fn eval_condition<S: FeatureSource>(
        &self,
        condition: &BinCondition<'_>,
        source: &S,
        object_idx: usize,
        scratch: &mut CtrScratch,
    ) -> bool {
        match condition {
            BinCondition::Float(c) => c.eval(source, object_idx),
            BinCondition::OneHot(c) => c.eval(source, object_idx),
            BinCondition::Ctr(c) => {
                let provider = match self.ctr_provider {
                    Some(provider) => provider,
                    None => return false,
                };
                let hash = c.projection_hash(source, object_idx, scratch);
                provider.calc_ctr(c.ctr, hash) > c.border
            }
        }
    }

    /// Leaf of `tree_idx` an object falls into.
    #[inline]
    pub(crate) fn leaf_index(&self, bins: &[u8], tree_idx: usize) -> usize {
        let model = self.model;
        let start = model.tree_start_offsets()[tree_idx];
        let splits = model.tree_splits();
        if model.is_oblivious() {
            let depth = model.tree_sizes()[tree_idx];
            let mut leaf = 0usize;
            for level in 0..depth {
                leaf |= (bins[splits[start + level] as usize] as usize) << level;
            }
            leaf
        } else {
            let step_nodes = model.non_symmetric_step_nodes();
            let mut node = start;
            loop {
                let step = step_nodes[node];
                if step.is_terminal() {
                    break;
                }
                let diff = step.diff(bins[splits[node] as usize] != 0);
                if diff == 0 {
                    break;
                }
                node += diff as usize;
            }
            let value_idx = model.non_symmetric_node_id_to_leaf_id()[node] as usize;
            (value_idx - model.first_leaf_offsets()[tree_idx]) / model.approx_dimension()
        }
    }

    pub(crate) fn calc_quantized(&self, data: &QuantizedData, trees: Range<usize>, out: &mut [f64]) {
        let dim = self.model.approx_dimension();
        let leaf_values = self.model.leaf_values();
        let first_leaf_offsets = self.model.first_leaf_offsets();
        out.fill(0.0);
        for (object_idx, row) in out.chunks_exact_mut(dim).enumerate().take(data.object_count) {
            let bins = data.object_bins(object_idx);
            for tree_idx in trees.clone() {
                let offset = first_leaf_offsets[tree_idx] + self.leaf_index(bins, tree_idx) * dim;
                for (value, leaf_value) in row.iter_mut().zip(&leaf_values[offset..offset + dim]) {
                    *value += leaf_value;
                }
            }
        }
    }

    pub(crate) fn calc_leaf_indexes_quantized(&self, data: &QuantizedData, trees: Range<usize>, out: &mut [u32]) {
        let tree_count = trees.len();
        if tree_count == 0 {
            return;
        }
        for (object_idx, row) in out.chunks_exact_mut(tree_count).enumerate().take(data.object_count) {
            let bins = data.object_bins(object_idx);
            for (slot, tree_idx) in row.iter_mut().zip(trees.clone()) {
                *slot = self.leaf_index(bins, tree_idx) as u32;
            }
        }
    }

    /// Raw sums of leaf values, `approx_dimension` values per object.
    pub fn calc(&self, data: &QuantizedData, trees: Range<usize>, out: &mut [f64]) -> Result<()> {
        self.check_tree_range(&trees)?;
        self.check_quantized(data)?;
        let expected = data.object_count * self.model.approx_dimension();
        ensure!(
            out.len() == expected,
            EnsembleError::dimension_mismatch(format!("{} output values", expected), out.len().to_string())
        );
        self.calc_quantized(data, trees, out);
        Ok(())
    }

    /// Leaf index per object and tree, object-major.
    pub fn calc_leaf_indexes(&self, data: &QuantizedData, trees: Range<usize>, out: &mut [u32]) -> Result<()> {
        self.check_tree_range(&trees)?;
        self.check_quantized(data)?;
        let expected = data.object_count * trees.len();
        ensure!(
            out.len() == expected,
            EnsembleError::dimension_mismatch(format!("{} leaf indexes", expected), out.len().to_string())
        );
        self.calc_leaf_indexes_quantized(data, trees, out);
        Ok(())
    }

    fn check_quantized(&self, data: &QuantizedData) -> Result<()> {
        ensure!(
            data.bin_feature_count == self.conditions.len(),
            EnsembleError::dimension_mismatch(
                format!("{} bin features", self.conditions.len()),
                data.bin_feature_count.to_string()
            )
        );
        Ok(())
    }

    /// Raw prediction of one object given as all features in flat order.
    pub fn calc_flat_single(&self, row: &[f32], trees: Range<usize>) -> Result<Vec<f64>> {
        self.check_tree_range(&trees)?;
        self.check_row(row)?;
        let data = self.quantize_source(&FlatRow(row), 0..1);
        let mut out = vec![0.0; self.model.approx_dimension()];
        self.calc_quantized(&data, trees, &mut out);
        Ok(out)
    }

    /// Leaf indexes of one object given as all features in flat order.
    pub fn calc_leaf_indexes_single(&self, row: &[f32], trees: Range<usize>) -> Result<Vec<u32>> {
        self.check_tree_range(&trees)?;
        self.check_row(row)?;
        let data = self.quantize_source(&FlatRow(row), 0..1);
        let mut out = vec![0; trees.len()];
        self.calc_leaf_indexes_quantized(&data, trees, &mut out);
        Ok(out)
    }
}
