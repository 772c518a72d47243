//! Builders that flatten trees into an [`ObliviousTrees`] ensemble.
//!
//! Both builders accumulate trees first and index splits last: bin-feature
//! ids are assigned only once every tree has contributed its splits, in a
//! single pass over the sorted set of distinct splits.
//!
//! [`ObliviousTrees`]: crate::model::ObliviousTrees

pub mod non_symmetric;
pub mod oblivious;

pub use non_symmetric::{NodeValue, NonSymmetricTreeBuilder, NonSymmetricTreeNode};
pub use oblivious::ObliviousTreeBuilder;

use std::collections::{BTreeMap, BTreeSet};

use crate::core::error::{EnsembleError, Result};
use crate::core::types::BinFeatureId;
use crate::ensure;
use crate::model::features::{CatFeature, CtrFeature, FloatFeature, OneHotFeature};
use crate::model::split::ModelSplit;

/// Insert a split into the set together with every float and one-hot split
/// nested in its CTR projection.
pub fn collect_split(split_set: &mut BTreeSet<ModelSplit>, split: &ModelSplit) {
    if let ModelSplit::OnlineCtr(ctr_split) = split {
        let projection = &ctr_split.ctr.base.projection;
        split_set.extend(projection.bin_features.iter().copied().map(ModelSplit::Float));
        split_set.extend(projection.one_hot_features.iter().copied().map(ModelSplit::OneHot));
    }
    split_set.insert(split.clone());
}

/// Dense numbering of the distinct splits of an ensemble.
#[derive(Debug, Clone, Default)]
pub struct BinFeatureIndex {
    splits: Vec<ModelSplit>,
    ids: BTreeMap<ModelSplit, BinFeatureId>,
}

impl BinFeatureIndex {
    /// Number the splits `0..len` in set order.
    pub fn from_split_set(split_set: &BTreeSet<ModelSplit>) -> Self {
        let splits: Vec<ModelSplit> = split_set.iter().cloned().collect();
        let ids = splits
            .iter()
            .enumerate()
            .map(|(id, split)| (split.clone(), id as BinFeatureId))
            .collect();
        BinFeatureIndex { splits, ids }
    }

    /// Id of a split, `None` when the split was not indexed.
    pub fn index_of(&self, split: &ModelSplit) -> Option<BinFeatureId> {
        self.ids.get(split).copied()
    }

    /// Id of a split that must have been indexed.
    pub(crate) fn require(&self, split: &ModelSplit) -> Result<BinFeatureId> {
        self.index_of(split)
            .ok_or_else(|| EnsembleError::internal(format!("split {} has no bin feature id", split)))
    }

    /// Split numbered `id`.
    pub fn split(&self, id: BinFeatureId) -> Option<&ModelSplit> {
        self.splits.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// Splits ordered by id.
    pub fn splits(&self) -> &[ModelSplit] {
        &self.splits
    }
}

/// Descriptors of an ensemble after the indexing phase.
#[derive(Debug, Clone)]
pub(crate) struct IndexedFeatures {
    pub float_features: Vec<FloatFeature>,
    pub cat_features: Vec<CatFeature>,
    pub one_hot_features: Vec<OneHotFeature>,
    pub ctr_features: Vec<CtrFeature>,
    pub bin_feature_index: BinFeatureIndex,
}

/// State shared by both builders: feature descriptors and the split indexing phase.
#[derive(Debug, Clone)]
pub struct CommonModelBuilder {
    approx_dimension: usize,
    float_features: Vec<FloatFeature>,
    cat_features: Vec<CatFeature>,
    float_feature_slots: Vec<Option<usize>>,
    cat_feature_slots: Vec<Option<usize>>,
}

/// Map internal feature index to the descriptor's position in its vector.
fn internal_index_slots<I: Iterator<Item = u32>>(indices: I) -> Vec<Option<usize>> {
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

fn check_sorted<T, F: Fn(&T) -> u32>(features: &[T], flat_index: F, kind: &str) -> Result<()> {
    for pair in features.windows(2) {
        ensure!(
            flat_index(&pair[0]) < flat_index(&pair[1]),
            EnsembleError::invalid_parameter(
                format!("{}_features", kind),
                format!("flat indices {} and {}", flat_index(&pair[0]), flat_index(&pair[1])),
                format!("{} features should be sorted by strictly increasing flat index", kind)
            )
        );
    }
    Ok(())
}

impl CommonModelBuilder {
    pub fn new(
        float_features: Vec<FloatFeature>,
        cat_features: Vec<CatFeature>,
        approx_dimension: usize,
    ) -> Result<Self> {
        ensure!(
            approx_dimension > 0,
            EnsembleError::invalid_parameter("approx_dimension", "0", "must be positive")
        );
        check_sorted(&float_features, |f| f.position.flat_index, "float")?;
        check_sorted(&cat_features, |f| f.position.flat_index, "cat")?;

        let float_feature_slots = internal_index_slots(float_features.iter().map(|f| f.position.index));
        let cat_feature_slots = internal_index_slots(cat_features.iter().map(|f| f.position.index));

        Ok(CommonModelBuilder {
            approx_dimension,
            float_features,
            cat_features,
            float_feature_slots,
            cat_feature_slots,
        })
    }

    pub fn approx_dimension(&self) -> usize {
        self.approx_dimension
    }

    fn float_slot(&self, float_feature: u32) -> Result<usize> {
        self.float_feature_slots
            .get(float_feature as usize)
            .copied()
            .flatten()
            .ok_or_else(|| EnsembleError::index_out_of_bounds(float_feature as usize, self.float_feature_slots.len()))
    }

    fn cat_slot(&self, cat_feature: u32) -> Result<usize> {
        self.cat_feature_slots
            .get(cat_feature as usize)
            .copied()
            .flatten()
            .ok_or_else(|| EnsembleError::index_out_of_bounds(cat_feature as usize, self.cat_feature_slots.len()))
    }

    /// Populate feature descriptors from the distinct splits and number them.
    ///
    /// Borders and `used_in_model` flags given at construction are reset.
    /// One-hot values and CTR borders are grouped by runs of the same
    /// feature or CTR in set order.
    pub(crate) fn process_splits_set(&self, split_set: &BTreeSet<ModelSplit>) -> Result<IndexedFeatures> {
        let mut float_features = self.float_features.clone();
        for feature in &mut float_features {
            feature.borders.clear();
        }
        let mut cat_features = self.cat_features.clone();
        for feature in &mut cat_features {
            feature.used_in_model = false;
        }
        let mut one_hot_features: Vec<OneHotFeature> = Vec::new();
        let mut ctr_features: Vec<CtrFeature> = Vec::new();
        let mut used_cat_features = BTreeSet::new();

        for split in split_set {
            match split {
                ModelSplit::Float(float_split) => {
                    let slot = self.float_slot(float_split.float_feature)?;
                    float_features[slot].borders.push(float_split.border);
                }
                ModelSplit::OneHot(one_hot_split) => {
                    used_cat_features.insert(one_hot_split.cat_feature_idx);
                    match one_hot_features.last_mut() {
                        Some(last) if last.cat_feature_index == one_hot_split.cat_feature_idx => {
                            last.values.push(one_hot_split.value);
                        }
                        _ => one_hot_features.push(OneHotFeature {
                            cat_feature_index: one_hot_split.cat_feature_idx,
                            values: vec![one_hot_split.value],
                        }),
                    }
                }
                ModelSplit::OnlineCtr(ctr_split) => {
                    used_cat_features.extend(ctr_split.ctr.base.projection.cat_features.iter().copied());
                    match ctr_features.last_mut() {
                        Some(last) if last.ctr == ctr_split.ctr => last.borders.push(ctr_split.border),
                        _ => ctr_features.push(CtrFeature {
                            ctr: ctr_split.ctr.clone(),
                            borders: vec![ctr_split.border],
                        }),
                    }
                }
            }
        }

        for cat_feature in used_cat_features {
            let slot = self.cat_slot(cat_feature)?;
            cat_features[slot].used_in_model = true;
        }

        let bin_feature_index = BinFeatureIndex::from_split_set(split_set);
        log::debug!(
            "Indexed {} bin features ({} float, {} one-hot, {} ctr)",
            bin_feature_index.len(),
            float_features.iter().map(|f| f.borders.len()).sum::<usize>(),
            one_hot_features.iter().map(|f| f.values.len()).sum::<usize>(),
            ctr_features.iter().map(|f| f.borders.len()).sum::<usize>()
        );

        Ok(IndexedFeatures {
            float_features,
            cat_features,
            one_hot_features,
            ctr_features,
            bin_feature_index,
        })
    }
}
