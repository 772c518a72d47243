//! Mapping between the flat, dataset-facing feature index space and the
//! per-type internal index spaces.
//!
//! External (flat) indices address columns of a dataset. Every column has a
//! [`FeatureMetaInfo`] and belongs to one [`FeatureType`]; internal indices
//! number the columns of one type contiguously from zero.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::core::constants::INDEX_PLACEHOLDER;
use crate::core::error::{EnsembleError, Result};
use crate::core::types::FeatureType;
use crate::ensure;
use crate::model::features::{CatFeature, FloatFeature};

/// Metadata of one external feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMetaInfo {
    /// Column kind
    pub feature_type: FeatureType,
    /// Column name, empty when unnamed
    pub name: String,
    /// Whether the feature was explicitly excluded
    pub is_ignored: bool,
    /// Whether this dataset actually carries the feature. Ignored features are
    /// always unavailable.
    pub is_available: bool,
}

impl FeatureMetaInfo {
    /// Create an available, not ignored feature.
    pub fn new<S: Into<String>>(feature_type: FeatureType, name: S) -> Self {
        Self::with_flags(feature_type, name, false, true)
    }

    /// Create a feature with explicit flags. `is_ignored` overrides `is_available`.
    pub fn with_flags<S: Into<String>>(
        feature_type: FeatureType,
        name: S,
        is_ignored: bool,
        is_available: bool,
    ) -> Self {
        Self {
            feature_type,
            name: name.into(),
            is_ignored,
            is_available: !is_ignored && is_available,
        }
    }

    /// Unnamed ignored float feature filling gaps between sparse flat indices.
    pub fn ignored_placeholder() -> Self {
        Self::with_flags(FeatureType::Float, "", true, false)
    }

    /// Available and not ignored.
    pub fn is_used(&self) -> bool {
        self.is_available && !self.is_ignored
    }
}

impl Default for FeatureMetaInfo {
    fn default() -> Self {
        Self::new(FeatureType::Float, "")
    }
}

impl fmt::Display for FeatureMetaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type={}\tName={}\tIsIgnored={}\tIsAvailable={}",
            self.feature_type, self.name, self.is_ignored, self.is_available
        )
    }
}

/// Layout of the features of a dataset or a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesLayout {
    external_idx_to_meta_info: Vec<FeatureMetaInfo>,
    feature_external_idx_to_internal_idx: Vec<u32>,
    cat_feature_internal_idx_to_external_idx: Vec<u32>,
    float_feature_internal_idx_to_external_idx: Vec<u32>,
    text_feature_internal_idx_to_external_idx: Vec<u32>,
}

impl FeaturesLayout {
    /// Create a layout where every feature is a float feature.
    pub fn with_feature_count(feature_count: u32) -> Self {
        // An all-float unnamed layout cannot fail validation.
        Self::new::<&str>(feature_count, &[], &[], &[]).unwrap_or_default()
    }

    /// Create a layout from a feature count and the external indices of
    /// categorical and text features.
    ///
    /// `feature_ids` is either empty or holds one name per feature. Non-empty
    /// names must be unique.
    pub fn new<S: AsRef<str>>(
        feature_count: u32,
        cat_feature_indices: &[u32],
        text_feature_indices: &[u32],
        feature_ids: &[S],
    ) -> Result<Self> {
        ensure!(
            feature_ids.is_empty() || feature_ids.len() == feature_count as usize,
            EnsembleError::dimension_mismatch(
                format!("{} feature ids", feature_count),
                format!("{} feature ids", feature_ids.len())
            )
        );

        let mut external_idx_to_meta_info: Vec<FeatureMetaInfo> = (0..feature_count as usize)
            .map(|idx| {
                let name = feature_ids.get(idx).map(|s| s.as_ref()).unwrap_or("");
                FeatureMetaInfo::new(FeatureType::Float, name)
            })
            .collect();

        for &cat_idx in cat_feature_indices {
            ensure!(
                cat_idx < feature_count,
                EnsembleError::index_out_of_bounds(cat_idx as usize, feature_count as usize)
            );
            external_idx_to_meta_info[cat_idx as usize].feature_type = FeatureType::Categorical;
        }
        for &text_idx in text_feature_indices {
            ensure!(
                text_idx < feature_count,
                EnsembleError::index_out_of_bounds(text_idx as usize, feature_count as usize)
            );
            external_idx_to_meta_info[text_idx as usize].feature_type = FeatureType::Text;
        }

        let mut layout = FeaturesLayout {
            external_idx_to_meta_info,
            ..Default::default()
        };
        for external_idx in 0..feature_count {
            let per_type = layout.per_type_mut(layout.external_idx_to_meta_info[external_idx as usize].feature_type);
            let internal_idx = per_type.len() as u32;
            per_type.push(external_idx);
            layout.feature_external_idx_to_internal_idx.push(internal_idx);
        }

        let mut feature_names = HashSet::new();
        for name in feature_ids.iter().map(|s| s.as_ref()).filter(|s| !s.is_empty()) {
            ensure!(
                feature_names.insert(name),
                EnsembleError::duplicate_feature_name(name)
            );
        }

        Ok(layout)
    }

    /// Reconstruct a layout from model feature descriptors.
    ///
    /// Flat indices not covered by any descriptor become ignored float
    /// placeholders, and their internal index is [`INDEX_PLACEHOLDER`].
    pub fn from_model_features(
        float_features: &[FloatFeature],
        cat_features: &[CatFeature],
    ) -> Result<Self> {
        let mut layout = FeaturesLayout::default();

        let descriptors = float_features
            .iter()
            .map(|f| (FeatureType::Float, &f.position, f.feature_id.as_str()))
            .chain(
                cat_features
                    .iter()
                    .map(|f| (FeatureType::Categorical, &f.position, f.feature_id.as_str())),
            );

        for (feature_type, position, feature_id) in descriptors {
            ensure!(
                position.flat_index < INDEX_PLACEHOLDER,
                EnsembleError::invalid_parameter(
                    "position.flat_index",
                    position.flat_index.to_string(),
                    format!("greater than maximum allowed index {}", INDEX_PLACEHOLDER - 1)
                )
            );
            let flat_index = position.flat_index as usize;
            if flat_index >= layout.external_idx_to_meta_info.len() {
                layout
                    .external_idx_to_meta_info
                    .resize(flat_index + 1, FeatureMetaInfo::ignored_placeholder());
                layout
                    .feature_external_idx_to_internal_idx
                    .resize(flat_index + 1, INDEX_PLACEHOLDER);
            }
            layout.external_idx_to_meta_info[flat_index] = FeatureMetaInfo::new(feature_type, feature_id);
            layout.feature_external_idx_to_internal_idx[flat_index] = position.index;

            let per_type = layout.per_type_mut(feature_type);
            let internal_index = position.index as usize;
            if internal_index >= per_type.len() {
                per_type.resize(internal_index + 1, INDEX_PLACEHOLDER);
            }
            per_type[internal_index] = position.flat_index;
        }

        Ok(layout)
    }

    fn per_type(&self, feature_type: FeatureType) -> &[u32] {
        match feature_type {
            FeatureType::Float => &self.float_feature_internal_idx_to_external_idx,
            FeatureType::Categorical => &self.cat_feature_internal_idx_to_external_idx,
            FeatureType::Text => &self.text_feature_internal_idx_to_external_idx,
        }
    }

    fn per_type_mut(&mut self, feature_type: FeatureType) -> &mut Vec<u32> {
        match feature_type {
            FeatureType::Float => &mut self.float_feature_internal_idx_to_external_idx,
            FeatureType::Categorical => &mut self.cat_feature_internal_idx_to_external_idx,
            FeatureType::Text => &mut self.text_feature_internal_idx_to_external_idx,
        }
    }

    /// Whether `self` contains every feature of `rhs` as a prefix, with equal
    /// metadata and equal internal indices. Features are not matched by name.
    pub fn is_superset_of(&self, rhs: &FeaturesLayout) -> bool {
        if std::ptr::eq(self, rhs) {
            return true;
        }
        let rhs_size = rhs.external_idx_to_meta_info.len();
        if self.external_idx_to_meta_info.len() < rhs_size {
            return false;
        }
        self.external_idx_to_meta_info[..rhs_size] == rhs.external_idx_to_meta_info[..]
            && self.feature_external_idx_to_internal_idx[..rhs.feature_external_idx_to_internal_idx.len()]
                == rhs.feature_external_idx_to_internal_idx[..]
    }

    /// Metadata of a feature addressed by its internal index.
    pub fn internal_feature_meta_info(&self, internal_idx: u32, feature_type: FeatureType) -> &FeatureMetaInfo {
        &self.external_idx_to_meta_info[self.external_feature_idx(internal_idx, feature_type) as usize]
    }

    /// Metadata of every feature, by external index.
    pub fn external_features_meta_info(&self) -> &[FeatureMetaInfo] {
        &self.external_idx_to_meta_info
    }

    /// Name of a feature addressed by its internal index.
    pub fn external_feature_description(&self, internal_idx: u32, feature_type: FeatureType) -> &str {
        &self.internal_feature_meta_info(internal_idx, feature_type).name
    }

    /// Names of every feature, by external index.
    pub fn external_feature_ids(&self) -> Vec<String> {
        self.external_idx_to_meta_info
            .iter()
            .map(|meta| meta.name.clone())
            .collect()
    }

    /// Rename every feature. One name per external feature is required.
    pub fn set_external_feature_ids<S: AsRef<str>>(&mut self, feature_ids: &[S]) -> Result<()> {
        ensure!(
            feature_ids.len() == self.external_idx_to_meta_info.len(),
            EnsembleError::dimension_mismatch(
                format!("{} feature names", self.external_idx_to_meta_info.len()),
                format!("{} feature names", feature_ids.len())
            )
        );
        for (meta, name) in self.external_idx_to_meta_info.iter_mut().zip(feature_ids) {
            meta.name = name.as_ref().to_string();
        }
        Ok(())
    }

    /// External index of a feature given its internal index and type.
    pub fn external_feature_idx(&self, internal_idx: u32, feature_type: FeatureType) -> u32 {
        self.per_type(feature_type)[internal_idx as usize]
    }

    /// Internal index of a feature given its external index.
    ///
    /// The external index must be in range; this is checked in debug builds only.
    pub fn internal_feature_idx(&self, external_idx: u32) -> u32 {
        debug_assert!(
            self.is_correct_external_feature_idx(external_idx),
            "external feature index {} is out of range [0, {})",
            external_idx,
            self.external_idx_to_meta_info.len()
        );
        self.feature_external_idx_to_internal_idx[external_idx as usize]
    }

    /// Internal index of a feature that must be of the given type.
    pub fn typed_internal_feature_idx(&self, external_idx: u32, feature_type: FeatureType) -> u32 {
        debug_assert!(
            self.is_correct_external_feature_idx_and_type(external_idx, feature_type),
            "external feature index {} is not a {} feature",
            external_idx,
            feature_type
        );
        self.feature_external_idx_to_internal_idx[external_idx as usize]
    }

    /// Type of a feature given its external index.
    pub fn external_feature_type(&self, external_idx: u32) -> FeatureType {
        debug_assert!(self.is_correct_external_feature_idx(external_idx));
        self.external_idx_to_meta_info[external_idx as usize].feature_type
    }

    /// Whether the external index is in range.
    pub fn is_correct_external_feature_idx(&self, external_idx: u32) -> bool {
        (external_idx as usize) < self.external_idx_to_meta_info.len()
    }

    /// Whether the internal index is in range for the given type.
    pub fn is_correct_internal_feature_idx(&self, internal_idx: u32, feature_type: FeatureType) -> bool {
        (internal_idx as usize) < self.per_type(feature_type).len()
    }

    /// Whether the external index is in range and of the given type.
    pub fn is_correct_external_feature_idx_and_type(&self, external_idx: u32, feature_type: FeatureType) -> bool {
        self.external_idx_to_meta_info
            .get(external_idx as usize)
            .map_or(false, |meta| meta.feature_type == feature_type)
    }

    /// Number of float features
    pub fn float_feature_count(&self) -> u32 {
        self.float_feature_internal_idx_to_external_idx.len() as u32
    }

    /// Number of categorical features
    pub fn cat_feature_count(&self) -> u32 {
        self.cat_feature_internal_idx_to_external_idx.len() as u32
    }

    /// Number of text features
    pub fn text_feature_count(&self) -> u32 {
        self.text_feature_internal_idx_to_external_idx.len() as u32
    }

    /// Number of external features of any type
    pub fn external_feature_count(&self) -> u32 {
        self.external_idx_to_meta_info.len() as u32
    }

    /// Number of features of the given type
    pub fn feature_count(&self, feature_type: FeatureType) -> u32 {
        self.per_type(feature_type).len() as u32
    }

    /// Mark a feature as ignored. Out of range indices are skipped.
    pub fn ignore_external_feature(&mut self, external_idx: u32) {
        if let Some(meta) = self.external_idx_to_meta_info.get_mut(external_idx as usize) {
            meta.is_ignored = true;
            meta.is_available = false;
        }
    }

    /// Mark several features as ignored. Out of range indices are skipped.
    pub fn ignore_external_features(&mut self, ignored_features: &[u32]) {
        for &external_idx in ignored_features {
            self.ignore_external_feature(external_idx);
        }
    }

    /// Change availability of a feature. Ignored features stay unavailable.
    pub fn set_external_feature_availability(&mut self, external_idx: u32, is_available: bool) {
        if let Some(meta) = self.external_idx_to_meta_info.get_mut(external_idx as usize) {
            meta.is_available = is_available && !meta.is_ignored;
        }
    }

    /// Internal indices of the available features of the given type.
    pub fn available_features(&self, feature_type: FeatureType) -> impl Iterator<Item = u32> + '_ {
        (0..self.feature_count(feature_type))
            .filter(move |&idx| self.internal_feature_meta_info(idx, feature_type).is_available)
    }

    /// Internal to external index map of float features
    pub fn float_feature_internal_idx_to_external_idx(&self) -> &[u32] {
        &self.float_feature_internal_idx_to_external_idx
    }

    /// Internal to external index map of categorical features
    pub fn cat_feature_internal_idx_to_external_idx(&self) -> &[u32] {
        &self.cat_feature_internal_idx_to_external_idx
    }

    /// Internal to external index map of text features
    pub fn text_feature_internal_idx_to_external_idx(&self) -> &[u32] {
        &self.text_feature_internal_idx_to_external_idx
    }

    /// Whether at least one feature is available and not ignored.
    pub fn has_available_and_not_ignored_features(&self) -> bool {
        self.external_idx_to_meta_info.iter().any(FeatureMetaInfo::is_used)
    }
}

impl fmt::Display for FeaturesLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (external_idx, meta) in self.external_idx_to_meta_info.iter().enumerate() {
            writeln!(
                f,
                "externalFeatureIdx={}\tinternalFeatureIdx={}\tMetaInfo={{{}}}",
                external_idx, self.feature_external_idx_to_internal_idx[external_idx], meta
            )?;
        }
        Ok(())
    }
}

/// Check that a dataset described by `apply_layout` can be fed to a model
/// trained on `learn_layout`.
///
/// Every feature used at training time must be available, not ignored, of the
/// same type and not renamed in the apply data. Training features beyond the
/// end of the apply layout must not be used.
pub fn check_compatible_for_apply(
    learn_layout: &FeaturesLayout,
    apply_layout: &FeaturesLayout,
    apply_data_name: &str,
) -> Result<()> {
    let learn_meta = learn_layout.external_features_meta_info();
    let apply_meta = apply_layout.external_features_meta_info();

    for (idx, (learn, apply)) in learn_meta.iter().zip(apply_meta).enumerate() {
        if !learn.is_used() {
            continue;
        }
        ensure!(
            apply.is_available,
            EnsembleError::schema_mismatch(format!(
                "Feature #{} is used in training data, but not available in {}",
                idx, apply_data_name
            ))
        );
        ensure!(
            !apply.is_ignored,
            EnsembleError::schema_mismatch(format!(
                "Feature #{} is used in training data, but is ignored in {}",
                idx, apply_data_name
            ))
        );
        ensure!(
            learn.feature_type == apply.feature_type,
            EnsembleError::feature_type_mismatch(idx, learn.feature_type, apply.feature_type, apply_data_name)
        );
        ensure!(
            learn.name.is_empty() || apply.name.is_empty() || learn.name == apply.name,
            EnsembleError::schema_mismatch(format!(
                "Feature #{} has '{}' name in training data, but '{}' name in {}",
                idx, learn.name, apply.name, apply_data_name
            ))
        );
    }

    for (idx, learn) in learn_meta.iter().enumerate().skip(apply_meta.len()) {
        ensure!(
            !learn.is_used(),
            EnsembleError::schema_mismatch(format!(
                "Feature #{} is used in training data, but not available in {}",
                idx, apply_data_name
            ))
        );
    }
    Ok(())
}
