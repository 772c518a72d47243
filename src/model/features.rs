//! Feature descriptors owned by an ensemble.

use serde::{Deserialize, Serialize};

use crate::core::types::{FeatureType, NanMode, NanValueTreatment};
use crate::dataset::FeaturesLayout;
use crate::model::ctr::ModelCtr;

/// Position of a feature in both index spaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeaturePosition {
    /// Internal index within the feature's type
    pub index: u32,
    /// External (flat) index in the dataset
    pub flat_index: u32,
}

impl FeaturePosition {
    pub fn new(index: u32, flat_index: u32) -> Self {
        FeaturePosition { index, flat_index }
    }
}

/// Float feature used by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatFeature {
    pub position: FeaturePosition,
    pub feature_id: String,
    /// Ascending thresholds referenced by the trees
    pub borders: Vec<f32>,
    pub nan_value_treatment: NanValueTreatment,
    pub has_nans: bool,
}

impl FloatFeature {
    pub fn new<S: Into<String>>(position: FeaturePosition, feature_id: S) -> Self {
        FloatFeature {
            position,
            feature_id: feature_id.into(),
            ..Default::default()
        }
    }

    pub fn with_nan_value_treatment(mut self, treatment: NanValueTreatment) -> Self {
        self.nan_value_treatment = treatment;
        self.has_nans = treatment != NanValueTreatment::AsIs;
        self
    }

    pub fn is_used_in_model(&self) -> bool {
        !self.borders.is_empty()
    }
}

/// Categorical feature used by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatFeature {
    pub position: FeaturePosition,
    pub feature_id: String,
    /// Set when a one-hot split or a CTR projection references the feature
    pub used_in_model: bool,
}

impl CatFeature {
    pub fn new<S: Into<String>>(position: FeaturePosition, feature_id: S) -> Self {
        CatFeature {
            position,
            feature_id: feature_id.into(),
            used_in_model: false,
        }
    }
}

/// Category values a categorical feature is one-hot compared against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotFeature {
    pub cat_feature_index: u32,
    pub values: Vec<i32>,
}

/// Thresholds applied to one CTR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtrFeature {
    pub ctr: ModelCtr,
    pub borders: Vec<f32>,
}

/// Quantization results the model descriptors are created from.
pub trait FeatureQuantization {
    /// Borders of a float feature addressed by internal index
    fn borders(&self, float_feature_idx: u32) -> Vec<f32>;

    /// NaN mode of a float feature addressed by internal index
    fn nan_mode(&self, float_feature_idx: u32) -> NanMode;
}

fn create_features<F, T>(layout: &FeaturesLayout, feature_type: FeatureType, mut make: F) -> Vec<T>
where
    F: FnMut(FeaturePosition, &str, bool) -> T,
{
    (0..layout.external_feature_count())
        .filter(|&flat_idx| layout.external_feature_type(flat_idx) == feature_type)
        .map(|flat_idx| {
            let position = FeaturePosition::new(layout.internal_feature_idx(flat_idx), flat_idx);
            let meta = &layout.external_features_meta_info()[flat_idx as usize];
            make(position, &meta.name, meta.is_available)
        })
        .collect()
}

/// Float feature descriptors for every float feature of the layout.
///
/// Available features take their borders and NaN handling from the
/// quantization. Unavailable features get an empty border list.
pub fn create_float_features<Q: FeatureQuantization + ?Sized>(
    layout: &FeaturesLayout,
    quantization: &Q,
) -> Vec<FloatFeature> {
    create_features(layout, FeatureType::Float, |position, name, is_available| {
        let mut feature = FloatFeature::new(position, name);
        if is_available {
            match quantization.nan_mode(position.index) {
                NanMode::Min => {
                    feature.nan_value_treatment = NanValueTreatment::AsFalse;
                    feature.has_nans = true;
                }
                NanMode::Max => {
                    feature.nan_value_treatment = NanValueTreatment::AsTrue;
                    feature.has_nans = true;
                }
                NanMode::Forbidden => {}
            }
            feature.borders = quantization.borders(position.index);
        }
        feature
    })
}

/// Categorical feature descriptors for every categorical feature of the layout.
pub fn create_cat_features(layout: &FeaturesLayout) -> Vec<CatFeature> {
    create_features(layout, FeatureType::Categorical, |position, name, _| {
        CatFeature::new(position, name)
    })
}
