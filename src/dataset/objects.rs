//! Batches of objects to evaluate.

use ndarray::{Array2, ArrayView2, Axis};

use crate::core::constants::MAX_FLOAT_CATEGORY_CODE;
use crate::core::error::{EnsembleError, Result};
use crate::core::types::FeatureType;
use crate::dataset::features_layout::FeaturesLayout;
use crate::ensure;

/// Feature values of a batch of objects.
///
/// Float values sit in an `[objects × float features]` matrix and categorical
/// codes in an `[objects × categorical features]` matrix, both in internal
/// index order. Values are looked up by external flat index through the layout.
#[derive(Debug, Clone)]
pub struct ObjectsData {
    layout: FeaturesLayout,
    float_features: Array2<f32>,
    cat_features: Array2<i32>,
}

impl ObjectsData {
    pub fn new(layout: FeaturesLayout, float_features: Array2<f32>, cat_features: Array2<i32>) -> Result<Self> {
        ensure!(
            float_features.ncols() == layout.float_feature_count() as usize,
            EnsembleError::dimension_mismatch(
                format!("{} float feature columns", layout.float_feature_count()),
                float_features.ncols().to_string()
            )
        );
        ensure!(
            cat_features.ncols() == layout.cat_feature_count() as usize,
            EnsembleError::dimension_mismatch(
                format!("{} categorical feature columns", layout.cat_feature_count()),
                cat_features.ncols().to_string()
            )
        );
        ensure!(
            float_features.nrows() == cat_features.nrows(),
            EnsembleError::dimension_mismatch(
                format!("{} objects", float_features.nrows()),
                format!("{} objects with categorical features", cat_features.nrows())
            )
        );
        Ok(ObjectsData {
            layout,
            float_features,
            cat_features,
        })
    }

    /// Split rows that hold every external feature in flat order.
    ///
    /// Categorical columns must hold integer category codes of magnitude at
    /// most 2^24; NaN, infinite or fractional codes are rejected. Text columns
    /// are dropped.
    pub fn from_flat_rows(layout: FeaturesLayout, rows: ArrayView2<'_, f32>) -> Result<Self> {
        let feature_count = layout.external_feature_count() as usize;
        ensure!(
            rows.ncols() == feature_count,
            EnsembleError::dimension_mismatch(format!("{} columns", feature_count), rows.ncols().to_string())
        );
        let float_columns = layout.float_feature_internal_idx_to_external_idx().to_vec();
        let cat_columns = layout.cat_feature_internal_idx_to_external_idx().to_vec();

        let float_features = rows.select(Axis(1), &to_usize(&float_columns));
        let cat_values = rows.select(Axis(1), &to_usize(&cat_columns));
        let codes = cat_values.iter().map(|&value| category_code(value)).collect::<Result<Vec<_>>>()?;
        let cat_features = Array2::from_shape_vec(cat_values.raw_dim(), codes)
            .map_err(|err| EnsembleError::internal(format!("categorical matrix: {}", err)))?;

        Self::new(layout, float_features, cat_features)
    }

    pub fn layout(&self) -> &FeaturesLayout {
        &self.layout
    }

    pub fn object_count(&self) -> usize {
        self.float_features.nrows()
    }

    /// Float value of an object addressed by external feature index.
    #[inline]
    pub fn float_value(&self, object_idx: usize, flat_idx: u32) -> f32 {
        let internal = self.layout.typed_internal_feature_idx(flat_idx, FeatureType::Float);
        self.float_features[[object_idx, internal as usize]]
    }

    /// Category code of an object addressed by external feature index.
    #[inline]
    pub fn cat_value(&self, object_idx: usize, flat_idx: u32) -> i32 {
        let internal = self.layout.typed_internal_feature_idx(flat_idx, FeatureType::Categorical);
        self.cat_features[[object_idx, internal as usize]]
    }

    pub fn float_features(&self) -> &Array2<f32> {
        &self.float_features
    }

    pub fn cat_features(&self) -> &Array2<i32> {
        &self.cat_features
    }
}

/// Category code stored in a float column.
pub fn category_code(value: f32) -> Result<i32> {
    ensure!(
        value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_FLOAT_CATEGORY_CODE,
        EnsembleError::invalid_parameter(
            "category code",
            value.to_string(),
            "must be an integer of magnitude at most 2^24"
        )
    );
    Ok(value as i32)
}

fn to_usize(indices: &[u32]) -> Vec<usize> {
    indices.iter().map(|&idx| idx as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_from_flat_rows() {
        let layout = FeaturesLayout::new::<&str>(3, &[1], &[], &[]).unwrap();
        let rows = array![[0.5f32, 3.0, 1.5], [2.5, 7.0, -1.0]];
        let objects = ObjectsData::from_flat_rows(layout, rows.view()).unwrap();

        assert_eq!(objects.object_count(), 2);
        assert_eq!(objects.float_value(1, 0), 2.5);
        assert_eq!(objects.float_value(0, 2), 1.5);
        assert_eq!(objects.cat_value(1, 1), 7);
        assert_eq!(objects.float_features().ncols(), 2);
    }

    #[test]
    fn test_category_codes_must_be_exact_integers() {
        assert_eq!(category_code(-3.0).unwrap(), -3);
        assert_eq!(category_code(16_777_216.0).unwrap(), 16_777_216);
        for value in [f32::NAN, f32::INFINITY, 2.5, 33_554_432.0, -1.0e10] {
            let err = category_code(value).unwrap_err();
            assert_eq!(err.category(), "invalid_parameter", "{}", value);
        }

        let layout = FeaturesLayout::new::<&str>(2, &[1], &[], &[]).unwrap();
        let rows = array![[0.5f32, 4.0], [1.5, f32::NAN]];
        assert!(ObjectsData::from_flat_rows(layout.clone(), rows.view()).is_err());
        let rows = array![[0.5f32, 4.0], [1.5, 0.25]];
        assert!(ObjectsData::from_flat_rows(layout, rows.view()).is_err());
    }

    #[test]
    fn test_column_count_checks() {
        let layout = FeaturesLayout::new::<&str>(2, &[1], &[], &[]).unwrap();
        let float_features = Array2::<f32>::zeros((3, 2));
        let cat_features = Array2::<i32>::zeros((3, 1));
        assert!(ObjectsData::new(layout.clone(), float_features, cat_features.clone()).is_err());
        assert!(ObjectsData::new(layout.clone(), Array2::zeros((2, 1)), cat_features).is_err());

        let rows = Array2::<f32>::zeros((2, 3));
        assert!(ObjectsData::from_flat_rows(layout, rows.view()).is_err());
    }

    #[test]
    fn test_categorical_only() {
        let layout = FeaturesLayout::new::<&str>(1, &[0], &[], &[]).unwrap();
        let objects = ObjectsData::new(layout, Array2::zeros((4, 0)), Array2::zeros((4, 1))).unwrap();
        assert_eq!(objects.object_count(), 4);
    }
}
