//! Online statistic (CTR) descriptors.
//!
//! A CTR turns a projection of categorical features (optionally combined
//! with binary float and one-hot conditions) into a number. The counters
//! behind it come from a [`CtrProvider`](crate::prediction::CtrProvider); the
//! descriptor here only knows how to hash a projection and how to turn a pair
//! of counters into a value.

use serde::{Deserialize, Serialize};

use crate::model::split::{FloatSplit, OneHotSplit};

const MAGIC_MULT: u64 = 0x4906_ba49_4954_cb65;

/// Combine two hash values.
#[inline]
pub fn combine_hash(a: u64, b: u64) -> u64 {
    MAGIC_MULT.wrapping_mul(a.wrapping_add(MAGIC_MULT.wrapping_mul(b)))
}

/// Kind of statistic computed over a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CtrType {
    Borders,
    Buckets,
    BinarizedTargetMeanValue,
    FloatTargetMeanValue,
    Counter,
    FeatureFreq,
}

/// Projection a CTR is computed over.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureCombination {
    /// Internal indices of categorical features
    pub cat_features: Vec<u32>,
    /// Binary float conditions mixed into the projection
    pub bin_features: Vec<FloatSplit>,
    /// Binary one-hot conditions mixed into the projection
    pub one_hot_features: Vec<OneHotSplit>,
}

impl FeatureCombination {
    pub fn is_empty(&self) -> bool {
        self.cat_features.is_empty() && self.bin_features.is_empty() && self.one_hot_features.is_empty()
    }

    /// Hash of one object's projection.
    ///
    /// `cat_codes` holds the codes of `cat_features`, `bin_bits` and
    /// `one_hot_bits` the outcomes of `bin_features` and `one_hot_features`,
    /// each in projection order.
    pub fn hash_values(cat_codes: &[i32], bin_bits: &[bool], one_hot_bits: &[bool]) -> u64 {
        let mut hash = 0u64;
        for &code in cat_codes {
            hash = combine_hash(hash, code as u32 as u64);
        }
        for &bit in bin_bits.iter().chain(one_hot_bits) {
            hash = combine_hash(hash, bit as u64);
        }
        hash
    }
}

/// Statistic identity shared by every CTR computed from the same counters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelCtrBase {
    pub projection: FeatureCombination,
    pub ctr_type: CtrType,
    pub target_border_classifier_idx: i32,
}

/// A CTR: statistic identity plus the prior and the affine transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCtr {
    pub base: ModelCtrBase,
    pub target_border_idx: i32,
    pub prior_num: f32,
    pub prior_denom: f32,
    pub shift: f32,
    pub scale: f32,
}

impl ModelCtr {
    /// Simple CTR with prior `0 / 1`, no shift and unit scale.
    pub fn new(base: ModelCtrBase) -> Self {
        ModelCtr {
            base,
            target_border_idx: 0,
            prior_num: 0.0,
            prior_denom: 1.0,
            shift: 0.0,
            scale: 1.0,
        }
    }

    /// `((good + prior_num) / (total + prior_denom) + shift) * scale`
    #[inline]
    pub fn calc(&self, good_count: f32, total_count: f32) -> f32 {
        let ctr = (good_count + self.prior_num) / (total_count + self.prior_denom);
        (ctr + self.shift) * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_calc() {
        let mut ctr = ModelCtr::new(ModelCtrBase {
            projection: FeatureCombination {
                cat_features: vec![0],
                ..Default::default()
            },
            ctr_type: CtrType::Borders,
            target_border_classifier_idx: 0,
        });
        assert_relative_eq!(ctr.calc(1.0, 3.0), 0.25);

        ctr.prior_num = 1.0;
        ctr.prior_denom = 2.0;
        ctr.shift = -0.5;
        ctr.scale = 2.0;
        assert_relative_eq!(ctr.calc(1.0, 2.0), 0.0);
    }

    #[test]
    fn test_combine_hash() {
        assert_eq!(combine_hash(0, 0), 0);
        assert_eq!(combine_hash(1, 0), MAGIC_MULT);
        assert_ne!(combine_hash(1, 2), combine_hash(2, 1));
    }

    #[test]
    fn test_hash_values() {
        let a = FeatureCombination::hash_values(&[3, 4], &[true], &[]);
        let b = FeatureCombination::hash_values(&[3, 4], &[false], &[]);
        let c = FeatureCombination::hash_values(&[4, 3], &[true], &[]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, FeatureCombination::hash_values(&[3, 4], &[true], &[]));
    }
}
