//! Split conditions used as decision nodes of the trees.
//!
//! [`ModelSplit`] is a closed set of condition kinds. Every split payload is
//! totally ordered so that a set of splits can be deduplicated and numbered
//! deterministically. Thresholds are compared with [`f32::total_cmp`], which
//! keeps the order total in the presence of NaN and signed zeros.
//!
//! All ordering and equality impls for split payloads, including the CTR
//! descriptor referenced by [`OnlineCtrSplit`], are defined in this module.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::model::ctr::ModelCtr;

/// `value > border` on a float feature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FloatSplit {
    /// Internal index of the float feature
    pub float_feature: u32,
    /// Threshold
    pub border: f32,
}

impl FloatSplit {
    pub fn new(float_feature: u32, border: f32) -> Self {
        FloatSplit {
            float_feature,
            border,
        }
    }
}

/// `value == category` on a categorical feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OneHotSplit {
    /// Internal index of the categorical feature
    pub cat_feature_idx: u32,
    /// Category code
    pub value: i32,
}

impl OneHotSplit {
    pub fn new(cat_feature_idx: u32, value: i32) -> Self {
        OneHotSplit {
            cat_feature_idx,
            value,
        }
    }
}

/// `ctr_value > border` on an online statistic of a categorical projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineCtrSplit {
    pub ctr: ModelCtr,
    pub border: f32,
}

impl OnlineCtrSplit {
    pub fn new(ctr: ModelCtr, border: f32) -> Self {
        OnlineCtrSplit { ctr, border }
    }
}

/// One decision condition of a tree.
///
/// Variants order as `Float < OneHot < OnlineCtr`, then by payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelSplit {
    Float(FloatSplit),
    OneHot(OneHotSplit),
    OnlineCtr(OnlineCtrSplit),
}

impl ModelSplit {
    /// Float threshold split
    pub fn float(float_feature: u32, border: f32) -> Self {
        ModelSplit::Float(FloatSplit::new(float_feature, border))
    }

    /// One-hot categorical split
    pub fn one_hot(cat_feature_idx: u32, value: i32) -> Self {
        ModelSplit::OneHot(OneHotSplit::new(cat_feature_idx, value))
    }

    /// Online statistic split
    pub fn online_ctr(ctr: ModelCtr, border: f32) -> Self {
        ModelSplit::OnlineCtr(OnlineCtrSplit::new(ctr, border))
    }
}

impl From<FloatSplit> for ModelSplit {
    fn from(split: FloatSplit) -> Self {
        ModelSplit::Float(split)
    }
}

impl From<OneHotSplit> for ModelSplit {
    fn from(split: OneHotSplit) -> Self {
        ModelSplit::OneHot(split)
    }
}

impl From<OnlineCtrSplit> for ModelSplit {
    fn from(split: OnlineCtrSplit) -> Self {
        ModelSplit::OnlineCtr(split)
    }
}

impl fmt::Display for ModelSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSplit::Float(split) => write!(f, "float[{}] > {}", split.float_feature, split.border),
            ModelSplit::OneHot(split) => write!(f, "cat[{}] == {}", split.cat_feature_idx, split.value),
            ModelSplit::OnlineCtr(split) => write!(
                f,
                "ctr[{:?} on {:?}] > {}",
                split.ctr.base.ctr_type, split.ctr.base.projection.cat_features, split.border
            ),
        }
    }
}

/// Implements `PartialEq`, `Eq` and `PartialOrd` in terms of an `Ord` impl.
macro_rules! impl_order_from_cmp {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PartialEq for $ty {
                fn eq(&self, other: &Self) -> bool {
                    self.cmp(other) == Ordering::Equal
                }
            }

            impl Eq for $ty {}

            impl PartialOrd for $ty {
                fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                    Some(self.cmp(other))
                }
            }
        )*
    };
}

impl_order_from_cmp!(FloatSplit, OnlineCtrSplit, ModelCtr);

impl Ord for FloatSplit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.float_feature
            .cmp(&other.float_feature)
            .then_with(|| self.border.total_cmp(&other.border))
    }
}

impl Ord for ModelCtr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base
            .cmp(&other.base)
            .then_with(|| self.target_border_idx.cmp(&other.target_border_idx))
            .then_with(|| self.prior_num.total_cmp(&other.prior_num))
            .then_with(|| self.prior_denom.total_cmp(&other.prior_denom))
            .then_with(|| self.shift.total_cmp(&other.shift))
            .then_with(|| self.scale.total_cmp(&other.scale))
    }
}

impl Ord for OnlineCtrSplit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ctr
            .cmp(&other.ctr)
            .then_with(|| self.border.total_cmp(&other.border))
    }
}
