//! Dataset-facing structures: feature layouts and batches of objects.
//!
//! Loading and quantizing raw data happens outside of this crate; this
//! module only describes which columns exist and carries their values.

pub mod features_layout;
pub mod objects;

pub use features_layout::{check_compatible_for_apply, FeatureMetaInfo, FeaturesLayout};
pub use objects::{category_code, ObjectsData};
