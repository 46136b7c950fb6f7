//! # Module / Weight Caches
//!
//! * [`disk`] - the on-disk download cache.
//! * [`weights`] - pretrained weight descriptors.
//! * [`prefabs`] - named, well-known model configs.

pub mod disk;
pub mod prefabs;
pub mod weights;

pub use weights::fetch_model_weights;
