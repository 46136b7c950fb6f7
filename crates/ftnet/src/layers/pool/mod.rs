//! Pooling layers.
pub mod spatial_pyramid;
