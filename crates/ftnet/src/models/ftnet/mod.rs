//! # `FtNet`
//!
//! Fine-tuning networks: pretrained [`crate::models::cifar_resnet`] backbones
//! with replaceable [`crate::layers::heads::class_block`] heads.

pub mod ftnet_model;
pub mod prefabs;
pub mod pretrained;

pub use ftnet_model::{FeaturePooling, FeaturePoolingConfig, FtNet, FtNetConfig};
pub use prefabs::PREFAB_FTNET_MAP;
pub use pretrained::{FtNetLoadOptions, load_pretrained_ftnet};
