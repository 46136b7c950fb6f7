//! # `CifarResNet`
//!
//! The ``6n + 2`` layer residual networks for ``32x32`` images,
//! with the published CIFAR-10 checkpoints as [`prefabs`].

pub mod basic_block;
pub mod layer_block;
pub mod prefabs;
pub mod resnet_io;
pub mod resnet_model;
pub mod shortcut;
pub mod util;

pub use resnet_model::{CifarResNet, CifarResNetConfig, CifarResNetMeta};
pub use shortcut::ShortcutKind;
