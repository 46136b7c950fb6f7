#![warn(missing_docs)]
//!# ftnet - Fine-Tuning Networks
//!
//! CIFAR-style residual backbones with pretrained weights, and
//! replaceable classification heads for fine-tuning them on new label sets.
//!
//! ## Notable Components
//!
//! * [`cache`] - weight loading cache and prefab registries.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::conv_norm`] - ``Conv2d + BatchNorm2d`` block.
//!   * [`layers::pool::spatial_pyramid`] - spatial pyramid pooling.
//!   * [`layers::heads::class_block`] - bottleneck classification head.
//! * [`models`] - complete model families.
//!   * [`models::cifar_resnet`] - the ``6n + 2`` CIFAR `ResNet` family.
//!   * [`models::ftnet`] - backbone + pooling + head fine-tuning networks.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod cache;
pub mod layers;
pub mod models;
