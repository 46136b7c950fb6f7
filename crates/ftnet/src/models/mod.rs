//! # Complete model families.
pub mod cifar_resnet;
pub mod ftnet;
