//! Classification heads.
pub mod class_block;
