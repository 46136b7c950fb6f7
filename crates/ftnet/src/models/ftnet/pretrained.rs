//! # Pretrained `FtNet` Loader
//!
//! Backbone weights are resolved in order:
//!
//! 1. an explicit weights file;
//! 2. the published file name inside a local weights directory;
//! 3. the disk cache, downloading on a miss.

use crate::cache::disk::DiskCacheConfig;
use crate::cache::prefabs::PreFabConfig;
use crate::models::cifar_resnet::prefabs::CIFAR10_WEIGHTS;
use crate::models::ftnet::ftnet_model::{FtNet, FtNetConfig};
use crate::models::ftnet::prefabs::PREFAB_FTNET_MAP;
use anyhow::bail;
use burn::config::Config;
use burn::prelude::Backend;
use std::path::PathBuf;

/// Options for [`load_pretrained_ftnet`].
#[derive(Config, Debug)]
pub struct FtNetLoadOptions {
    /// Explicit backbone weights file; skips every other source.
    #[config(default = "None")]
    pub weights_path: Option<String>,

    /// Local directory of published weights files.
    #[config(default = "None")]
    pub weights_dir: Option<String>,

    /// Name of the pretrained weights within the prefab.
    #[config(default = "CIFAR10_WEIGHTS.to_string()")]
    pub weights_name: String,

    /// Download cache policy.
    #[config(default = "DiskCacheConfig::new()")]
    pub disk_cache: DiskCacheConfig,
}

impl Default for FtNetLoadOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the local backbone weights file for a prefab.
///
/// # Returns
///
/// The path of the weights file; downloading to the disk cache if
/// neither `options.weights_path` nor `options.weights_dir` provide it.
#[tracing::instrument(skip(prefab), fields(prefab = %prefab.name))]
pub fn resolve_backbone_weights(
    prefab: &PreFabConfig<FtNetConfig>,
    options: &FtNetLoadOptions,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = &options.weights_path {
        let path = PathBuf::from(path);
        if !path.is_file() {
            bail!("Weights file not found: {}", path.display());
        }
        tracing::debug!(path = %path.display(), "using explicit weights");
        return Ok(path);
    }

    let descriptor = prefab.try_lookup_pretrained_weights(&options.weights_name)?;

    if let Some(dir) = &options.weights_dir {
        match descriptor.find_in_dir(dir) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using local weights");
                return Ok(path);
            }
            None => tracing::debug!(
                dir,
                file = descriptor.file_name()?,
                "weights not in local dir"
            ),
        }
    }

    descriptor.fetch_weights(&options.disk_cache)
}

/// Build a prefab [`FtNet`] with pretrained backbone weights.
///
/// # Arguments
///
/// - `prefab_name`: a [`PREFAB_FTNET_MAP`] name.
/// - `num_classes`: the number of head classes.
/// - `options`: weights resolution options.
/// - `device`: the target device.
#[tracing::instrument(skip(options, device))]
pub fn load_pretrained_ftnet<B: Backend>(
    prefab_name: &str,
    num_classes: usize,
    options: &FtNetLoadOptions,
    device: &B::Device,
) -> anyhow::Result<FtNet<B>> {
    let prefab = PREFAB_FTNET_MAP.try_lookup_prefab(prefab_name)?;

    let config = prefab.to_config().with_num_classes(num_classes);
    if let Err(err) = config.try_validate() {
        bail!("Invalid config for prefab \"{}\": {}", prefab_name, err);
    }

    let path = resolve_backbone_weights(&prefab, options)?;
    tracing::info!(path = %path.display(), "loading backbone weights");

    config.init::<B>(device).load_pretrained_backbone(path)
}
