#![allow(missing_docs)]
//! # `CifarResNet` ``torch`` Stubs.
//!
//! Stub modules mirroring the ``torch`` checkpoint key layout:
//!
//! ```text
//! conv1.weight, bn1.*
//! layer{1,2,3}.{i}.conv{1,2}.weight, layer{1,2,3}.{i}.bn{1,2}.*
//! layer{1,2,3}.{i}.shortcut.{0,1}.*   (projection shortcuts only)
//! linear.{weight,bias}
//! ```
//!
//! The loaded stub record is shape-checked and copied onto a [`CifarResNet`].
use crate::layers::blocks::conv_norm::ConvNorm2d;
use crate::models::cifar_resnet::basic_block::BasicBlock;
use crate::models::cifar_resnet::layer_block::LayerBlock;
use crate::models::cifar_resnet::resnet_model::CifarResNet;
use crate::models::cifar_resnet::shortcut::{ProjectionShortcut, Shortcut};
use anyhow::{Context, bail};
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dRecord};
use burn::nn::{BatchNorm, BatchNormRecord, Linear};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Top-level key of the published CIFAR checkpoints.
pub const STATE_DICT_KEY: &str = "state_dict";

/// Leading bytes of a zip-format (``torch >= 1.6``) checkpoint.
pub const TORCH_ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Reject checkpoints which are not in the ``torch`` zip format.
///
/// Files written by ``torch < 1.6`` are a bare pickle stream, which
/// [`PyTorchFileRecorder`] cannot read.
pub fn check_torch_zip_format(path: &Path) -> anyhow::Result<()> {
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .with_context(|| format!("Failed to read torch weights: {}", path.display()))?;

    if magic != TORCH_ZIP_MAGIC {
        bail!(
            "{}: not a zip-format torch checkpoint (legacy torch < 1.6 file?); \
             re-save it with `torch.save(checkpoint, path, _use_new_zipfile_serialization=True)` \
             or convert it to a native burn record",
            path.display()
        );
    }
    Ok(())
}

/// Load a [`CifarResNetStubRecord`] from a ``torch`` weights path.
///
/// # Arguments
///
/// - `path`: the checkpoint file.
/// - `top_level_key`: the dict key holding the tensors, if nested.
/// - `device`: the target device.
pub fn load_cifar_resnet_stub_record<B: Backend>(
    path: PathBuf,
    top_level_key: Option<&str>,
    device: &B::Device,
) -> anyhow::Result<CifarResNetStubRecord<B>> {
    check_torch_zip_format(&path)?;

    let mut load_args = LoadArgs::new(path.clone())
        // DataParallel
        .with_key_remap(r"^module\.", "")
        .with_key_remap(r"shortcut\.0", "shortcut.conv")
        .with_key_remap(r"shortcut\.1", "shortcut.bn");
    if let Some(key) = top_level_key {
        load_args = load_args.with_top_level_key(key);
    }

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::new()
        .load(load_args, device)
        .with_context(|| format!("Failed to load torch weights: {}", path.display()))?;

    Ok(record)
}

#[derive(Module, Debug)]
pub struct CifarResNetStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub layer1: Vec<BasicBlockStub<B>>,
    pub layer2: Vec<BasicBlockStub<B>>,
    pub layer3: Vec<BasicBlockStub<B>>,
    pub linear: Option<Linear<B>>,
}

impl<B: Backend> CifarResNetStubRecord<B> {
    pub fn copy_weights(
        self,
        target: CifarResNet<B>,
    ) -> anyhow::Result<CifarResNet<B>> {
        if target.layers.len() != 3 {
            bail!(
                "torch checkpoints have 3 stages; model has {}",
                target.layers.len()
            );
        }

        let stem = copy_conv_norm_weights("stem", self.conv1, self.bn1, target.stem)?;

        let layers = [self.layer1, self.layer2, self.layer3]
            .into_iter()
            .zip(target.layers)
            .enumerate()
            .map(|(idx, (stub, layer))| copy_layer_weights(idx + 1, stub, layer))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let fc = match (self.linear, target.fc) {
            (Some(stub), Some(fc)) => {
                let stub_dims = stub.weight.val().dims();
                let fc_dims = fc.weight.val().dims();
                if stub_dims == fc_dims {
                    Some(fc.load_record(stub))
                } else {
                    tracing::warn!(
                        checkpoint = ?stub_dims,
                        model = ?fc_dims,
                        "classifier shape mismatch; keeping fresh classifier"
                    );
                    Some(fc)
                }
            }
            (_, fc) => fc,
        };

        Ok(CifarResNet {
            stem,
            layers,
            fc,
            ..target
        })
    }
}

#[derive(Module, Debug)]
pub struct BasicBlockStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub shortcut: Option<ShortcutStub<B>>,
}

impl<B: Backend> BasicBlockStubRecord<B> {
    pub fn copy_weights(
        self,
        name: &str,
        target: BasicBlock<B>,
    ) -> anyhow::Result<BasicBlock<B>> {
        Ok(BasicBlock {
            conv_norm1: copy_conv_norm_weights(
                &format!("{name}.conv1"),
                self.conv1,
                self.bn1,
                target.conv_norm1,
            )?,
            conv_norm2: copy_conv_norm_weights(
                &format!("{name}.conv2"),
                self.conv2,
                self.bn2,
                target.conv_norm2,
            )?,
            shortcut: copy_shortcut_weights(
                &format!("{name}.shortcut"),
                self.shortcut,
                target.shortcut,
            )?,
            ..target
        })
    }
}

#[derive(Module, Debug)]
pub struct ShortcutStub<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

fn copy_layer_weights<B: Backend>(
    stage: usize,
    stub: Vec<BasicBlockStubRecord<B>>,
    target: LayerBlock<B>,
) -> anyhow::Result<LayerBlock<B>> {
    if stub.len() != target.blocks.len() {
        bail!(
            "layer{}: checkpoint has {} blocks; model has {}",
            stage,
            stub.len(),
            target.blocks.len()
        );
    }
    Ok(LayerBlock {
        blocks: stub
            .into_iter()
            .zip(target.blocks)
            .enumerate()
            .map(|(idx, (s, t))| s.copy_weights(&format!("layer{stage}.{idx}"), t))
            .collect::<anyhow::Result<Vec<_>>>()?,
    })
}

fn copy_shortcut_weights<B: Backend>(
    name: &str,
    stub: Option<ShortcutStubRecord<B>>,
    target: Option<Shortcut<B>>,
) -> anyhow::Result<Option<Shortcut<B>>> {
    match (stub, target) {
        (Some(stub), Some(Shortcut::Projection(proj))) => {
            Ok(Some(Shortcut::Projection(ProjectionShortcut {
                conv_norm: copy_conv_norm_weights(name, stub.conv, stub.bn, proj.conv_norm)?,
            })))
        }
        (Some(_), target) => bail!(
            "{}: checkpoint has a projection shortcut; model has {:?}",
            name,
            target.map(|s| s.kind())
        ),
        (None, Some(Shortcut::Projection(_))) => {
            bail!("{}: model has a projection shortcut; checkpoint has none", name)
        }
        (None, target) => Ok(target),
    }
}

fn copy_conv_norm_weights<B: Backend>(
    name: &str,
    conv: Conv2dRecord<B>,
    bn: BatchNormRecord<B, 2>,
    target: ConvNorm2d<B>,
) -> anyhow::Result<ConvNorm2d<B>> {
    let stub_dims = conv.weight.val().dims();
    let target_dims = target.conv.weight.val().dims();
    if stub_dims != target_dims {
        bail!(
            "{}: checkpoint conv weight {:?} != model conv weight {:?}",
            name,
            stub_dims,
            target_dims
        );
    }

    Ok(ConvNorm2d {
        conv: target.conv.load_record(conv),
        norm: target.norm.load_record(bn),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cifar_resnet::resnet_model::{CifarResNetConfig, CifarResNetMeta};
    use crate::models::cifar_resnet::shortcut::ShortcutKind;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;

    type B = NdArray<f32>;

    /// Re-shape a model as the stub a ``torch`` checkpoint would load into.
    fn to_stub(model: CifarResNet<B>) -> CifarResNetStub<B> {
        let mut layers = model.layers.into_iter().map(|layer| {
            layer
                .blocks
                .into_iter()
                .map(|block| BasicBlockStub {
                    conv1: block.conv_norm1.conv,
                    bn1: block.conv_norm1.norm,
                    conv2: block.conv_norm2.conv,
                    bn2: block.conv_norm2.norm,
                    shortcut: match block.shortcut {
                        Some(Shortcut::Projection(proj)) => Some(ShortcutStub {
                            conv: proj.conv_norm.conv,
                            bn: proj.conv_norm.norm,
                        }),
                        _ => None,
                    },
                })
                .collect::<Vec<_>>()
        });
        CifarResNetStub {
            conv1: model.stem.conv,
            bn1: model.stem.norm,
            layer1: layers.next().unwrap(),
            layer2: layers.next().unwrap(),
            layer3: layers.next().unwrap(),
            linear: model.fc,
        }
    }

    #[test]
    fn test_copy_weights() {
        let device = Default::default();
        let config = CifarResNetConfig::new(vec![2, 1, 1]);

        let source: CifarResNet<B> = config.clone().init(&device);
        let target: CifarResNet<B> = config.init(&device);

        let input: Tensor<B, 4> = Tensor::random(
            [2, 3, 8, 8],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let expected = source.forward(input.clone());

        let record = to_stub(source).into_record();
        let target = record.copy_weights(target).unwrap();

        target
            .forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_copy_weights_projection() {
        let device = Default::default();
        let config = CifarResNetConfig::new(vec![1, 1, 1]).with_shortcut(ShortcutKind::Projection);

        let source: CifarResNet<B> = config.clone().init(&device);
        let input: Tensor<B, 4> = Tensor::ones([1, 3, 8, 8], &device);
        let expected = source.forward(input.clone());
        let record = to_stub(source).into_record();

        let target: CifarResNet<B> = config.init(&device);
        let target = record.copy_weights(target).unwrap();
        target
            .forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);

        // A projection checkpoint does not fit a pad-identity model.
        let source: CifarResNet<B> = CifarResNetConfig::new(vec![1, 1, 1])
            .with_shortcut(ShortcutKind::Projection)
            .init(&device);
        let target: CifarResNet<B> = CifarResNetConfig::new(vec![1, 1, 1]).init(&device);
        assert!(to_stub(source).into_record().copy_weights(target).is_err());
    }

    #[test]
    fn test_copy_weights_mismatch() {
        let device = Default::default();

        let source: CifarResNet<B> = CifarResNetConfig::new(vec![1, 1, 1]).init(&device);
        let target: CifarResNet<B> = CifarResNetConfig::new(vec![2, 1, 1]).init(&device);
        let err = to_stub(source)
            .into_record()
            .copy_weights(target)
            .unwrap_err();
        assert!(err.to_string().contains("layer1"));

        let source: CifarResNet<B> = CifarResNetConfig::new(vec![1, 1, 1]).init(&device);
        let target: CifarResNet<B> = CifarResNetConfig::new(vec![1, 1, 1])
            .with_base_planes(8)
            .init(&device);
        assert!(to_stub(source).into_record().copy_weights(target).is_err());
    }

    #[test]
    fn test_copy_weights_classifier() {
        let device = Default::default();
        let config = CifarResNetConfig::new(vec![1, 1, 1]);

        // Mismatched classifier is left as initialized.
        let source: CifarResNet<B> = config.clone().init(&device);
        let target: CifarResNet<B> = config.clone().init::<B>(&device).with_classes(4);
        let fc_before = target.fc.as_ref().unwrap().weight.val();
        let target = to_stub(source).into_record().copy_weights(target).unwrap();
        assert_eq!(target.num_classes(), Some(4));
        target
            .fc
            .as_ref()
            .unwrap()
            .weight
            .val()
            .to_data()
            .assert_eq(&fc_before.to_data(), true);

        // Headless target ignores the checkpoint classifier.
        let source: CifarResNet<B> = config.clone().init(&device);
        let target = config.init::<B>(&device).without_classifier();
        let target = to_stub(source).into_record().copy_weights(target).unwrap();
        assert_eq!(target.num_classes(), None);
    }
}
