//! # `CifarResNet` Core Model
//!
//! [`CifarResNet`] is the ``6n + 2`` layer residual network for small
//! (``32x32``) images: a ``3x3`` stem, three stages of [`BasicBlock`]s,
//! global average pooling, and an optional linear classifier.
//!
//! [`CifarResNetConfig`] implements [`Config`], and provides
//! [`CifarResNetConfig::init`] to initialize a [`CifarResNet`].
//!
//! [`BasicBlock`]: crate::models::cifar_resnet::basic_block::BasicBlock

use crate::layers::blocks::conv_norm::{
    CONV_INTO_RELU_INITIALIZER, ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta,
};
use crate::models::cifar_resnet::layer_block::{LayerBlock, LayerBlockConfig};
use crate::models::cifar_resnet::shortcut::ShortcutKind;
use crate::models::cifar_resnet::util::strided_output_resolution;
use anyhow::bail;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Config, Tensor};

/// ResNet-20 stage depths.
pub const RESNET20_BLOCKS: [usize; 3] = [3, 3, 3];
/// ResNet-32 stage depths.
pub const RESNET32_BLOCKS: [usize; 3] = [5, 5, 5];
/// ResNet-44 stage depths.
pub const RESNET44_BLOCKS: [usize; 3] = [7, 7, 7];
/// ResNet-56 stage depths.
pub const RESNET56_BLOCKS: [usize; 3] = [9, 9, 9];
/// ResNet-110 stage depths.
pub const RESNET110_BLOCKS: [usize; 3] = [18, 18, 18];
/// ResNet-1202 stage depths.
pub const RESNET1202_BLOCKS: [usize; 3] = [200, 200, 200];

/// Number of classes in the published CIFAR-10 checkpoints.
pub const CIFAR10_CLASSES: usize = 10;

/// [`CifarResNet`] Meta API.
pub trait CifarResNetMeta {
    /// The number of input image channels.
    fn in_channels(&self) -> usize;

    /// The number of planes in the final feature map.
    fn out_planes(&self) -> usize;

    /// The number of output classes; `None` for a headless model.
    fn num_classes(&self) -> Option<usize>;

    /// Total spatial reduction of the feature map.
    fn stride(&self) -> usize;

    /// Get the feature map resolution for a given input resolution.
    ///
    /// Any input resolution is accepted; each strided stage rounds up.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_output_resolution(input_resolution, self.stride())
    }
}

/// [`CifarResNet`] Config.
#[derive(Config, Debug)]
pub struct CifarResNetConfig {
    /// Blocks per stage.
    pub blocks: Vec<usize>,

    /// Output classes; `None` builds the model without a classifier.
    #[config(default = "Some(CIFAR10_CLASSES)")]
    pub num_classes: Option<usize>,

    /// Input image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Width of the stem and the first stage; doubled at each later stage.
    #[config(default = 16)]
    pub base_planes: usize,

    /// Shortcut flavor for blocks which change shape.
    #[config(default = "ShortcutKind::PadIdentity")]
    pub shortcut: ShortcutKind,
}

impl CifarResNetMeta for CifarResNetConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_planes(&self) -> usize {
        self.stage_planes().last().copied().unwrap_or(self.base_planes)
    }

    fn num_classes(&self) -> Option<usize> {
        self.num_classes
    }

    fn stride(&self) -> usize {
        self.stage_strides().iter().product()
    }
}

impl CifarResNetConfig {
    /// Build the config for a ``6n + 2`` layer network.
    ///
    /// # Returns
    ///
    /// An error if ``depth`` is not ``6n + 2`` for some ``n >= 1``.
    pub fn from_depth(depth: usize) -> anyhow::Result<Self> {
        if depth < 8 || (depth - 2) % 6 != 0 {
            bail!("CifarResNet depth must be 6n+2 with n >= 1, got {}", depth);
        }
        let n = (depth - 2) / 6;
        Ok(Self::new(vec![n; 3]))
    }

    /// ResNet-20.
    pub fn resnet20() -> Self {
        Self::new(RESNET20_BLOCKS.to_vec())
    }

    /// ResNet-32.
    pub fn resnet32() -> Self {
        Self::new(RESNET32_BLOCKS.to_vec())
    }

    /// ResNet-44.
    pub fn resnet44() -> Self {
        Self::new(RESNET44_BLOCKS.to_vec())
    }

    /// ResNet-56.
    pub fn resnet56() -> Self {
        Self::new(RESNET56_BLOCKS.to_vec())
    }

    /// ResNet-110.
    pub fn resnet110() -> Self {
        Self::new(RESNET110_BLOCKS.to_vec())
    }

    /// ResNet-1202.
    pub fn resnet1202() -> Self {
        Self::new(RESNET1202_BLOCKS.to_vec())
    }

    /// Total weighted layer count: ``2 * sum(blocks) + 2``.
    pub fn depth(&self) -> usize {
        2 * self.blocks.iter().sum::<usize>() + 2
    }

    /// Output planes of each stage.
    pub fn stage_planes(&self) -> Vec<usize> {
        (0..self.blocks.len())
            .map(|idx| self.base_planes << idx)
            .collect()
    }

    /// First-block stride of each stage.
    pub fn stage_strides(&self) -> Vec<usize> {
        (0..self.blocks.len())
            .map(|idx| if idx == 0 { 1 } else { 2 })
            .collect()
    }

    /// Expand the stage configs.
    pub fn layer_configs(&self) -> Vec<LayerBlockConfig> {
        let mut in_planes = self.base_planes;
        self.blocks
            .iter()
            .zip(self.stage_planes())
            .zip(self.stage_strides())
            .map(|((&num_blocks, planes), stride)| {
                let layer = LayerBlockConfig::new(num_blocks, in_planes, planes)
                    .with_stride(stride)
                    .with_shortcut(self.shortcut);
                in_planes = planes;
                layer
            })
            .collect()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.blocks.is_empty() {
            return Err("blocks is empty".to_string());
        }
        if let Some(idx) = self.blocks.iter().position(|&b| b == 0) {
            return Err(format!("blocks[{}] is 0: {:?}", idx, self.blocks));
        }
        if self.in_channels == 0 || self.base_planes == 0 {
            return Err(format!(
                "in_channels ({}) and base_planes ({}) must be > 0",
                self.in_channels, self.base_planes
            ));
        }
        if self.num_classes == Some(0) {
            return Err("num_classes must be > 0".to_string());
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// Initialize a [`CifarResNet`] model.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> CifarResNet<B> {
        self.expect_valid();

        let out_planes = self.out_planes();

        CifarResNet {
            stem: ConvNorm2dConfig::conv3x3(self.in_channels, self.base_planes).init(device),
            act: Relu::new(),
            layers: self
                .layer_configs()
                .into_iter()
                .map(|c| c.init(device))
                .collect(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: self
                .num_classes
                .map(|n| init_classifier(out_planes, n, device)),
        }
    }
}

fn init_classifier<B: Backend>(
    d_input: usize,
    num_classes: usize,
    device: &B::Device,
) -> Linear<B> {
    LinearConfig::new(d_input, num_classes)
        .with_initializer(CONV_INTO_RELU_INITIALIZER)
        .init(device)
}

/// `CifarResNet` model.
#[derive(Module, Debug)]
pub struct CifarResNet<B: Backend> {
    /// Stem ``Conv3x3 -> BatchNorm``.
    pub stem: ConvNorm2d<B>,

    /// Shared activation.
    pub act: Relu,

    /// Residual stages.
    pub layers: Vec<LayerBlock<B>>,

    /// Global average pool.
    pub pool: AdaptiveAvgPool2d,

    /// Optional classifier.
    pub fc: Option<Linear<B>>,
}

impl<B: Backend> CifarResNetMeta for CifarResNet<B> {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn out_planes(&self) -> usize {
        match self.layers.last() {
            Some(layer) => layer.out_planes(),
            None => self.stem.out_channels(),
        }
    }

    fn num_classes(&self) -> Option<usize> {
        self.fc.as_ref().map(|fc| fc.weight.dims()[1])
    }

    fn stride(&self) -> usize {
        self.layers.iter().map(|layer| layer.stride()).product()
    }
}

impl<B: Backend> CifarResNet<B> {
    /// Stem and residual stages.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``; any resolution.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, ceil(in_height / stride), ceil(in_width / stride)]`` feature map.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.stem.forward(input);
        let x = self.act.forward(x);
        let x = self.layers.iter().fold(x, |x, layer| layer.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }

    /// Globally pooled features.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes]`` tensor.
    pub fn forward_embedding(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.forward_features(input);
        // [B, C, 1, 1] -> [B, C]
        self.pool.forward(x).flatten(1, 3)
    }

    /// Forward Pass.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits; or the ``[batch, out_planes]``
    /// embedding when the model has no classifier.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.forward_embedding(input);
        match &self.fc {
            Some(fc) => fc.forward(x),
            None => x,
        }
    }

    /// Remove the classifier.
    pub fn without_classifier(mut self) -> Self {
        self.fc = None;
        self
    }

    /// Re-initialize the classifier with the specified number of output classes.
    pub fn with_classes(
        mut self,
        num_classes: usize,
    ) -> Self {
        let device = self.stem.conv.weight.device();
        self.fc = Some(init_classifier(self.out_planes(), num_classes, &device));
        self
    }
}
