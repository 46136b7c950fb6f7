//! # Basic Block for `CifarResNet`
//!
//! [`BasicBlock`] is the residual unit of the CIFAR `ResNet` family:
//!
//! ```text
//! relu(bn2(conv2(relu(bn1(conv1(x))))) + shortcut(x))
//! ```
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::cifar_resnet::shortcut::{Shortcut, ShortcutConfig, ShortcutKind};
use crate::models::cifar_resnet::util::strided_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Relu;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn planes(&self) -> usize;

    /// The stride of the first convolution.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Returns
    ///
    /// ``[ceil(in_height / stride), ceil(in_width / stride)]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_output_resolution(input_resolution, self.stride())
    }
}

/// [`BasicBlock`] Config.
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub planes: usize,

    /// The stride of the first convolution.
    #[config(default = 1)]
    pub stride: usize,

    /// Shortcut flavor, when a shortcut is needed.
    #[config(default = "ShortcutKind::PadIdentity")]
    pub shortcut: ShortcutKind,
}

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// The shortcut config; `None` when the block preserves shape.
    pub fn shortcut_config(&self) -> Option<ShortcutConfig> {
        let config = ShortcutConfig::new(self.in_planes, self.planes)
            .with_stride(self.stride)
            .with_kind(self.shortcut);
        config.is_required().then_some(config)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.in_planes == 0 || self.planes == 0 {
            return Err(format!(
                "planes must be > 0: in_planes={}, planes={}",
                self.in_planes, self.planes
            ));
        }
        match self.shortcut_config() {
            Some(config) => config.try_validate(),
            None => Ok(()),
        }
    }

    /// Initialize a [`BasicBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }

        BasicBlock {
            shortcut: self.shortcut_config().map(|cfg| cfg.init(device)),
            conv_norm1: ConvNorm2dConfig::conv3x3(self.in_planes, self.planes)
                .with_stride(self.stride)
                .init(device),
            conv_norm2: ConvNorm2dConfig::conv3x3(self.planes, self.planes).init(device),
            act: Relu::new(),
        }
    }
}

/// Basic Block for `CifarResNet`.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// First ``Conv3x3(stride) -> BatchNorm``.
    pub conv_norm1: ConvNorm2d<B>,

    /// Second ``Conv3x3 -> BatchNorm``.
    pub conv_norm2: ConvNorm2d<B>,

    /// Activation.
    pub act: Relu,

    /// Optional residual shortcut; identity when absent.
    pub shortcut: Option<Shortcut<B>>,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv_norm1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv_norm2.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv_norm1.stride()
    }
}

impl<B: Backend> BasicBlock<B> {
    /// The shortcut flavor, if the block has a shortcut.
    pub fn shortcut_kind(&self) -> Option<ShortcutKind> {
        self.shortcut.as_ref().map(|s| s.kind())
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, planes, ceil(in_height / stride), ceil(in_width / stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.conv_norm1.forward(input);
        let x = self.act.forward(x);
        let x = self.conv_norm2.forward(x);
        let x = self.act.forward(x + identity);

        assert_shape_contract_periodically!(
            ["batch", "planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("planes", self.planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
