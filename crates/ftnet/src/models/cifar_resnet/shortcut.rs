//! # Residual Shortcuts
//!
//! The residual path of a [`super::basic_block::BasicBlock`] must match the
//! block's output shape whenever the block changes resolution or width.
//!
//! * [`PadIdentityShortcut`] - subsample, then zero-pad the channel dimension.
//!   Parameter free; this is the layout of the published CIFAR checkpoints.
//! * [`ProjectionShortcut`] - ``Conv1x1(stride) -> BatchNorm``.

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::cifar_resnet::util::{scalar_to_array, strided_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Residual shortcut flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ShortcutKind {
    /// Subsample and zero-pad channels; no parameters.
    #[default]
    PadIdentity,

    /// ``Conv1x1 -> BatchNorm`` projection.
    Projection,
}

/// [`Shortcut`] Meta API.
pub trait ShortcutMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// Spatial stride.
    fn stride(&self) -> usize;

    /// Output resolution for an input resolution: ``ceil(in / stride)`` per axis.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_output_resolution(input_resolution, self.stride())
    }
}

/// [`Shortcut`] Config.
#[derive(Config, Debug)]
pub struct ShortcutConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub out_planes: usize,

    /// Spatial stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Shortcut flavor.
    #[config(default = "ShortcutKind::PadIdentity")]
    pub kind: ShortcutKind,
}

impl ShortcutMeta for ShortcutConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ShortcutConfig {
    /// Is a shortcut needed for a block with this geometry?
    pub fn is_required(&self) -> bool {
        self.stride != 1 || self.in_planes != self.out_planes
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stride == 0 {
            return Err("stride must be > 0".to_string());
        }
        if self.kind == ShortcutKind::PadIdentity && self.out_planes < self.in_planes {
            return Err(format!(
                "PadIdentity shortcut cannot shrink planes: {} -> {}",
                self.in_planes, self.out_planes
            ));
        }
        Ok(())
    }

    /// Initialize a [`Shortcut`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Shortcut<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }

        match self.kind {
            ShortcutKind::PadIdentity => Shortcut::PadIdentity(PadIdentityShortcut {
                pool: (self.stride != 1).then(|| {
                    AvgPool2dConfig::new([1, 1])
                        .with_strides(scalar_to_array(self.stride))
                        .init()
                }),
                in_planes: self.in_planes,
                out_planes: self.out_planes,
                stride: self.stride,
            }),
            ShortcutKind::Projection => Shortcut::Projection(ProjectionShortcut {
                conv_norm: ConvNorm2dConfig::conv1x1(self.in_planes, self.out_planes)
                    .with_stride(self.stride)
                    .init(device),
            }),
        }
    }
}

/// Subsample ``x[:, :, ::stride, ::stride]``, then zero-pad channels.
///
/// An odd axis keeps its last row/column: ``h -> ceil(h / stride)``.
///
/// The ``out_planes - in_planes`` padding planes are split evenly,
/// the odd plane (if any) going after the input.
#[derive(Module, Clone, Debug)]
pub struct PadIdentityShortcut {
    /// ``1x1`` strided pool without padding; a pure subsample. `None` at stride 1.
    pub pool: Option<AvgPool2d>,

    /// Input planes.
    pub in_planes: usize,

    /// Output planes.
    pub out_planes: usize,

    /// Spatial stride.
    pub stride: usize,
}

impl PadIdentityShortcut {
    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = match &self.pool {
            Some(pool) => pool.forward(input),
            None => input,
        };

        let extra = self.out_planes - self.in_planes;
        if extra == 0 {
            return x;
        }
        let before = extra / 2;
        let after = extra - before;

        let [batch, _, height, width] = x.dims();
        let device = x.device();

        let mut parts = Vec::with_capacity(3);
        if before > 0 {
            parts.push(Tensor::zeros([batch, before, height, width], &device));
        }
        parts.push(x);
        parts.push(Tensor::zeros([batch, after, height, width], &device));

        Tensor::cat(parts, 1)
    }
}

/// ``Conv1x1(stride) -> BatchNorm`` shortcut.
#[derive(Module, Debug)]
pub struct ProjectionShortcut<B: Backend> {
    /// Embedded conv/norm.
    pub conv_norm: ConvNorm2d<B>,
}

/// Residual shortcut.
#[derive(Module, Debug)]
pub enum Shortcut<B: Backend> {
    /// Parameter-free subsample and pad.
    PadIdentity(PadIdentityShortcut),

    /// Learned projection.
    Projection(ProjectionShortcut<B>),
}

impl<B: Backend> ShortcutMeta for Shortcut<B> {
    fn in_planes(&self) -> usize {
        match self {
            Shortcut::PadIdentity(s) => s.in_planes,
            Shortcut::Projection(s) => s.conv_norm.in_channels(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Shortcut::PadIdentity(s) => s.out_planes,
            Shortcut::Projection(s) => s.conv_norm.out_channels(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Shortcut::PadIdentity(s) => s.stride,
            Shortcut::Projection(s) => s.conv_norm.stride(),
        }
    }
}

impl<B: Backend> Shortcut<B> {
    /// The flavor of this shortcut.
    pub fn kind(&self) -> ShortcutKind {
        match self {
            Shortcut::PadIdentity(_) => ShortcutKind::PadIdentity,
            Shortcut::Projection(_) => ShortcutKind::Projection,
        }
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, ceil(in_height / stride), ceil(in_width / stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let out = match self {
            Shortcut::PadIdentity(s) => s.forward(input),
            Shortcut::Projection(s) => s.conv_norm.forward(input),
        };

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        out
    }
}
