//! # `ConvNorm2d` Module
//!
//! A [`ConvNorm2d`] is a square, bias-free [`Conv2d`] followed by a [`BatchNorm`];
//! the unit every CIFAR `ResNet` layer is built from.
//!
//! Padding is ``kernel_size / 2``, so a ``stride`` conv maps ``h -> ceil(h / stride)``
//! for any ``h``:
//!
//! * [`ConvNorm2dConfig::conv3x3`] - the stem and residual branch convs.
//! * [`ConvNorm2dConfig::conv1x1`] - the projection shortcut conv.

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// Kaiming normal (fan-in, ``gain = sqrt(2)``) for layers feeding a ``ReLU``.
pub const CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: std::f64::consts::SQRT_2,
    fan_out_only: false,
};

/// [`ConvNorm2d`] Meta.
pub trait ConvNorm2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Side of the square kernel.
    fn kernel_size(&self) -> usize;

    /// Spatial stride, shared by both axes.
    fn stride(&self) -> usize;

    /// Output resolution for an input resolution: ``ceil(in / stride)`` per axis.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let stride = self.stride();
        input_resolution.map(|size| size.div_ceil(stride))
    }
}

/// [`ConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of output channels.
    pub out_channels: usize,

    /// Side of the square kernel; must be odd.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Spatial stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Conv weight initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER")]
    pub initializer: Initializer,
}

impl ConvNorm2dMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ConvNorm2dConfig {
    /// ``Conv3x3(padding = 1) -> BatchNorm``.
    pub fn conv3x3(
        in_channels: usize,
        out_channels: usize,
    ) -> Self {
        Self::new(in_channels, out_channels)
    }

    /// ``Conv1x1 -> BatchNorm``.
    pub fn conv1x1(
        in_channels: usize,
        out_channels: usize,
    ) -> Self {
        Self::new(in_channels, out_channels).with_kernel_size(1)
    }

    /// Symmetric padding preserving ``ceil(in / stride)``.
    pub fn padding(&self) -> usize {
        self.kernel_size / 2
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(format!(
                "channels must be > 0: {} -> {}",
                self.in_channels, self.out_channels
            ));
        }
        if self.kernel_size % 2 == 0 {
            return Err(format!("kernel_size must be odd: {}", self.kernel_size));
        }
        if self.stride == 0 {
            return Err("stride must be > 0".to_string());
        }
        Ok(())
    }

    /// The inner [`Conv2dConfig`].
    pub fn conv_config(&self) -> Conv2dConfig {
        let padding = self.padding();
        Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_initializer(self.initializer.clone())
        .with_bias(false)
    }

    /// Initialize a [`ConvNorm2d`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }

        ConvNorm2d {
            conv: self.conv_config().init(device),
            norm: BatchNormConfig::new(self.out_channels).init(device),
        }
    }
}

/// [`Conv2d`] and [`BatchNorm`] layer.
///
/// The field names mirror the ``torch`` ``convN``/``bnN`` pairs they are loaded from.
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Bias-free conv.
    pub conv: Conv2d<B>,

    /// Batch norm over the conv channels.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm2dMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.dims()[1]
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn kernel_size(&self) -> usize {
        self.conv.weight.dims()[2]
    }

    fn stride(&self) -> usize {
        self.conv.stride[0]
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, ceil(in_height / stride), ceil(in_width / stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.norm.forward(self.conv.forward(input));

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
