//! # Spatial Pyramid Pooling
//!
//! [`SpatialPyramidPooling`] reduces a ``[batch, channels, height, width]`` feature map
//! to a fixed-length ``[batch, channels * sum(n * n)]`` descriptor, one ``n x n`` grid
//! per pyramid level, independent of the input resolution.
//!
//! # Reference Python
//!
//! ```python,ignore
//! for i in range(len(levels)):
//!     h_kernel = int(math.ceil(previous_conv_size[0] / levels[i]))
//!     w_kernel = int(math.ceil(previous_conv_size[1] / levels[i]))
//!     w_pad1 = int(math.floor((w_kernel * levels[i] - previous_conv_size[1]) / 2))
//!     w_pad2 = int(math.ceil((w_kernel * levels[i] - previous_conv_size[1]) / 2))
//!     h_pad1 = int(math.floor((h_kernel * levels[i] - previous_conv_size[0]) / 2))
//!     h_pad2 = int(math.ceil((h_kernel * levels[i] - previous_conv_size[0]) / 2))
//!     padded_input = F.pad(input=previous_conv, pad=[w_pad1, w_pad2, h_pad1, h_pad2],
//!                          mode='constant', value=0)
//!     if mode == "max":
//!         pool = nn.MaxPool2d((h_kernel, w_kernel), stride=(h_kernel, w_kernel), padding=(0, 0))
//!     elif mode == "avg":
//!         pool = nn.AvgPool2d((h_kernel, w_kernel), stride=(h_kernel, w_kernel), padding=(0, 0))
//!     x = pool(padded_input)
//!     spp = x.view(num_sample, -1) if i == 0 else torch.cat((spp, x.view(num_sample, -1)), 1)
//! ```

use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AvgPool2dConfig, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Pooling operator applied to each pyramid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PyramidPoolMode {
    /// Max pooling.
    #[default]
    Max,

    /// Average pooling.
    Avg,
}

/// Pooling geometry of one pyramid level along one axis.
///
/// # Returns
///
/// ``(kernel, pad_before, pad_after)``, where ``kernel * bins == size + pad_before + pad_after``.
pub fn pyramid_level_geometry(
    size: usize,
    bins: usize,
) -> (usize, usize, usize) {
    let kernel = size.div_ceil(bins);
    let extra = kernel * bins - size;
    (kernel, extra / 2, extra - extra / 2)
}

/// [`SpatialPyramidPooling`] Config.
#[derive(Config, Debug)]
pub struct SpatialPyramidPoolingConfig {
    /// Grid sizes of the pyramid levels, in output order.
    #[config(default = "vec![1, 2]")]
    pub levels: Vec<usize>,

    /// Pooling operator.
    #[config(default = "PyramidPoolMode::Max")]
    pub mode: PyramidPoolMode,
}

impl Default for SpatialPyramidPoolingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialPyramidPoolingConfig {
    /// Number of cells per channel, summed over all levels.
    pub fn cells(&self) -> usize {
        self.levels.iter().map(|n| n * n).sum()
    }

    /// Width of the pooled descriptor for a given channel count.
    pub fn output_features(
        &self,
        channels: usize,
    ) -> usize {
        channels * self.cells()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.levels.is_empty() {
            return Err("levels is empty".to_string());
        }
        if self.levels.contains(&0) {
            return Err(format!("levels contains a zero-sized level: {:?}", self.levels));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`SpatialPyramidPooling`].
    pub fn init(&self) -> SpatialPyramidPooling {
        self.expect_valid();
        let levels = self.levels.clone();
        match self.mode {
            PyramidPoolMode::Max => SpatialPyramidPooling::Max(levels),
            PyramidPoolMode::Avg => SpatialPyramidPooling::Avg(levels),
        }
    }
}

/// Spatial Pyramid Pooling layer.
///
/// Each variant holds the grid sizes of the pyramid levels.
/// Stateless; the pooling kernels are derived from the input resolution on every call.
#[derive(Module, Clone, Debug)]
pub enum SpatialPyramidPooling {
    /// Max pooling over each pyramid cell.
    Max(Vec<usize>),

    /// Average pooling over each pyramid cell.
    Avg(Vec<usize>),
}

impl SpatialPyramidPooling {
    /// Grid sizes of the pyramid levels.
    pub fn levels(&self) -> &[usize] {
        match self {
            Self::Max(levels) | Self::Avg(levels) => levels,
        }
    }

    /// Pooling operator.
    pub fn mode(&self) -> PyramidPoolMode {
        match self {
            Self::Max(_) => PyramidPoolMode::Max,
            Self::Avg(_) => PyramidPoolMode::Avg,
        }
    }

    /// Number of cells per channel, summed over all levels.
    pub fn cells(&self) -> usize {
        self.levels().iter().map(|n| n * n).sum()
    }

    /// Width of the pooled descriptor for a given channel count.
    pub fn output_features(
        &self,
        channels: usize,
    ) -> usize {
        channels * self.cells()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, channels * sum(n * n for n in levels)]`` tensor; each level is
    /// flattened channel-major, levels are concatenated in order.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch, channels, height, width] = input.dims();

        let grids = self
            .levels()
            .iter()
            .map(|&bins| {
                let (kernel_h, pad_top, pad_bottom) = pyramid_level_geometry(height, bins);
                let (kernel_w, pad_left, pad_right) = pyramid_level_geometry(width, bins);

                let x = if pad_top + pad_bottom + pad_left + pad_right > 0 {
                    input
                        .clone()
                        .pad((pad_left, pad_right, pad_top, pad_bottom), 0.0)
                } else {
                    input.clone()
                };

                let kernel = [kernel_h, kernel_w];
                let x = match self {
                    Self::Max(_) => MaxPool2dConfig::new(kernel)
                        .with_strides(kernel)
                        .init()
                        .forward(x),
                    Self::Avg(_) => AvgPool2dConfig::new(kernel)
                        .with_strides(kernel)
                        .init()
                        .forward(x),
                };

                x.reshape([batch, channels * bins * bins])
            })
            .collect::<Vec<_>>();

        Tensor::cat(grids, 1)
    }
}
