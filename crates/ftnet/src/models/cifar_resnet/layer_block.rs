//! # `CifarResNet` Stage
//!
//! A [`LayerBlock`] is one resolution stage, ``torch``'s ``layerN``:
//! ``num_blocks`` [`BasicBlock`]s where only the first one strides
//! and changes the plane count.

use crate::models::cifar_resnet::basic_block::{BasicBlock, BasicBlockConfig, BasicBlockMeta};
use crate::models::cifar_resnet::shortcut::ShortcutKind;
use crate::models::cifar_resnet::util::strided_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`LayerBlock`] Config.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// Number of blocks in the stage.
    pub num_blocks: usize,

    /// Planes entering the stage.
    pub in_planes: usize,

    /// Planes of every block output.
    pub planes: usize,

    /// Stride of the first block.
    #[config(default = 1)]
    pub stride: usize,

    /// Shortcut flavor of the first block, when it needs one.
    #[config(default = "ShortcutKind::PadIdentity")]
    pub shortcut: ShortcutKind,
}

impl LayerBlockConfig {
    /// The per-block configs.
    ///
    /// The first block carries the stride and the plane change;
    /// the rest are ``planes -> planes`` at stride 1.
    pub fn block_configs(&self) -> Vec<BasicBlockConfig> {
        (0..self.num_blocks)
            .map(|idx| {
                let (in_planes, stride) = match idx {
                    0 => (self.in_planes, self.stride),
                    _ => (self.planes, 1),
                };
                BasicBlockConfig::new(in_planes, self.planes)
                    .with_stride(stride)
                    .with_shortcut(self.shortcut)
            })
            .collect()
    }

    /// Output resolution of the stage for an input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_output_resolution(input_resolution, self.stride)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.num_blocks == 0 {
            return Err("num_blocks must be > 0".to_string());
        }
        // Later blocks are identity-shaped; the first block covers every constraint.
        self.block_configs()[0]
            .try_validate()
            .map_err(|err| format!("block[0]: {}", err))
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a new [`LayerBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        self.expect_valid();

        LayerBlock {
            blocks: self
                .block_configs()
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// Residual stage.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// Stage blocks; ``torch`` keys ``layerN.{idx}``.
    pub blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    /// Planes entering the stage.
    pub fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    /// Planes leaving the stage.
    pub fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].planes()
    }

    /// Total stride of the stage.
    pub fn stride(&self) -> usize {
        self.blocks.iter().map(|block| block.stride()).product()
    }

    /// Apply the stage.
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
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] =
            strided_output_resolution([in_height, in_width], self.stride());

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

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
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_block_configs() {
        let config = LayerBlockConfig::new(3, 16, 32).with_stride(2);
        config.expect_valid();
        assert_eq!(config.output_resolution([32, 16]), [16, 8]);
        assert_eq!(config.output_resolution([31, 15]), [16, 8]);

        let blocks = config.block_configs();
        assert_eq!(blocks.len(), 3);

        let first = &blocks[0];
        assert_eq!((first.in_planes, first.planes, first.stride), (16, 32, 2));
        assert!(first.shortcut_config().is_some());

        for block in &blocks[1..] {
            assert_eq!((block.in_planes, block.planes, block.stride), (32, 32, 1));
            assert!(block.shortcut_config().is_none());
        }
    }

    #[test]
    fn test_invalid_configs() {
        assert!(LayerBlockConfig::new(0, 16, 16).try_validate().is_err());

        // A parameter-free shortcut cannot drop planes.
        let err = LayerBlockConfig::new(2, 32, 16)
            .with_stride(2)
            .try_validate()
            .unwrap_err();
        assert!(err.starts_with("block[0]"), "{}", err);

        assert!(
            LayerBlockConfig::new(2, 32, 16)
                .with_shortcut(ShortcutKind::Projection)
                .try_validate()
                .is_ok()
        );
    }

    #[test]
    #[should_panic(expected = "num_blocks must be > 0")]
    fn test_init_rejects_empty_stage() {
        let device = Default::default();
        let _stage: LayerBlock<B> = LayerBlockConfig::new(0, 16, 16).init(&device);
    }

    #[test]
    fn test_layer_block() {
        let device = Default::default();
        let stage: LayerBlock<B> = LayerBlockConfig::new(2, 16, 32)
            .with_stride(2)
            .init(&device);

        assert_eq!(stage.blocks.len(), 2);
        assert_eq!(stage.in_planes(), 16);
        assert_eq!(stage.out_planes(), 32);
        assert_eq!(stage.stride(), 2);

        let input = Tensor::ones([2, 16, 8, 8], &device);
        let output = stage.forward(input.clone());
        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_planes", 32),
                ("out_height", 4),
                ("out_width", 4)
            ],
        );

        let expected = stage
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        output.to_data().assert_eq(&expected.to_data(), true);

        let output = stage.forward(Tensor::ones([1, 16, 9, 3], &device));
        assert_eq!(output.dims(), [1, 32, 5, 2]);
    }
}
