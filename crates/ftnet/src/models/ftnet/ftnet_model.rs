//! # `FtNet` Core Model
//!
//! [`FtNet`] is a [`CifarResNet`] backbone with its classifier removed,
//! a [`FeaturePooling`] stage, and a [`ClassBlock`] head:
//!
//! ```text
//! image -> backbone features -> pooling -> ClassBlock -> logits
//!                                              \-> embedding
//! ```

use crate::layers::heads::class_block::{ClassBlock, ClassBlockConfig, ClassBlockMeta};
use crate::layers::pool::spatial_pyramid::{SpatialPyramidPooling, SpatialPyramidPoolingConfig};
use crate::models::cifar_resnet::{CifarResNet, CifarResNetConfig, CifarResNetMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::prelude::{Backend, Tensor};
use std::path::PathBuf;

/// [`FeaturePooling`] Config.
#[derive(Config, Debug)]
pub enum FeaturePoolingConfig {
    /// Global average pooling; one cell per channel.
    GlobalAvg,

    /// Spatial pyramid pooling.
    SpatialPyramid(SpatialPyramidPoolingConfig),
}

impl From<SpatialPyramidPoolingConfig> for FeaturePoolingConfig {
    fn from(config: SpatialPyramidPoolingConfig) -> Self {
        Self::SpatialPyramid(config)
    }
}

impl FeaturePoolingConfig {
    /// Width of the pooled descriptor for a given channel count.
    pub fn output_features(
        &self,
        channels: usize,
    ) -> usize {
        match self {
            Self::GlobalAvg => channels,
            Self::SpatialPyramid(config) => config.output_features(channels),
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        match self {
            Self::GlobalAvg => Ok(()),
            Self::SpatialPyramid(config) => config.try_validate(),
        }
    }

    /// Initialize a [`FeaturePooling`].
    pub fn init(&self) -> FeaturePooling {
        match self {
            Self::GlobalAvg => {
                FeaturePooling::GlobalAvg(AdaptiveAvgPool2dConfig::new([1, 1]).init())
            }
            Self::SpatialPyramid(config) => FeaturePooling::SpatialPyramid(config.init()),
        }
    }
}

/// Feature map to descriptor pooling.
#[derive(Module, Clone, Debug)]
pub enum FeaturePooling {
    /// Global average pooling.
    GlobalAvg(AdaptiveAvgPool2d),

    /// Spatial pyramid pooling.
    SpatialPyramid(SpatialPyramidPooling),
}

impl FeaturePooling {
    /// Width of the pooled descriptor for a given channel count.
    pub fn output_features(
        &self,
        channels: usize,
    ) -> usize {
        match self {
            Self::GlobalAvg(_) => channels,
            Self::SpatialPyramid(spp) => spp.output_features(channels),
        }
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, output_features(channels)]`` tensor.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        match self {
            Self::GlobalAvg(pool) => pool.forward(input).flatten(1, 3),
            Self::SpatialPyramid(spp) => spp.forward(input),
        }
    }
}

/// [`FtNet`] Config.
#[derive(Config, Debug)]
pub struct FtNetConfig {
    /// Backbone config; its classifier is not built.
    pub backbone: CifarResNetConfig,

    /// Backbone feature pooling.
    #[config(default = "FeaturePoolingConfig::GlobalAvg")]
    pub pooling: FeaturePoolingConfig,

    /// Head config.
    pub head: ClassBlockConfig,
}

impl FtNetConfig {
    /// Build a config with a head sized to the pooled backbone features.
    ///
    /// # Arguments
    ///
    /// - `backbone`: the backbone config.
    /// - `pooling`: the feature pooling.
    /// - `num_classes`: the number of output classes.
    /// - `bottleneck`: the width of the head embedding.
    pub fn build(
        backbone: CifarResNetConfig,
        pooling: FeaturePoolingConfig,
        num_classes: usize,
        bottleneck: usize,
    ) -> Self {
        let input_dim = pooling.output_features(backbone.out_planes());
        Self {
            backbone: backbone.with_num_classes(None),
            pooling,
            head: ClassBlockConfig::new(input_dim, num_classes).with_bottleneck(bottleneck),
        }
    }

    /// Width of the pooled backbone descriptor.
    pub fn pooled_features(&self) -> usize {
        self.pooling.output_features(self.backbone.out_planes())
    }

    /// Replace the head's number of classes.
    pub fn with_num_classes(
        self,
        num_classes: usize,
    ) -> Self {
        Self {
            head: ClassBlockConfig {
                num_classes,
                ..self.head
            },
            ..self
        }
    }

    /// Replace the head's dropout probability.
    pub fn with_drop_rate(
        self,
        drop_rate: f64,
    ) -> Self {
        Self {
            head: self.head.with_drop_rate(drop_rate),
            ..self
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        self.backbone
            .try_validate()
            .map_err(|err| format!("backbone: {}", err))?;
        self.pooling
            .try_validate()
            .map_err(|err| format!("pooling: {}", err))?;
        self.head
            .try_validate()
            .map_err(|err| format!("head: {}", err))?;

        let pooled = self.pooled_features();
        if self.head.input_dim != pooled {
            return Err(format!(
                "head.input_dim ({}) != pooled backbone features ({})",
                self.head.input_dim, pooled
            ));
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

    /// Initialize an [`FtNet`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> FtNet<B> {
        self.expect_valid();

        FtNet {
            backbone: self.backbone.with_num_classes(None).init(device),
            pooling: self.pooling.init(),
            head: self.head.init(device),
        }
    }
}

/// `FtNet` model.
#[derive(Module, Debug)]
pub struct FtNet<B: Backend> {
    /// Headless backbone.
    pub backbone: CifarResNet<B>,

    /// Backbone feature pooling.
    pub pooling: FeaturePooling,

    /// Classification head.
    pub head: ClassBlock<B>,
}

impl<B: Backend> FtNet<B> {
    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    /// Width of the head embedding.
    pub fn feature_dim(&self) -> usize {
        self.head.feature_dim()
    }

    /// Pooled backbone descriptor.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]`` images.
    ///
    /// # Returns
    ///
    /// A ``[batch, pooled_features]`` tensor.
    pub fn forward_pooled(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch"],
            &[("channels", self.backbone.in_channels())]
        );

        let x = self.backbone.forward_features(input);
        let x = self.pooling.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "pooled"],
            &x,
            &[
                ("batch", batch),
                ("pooled", self.head.input_dim())
            ]
        );

        x
    }

    /// Head embedding.
    ///
    /// # Returns
    ///
    /// A ``[batch, feature_dim]`` tensor.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.head.forward_features(self.forward_pooled(input))
    }

    /// Forward Pass.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.head.forward(self.forward_pooled(input))
    }

    /// Forward Pass, also returning the head embedding.
    ///
    /// # Returns
    ///
    /// ``([batch, num_classes], [batch, feature_dim])``
    pub fn forward_with_features(
        &self,
        input: Tensor<B, 4>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        self.head.forward_with_features(self.forward_pooled(input))
    }

    /// Load ``torch`` backbone weights.
    ///
    /// The checkpoint classifier, if any, is ignored.
    pub fn load_pretrained_backbone<P: Into<PathBuf>>(
        self,
        path: P,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            backbone: self.backbone.load_pytorch_weights(path)?,
            ..self
        })
    }

    /// Stop gradients through the backbone.
    pub fn freeze_backbone(self) -> Self {
        Self {
            backbone: self.backbone.no_grad(),
            ..self
        }
    }

    /// Replace the head classifier; the head embedding is kept.
    pub fn with_classes(
        self,
        num_classes: usize,
    ) -> Self {
        Self {
            head: self.head.with_classes(num_classes),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::pool::spatial_pyramid::PyramidPoolMode;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;

    fn tiny_backbone() -> CifarResNetConfig {
        CifarResNetConfig::new(vec![1, 1, 1])
    }

    #[test]
    fn test_build_global_avg() {
        let config = FtNetConfig::build(
            CifarResNetConfig::resnet20(),
            FeaturePoolingConfig::GlobalAvg,
            751,
            512,
        );
        config.expect_valid();

        assert_eq!(config.backbone.num_classes, None);
        assert_eq!(config.pooled_features(), 64);
        assert_eq!(config.head.input_dim, 64);
        assert_eq!(config.head.bottleneck, 512);
        assert_eq!(config.head.num_classes, 751);
        assert_eq!(config.head.drop_rate, 0.5);
    }

    #[test]
    fn test_build_spp() {
        let config = FtNetConfig::build(
            CifarResNetConfig::resnet56(),
            SpatialPyramidPoolingConfig::new().into(),
            751,
            128,
        );
        config.expect_valid();

        // 64 * (1 + 4)
        assert_eq!(config.pooled_features(), 320);
        assert_eq!(config.head.input_dim, 320);
    }

    #[test]
    fn test_config_edits() {
        let config = FtNetConfig::build(tiny_backbone(), FeaturePoolingConfig::GlobalAvg, 10, 32)
            .with_num_classes(3)
            .with_drop_rate(0.25);
        assert_eq!(config.head.num_classes, 3);
        assert_eq!(config.head.drop_rate, 0.25);
        config.expect_valid();

        // Retargeting keeps the rest of the head.
        let config = FtNetConfig::build(
            tiny_backbone(),
            SpatialPyramidPoolingConfig::new().into(),
            751,
            128,
        )
        .with_num_classes(10);
        assert_eq!(config.head.num_classes, 10);
        assert_eq!(config.head.input_dim, 320);
        assert_eq!(config.head.bottleneck, 128);
        assert_eq!(config.head.drop_rate, 0.5);

        let device = Default::default();
        let model: FtNet<B> = config.init(&device);
        assert_eq!(model.num_classes(), 10);
        assert_eq!(model.feature_dim(), 128);
    }

    #[test]
    fn test_config_validation() {
        let config = FtNetConfig::build(tiny_backbone(), FeaturePoolingConfig::GlobalAvg, 10, 32);
        let bad_head = FtNetConfig {
            head: ClassBlockConfig {
                input_dim: 65,
                ..config.head.clone()
            },
            ..config.clone()
        };
        let err = bad_head.try_validate().unwrap_err();
        assert!(err.contains("input_dim"), "{}", err);

        let bad_pooling = FtNetConfig {
            pooling: SpatialPyramidPoolingConfig::new().with_levels(vec![]).into(),
            ..config.clone()
        };
        assert!(bad_pooling.try_validate().is_err());

        assert!(config.with_drop_rate(1.5).try_validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let config = FtNetConfig::build(
            tiny_backbone(),
            SpatialPyramidPoolingConfig::new()
                .with_mode(PyramidPoolMode::Avg)
                .into(),
            10,
            32,
        );

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ftnet.json");
        config.save(&path).unwrap();

        let loaded = FtNetConfig::load(&path).unwrap();
        assert_eq!(loaded.pooled_features(), config.pooled_features());
        assert_eq!(loaded.backbone.blocks, config.backbone.blocks);
        assert_eq!(loaded.head.bottleneck, 32);
        match loaded.pooling {
            FeaturePoolingConfig::SpatialPyramid(spp) => {
                assert_eq!(spp.levels, vec![1, 2]);
                assert_eq!(spp.mode, PyramidPoolMode::Avg);
            }
            other => panic!("unexpected pooling: {:?}", other),
        }
    }

    #[test]
    fn test_forward_global_avg() {
        let device = Default::default();
        let model: FtNet<B> =
            FtNetConfig::build(tiny_backbone(), FeaturePoolingConfig::GlobalAvg, 10, 32)
                .init(&device);

        assert!(model.backbone.fc.is_none());
        assert_eq!(model.num_classes(), 10);
        assert_eq!(model.feature_dim(), 32);

        let input = Tensor::ones([2, 3, 32, 32], &device);

        let pooled = model.forward_pooled(input.clone());
        assert_eq!(pooled.dims(), [2, 64]);

        let (logits, features) = model.forward_with_features(input.clone());
        assert_shape_contract!(["batch", "classes"], &logits, &[("batch", 2), ("classes", 10)]);
        assert_shape_contract!(
            ["batch", "features"],
            &features,
            &[("batch", 2), ("features", 32)]
        );

        logits
            .to_data()
            .assert_eq(&model.forward(input.clone()).to_data(), true);
        features
            .to_data()
            .assert_eq(&model.forward_features(input).to_data(), true);
    }

    #[test]
    fn test_forward_spp() {
        let device = Default::default();
        let model: FtNet<B> = FtNetConfig::build(
            tiny_backbone(),
            SpatialPyramidPoolingConfig::new().into(),
            7,
            16,
        )
        .init(&device);

        // Re-id shaped input; the feature map is 8x4.
        let input = Tensor::ones([2, 3, 32, 16], &device);
        assert_eq!(model.forward_pooled(input.clone()).dims(), [2, 320]);
        assert_eq!(model.forward(input).dims(), [2, 7]);
    }

    #[test]
    fn test_forward_any_resolution() {
        let device = Default::default();

        // 30x30 -> 8x8 feature map; 250x125 -> 63x32.
        for (pooling, input_resolution) in [
            (SpatialPyramidPoolingConfig::new().into(), [30, 30]),
            (FeaturePoolingConfig::GlobalAvg, [30, 30]),
            (FeaturePoolingConfig::GlobalAvg, [250, 125]),
        ] {
            let model: FtNet<B> = FtNetConfig::build(tiny_backbone(), pooling, 5, 16).init(&device);
            let pooled_features = model.head.input_dim();

            let [h, w] = input_resolution;
            let input = Tensor::ones([1, 3, h, w], &device);
            assert_eq!(model.forward_pooled(input.clone()).dims(), [1, pooled_features]);

            let (logits, features) = model.forward_with_features(input);
            assert_eq!(logits.dims(), [1, 5]);
            assert_eq!(features.dims(), [1, 16]);
        }
    }

    #[test]
    fn test_with_classes() {
        let device = Default::default();
        let model: FtNet<B> =
            FtNetConfig::build(tiny_backbone(), FeaturePoolingConfig::GlobalAvg, 10, 32)
                .init(&device)
                .with_classes(4);
        assert_eq!(model.num_classes(), 4);
        assert_eq!(model.feature_dim(), 32);
        assert_eq!(model.forward(Tensor::ones([1, 3, 8, 8], &device)).dims(), [1, 4]);
    }

    #[test]
    fn test_freeze_backbone() {
        type A = Autodiff<B>;
        let device = Default::default();
        let model: FtNet<A> =
            FtNetConfig::build(tiny_backbone(), FeaturePoolingConfig::GlobalAvg, 3, 8)
                .init(&device)
                .freeze_backbone();

        let input: Tensor<A, 4> = Tensor::ones([2, 3, 8, 8], &device);
        let grads = model.forward(input).sum().backward();

        assert!(model.head.classifier.weight.grad(&grads).is_some());
        assert!(model.backbone.stem.conv.weight.grad(&grads).is_none());
    }

    #[test]
    fn test_load_pretrained_backbone_missing() {
        let device = Default::default();
        let model: FtNet<B> =
            FtNetConfig::build(tiny_backbone(), FeaturePoolingConfig::GlobalAvg, 3, 8)
                .init(&device);
        let tmp = tempfile::tempdir().unwrap();
        assert!(
            model
                .load_pretrained_backbone(tmp.path().join("missing.th"))
                .is_err()
        );
    }
}
