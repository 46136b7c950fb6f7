//! # Classification Head
//!
//! [`ClassBlock`] maps a ``[batch, input_dim]`` feature vector to class logits,
//! through an optional embedding stage:
//!
//! ```text
//! Standard: [Linear] -> [BatchNorm1d] -> [LeakyReLU(0.1)] -> [Dropout] -> Linear
//! Deep:     [Linear -> BatchNorm1d -> LeakyReLU(0.1) -> Linear]
//!               -> [BatchNorm1d] -> [LeakyReLU(0.1)] -> [Dropout] -> Linear
//! ```
//!
//! [`ClassBlockConfig`] implements [`Config`], and provides
//! [`ClassBlockConfig::init`] to initialize a [`ClassBlock`].

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, LeakyRelu, LeakyReluConfig,
    Linear, LinearConfig,
};
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

/// Negative slope of the head's ``LeakyReLU`` layers.
pub const HEAD_LEAKY_RELU_SLOPE: f64 = 0.1;

/// Embedding layers: Kaiming normal, fan-out.
pub const EMBEDDING_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: std::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// Classifier layer: ``N(0, 0.001)``.
pub const CLASSIFIER_INITIALIZER: Initializer = Initializer::Normal {
    mean: 0.0,
    std: 0.001,
};

/// Embedding stage layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClassBlockVariant {
    /// A single bottleneck ``Linear``.
    #[default]
    Standard,

    /// ``Linear -> BatchNorm1d -> LeakyReLU -> Linear`` bottleneck.
    Deep,
}

/// [`ClassBlock`] Meta API.
pub trait ClassBlockMeta {
    /// Width of the input features.
    fn input_dim(&self) -> usize;

    /// Width of the embedding fed to the classifier.
    fn feature_dim(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;
}

/// [`ClassBlock`] Config.
#[derive(Config, Debug)]
pub struct ClassBlockConfig {
    /// Width of the input features.
    pub input_dim: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Dropout probability; no dropout layer is built at ``0.0``.
    #[config(default = "0.5")]
    pub drop_rate: f64,

    /// Apply a ``LeakyReLU`` after the embedding.
    #[config(default = "false")]
    pub relu: bool,

    /// Apply a ``BatchNorm1d`` to the embedding.
    #[config(default = "true")]
    pub batch_norm: bool,

    /// Width of the bottleneck embedding.
    #[config(default = "512")]
    pub bottleneck: usize,

    /// Build the bottleneck projection; when false the embedding width is `input_dim`.
    #[config(default = "true")]
    pub linear: bool,

    /// Embedding stage layout.
    #[config(default = "ClassBlockVariant::Standard")]
    pub variant: ClassBlockVariant,
}

impl ClassBlockMeta for ClassBlockConfig {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn feature_dim(&self) -> usize {
        if self.linear {
            self.bottleneck
        } else {
            self.input_dim
        }
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl ClassBlockConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.input_dim == 0 {
            return Err("input_dim must be > 0".to_string());
        }
        if self.num_classes == 0 {
            return Err("num_classes must be > 0".to_string());
        }
        if self.linear && self.bottleneck == 0 {
            return Err("bottleneck must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(format!("drop_rate must be in [0, 1): {}", self.drop_rate));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`ClassBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ClassBlock<B> {
        self.expect_valid();

        let feature_dim = self.feature_dim();

        let (projection, deep) = if self.linear {
            let projection = init_embedding_linear(self.input_dim, self.bottleneck, device);
            let deep = match self.variant {
                ClassBlockVariant::Standard => None,
                ClassBlockVariant::Deep => Some(DeepProjection {
                    norm: init_embedding_norm(self.bottleneck, device),
                    act: init_leaky_relu(),
                    fc: init_embedding_linear(self.bottleneck, self.bottleneck, device),
                }),
            };
            (Some(projection), deep)
        } else {
            (None, None)
        };

        ClassBlock {
            projection,
            deep,
            norm: self
                .batch_norm
                .then(|| init_embedding_norm(feature_dim, device)),
            act: self.relu.then(init_leaky_relu),
            dropout: (self.drop_rate > 0.0).then(|| DropoutConfig::new(self.drop_rate).init()),
            classifier: init_classifier(feature_dim, self.num_classes, device),
        }
    }
}

fn zero_bias<B: Backend>(mut linear: Linear<B>) -> Linear<B> {
    linear.bias = linear.bias.map(|bias| bias.map(|t| t.zeros_like()));
    linear
}

fn init_embedding_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    device: &B::Device,
) -> Linear<B> {
    zero_bias(
        LinearConfig::new(d_input, d_output)
            .with_initializer(EMBEDDING_INITIALIZER)
            .init(device),
    )
}

fn init_embedding_norm<B: Backend>(
    features: usize,
    device: &B::Device,
) -> BatchNorm<B, 0> {
    let mut norm: BatchNorm<B, 0> = BatchNormConfig::new(features).init(device);
    norm.gamma = norm.gamma.map(|gamma| {
        Tensor::random(
            gamma.shape(),
            Distribution::Normal(1.0, 0.02),
            &gamma.device(),
        )
    });
    norm.beta = norm.beta.map(|beta| beta.zeros_like());
    norm
}

fn init_leaky_relu() -> LeakyRelu {
    LeakyReluConfig::new()
        .with_negative_slope(HEAD_LEAKY_RELU_SLOPE)
        .init()
}

fn init_classifier<B: Backend>(
    feature_dim: usize,
    num_classes: usize,
    device: &B::Device,
) -> Linear<B> {
    zero_bias(
        LinearConfig::new(feature_dim, num_classes)
            .with_initializer(CLASSIFIER_INITIALIZER)
            .init(device),
    )
}

/// Second half of the [`ClassBlockVariant::Deep`] bottleneck.
#[derive(Module, Debug)]
pub struct DeepProjection<B: Backend> {
    /// Norm over the first projection.
    pub norm: BatchNorm<B, 0>,

    /// Activation.
    pub act: LeakyRelu,

    /// Second projection.
    pub fc: Linear<B>,
}

impl<B: Backend> DeepProjection<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let x = self.norm.forward(input);
        let x = self.act.forward(x);
        self.fc.forward(x)
    }
}

/// Fully connected classification head.
#[derive(Module, Debug)]
pub struct ClassBlock<B: Backend> {
    /// Optional bottleneck projection.
    pub projection: Option<Linear<B>>,

    /// Optional deep bottleneck tail.
    pub deep: Option<DeepProjection<B>>,

    /// Optional embedding norm.
    pub norm: Option<BatchNorm<B, 0>>,

    /// Optional embedding activation.
    pub act: Option<LeakyRelu>,

    /// Optional dropout.
    pub dropout: Option<Dropout>,

    /// Output layer.
    pub classifier: Linear<B>,
}

impl<B: Backend> ClassBlockMeta for ClassBlock<B> {
    fn input_dim(&self) -> usize {
        match &self.projection {
            Some(projection) => projection.weight.shape().dims[0],
            None => self.feature_dim(),
        }
    }

    fn feature_dim(&self) -> usize {
        self.classifier.weight.shape().dims[0]
    }

    fn num_classes(&self) -> usize {
        self.classifier.weight.shape().dims[1]
    }
}

impl<B: Backend> ClassBlock<B> {
    /// Compute the embedding.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, input_dim]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, feature_dim]`` tensor.
    pub fn forward_features(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "input_dim"],
            &input,
            &["batch"],
            &[("input_dim", self.input_dim())]
        );

        let x = match &self.projection {
            Some(projection) => projection.forward(input),
            None => input,
        };
        let x = match &self.deep {
            Some(deep) => deep.forward(x),
            None => x,
        };
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        let x = match &self.act {
            Some(act) => act.forward(x),
            None => x,
        };
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };

        assert_shape_contract_periodically!(
            ["batch", "feature_dim"],
            &x,
            &[("batch", batch), ("feature_dim", self.feature_dim())]
        );

        x
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, input_dim]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let x = self.forward_features(input);
        self.classifier.forward(x)
    }

    /// Forward Pass, also returning the embedding.
    ///
    /// # Returns
    ///
    /// ``([batch, num_classes], [batch, feature_dim])``
    pub fn forward_with_features(
        &self,
        input: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let features = self.forward_features(input);
        let logits = self.classifier.forward(features.clone());
        (logits, features)
    }

    /// Replace the classifier with a freshly initialized one.
    ///
    /// The embedding layers are kept.
    pub fn with_classes(
        self,
        num_classes: usize,
    ) -> Self {
        let device = &self.classifier.weight.device();
        let classifier = init_classifier(self.feature_dim(), num_classes, device);
        Self { classifier, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn test_config_defaults() {
        let config = ClassBlockConfig::new(64, 10);
        assert_eq!(config.drop_rate, 0.5);
        assert!(!config.relu);
        assert!(config.batch_norm);
        assert!(config.linear);
        assert_eq!(config.variant, ClassBlockVariant::Standard);
        assert_eq!(config.input_dim(), 64);
        assert_eq!(config.feature_dim(), 512);
        assert_eq!(config.num_classes(), 10);

        let config = config.with_linear(false);
        assert_eq!(config.feature_dim(), 64);
    }

    #[test]
    fn test_config_validation() {
        assert!(ClassBlockConfig::new(64, 10).try_validate().is_ok());
        assert!(ClassBlockConfig::new(0, 10).try_validate().is_err());
        assert!(ClassBlockConfig::new(64, 0).try_validate().is_err());
        assert!(
            ClassBlockConfig::new(64, 10)
                .with_drop_rate(1.0)
                .try_validate()
                .is_err()
        );
        assert!(
            ClassBlockConfig::new(64, 10)
                .with_bottleneck(0)
                .try_validate()
                .is_err()
        );
        // Bottleneck width is irrelevant without a projection.
        assert!(
            ClassBlockConfig::new(64, 10)
                .with_bottleneck(0)
                .with_linear(false)
                .try_validate()
                .is_ok()
        );
    }

    #[test]
    fn test_standard_layout() {
        let device = Default::default();
        let head: ClassBlock<B> = ClassBlockConfig::new(64, 10)
            .with_bottleneck(128)
            .init(&device);

        assert!(head.projection.is_some());
        assert!(head.deep.is_none());
        assert!(head.norm.is_some());
        assert!(head.act.is_none());
        assert!(head.dropout.is_some());

        assert_eq!(head.input_dim(), 64);
        assert_eq!(head.feature_dim(), 128);
        assert_eq!(head.num_classes(), 10);

        let input = Tensor::ones([3, 64], &device);
        let (logits, features) = head.forward_with_features(input);
        assert_shape_contract!(["batch", "classes"], &logits, &[("batch", 3), ("classes", 10)]);
        assert_shape_contract!(
            ["batch", "features"],
            &features,
            &[("batch", 3), ("features", 128)]
        );
    }

    #[test]
    fn test_deep_layout() {
        let device = Default::default();
        let head: ClassBlock<B> = ClassBlockConfig::new(64, 7)
            .with_bottleneck(32)
            .with_variant(ClassBlockVariant::Deep)
            .with_relu(true)
            .with_drop_rate(0.0)
            .init(&device);

        assert!(head.deep.is_some());
        assert!(head.act.is_some());
        assert!(head.dropout.is_none());
        assert_eq!(head.feature_dim(), 32);

        let output = head.forward(Tensor::ones([2, 64], &device));
        assert_eq!(output.dims(), [2, 7]);
    }

    #[test]
    fn test_no_linear_layout() {
        let device = Default::default();
        let head: ClassBlock<B> = ClassBlockConfig::new(64, 5)
            .with_linear(false)
            .with_variant(ClassBlockVariant::Deep)
            .init(&device);

        assert!(head.projection.is_none());
        assert!(head.deep.is_none());
        assert_eq!(head.input_dim(), 64);
        assert_eq!(head.feature_dim(), 64);

        let features = head.forward_features(Tensor::ones([2, 64], &device));
        assert_eq!(features.dims(), [2, 64]);
    }

    #[test]
    fn test_initialization() {
        let device = Default::default();
        let head: ClassBlock<B> = ClassBlockConfig::new(256, 512)
            .with_bottleneck(512)
            .init(&device);

        let projection = head.projection.as_ref().unwrap();
        let bias = projection.bias.as_ref().unwrap().val();
        assert_eq!(bias.abs().sum().into_scalar(), 0.0);

        // Kaiming fan-out: ``std = sqrt(2 / bottleneck)``; `close_to` tolerances are relative.
        let weight = projection.weight.val();
        let rms = weight.powf_scalar(2.0).mean().sqrt().into_scalar() as f64;
        assert_that!(rms, is(close_to((2.0f64 / 512.0).sqrt(), 0.01)));

        let bias = head.classifier.bias.as_ref().unwrap().val();
        assert_eq!(bias.abs().sum().into_scalar(), 0.0);

        let weight = head.classifier.weight.val();
        let rms = weight.powf_scalar(2.0).mean().sqrt().into_scalar() as f64;
        assert_that!(rms, is(close_to(0.001, 0.01)));

        let norm = head.norm.as_ref().unwrap();
        assert_eq!(norm.beta.val().abs().sum().into_scalar(), 0.0);
        let gamma_mean = norm.gamma.val().mean().into_scalar() as f64;
        assert_that!(gamma_mean, is(close_to(1.0, 0.01)));
    }

    #[test]
    fn test_with_classes() {
        let device = Default::default();
        let head: ClassBlock<B> = ClassBlockConfig::new(64, 10)
            .with_bottleneck(16)
            .init(&device);

        let head = head.with_classes(751);
        assert_eq!(head.num_classes(), 751);
        assert_eq!(head.feature_dim(), 16);
        assert_eq!(head.input_dim(), 64);
    }

    #[test]
    fn test_autodiff_backward() {
        type A = Autodiff<B>;
        let device = Default::default();
        let head: ClassBlock<A> = ClassBlockConfig::new(8, 3)
            .with_bottleneck(4)
            .init(&device);

        let input: Tensor<A, 2> = Tensor::ones([4, 8], &device);
        let grads = head.forward(input).sum().backward();

        let grad = head.classifier.weight.grad(&grads);
        assert!(grad.is_some());
    }
}
