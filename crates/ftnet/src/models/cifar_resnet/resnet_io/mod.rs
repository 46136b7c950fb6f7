//! # `CifarResNet` Weight Import
pub mod pytorch_stubs;

use crate::models::cifar_resnet::resnet_model::CifarResNet;
use burn::module::Module;
use burn::prelude::Backend;
use pytorch_stubs::{STATE_DICT_KEY, load_cifar_resnet_stub_record};
use std::path::PathBuf;

impl<B: Backend> CifarResNet<B> {
    /// Load weights from a ``torch`` checkpoint.
    ///
    /// The tensors are expected under the ``state_dict`` key; a ``module.``
    /// (``DataParallel``) prefix on the names is stripped.
    ///
    /// The checkpoint classifier is only copied when the model still has
    /// a classifier of the same shape.
    pub fn load_pytorch_weights<P: Into<PathBuf>>(
        self,
        path: P,
    ) -> anyhow::Result<Self> {
        self.load_pytorch_weights_with_key(path, Some(STATE_DICT_KEY))
    }

    /// Load weights from a ``torch`` checkpoint.
    ///
    /// # Arguments
    ///
    /// - `path`: the checkpoint file.
    /// - `top_level_key`: the dict key holding the tensors; `None` for a bare state dict.
    #[tracing::instrument(skip(self, path), fields(path = tracing::field::Empty))]
    pub fn load_pytorch_weights_with_key<P: Into<PathBuf>>(
        self,
        path: P,
        top_level_key: Option<&str>,
    ) -> anyhow::Result<Self> {
        let path = path.into();
        tracing::Span::current().record("path", tracing::field::display(path.display()));

        let devices = self.devices();
        let device = &devices[0];
        let record = load_cifar_resnet_stub_record::<B>(path, top_level_key, device)?;
        let model = record.copy_weights(self)?;

        tracing::debug!("loaded torch weights");
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::cifar_resnet::resnet_model::{CifarResNet, CifarResNetConfig};
    use crate::models::cifar_resnet::shortcut::{Shortcut, ShortcutKind};
    use burn::backend::NdArray;
    use burn::prelude::Tensor;
    use std::path::{Path, PathBuf};

    type B = NdArray<f32>;

    /// Checkpoints written by ``tests/data/make_torch_fixtures.py``.
    fn torch_fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("data")
            .join(name)
    }

    fn values<const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    fn assert_values(
        actual: &[f32],
        expected: &[f32],
    ) {
        assert!(
            actual
                .iter()
                .zip(expected)
                .all(|(a, e)| (a - e).abs() < 1e-6),
            "{:?} != {:?}",
            actual,
            expected
        );
    }

    #[test]
    fn test_load_missing_file() {
        let device = Default::default();
        let model: CifarResNet<B> = CifarResNetConfig::new(vec![1, 1, 1]).init(&device);

        let tmp = tempfile::tempdir().unwrap();
        let result = model.load_pytorch_weights(tmp.path().join("missing.th"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_data_parallel_checkpoint() {
        let device = Default::default();
        let model: CifarResNet<B> = CifarResNetConfig::resnet20()
            .init(&device)
            .load_pytorch_weights(torch_fixture("cifar_resnet20.th"))
            .unwrap();

        assert_values(
            &values(model.stem.conv.weight.val())[..4],
            &[0.05, 0.0685, 0.087, 0.1055],
        );
        assert_values(
            &values(model.stem.norm.gamma.val())[..4],
            &[0.1055, 0.124, 0.1425, 0.161],
        );
        assert_values(
            &values(model.stem.norm.running_var.value())[..4],
            &[0.272, 0.2905, 0.309, 0.3275],
        );
        assert_values(
            &values(model.layers[2].blocks[2].conv_norm2.norm.beta.val())[..4],
            &[0.1585, 0.177, 0.1955, 0.214],
        );

        // ``linear.weight`` is ``[classes, features]``; burn stores ``[features, classes]``.
        let fc = model.fc.as_ref().unwrap();
        assert_eq!(fc.weight.val().dims(), [64, 10]);
        let weight = values(fc.weight.val());
        assert_values(
            &[weight[1], weight[10], weight[5 * 10 + 3]],
            &[0.5095, 0.3435, 0.971],
        );
        assert_values(
            &values(fc.bias.as_ref().unwrap().val())[..4],
            &[0.3805, 0.399, 0.4175, 0.436],
        );

        let logits = model.forward(Tensor::ones([1, 3, 32, 32], &device));
        assert_eq!(logits.dims(), [1, 10]);
        assert!(values(logits).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_load_projection_checkpoint() {
        let device = Default::default();
        let config = CifarResNetConfig::new(vec![1, 1, 1])
            .with_base_planes(4)
            .with_shortcut(ShortcutKind::Projection);

        // A bare state dict; there is no ``state_dict`` key.
        let path = torch_fixture("cifar_resnet8_projection.th");
        assert!(
            config
                .clone()
                .init::<B>(&device)
                .load_pytorch_weights(path.clone())
                .is_err()
        );

        let model: CifarResNet<B> = config
            .init(&device)
            .load_pytorch_weights_with_key(path, None)
            .unwrap();

        let projection = |stage: usize| match &model.layers[stage].blocks[0].shortcut {
            Some(Shortcut::Projection(proj)) => proj.conv_norm.clone(),
            other => panic!("expected a projection shortcut: {:?}", other),
        };
        assert_values(
            &values(projection(1).conv.weight.val())[..4],
            &[0.438, 0.4565, 0.475, 0.4935],
        );
        assert_values(
            &values(projection(1).norm.beta.val())[..4],
            &[0.549, 0.5675, 0.586, 0.6045],
        );
        assert_values(
            &values(projection(2).norm.running_mean.value())[..4],
            &[0.4375, 0.456, 0.4745, 0.493],
        );

        let weight = values(model.fc.as_ref().unwrap().weight.val());
        assert_values(
            &[weight[1], weight[10], weight[5 * 10 + 3]],
            &[0.8445, 0.567, 0.5295],
        );
    }

    #[test]
    fn test_load_checkpoint_layout_mismatch() {
        let device = Default::default();
        let err = CifarResNetConfig::new(vec![1, 1, 1])
            .init::<B>(&device)
            .load_pytorch_weights(torch_fixture("cifar_resnet20.th"))
            .unwrap_err();
        assert!(err.to_string().contains("layer1"), "{}", err);
    }

    #[test]
    fn test_load_legacy_checkpoint() {
        let device = Default::default();
        let err = CifarResNetConfig::resnet20()
            .init::<B>(&device)
            .load_pytorch_weights(torch_fixture("cifar_resnet20_legacy.th"))
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("not a zip-format torch checkpoint"), "{}", message);
        assert!(message.contains("_use_new_zipfile_serialization=True"), "{}", message);
    }
}
