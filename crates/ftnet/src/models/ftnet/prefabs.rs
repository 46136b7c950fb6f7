//! # `FtNet` Prefabs
//!
//! Every prefab pairs a CIFAR-10 pretrained backbone with a fresh head.
//! The head class count defaults to [`DEFAULT_NUM_CLASSES`]; use
//! [`FtNetConfig::with_num_classes`] to retarget it.

use crate::cache::prefabs::{StaticPreFabConfig, StaticPreFabMap};
use crate::layers::pool::spatial_pyramid::SpatialPyramidPoolingConfig;
use crate::models::cifar_resnet::CifarResNetConfig;
use crate::models::cifar_resnet::prefabs::{
    RESNET20_WEIGHTS, RESNET32_WEIGHTS, RESNET44_WEIGHTS, RESNET56_WEIGHTS, RESNET110_WEIGHTS,
};
use crate::models::ftnet::ftnet_model::{FeaturePoolingConfig, FtNetConfig};

/// Identity count of the Market-1501 training split.
pub const DEFAULT_NUM_CLASSES: usize = 751;

/// Head dropout probability of every prefab.
pub const DEFAULT_DROP_RATE: f64 = 0.5;

fn global_avg(
    backbone: CifarResNetConfig,
    bottleneck: usize,
) -> FtNetConfig {
    FtNetConfig::build(
        backbone,
        FeaturePoolingConfig::GlobalAvg,
        DEFAULT_NUM_CLASSES,
        bottleneck,
    )
    .with_drop_rate(DEFAULT_DROP_RATE)
}

fn spp(backbone: CifarResNetConfig) -> FtNetConfig {
    FtNetConfig::build(
        backbone,
        SpatialPyramidPoolingConfig::new()
            .with_levels(vec![1, 2])
            .into(),
        DEFAULT_NUM_CLASSES,
        128,
    )
    .with_drop_rate(DEFAULT_DROP_RATE)
}

/// Well-known [`FtNetConfig`]s.
pub static PREFAB_FTNET_MAP: StaticPreFabMap<FtNetConfig> = StaticPreFabMap {
    name: "ftnet",
    description: "CIFAR ResNet backbones with ClassBlock heads",

    items: &[
        &StaticPreFabConfig {
            name: "ftnet20",
            description: "ResNet-20, global average pool, 512-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet20(), 512),
            weights: Some(&RESNET20_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet32",
            description: "ResNet-32, global average pool, 512-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet32(), 512),
            weights: Some(&RESNET32_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet44",
            description: "ResNet-44, global average pool, 512-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet44(), 512),
            weights: Some(&RESNET44_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet56",
            description: "ResNet-56, global average pool, 512-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet56(), 512),
            weights: Some(&RESNET56_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet110",
            description: "ResNet-110, global average pool, 512-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet110(), 512),
            weights: Some(&RESNET110_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet110_fc1024",
            description: "ResNet-110, global average pool, 1024-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet110(), 1024),
            weights: Some(&RESNET110_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet110_fc768",
            description: "ResNet-110, global average pool, 768-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet110(), 768),
            weights: Some(&RESNET110_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet110_fc256",
            description: "ResNet-110, global average pool, 256-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet110(), 256),
            weights: Some(&RESNET110_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet110_fc128",
            description: "ResNet-110, global average pool, 128-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet110(), 128),
            weights: Some(&RESNET110_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet56_fc1024",
            description: "ResNet-56, global average pool, 1024-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet56(), 1024),
            weights: Some(&RESNET56_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet56_fc768",
            description: "ResNet-56, global average pool, 768-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet56(), 768),
            weights: Some(&RESNET56_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet56_fc256",
            description: "ResNet-56, global average pool, 256-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet56(), 256),
            weights: Some(&RESNET56_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet56_fc128",
            description: "ResNet-56, global average pool, 128-d embedding",
            builder: || global_avg(CifarResNetConfig::resnet56(), 128),
            weights: Some(&RESNET56_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet110_spp",
            description: "ResNet-110, (1, 2) spatial pyramid pool, 128-d embedding",
            builder: || spp(CifarResNetConfig::resnet110()),
            weights: Some(&RESNET110_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "ftnet56_spp",
            description: "ResNet-56, (1, 2) spatial pyramid pool, 128-d embedding",
            builder: || spp(CifarResNetConfig::resnet56()),
            weights: Some(&RESNET56_WEIGHTS),
        },
    ],
};
