//! # Pretrained `CifarResNet` Configs and Weights

use crate::cache::prefabs::{StaticPreFabConfig, StaticPreFabMap};
use crate::cache::weights::{StaticPretrainedWeightsDescriptor, StaticPretrainedWeightsMap};
use crate::models::cifar_resnet::resnet_model::CifarResNetConfig;

/// Name of the CIFAR-10 weights in each [`PREFAB_CIFAR_RESNET_MAP`] entry.
pub const CIFAR10_WEIGHTS: &str = "cifar10";

const AKAMASTER_ORIGIN: &str = "https://github.com/akamaster/pytorch_resnet_cifar10";
const AKAMASTER_LICENSE: &str = "BSD-2-Clause";

macro_rules! cifar10_weights {
    ($description:literal, $file:literal) => {
        StaticPretrainedWeightsMap {
            items: &[&StaticPretrainedWeightsDescriptor {
                name: CIFAR10_WEIGHTS,
                description: $description,
                license: Some(AKAMASTER_LICENSE),
                origin: Some(AKAMASTER_ORIGIN),
                urls: &[concat!(
                    "https://github.com/akamaster/pytorch_resnet_cifar10",
                    "/raw/master/pretrained_models/",
                    $file
                )],
            }],
        }
    };
}

/// `ResNet-20` CIFAR-10 weights.
pub static RESNET20_WEIGHTS: StaticPretrainedWeightsMap =
    cifar10_weights!("ResNet-20 trained on CIFAR-10", "resnet20-12fca82f.th");

/// `ResNet-32` CIFAR-10 weights.
pub static RESNET32_WEIGHTS: StaticPretrainedWeightsMap =
    cifar10_weights!("ResNet-32 trained on CIFAR-10", "resnet32-d509ac18.th");

/// `ResNet-44` CIFAR-10 weights.
pub static RESNET44_WEIGHTS: StaticPretrainedWeightsMap =
    cifar10_weights!("ResNet-44 trained on CIFAR-10", "resnet44-014dd654.th");

/// `ResNet-56` CIFAR-10 weights.
pub static RESNET56_WEIGHTS: StaticPretrainedWeightsMap =
    cifar10_weights!("ResNet-56 trained on CIFAR-10", "resnet56-4bfd9763.th");

/// `ResNet-110` CIFAR-10 weights.
pub static RESNET110_WEIGHTS: StaticPretrainedWeightsMap =
    cifar10_weights!("ResNet-110 trained on CIFAR-10", "resnet110-1d1ed7c2.th");

/// `ResNet-1202` CIFAR-10 weights.
pub static RESNET1202_WEIGHTS: StaticPretrainedWeightsMap =
    cifar10_weights!("ResNet-1202 trained on CIFAR-10", "resnet1202-f3b1deed.th");

/// Pretrained [`super::CifarResNet`] configs and weights.
pub static PREFAB_CIFAR_RESNET_MAP: StaticPreFabMap<CifarResNetConfig> = StaticPreFabMap {
    name: "cifar_resnet",
    description: "CIFAR ResNet (6n+2) configs",

    items: &[
        &StaticPreFabConfig {
            name: "resnet20",
            description: "ResNet-20 [3, 3, 3] BasicBlocks",
            builder: CifarResNetConfig::resnet20,
            weights: Some(&RESNET20_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "resnet32",
            description: "ResNet-32 [5, 5, 5] BasicBlocks",
            builder: CifarResNetConfig::resnet32,
            weights: Some(&RESNET32_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "resnet44",
            description: "ResNet-44 [7, 7, 7] BasicBlocks",
            builder: CifarResNetConfig::resnet44,
            weights: Some(&RESNET44_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "resnet56",
            description: "ResNet-56 [9, 9, 9] BasicBlocks",
            builder: CifarResNetConfig::resnet56,
            weights: Some(&RESNET56_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "resnet110",
            description: "ResNet-110 [18, 18, 18] BasicBlocks",
            builder: CifarResNetConfig::resnet110,
            weights: Some(&RESNET110_WEIGHTS),
        },
        &StaticPreFabConfig {
            name: "resnet1202",
            description: "ResNet-1202 [200, 200, 200] BasicBlocks",
            builder: CifarResNetConfig::resnet1202,
            weights: Some(&RESNET1202_WEIGHTS),
        },
    ],
};
