#![recursion_limit = "256"]

use burn::backend::NdArray;
use burn::config::Config;
use burn::prelude::Tensor;
use burn::tensor::Distribution;
use clap::Parser;
use ftnet::cache::fetch_model_weights;
use ftnet::models::ftnet::{FtNet, FtNetLoadOptions, PREFAB_FTNET_MAP, load_pretrained_ftnet};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Prefab model name; "list" prints the known names.
    #[arg(long, default_value = "ftnet110")]
    model: String,

    #[arg(long, default_value = "751")]
    num_classes: usize,

    /// Directory holding the published backbone checkpoints.
    #[arg(long)]
    weights_dir: Option<String>,

    /// Backbone checkpoint file or url.
    #[arg(long)]
    weights: Option<String>,

    /// Skip backbone weight loading.
    #[arg(long)]
    no_pretrained: bool,

    #[arg(long, default_value = "8")]
    batch: usize,

    #[arg(long, default_value = "256")]
    height: usize,

    #[arg(long, default_value = "128")]
    width: usize,

    /// Write the resolved model config as JSON.
    #[arg(long)]
    config_out: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    if args.model == "list" {
        for item in PREFAB_FTNET_MAP.items {
            println!("{:<18}{}", item.name, item.description);
        }
        return Ok(());
    }

    let prefab = PREFAB_FTNET_MAP.try_lookup_prefab(&args.model)?;
    let config = prefab.to_config().with_num_classes(args.num_classes);
    if let Some(path) = &args.config_out {
        config.save(path)?;
        tracing::info!(path, "wrote config");
    }

    let model: FtNet<B> = if args.no_pretrained {
        config.init(&device)
    } else {
        let weights_path = match &args.weights {
            Some(w) if w.starts_with("http://") || w.starts_with("https://") => {
                Some(fetch_model_weights(w)?.to_string_lossy().to_string())
            }
            other => other.clone(),
        };
        let options = FtNetLoadOptions::new()
            .with_weights_path(weights_path)
            .with_weights_dir(args.weights_dir.clone());
        load_pretrained_ftnet(&args.model, args.num_classes, &options, &device)?
    };
    println!("{model}");

    let input: Tensor<B, 4> = Tensor::random(
        [args.batch, 3, args.height, args.width],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let (logits, features) = model.forward_with_features(input);
    println!("logits: {:?}", logits.dims());
    println!("features: {:?}", features.dims());

    Ok(())
}
