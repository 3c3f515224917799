use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mri_seg_rs::{server, Config, MriService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    config.validate().context("invalid configuration")?;

    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    info!(
        segmentation_model = %config.segmentation_model.display(),
        classification_model = ?config.classification_model,
        "loading models"
    );
    let service = tokio::task::spawn_blocking(move || MriService::with_onnx_models(config))
        .await?
        .context("failed to load models")?;

    server::serve(Arc::new(service)).await?;
    Ok(())
}
