use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use model_runner::{app, model::TensorflowRuntime, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let config = Config::parse();
    let addr = config.addr()?;

    info!("Model runner v{}", env!("CARGO_PKG_VERSION"));
    info!("  Model dir: {:?}", config.model_dir);
    info!("  Cache dir: {:?}", config.cache_dir);
    info!(
        "  Graph ops: {} -> {}, accepting .{} models",
        config.input_op, config.output_op, config.model_extension
    );
    if config.no_cache {
        info!("  Remote models are deleted after each request");
    }

    let runtime = Arc::new(TensorflowRuntime::new(&config.input_op, &config.output_op));
    let state = Arc::new(AppState::new(config, runtime)?);

    info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app(state).into_make_service())
        .await?;

    Ok(())
}
