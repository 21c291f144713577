//! upkit command-line uploader entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = app::Args::parse(std::env::args().skip(1))?;

    let path = config::config_path();
    let config = config::Config::load_from(&path)?;
    tracing::info!(path = %path.display(), action = %config.upload.action, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, args, &path))
}
