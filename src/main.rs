//! AnyWork client entry point
use anywork_client::{app, Config};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (config, rest) =
        Config::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    app::run(config, rest).await
}
