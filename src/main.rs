use burrow::{
    config::{self, BurrowConfig},
    tunneling::TunnelError,
};
use clap::Parser;
use cli::BurrowCli;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
pub async fn main() -> Result<(), TunnelError> {
    let cli = BurrowCli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = cli.config.unwrap_or(config::DEFAULT_PATH.to_string());
    let tunnel = BurrowConfig::load(&path)
        .and_then(BurrowConfig::into_tunnel)
        .inspect_err(|e| tracing::error!("{e}"))?;

    tunnel
        .setup()
        .await
        .inspect_err(|e| tracing::error!("tunnel stopped: {e}"))
}
