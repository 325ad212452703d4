//! MirrorTV server binary.

use clap::Parser;
use tracing::info;

use mirrortv_lib::{init_logging, run, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = ServerConfig::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting MirrorTV");

    run(config).await
}
