//! QQBot Relay - Main entry point.

use anyhow::Result;
use qqbot_common::config::Config;
use qqbot_common::logging::init_logging;
use qqbot_common::Validate;
use qqbot_relay::start_servers;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    config.validate()?;

    tracing::info!("QQBot Relay v{}", env!("CARGO_PKG_VERSION"));

    start_servers(&config).await
}
