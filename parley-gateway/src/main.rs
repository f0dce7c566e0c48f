//! Parley Gateway - Main entry point.

use anyhow::Result;
use parley_common::logging::init_logging;
use parley_common::Config;
use parley_core::ConversationManager;
use parley_engine::RuleEngine;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(&config.observability.log_level, &config.observability.log_format);

    tracing::info!("Parley Gateway v{}", env!("CARGO_PKG_VERSION"));

    let engine = RuleEngine::new()?;
    let manager = Arc::new(ConversationManager::new(
        config.data_dir(),
        config.data.max_cached_users,
        Box::new(engine),
    )?);

    // Start the gateway server
    parley_gateway::start_server(&config, manager).await
}
