use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

mod chat;
mod config;
mod genie;
mod util;
mod web;

use crate::chat::{ChatSession, SessionSettings};
use crate::config::{AppConfig, CliArgs};
use crate::genie::retry::RetryPolicy;
use crate::genie::transport::ReqwestTransport;
use crate::genie::{credentials, GenieClient};
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if config.genie.warehouse_id.trim().is_empty() {
        warn!("No SQL warehouse configured; query answers will come without chart data");
    }

    info!("Connecting to Genie space {} at {}", config.genie.space_id, config.genie.host);
    let transport = ReqwestTransport::new(&config.genie)?;
    let client = GenieClient::new(
        Arc::new(transport),
        config.genie.space_id.clone(),
        RetryPolicy::from_config(&config.poll),
    );

    let credentials = credentials::from_config(&config.auth);
    if credentials.bearer_token().is_none() {
        warn!(
            "No bearer token found (auth.token or ${}); sends will fail until one is provided",
            config.auth.token_env
        );
    }

    let session = ChatSession::new(
        Arc::new(client),
        credentials,
        SessionSettings {
            warehouse_id: config.genie.warehouse_id.clone(),
            greeting: config.chat.greeting.clone(),
            fallback_text: config.chat.fallback_text.clone(),
        },
    );

    let app_state = Arc::new(AppState::new(config.clone(), session));

    // Start the web server
    info!("Starting Genie chat server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
