//! Entry point for the autoloom server.
//!
//! Serves:
//! - Webhook triggers at /webhook/{trigger_id}
//! - Health check at /healthz

use autoloom::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to 0.0.0.0:3004 and ./data/execution_log.db
    let config = Config::default();

    start_server(config).await
}
