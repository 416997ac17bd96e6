//! Server setup and initialization
//!
//! Wires together the workflow store, execution log, adapters, engine,
//! scheduler and trigger registry, then exposes the webhook boundary over
//! axum.

use crate::{
    api::webhooks::create_webhook_routes,
    config::Config,
    runtime::{ActionAdapterRegistry, ExecutionEngine, SqliteExecutionLog},
    triggers::{CronScheduler, TriggerRegistry},
    workflow::{InMemoryWorkflowStore, JsonWorkflowCompiler, StoredWorkflow},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Build every runtime component and arm the triggers of the configured
/// workflows.
pub async fn create_registry(config: &Config) -> Result<Arc<TriggerRegistry>> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.storage.data_dir);
    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.storage.data_dir))?;

    let workflows = match &config.storage.workflows_file {
        Some(path) => load_workflows(path)?,
        None => Vec::new(),
    };
    tracing::info!("📋 Loaded {} workflows", workflows.len());
    let store = Arc::new(InMemoryWorkflowStore::with_workflows(workflows.clone()));

    let log_path = config.storage.execution_log_path();
    let log = SqliteExecutionLog::open(&log_path)
        .await
        .with_context(|| format!("Failed to open execution log {}", log_path.display()))?;

    tracing::info!("🔌 Initializing action adapters");
    let adapters = ActionAdapterRegistry::with_builtins(Duration::from_secs(
        config.adapters.http_timeout_secs,
    ))
    .context("Failed to initialize action adapters")?;

    tracing::info!("🚀 Initializing execution engine");
    let engine = ExecutionEngine::new(store, Arc::new(adapters), Arc::new(log))
        .with_compiler(Arc::new(JsonWorkflowCompiler))
        .with_policy(config.engine.policy());

    tracing::info!("⏰ Initializing cron scheduler");
    let scheduler = CronScheduler::new()
        .await
        .context("Failed to initialize cron scheduler")?;
    scheduler.start().await.context("Failed to start cron scheduler")?;

    let registry = Arc::new(
        TriggerRegistry::new(Arc::new(engine), Arc::new(scheduler))
            .with_defaults(config.triggers.defaults()),
    );

    for workflow in &workflows {
        if let Err(e) = workflow.definition.validate() {
            tracing::error!("❌ Skipping workflow {}: {}", workflow.definition.id, e);
            continue;
        }
        match registry.arm_workflow(&workflow.definition).await {
            Ok(trigger_id) => tracing::info!(
                "✅ Armed workflow {} ('{}') via {}",
                workflow.definition.id,
                workflow.definition.name,
                trigger_id
            ),
            Err(e) => tracing::error!(
                "❌ Failed to arm workflow {}: {}",
                workflow.definition.id,
                e
            ),
        }
    }

    Ok(registry)
}

fn load_workflows(path: &str) -> Result<Vec<StoredWorkflow>> {
    tracing::info!("📥 Loading workflows from {}", path);
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflows file {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid workflows file {path}"))
}

/// Health check plus the webhook endpoint.
pub fn create_app(registry: Arc<TriggerRegistry>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_webhook_routes().with_state(registry))
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting autoloom server...");

    let registry = create_registry(&config).await?;
    let app = create_app(Arc::clone(&registry));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_check() -> &'static str {
    "ok"
}
