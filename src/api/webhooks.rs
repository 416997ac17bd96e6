//! Inbound webhook endpoint
//!
//! `ANY /webhook/{trigger_id}` hands the request to the trigger registry and
//! waits for the run to finish, so the caller receives the outcome.

use crate::error::Error;
use crate::triggers::registry::TriggerRegistry;
use crate::triggers::webhook::webhook_path;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{any, Router},
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub fn create_webhook_routes() -> Router<Arc<TriggerRegistry>> {
    Router::new().route("/webhook/{trigger_id}", any(execute_webhook))
}

/// NotFound -> 404, Unauthorized -> 401, anything else -> 500.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn execute_webhook(
    State(registry): State<Arc<TriggerRegistry>>,
    Path(trigger_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let path = webhook_path(&trigger_id);
    tracing::info!("📥 Webhook request received: {}", path);
    tracing::debug!("📄 Request body: {}", body);

    let payload: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid JSON payload for webhook {}: {}", path, e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON payload: {e}") })),
            )
        })?
    };

    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    match registry.handle_webhook_request(&path, payload, &headers).await {
        Ok(Some(result)) => Ok(Json(json!({
            "runId": result.run_id,
            "output": result.output,
        }))),
        Ok(None) => Ok(Json(json!({ "runId": null }))),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!("❌ Webhook run failed for {}: {}", path, e);
            }
            Err((status, Json(json!({ "error": e.to_string() }))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::adapters::{ActionAdapter, ActionAdapterRegistry, ActionKey};
    use crate::runtime::engine::ExecutionEngine;
    use crate::runtime::log::InMemoryExecutionLog;
    use crate::triggers::registry::WebhookSpec;
    use crate::triggers::scheduler::ManualScheduler;
    use crate::workflow::store::InMemoryWorkflowStore;
    use crate::workflow::types::{Step, StepRole, StoredWorkflow, TriggerSpec, WorkflowDefinition};
    use async_trait::async_trait;
    use serde_json::Map;

    struct Broken;

    #[async_trait]
    impl ActionAdapter for Broken {
        async fn execute(&self, _params: &Map<String, Value>) -> anyhow::Result<Value> {
            anyhow::bail!("upstream unavailable")
        }
    }

    fn registry(is_active: bool, integration: &str, action: &str) -> Arc<TriggerRegistry> {
        let workflow = StoredWorkflow {
            definition: WorkflowDefinition {
                id: 3,
                name: "hook".to_string(),
                description: String::new(),
                trigger: TriggerSpec::Webhook { auth: None },
                steps: vec![Step {
                    id: "echo".to_string(),
                    role: StepRole::Action,
                    integration: integration.to_string(),
                    action: action.to_string(),
                    params: json!({ "text": "hi {{data.name}}" })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    description: String::new(),
                }],
            },
            is_active,
        };
        let mut adapters = ActionAdapterRegistry::new();
        adapters.register(ActionKey::SheetsAppendRow, Broken);
        let engine = ExecutionEngine::new(
            Arc::new(InMemoryWorkflowStore::with_workflows(vec![workflow])),
            Arc::new(adapters),
            Arc::new(InMemoryExecutionLog::new()),
        );
        Arc::new(TriggerRegistry::new(
            Arc::new(engine),
            Arc::new(ManualScheduler::new()),
        ))
    }

    async fn call(
        registry: &Arc<TriggerRegistry>,
        id: &str,
        body: &str,
    ) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
        execute_webhook(
            State(Arc::clone(registry)),
            Path(id.to_string()),
            HeaderMap::new(),
            body.to_string(),
        )
        .await
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&Error::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&Error::Configuration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_webhook_returns_run_output() {
        let registry = registry(true, "slack", "send_message");
        let id = registry
            .create_webhook_trigger(3, WebhookSpec::default())
            .await
            .unwrap();

        let Json(body) = call(&registry, &id, r#"{"name":"Ana"}"#).await.unwrap();
        assert!(body["runId"].is_string());
        assert_eq!(body["output"]["text"], "hi Ana");
    }

    #[tokio::test]
    async fn test_unknown_trigger_is_404_and_bad_json_is_400() {
        let registry = registry(true, "slack", "send_message");
        let (status, _) = call(&registry, "webhook_3_0", "{}").await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = registry
            .create_webhook_trigger(3, WebhookSpec::default())
            .await
            .unwrap();
        let (status, _) = call(&registry, &id, "{not json").await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inactive_workflow_returns_null_run() {
        let registry = registry(false, "slack", "send_message");
        let id = registry
            .create_webhook_trigger(3, WebhookSpec::default())
            .await
            .unwrap();
        let Json(body) = call(&registry, &id, "").await.unwrap();
        assert_eq!(body, json!({ "runId": null }));
    }

    #[tokio::test]
    async fn test_step_failure_is_500_with_message() {
        let registry = registry(true, "google_sheets", "append_row");
        let id = registry
            .create_webhook_trigger(3, WebhookSpec::default())
            .await
            .unwrap();
        let (status, Json(body)) = call(&registry, &id, "{}").await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap_or_default()
            .contains("upstream unavailable"));
    }
}
