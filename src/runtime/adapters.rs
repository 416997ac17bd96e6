//! Action adapters
//!
//! Each (integration, action) pair a workflow step can name maps onto a closed
//! `ActionKey`. The registry hands out the adapter registered for that key, or
//! a `SimulateAdapter` when the pair is unknown or not configured, so an
//! unconfigured integration degrades to a logged no-op instead of failing the
//! run at dispatch time.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Executes one (integration, action) operation.
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    async fn execute(&self, params: &Map<String, Value>) -> Result<Value>;
}

/// Every (integration, action) pair the runtime knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKey {
    HttpRequest,
    SlackSendMessage,
    GmailSendEmail,
    SheetsAppendRow,
    UtilityLog,
    UtilityDelay,
}

impl ActionKey {
    pub const ALL: [ActionKey; 6] = [
        ActionKey::HttpRequest,
        ActionKey::SlackSendMessage,
        ActionKey::GmailSendEmail,
        ActionKey::SheetsAppendRow,
        ActionKey::UtilityLog,
        ActionKey::UtilityDelay,
    ];

    /// Map step names onto a key. Names are matched case-insensitively and
    /// `-`/space are treated as `_`.
    pub fn parse(integration: &str, action: &str) -> Option<Self> {
        let integration = normalize(integration);
        let action = normalize(action);
        match (integration.as_str(), action.as_str()) {
            ("http" | "webhook", "request" | "get" | "post" | "send") => Some(ActionKey::HttpRequest),
            ("slack", "send_message" | "post_message") => Some(ActionKey::SlackSendMessage),
            ("gmail" | "email", "send_email" | "send") => Some(ActionKey::GmailSendEmail),
            ("google_sheets" | "sheets", "append_row" | "add_row") => Some(ActionKey::SheetsAppendRow),
            ("utility", "log") => Some(ActionKey::UtilityLog),
            ("utility", "delay" | "wait") => Some(ActionKey::UtilityDelay),
            _ => None,
        }
    }

    /// Canonical (integration, action) names.
    pub fn as_pair(&self) -> (&'static str, &'static str) {
        match self {
            ActionKey::HttpRequest => ("http", "request"),
            ActionKey::SlackSendMessage => ("slack", "send_message"),
            ActionKey::GmailSendEmail => ("gmail", "send_email"),
            ActionKey::SheetsAppendRow => ("google_sheets", "append_row"),
            ActionKey::UtilityLog => ("utility", "log"),
            ActionKey::UtilityDelay => ("utility", "delay"),
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace(['-', ' '], "_")
}

/// Registry of configured adapters with a simulating fallback.
#[derive(Default)]
pub struct ActionAdapterRegistry {
    adapters: HashMap<ActionKey, Arc<dyn ActionAdapter>>,
}

impl ActionAdapterRegistry {
    /// Empty registry: every step simulates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the adapters that need no external credentials:
    /// `http.request`, `slack.send_message` (incoming webhooks), `utility.log`
    /// and `utility.delay`.
    pub fn with_builtins(http_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(http_timeout).build()?;
        let mut registry = Self::new();
        registry.register(ActionKey::HttpRequest, HttpRequestAdapter::new(client.clone()));
        registry.register(ActionKey::SlackSendMessage, SlackWebhookAdapter::new(client));
        registry.register(ActionKey::UtilityLog, LogAdapter);
        registry.register(ActionKey::UtilityDelay, DelayAdapter::default());
        Ok(registry)
    }

    pub fn register(&mut self, key: ActionKey, adapter: impl ActionAdapter + 'static) {
        let (integration, action) = key.as_pair();
        tracing::debug!("🔌 Registered action adapter: {}.{}", integration, action);
        self.adapters.insert(key, Arc::new(adapter));
    }

    pub fn is_configured(&self, integration: &str, action: &str) -> bool {
        ActionKey::parse(integration, action).is_some_and(|key| self.adapters.contains_key(&key))
    }

    /// Resolve a step's names to an adapter. Never fails.
    pub fn resolve(&self, integration: &str, action: &str) -> Arc<dyn ActionAdapter> {
        match ActionKey::parse(integration, action).and_then(|key| self.adapters.get(&key)) {
            Some(adapter) => Arc::clone(adapter),
            None => {
                tracing::debug!(
                    "🎭 No adapter for {}.{}, using simulator",
                    integration,
                    action
                );
                Arc::new(SimulateAdapter::new(integration, action))
            }
        }
    }
}

impl std::fmt::Debug for ActionAdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionAdapterRegistry")
            .field("configured", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Null adapter: logs its input and echoes it back unchanged.
#[derive(Debug, Clone)]
pub struct SimulateAdapter {
    integration: String,
    action: String,
}

impl SimulateAdapter {
    pub fn new(integration: &str, action: &str) -> Self {
        Self {
            integration: integration.to_string(),
            action: action.to_string(),
        }
    }
}

#[async_trait]
impl ActionAdapter for SimulateAdapter {
    async fn execute(&self, params: &Map<String, Value>) -> Result<Value> {
        let input = Value::Object(params.clone());
        tracing::info!(
            "🎭 Simulating {}.{} with input: {}",
            self.integration,
            self.action,
            input
        );
        Ok(input)
    }
}

/// Generic outbound HTTP call.
///
/// Params: `url` (required), `method` (default GET), `headers`, `query`, `body`.
/// Output: `{ status, headers, data, success }`. Non-2xx responses fail the step.
#[derive(Debug, Clone)]
pub struct HttpRequestAdapter {
    client: reqwest::Client,
}

impl HttpRequestAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionAdapter for HttpRequestAdapter {
    async fn execute(&self, params: &Map<String, Value>) -> Result<Value> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("http.request missing 'url' parameter"))?;
        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            _ => return Err(anyhow!("Unsupported HTTP method: {}", method)),
        };

        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key.as_str(), v);
                }
            }
        }

        if let Some(query) = params.get("query").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().map_or_else(|| v.to_string(), str::to_string)))
                .collect();
            request = request.query(&pairs);
        }

        match params.get("body") {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(body) => request = request.json(body),
        }

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);
        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), json!(s))))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            return Err(anyhow!("{} {} returned {}: {}", method, url, status, data));
        }

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);
        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "data": data,
            "success": true,
        }))
    }
}

/// Posts to a Slack incoming-webhook URL.
///
/// Params: `webhook_url` (required), `text` (required), `channel` (optional).
#[derive(Debug, Clone)]
pub struct SlackWebhookAdapter {
    client: reqwest::Client,
}

impl SlackWebhookAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionAdapter for SlackWebhookAdapter {
    async fn execute(&self, params: &Map<String, Value>) -> Result<Value> {
        let url = params
            .get("webhook_url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("slack.send_message missing 'webhook_url' parameter"))?;
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("slack.send_message missing 'text' parameter"))?;

        let mut payload = json!({ "text": text });
        if let Some(channel) = params.get("channel").and_then(Value::as_str) {
            payload["channel"] = json!(channel);
        }

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("Slack webhook request failed: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Slack webhook returned {}: {}", status, body));
        }

        tracing::info!("💬 Slack message posted ({} chars)", text.len());
        Ok(json!({ "sent": true, "text": text }))
    }
}

/// Writes `message` (or the whole param map) to the tracing log.
#[derive(Debug, Clone, Copy)]
pub struct LogAdapter;

#[async_trait]
impl ActionAdapter for LogAdapter {
    async fn execute(&self, params: &Map<String, Value>) -> Result<Value> {
        match params.get("message") {
            Some(Value::String(message)) => tracing::info!("📝 {}", message),
            _ => {
                let params = Value::Object(params.clone());
                tracing::info!("📝 {}", params)
            }
        }
        Ok(json!({ "logged": true, "message": params.get("message").cloned().unwrap_or(Value::Null) }))
    }
}

/// Sleeps for `seconds` (or `milliseconds`), capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct DelayAdapter {
    max: Duration,
}

impl Default for DelayAdapter {
    fn default() -> Self {
        Self {
            max: Duration::from_secs(300),
        }
    }
}

#[async_trait]
impl ActionAdapter for DelayAdapter {
    async fn execute(&self, params: &Map<String, Value>) -> Result<Value> {
        let requested = if let Some(ms) = params.get("milliseconds").and_then(Value::as_u64) {
            Duration::from_millis(ms)
        } else if let Some(secs) = params.get("seconds").and_then(Value::as_f64) {
            if !(secs.is_finite() && secs >= 0.0) {
                return Err(anyhow!("utility.delay 'seconds' must be a non-negative number"));
            }
            Duration::from_secs_f64(secs)
        } else {
            return Err(anyhow!("utility.delay needs 'seconds' or 'milliseconds'"));
        };

        let delay = requested.min(self.max);
        tokio::time::sleep(delay).await;
        Ok(json!({ "delayedMs": delay.as_millis() as u64 }))
    }
}
