//! Core workflow type definitions
//!
//! A workflow is one trigger plus an ordered list of steps. Definitions arrive
//! from the workflow compiler as JSON and are only checked for the structural
//! invariants here (at least one step, unique step ids).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Workflow identifier as assigned by the workflow store.
pub type WorkflowId = i64;

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The event source that starts this workflow
    pub trigger: TriggerSpec,
    /// Steps in execution order
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Check the structural invariants: at least one step, unique step ids.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Configuration(format!(
                "workflow {} has no steps",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(Error::Configuration(format!(
                    "workflow {} has a step with an empty id",
                    self.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(Error::Configuration(format!(
                    "workflow {} has duplicate step id '{}'",
                    self.id, step.id
                )));
            }
        }

        Ok(())
    }
}

/// Event source description, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Recurring schedule. Either an explicit 5-field cron expression or free
    /// text for the schedule interpreter.
    #[serde(rename_all = "camelCase")]
    Schedule {
        #[serde(default)]
        cron_expression: Option<String>,
        #[serde(default)]
        natural_language_schedule: Option<String>,
        #[serde(default)]
        timezone: Option<String>,
    },

    /// Inbound webhook. The path is assigned when the trigger is armed.
    Webhook {
        #[serde(default)]
        auth: Option<WebhookAuth>,
    },

    /// Periodic change detection against a database.
    #[serde(rename_all = "camelCase")]
    Database {
        #[serde(default)]
        poll_interval_secs: Option<u64>,
        detector: DetectorConfig,
    },

    /// Mailbox arrival, polled by an external watcher.
    Email { mailbox: MailboxSpec },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Schedule { .. } => TriggerKind::Schedule,
            TriggerSpec::Webhook { .. } => TriggerKind::Webhook,
            TriggerSpec::Database { .. } => TriggerKind::Database,
            TriggerSpec::Email { .. } => TriggerKind::Email,
        }
    }
}

/// The four trigger kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    Webhook,
    Database,
    Email,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Schedule => "schedule",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Database => "database",
            TriggerKind::Email => "email",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication required from webhook callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// Arbitrary shared-secret header, e.g. `X-Webhook-Secret`.
    Header { name: String, value: String },
}

/// SQL watermark detector configuration.
///
/// `query` must return a single scalar (e.g. `SELECT MAX(updated_at) FROM orders`);
/// a change in that value between polls counts as a detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    pub database_url: String,
    pub query: String,
}

/// Mailbox descriptor handed to the external mailbox watcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MailboxSpec {
    /// Address being watched (e.g. "orders@example.com")
    pub address: String,
    /// Provider hint for the watcher ("imap", "gmail", ...)
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    /// Optional subject/sender filter understood by the watcher
    #[serde(default)]
    pub filter: Option<String>,
}

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique within the workflow (e.g. "send-welcome")
    pub id: String,
    #[serde(default)]
    pub role: StepRole,
    /// Integration name (e.g. "slack", "http")
    pub integration: String,
    /// Action name within the integration (e.g. "send_message")
    pub action: String,
    /// Parameters; string values may contain `{{dotted.path}}` placeholders
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    Trigger,
    #[default]
    Action,
}

/// Workflow as returned by the workflow store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredWorkflow {
    #[serde(flatten)]
    pub definition: WorkflowDefinition,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str) -> Step {
        Step {
            id: id.to_string(),
            role: StepRole::Action,
            integration: "utility".to_string(),
            action: "log".to_string(),
            params: Map::new(),
            description: String::new(),
        }
    }

    fn definition(steps: Vec<Step>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: 1,
            name: "wf".to_string(),
            description: String::new(),
            trigger: TriggerSpec::Webhook { auth: None },
            steps,
        }
    }

    #[test]
    fn test_validate_rejects_empty_steps() {
        let err = definition(vec![]).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_step_ids() {
        let err = definition(vec![step("a"), step("b"), step("a")])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step id 'a'"));
    }

    #[test]
    fn test_validate_accepts_unique_steps() {
        assert!(definition(vec![step("a"), step("b")]).validate().is_ok());
    }

    #[test]
    fn test_trigger_spec_deserializes_by_kind() {
        let spec: TriggerSpec = serde_json::from_value(json!({
            "kind": "schedule",
            "naturalLanguageSchedule": "every day at 9am"
        }))
        .unwrap();
        assert_eq!(spec.kind(), TriggerKind::Schedule);

        let spec: TriggerSpec = serde_json::from_value(json!({
            "kind": "webhook",
            "auth": { "type": "bearer", "token": "t0k" }
        }))
        .unwrap();
        assert_eq!(
            spec,
            TriggerSpec::Webhook {
                auth: Some(WebhookAuth::Bearer { token: "t0k".into() })
            }
        );
    }

    #[test]
    fn test_stored_workflow_defaults_to_active() {
        let stored: StoredWorkflow = serde_json::from_value(json!({
            "id": 7,
            "name": "Greeter",
            "trigger": { "kind": "webhook" },
            "steps": [
                { "id": "s1", "integration": "utility", "action": "log" }
            ]
        }))
        .unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.definition.steps[0].role, StepRole::Action);
    }
}
