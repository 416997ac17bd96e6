//! Trigger registry
//!
//! Owns every armed event source: scheduler handles for schedule and poll
//! triggers, the webhook path map, and mailbox registrations. Each trigger
//! resolves to one workflow id and hands a trigger context to the execution
//! engine when it fires.
//!
//! Recurring callbacks never propagate errors: a failed tick is logged and the
//! trigger stays armed for the next one. Removal flips the trigger's armed
//! flag before cancelling its job, so nothing fires once `remove_trigger`
//! has returned.

use crate::error::{Error, Result};
use crate::runtime::engine::{ExecutionEngine, ExecutionResult};
use crate::triggers::detector::{ChangeDetector, SqlChangeDetector};
use crate::triggers::interpreter::{
    validate_cron, RuleBasedScheduleInterpreter, ScheduleInterpreter, DEFAULT_CRON,
    DEFAULT_TIMEZONE,
};
use crate::triggers::scheduler::{parse_timezone, Cadence, ScheduleHandle, Scheduler, TickCallback};
use crate::triggers::webhook;
use crate::workflow::types::{MailboxSpec, TriggerKind, TriggerSpec, WebhookAuth, WorkflowDefinition, WorkflowId};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// Fallbacks applied when a trigger spec leaves something out.
#[derive(Debug, Clone)]
pub struct TriggerDefaults {
    pub cron: String,
    pub timezone: String,
    pub poll_interval: Duration,
}

impl Default for TriggerDefaults {
    fn default() -> Self {
        Self {
            cron: DEFAULT_CRON.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Explicit cron expression, or free text for the schedule interpreter.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTriggerSpec {
    pub cron_expression: Option<String>,
    pub natural_language_schedule: Option<String>,
    pub timezone: Option<String>,
}

impl ScheduleTriggerSpec {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            cron_expression: Some(expression.into()),
            ..Default::default()
        }
    }

    pub fn text(schedule: impl Into<String>) -> Self {
        Self {
            natural_language_schedule: Some(schedule.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WebhookSpec {
    pub auth: Option<WebhookAuth>,
}

/// Periodic change detection. `interval` defaults to the registry's poll
/// interval.
#[derive(Clone)]
pub struct PollSpec {
    pub interval: Option<Duration>,
    pub detector: Arc<dyn ChangeDetector>,
}

/// Read-only snapshot of an armed trigger.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    pub trigger_id: String,
    pub kind: TriggerKind,
    pub workflow_id: WorkflowId,
    pub created_at: DateTime<Utc>,
    /// Resolved configuration (cron + timezone, poll interval, mailbox, ...)
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_path: Option<String>,
}

/// One entry of the webhook path map.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRoute {
    pub path: String,
    pub trigger_id: String,
    pub workflow_id: WorkflowId,
    #[serde(skip)]
    auth: Option<WebhookAuth>,
}

enum Binding {
    Scheduled {
        handle: ScheduleHandle,
        armed: Arc<AtomicBool>,
    },
    Webhook {
        path: String,
    },
    Mailbox {
        mailbox: MailboxSpec,
    },
}

struct ActiveTrigger {
    info: TriggerInfo,
    binding: Binding,
}

/// Registry of armed triggers for one engine
pub struct TriggerRegistry {
    engine: Arc<ExecutionEngine>,
    scheduler: Arc<dyn Scheduler>,
    interpreter: Arc<dyn ScheduleInterpreter>,
    defaults: TriggerDefaults,
    triggers: RwLock<HashMap<String, ActiveTrigger>>,
    webhook_routes: RwLock<HashMap<String, WebhookRoute>>,
    last_id_millis: Mutex<i64>,
}

impl TriggerRegistry {
    pub fn new(engine: Arc<ExecutionEngine>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            engine,
            scheduler,
            interpreter: Arc::new(RuleBasedScheduleInterpreter),
            defaults: TriggerDefaults::default(),
            triggers: RwLock::new(HashMap::new()),
            webhook_routes: RwLock::new(HashMap::new()),
            last_id_millis: Mutex::new(0),
        }
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn ScheduleInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_defaults(mut self, defaults: TriggerDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// `{kind}_{workflowId}_{millis}`, unique within this registry even when
    /// two triggers are created in the same millisecond.
    fn next_trigger_id(&self, kind: TriggerKind, workflow_id: WorkflowId) -> String {
        let mut last = self.last_id_millis.lock().unwrap_or_else(|p| p.into_inner());
        let millis = Utc::now().timestamp_millis().max(*last + 1);
        *last = millis;
        format!("{}_{}_{}", kind, workflow_id, millis)
    }

    /// Arm a recurring schedule. An explicit cron expression must be valid;
    /// free text that the interpreter cannot handle falls back to the
    /// registry's default (daily at 09:00 UTC).
    pub async fn create_schedule_trigger(
        &self,
        workflow_id: WorkflowId,
        spec: ScheduleTriggerSpec,
    ) -> Result<String> {
        let (expression, timezone, source) = self.resolve_schedule(&spec).await?;
        parse_timezone(&timezone)?;

        let trigger_id = self.next_trigger_id(TriggerKind::Schedule, workflow_id);
        let armed = Arc::new(AtomicBool::new(true));
        let callback = self.schedule_callback(workflow_id, &trigger_id, &expression, &armed);

        let handle = self
            .scheduler
            .schedule(
                Cadence::Cron {
                    expression: expression.clone(),
                    timezone: timezone.clone(),
                },
                callback,
            )
            .await?;

        let config = json!({
            "cronExpression": expression,
            "timezone": timezone,
            "naturalLanguageSchedule": spec.natural_language_schedule,
            "source": source,
        });
        self.insert(
            trigger_id.clone(),
            TriggerKind::Schedule,
            workflow_id,
            config,
            Binding::Scheduled { handle, armed },
        )
        .await;

        tracing::info!(
            "⏰ Schedule trigger {} armed for workflow {} ('{}' {})",
            trigger_id,
            workflow_id,
            expression,
            timezone
        );
        Ok(trigger_id)
    }

    async fn resolve_schedule(
        &self,
        spec: &ScheduleTriggerSpec,
    ) -> Result<(String, String, &'static str)> {
        let timezone = spec
            .timezone
            .as_deref()
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .unwrap_or(&self.defaults.timezone)
            .to_string();

        if let Some(expression) = non_empty(&spec.cron_expression) {
            validate_cron(expression)?;
            return Ok((expression.to_string(), timezone, "explicit"));
        }

        let text = non_empty(&spec.natural_language_schedule).ok_or_else(|| {
            Error::Configuration(
                "schedule trigger needs a cron expression or a schedule description".to_string(),
            )
        })?;

        let interpreted = match self.interpreter.parse(text).await {
            Ok(cron) => validate_cron(&cron).map(|_| cron),
            Err(e) => Err(e),
        };
        match interpreted {
            Ok(cron) => Ok((cron, timezone, "interpreted")),
            Err(e) => {
                tracing::warn!(
                    "⚠️ Could not interpret schedule '{}' ({}), falling back to '{}' {}",
                    text,
                    e,
                    self.defaults.cron,
                    self.defaults.timezone
                );
                Ok((
                    self.defaults.cron.clone(),
                    self.defaults.timezone.clone(),
                    "default",
                ))
            }
        }
    }

    fn schedule_callback(
        &self,
        workflow_id: WorkflowId,
        trigger_id: &str,
        expression: &str,
        armed: &Arc<AtomicBool>,
    ) -> TickCallback {
        let engine = Arc::clone(&self.engine);
        let armed = Arc::clone(armed);
        let trigger_id = trigger_id.to_string();
        let expression = expression.to_string();

        Arc::new(move |scheduled_at| {
            let engine = Arc::clone(&engine);
            let armed = Arc::clone(&armed);
            let trigger_id = trigger_id.clone();
            let expression = expression.clone();

            async move {
                if !armed.load(Ordering::SeqCst) {
                    return;
                }
                tracing::debug!("🔔 Schedule trigger {} fired", trigger_id);
                let context = json!({
                    "trigger": "schedule",
                    "triggerId": trigger_id,
                    "scheduledAt": scheduled_at.to_rfc3339(),
                    "cronExpression": expression,
                });
                if let Err(e) = engine.execute_workflow(workflow_id, context).await {
                    report_recurring_failure(&trigger_id, &e);
                }
            }
            .boxed()
        })
    }

    /// Map `/webhook/{triggerId}` to the workflow.
    pub async fn create_webhook_trigger(
        &self,
        workflow_id: WorkflowId,
        spec: WebhookSpec,
    ) -> Result<String> {
        if let Some(WebhookAuth::Bearer { token }) = &spec.auth {
            if token.is_empty() {
                return Err(Error::Configuration("bearer token must not be empty".to_string()));
            }
        }
        if let Some(WebhookAuth::Header { name, value }) = &spec.auth {
            if name.trim().is_empty() || value.is_empty() {
                return Err(Error::Configuration(
                    "auth header name and value must not be empty".to_string(),
                ));
            }
        }

        let trigger_id = self.next_trigger_id(TriggerKind::Webhook, workflow_id);
        let path = webhook::webhook_path(&trigger_id);

        self.webhook_routes.write().await.insert(
            path.clone(),
            WebhookRoute {
                path: path.clone(),
                trigger_id: trigger_id.clone(),
                workflow_id,
                auth: spec.auth.clone(),
            },
        );

        let auth_type = match &spec.auth {
            Some(WebhookAuth::Bearer { .. }) => "bearer",
            Some(WebhookAuth::Header { .. }) => "header",
            None => "none",
        };
        self.insert(
            trigger_id.clone(),
            TriggerKind::Webhook,
            workflow_id,
            json!({ "path": path, "auth": auth_type }),
            Binding::Webhook { path: path.clone() },
        )
        .await;

        tracing::info!("🪝 Webhook trigger {} listening on {}", trigger_id, path);
        Ok(trigger_id)
    }

    /// Poll `spec.detector` on an interval and run the workflow on each
    /// detected change.
    pub async fn create_database_trigger(
        &self,
        workflow_id: WorkflowId,
        spec: PollSpec,
    ) -> Result<String> {
        let interval = spec.interval.unwrap_or(self.defaults.poll_interval);
        if interval.is_zero() {
            return Err(Error::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let trigger_id = self.next_trigger_id(TriggerKind::Database, workflow_id);
        let armed = Arc::new(AtomicBool::new(true));
        let callback = self.poll_callback(workflow_id, &trigger_id, &spec.detector, &armed);

        let handle = self
            .scheduler
            .schedule(Cadence::Interval(interval), callback)
            .await?;

        self.insert(
            trigger_id.clone(),
            TriggerKind::Database,
            workflow_id,
            json!({
                "pollIntervalSecs": interval.as_secs(),
                "detector": spec.detector.describe(),
            }),
            Binding::Scheduled { handle, armed },
        )
        .await;

        tracing::info!(
            "🗄️ Database trigger {} polling every {:?} for workflow {}",
            trigger_id,
            interval,
            workflow_id
        );
        Ok(trigger_id)
    }

    fn poll_callback(
        &self,
        workflow_id: WorkflowId,
        trigger_id: &str,
        detector: &Arc<dyn ChangeDetector>,
        armed: &Arc<AtomicBool>,
    ) -> TickCallback {
        let engine = Arc::clone(&self.engine);
        let detector = Arc::clone(detector);
        let armed = Arc::clone(armed);
        let trigger_id = trigger_id.to_string();

        Arc::new(move |_tick| {
            let engine = Arc::clone(&engine);
            let detector = Arc::clone(&detector);
            let armed = Arc::clone(&armed);
            let trigger_id = trigger_id.clone();

            async move {
                if !armed.load(Ordering::SeqCst) {
                    return;
                }
                let changes = match detector.detect().await {
                    Ok(Some(changes)) => changes,
                    Ok(None) => return,
                    Err(e) => {
                        report_recurring_failure(&trigger_id, &e);
                        return;
                    }
                };
                if !armed.load(Ordering::SeqCst) {
                    return;
                }
                tracing::info!("🔔 Database trigger {} detected changes", trigger_id);
                let context = json!({
                    "trigger": "database",
                    "triggerId": trigger_id,
                    "detectedAt": Utc::now().to_rfc3339(),
                    "changes": changes,
                });
                if let Err(e) = engine.execute_workflow(workflow_id, context).await {
                    report_recurring_failure(&trigger_id, &e);
                }
            }
            .boxed()
        })
    }

    /// Registration only. The external mailbox watcher delivers messages
    /// through [`TriggerRegistry::dispatch_email`].
    pub async fn create_email_trigger(
        &self,
        workflow_id: WorkflowId,
        mailbox: MailboxSpec,
    ) -> Result<String> {
        if mailbox.address.trim().is_empty() {
            return Err(Error::Configuration(
                "email trigger needs a mailbox address".to_string(),
            ));
        }

        let trigger_id = self.next_trigger_id(TriggerKind::Email, workflow_id);
        let config = serde_json::to_value(&mailbox)?;
        self.insert(
            trigger_id.clone(),
            TriggerKind::Email,
            workflow_id,
            config,
            Binding::Mailbox { mailbox },
        )
        .await;

        tracing::info!("📬 Email trigger {} registered for workflow {}", trigger_id, workflow_id);
        Ok(trigger_id)
    }

    /// Arm whatever trigger the definition declares.
    pub async fn arm_workflow(&self, definition: &WorkflowDefinition) -> Result<String> {
        let workflow_id = definition.id;
        match &definition.trigger {
            TriggerSpec::Schedule {
                cron_expression,
                natural_language_schedule,
                timezone,
            } => {
                self.create_schedule_trigger(
                    workflow_id,
                    ScheduleTriggerSpec {
                        cron_expression: cron_expression.clone(),
                        natural_language_schedule: natural_language_schedule.clone(),
                        timezone: timezone.clone(),
                    },
                )
                .await
            }
            TriggerSpec::Webhook { auth } => {
                self.create_webhook_trigger(workflow_id, WebhookSpec { auth: auth.clone() })
                    .await
            }
            TriggerSpec::Database {
                poll_interval_secs,
                detector,
            } => {
                let detector = SqlChangeDetector::connect(detector)?;
                self.create_database_trigger(
                    workflow_id,
                    PollSpec {
                        interval: poll_interval_secs.map(Duration::from_secs),
                        detector: Arc::new(detector),
                    },
                )
                .await
            }
            TriggerSpec::Email { mailbox } => {
                self.create_email_trigger(workflow_id, mailbox.clone()).await
            }
        }
    }

    async fn insert(
        &self,
        trigger_id: String,
        kind: TriggerKind,
        workflow_id: WorkflowId,
        config: Value,
        binding: Binding,
    ) {
        let webhook_path = match &binding {
            Binding::Webhook { path } => Some(path.clone()),
            _ => None,
        };
        let info = TriggerInfo {
            trigger_id: trigger_id.clone(),
            kind,
            workflow_id,
            created_at: Utc::now(),
            config,
            webhook_path,
        };
        self.triggers
            .write()
            .await
            .insert(trigger_id, ActiveTrigger { info, binding });
    }

    /// Tear down a trigger: cancel its job or unmap its path, then forget it.
    pub async fn remove_trigger(&self, trigger_id: &str) -> Result<()> {
        let trigger = self
            .triggers
            .write()
            .await
            .remove(trigger_id)
            .ok_or_else(|| Error::NotFound(format!("trigger '{trigger_id}'")))?;

        match &trigger.binding {
            Binding::Scheduled { handle, armed } => {
                let (handle, armed) = (*handle, Arc::clone(armed));
                armed.store(false, Ordering::SeqCst);
                if let Err(e) = self.scheduler.cancel(&handle).await {
                    // Keep the trigger registered and firing so removal can be retried
                    armed.store(true, Ordering::SeqCst);
                    tracing::warn!("⚠️ Failed to cancel trigger {}: {}", trigger_id, e);
                    self.triggers
                        .write()
                        .await
                        .insert(trigger_id.to_string(), trigger);
                    return Err(e);
                }
            }
            Binding::Webhook { path } => {
                self.webhook_routes.write().await.remove(path);
            }
            Binding::Mailbox { .. } => {}
        }

        tracing::info!("🗑️ Removed {} trigger {}", trigger.info.kind, trigger_id);
        Ok(())
    }

    pub async fn get_trigger(&self, trigger_id: &str) -> Result<TriggerInfo> {
        self.triggers
            .read()
            .await
            .get(trigger_id)
            .map(|t| t.info.clone())
            .ok_or_else(|| Error::NotFound(format!("trigger '{trigger_id}'")))
    }

    /// Triggers of one workflow, oldest first.
    pub async fn get_workflow_triggers(&self, workflow_id: WorkflowId) -> Vec<TriggerInfo> {
        let mut infos: Vec<TriggerInfo> = self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.info.workflow_id == workflow_id)
            .map(|t| t.info.clone())
            .collect();
        infos.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.trigger_id.cmp(&b.trigger_id))
        });
        infos
    }

    /// Every mapped webhook path, sorted by path.
    pub async fn get_all_webhook_paths(&self) -> Vec<WebhookRoute> {
        let mut routes: Vec<WebhookRoute> =
            self.webhook_routes.read().await.values().cloned().collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    pub async fn trigger_count(&self) -> usize {
        self.triggers.read().await.len()
    }

    /// Run the workflow mapped to `path` synchronously and hand back its
    /// outcome. An unmapped path is `NotFound` and runs nothing.
    pub async fn handle_webhook_request(
        &self,
        path: &str,
        payload: Value,
        headers: &HashMap<String, String>,
    ) -> Result<Option<ExecutionResult>> {
        let path = webhook::normalize_path(path);
        let route = self
            .webhook_routes
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no webhook registered at '{path}'")))?;

        if let Some(auth) = &route.auth {
            if let Err(e) = webhook::verify(auth, headers) {
                tracing::warn!("🚫 Rejected webhook call on {}: {}", path, e);
                return Err(e);
            }
        }

        tracing::info!(
            "📨 Webhook {} received, running workflow {}",
            path,
            route.workflow_id
        );
        let context = json!({
            "trigger": "webhook",
            "triggerId": route.trigger_id,
            "data": payload,
            "headers": webhook::redact(route.auth.as_ref(), headers),
            "receivedAt": Utc::now().to_rfc3339(),
        });
        self.engine.execute_workflow(route.workflow_id, context).await
    }

    /// Entry point for the external mailbox watcher.
    pub async fn dispatch_email(
        &self,
        trigger_id: &str,
        message: Value,
    ) -> Result<Option<ExecutionResult>> {
        let (workflow_id, mailbox) = {
            let triggers = self.triggers.read().await;
            let trigger = triggers
                .get(trigger_id)
                .ok_or_else(|| Error::NotFound(format!("trigger '{trigger_id}'")))?;
            match &trigger.binding {
                Binding::Mailbox { mailbox } => (trigger.info.workflow_id, mailbox.clone()),
                _ => {
                    return Err(Error::Configuration(format!(
                        "trigger '{trigger_id}' is a {} trigger, not an email trigger",
                        trigger.info.kind
                    )))
                }
            }
        };

        tracing::info!("📧 Email for {} received on trigger {}", mailbox.address, trigger_id);
        let context = json!({
            "trigger": "email",
            "triggerId": trigger_id,
            "email": message,
            "mailbox": mailbox,
            "receivedAt": Utc::now().to_rfc3339(),
        });
        self.engine.execute_workflow(workflow_id, context).await
    }

    /// Remove every trigger and stop the scheduler.
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<String> = self.triggers.read().await.keys().cloned().collect();
        tracing::info!("⏹️ Shutting down trigger registry ({} triggers)", ids.len());
        for id in ids {
            match self.remove_trigger(&id).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => tracing::warn!("⚠️ Failed to remove trigger {}: {}", id, e),
            }
        }
        self.scheduler.shutdown().await
    }
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn report_recurring_failure(trigger_id: &str, error: &Error) {
    let failure = Error::RecurringTrigger(trigger_id.to_string());
    tracing::error!("❌ {}: {}", failure, error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::adapters::{ActionAdapter, ActionAdapterRegistry, ActionKey};
    use crate::runtime::log::{ExecutionLog, InMemoryExecutionLog, RunStatus};
    use crate::triggers::scheduler::ManualScheduler;
    use crate::workflow::store::InMemoryWorkflowStore;
    use crate::workflow::types::{DetectorConfig, Step, StepRole, StoredWorkflow};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        registry: TriggerRegistry,
        scheduler: Arc<ManualScheduler>,
        log: Arc<InMemoryExecutionLog>,
    }

    fn stored(id: WorkflowId) -> StoredWorkflow {
        StoredWorkflow {
            definition: WorkflowDefinition {
                id,
                name: format!("wf-{id}"),
                description: String::new(),
                trigger: TriggerSpec::Webhook { auth: None },
                steps: vec![Step {
                    id: "log".to_string(),
                    role: StepRole::Action,
                    integration: "utility".to_string(),
                    action: "log".to_string(),
                    params: serde_json::Map::new(),
                    description: String::new(),
                }],
            },
            is_active: true,
        }
    }

    fn harness() -> Harness {
        harness_with(ActionAdapterRegistry::new())
    }

    fn harness_with(adapters: ActionAdapterRegistry) -> Harness {
        let log = Arc::new(InMemoryExecutionLog::new());
        let store = InMemoryWorkflowStore::with_workflows(vec![stored(1), stored(7)]);
        let engine = ExecutionEngine::new(Arc::new(store), Arc::new(adapters), log.clone());
        let scheduler = Arc::new(ManualScheduler::new());
        let registry = TriggerRegistry::new(Arc::new(engine), scheduler.clone());
        Harness {
            registry,
            scheduler,
            log,
        }
    }

    struct Broken;

    #[async_trait]
    impl ActionAdapter for Broken {
        async fn execute(&self, _params: &serde_json::Map<String, Value>) -> anyhow::Result<Value> {
            anyhow::bail!("upstream unavailable")
        }
    }

    /// Delegates to a `ManualScheduler` but fails the first `failures` cancels.
    struct FlakyCancel {
        inner: Arc<ManualScheduler>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for FlakyCancel {
        async fn schedule(&self, cadence: Cadence, callback: TickCallback) -> Result<ScheduleHandle> {
            self.inner.schedule(cadence, callback).await
        }

        async fn cancel(&self, handle: &ScheduleHandle) -> Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Scheduler("backend busy".to_string()));
            }
            self.inner.cancel(handle).await
        }
    }

    struct Sequence {
        results: Mutex<Vec<Result<Option<Value>>>>,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl ChangeDetector for Sequence {
        async fn detect(&self) -> Result<Option<Value>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(None))
        }
    }

    #[tokio::test]
    async fn test_schedule_trigger_from_text() {
        let h = harness();
        let id = h
            .registry
            .create_schedule_trigger(7, ScheduleTriggerSpec::text("every day at 9am"))
            .await
            .unwrap();

        assert!(id.starts_with("schedule_7_"));
        let info = h.registry.get_trigger(&id).await.unwrap();
        assert_eq!(info.config["cronExpression"], "0 9 * * *");
        assert_eq!(info.config["source"], "interpreted");
        assert_eq!(h.scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn test_uninterpretable_text_falls_back_to_default() {
        let h = harness();
        let id = h
            .registry
            .create_schedule_trigger(
                7,
                ScheduleTriggerSpec {
                    natural_language_schedule: Some("when pigs fly".to_string()),
                    timezone: Some("+07:00".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let info = h.registry.get_trigger(&id).await.unwrap();
        assert_eq!(info.config["cronExpression"], DEFAULT_CRON);
        assert_eq!(info.config["timezone"], DEFAULT_TIMEZONE);
        assert_eq!(info.config["source"], "default");
    }

    #[tokio::test]
    async fn test_bad_schedule_config_fails_at_creation() {
        let h = harness();
        for spec in [
            ScheduleTriggerSpec::default(),
            ScheduleTriggerSpec::cron("99 * * * *"),
            ScheduleTriggerSpec {
                cron_expression: Some("0 9 * * *".to_string()),
                timezone: Some("Atlantis/Nowhere".to_string()),
                ..Default::default()
            },
        ] {
            let err = h.registry.create_schedule_trigger(1, spec).await.unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{err:?}");
        }
        assert_eq!(h.scheduler.armed_count(), 0);
        assert_eq!(h.registry.trigger_count().await, 0);
    }

    #[tokio::test]
    async fn test_schedule_fire_runs_workflow_until_removed() {
        let h = harness();
        let id = h
            .registry
            .create_schedule_trigger(1, ScheduleTriggerSpec::cron("*/5 * * * *"))
            .await
            .unwrap();

        assert_eq!(h.scheduler.fire_all().await, 1);
        let entries = h.log.all().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].input["trigger"], "schedule");
        assert_eq!(entries[0].input["cronExpression"], "*/5 * * * *");

        h.registry.remove_trigger(&id).await.unwrap();
        assert_eq!(h.scheduler.armed_count(), 0);
        assert_eq!(h.scheduler.fire_all().await, 0);
        assert_eq!(h.log.len().await, 3);
        assert!(h.registry.get_trigger(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failed_scheduled_run_is_logged_and_stays_armed() {
        let mut adapters = ActionAdapterRegistry::new();
        adapters.register(ActionKey::UtilityLog, Broken);
        let h = harness_with(adapters);
        h.registry
            .create_schedule_trigger(1, ScheduleTriggerSpec::cron("0 * * * *"))
            .await
            .unwrap();

        assert_eq!(h.scheduler.fire_all().await, 1);
        assert_eq!(h.scheduler.fire_all().await, 1);

        let records = h.log.run_records(1).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == RunStatus::Failed));
        assert!(records
            .iter()
            .all(|r| r.error.as_deref().unwrap_or_default().contains("upstream unavailable")));
        assert_eq!(h.scheduler.armed_count(), 1);
        assert_eq!(h.registry.trigger_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_cancel_keeps_trigger_for_retry() {
        let log = Arc::new(InMemoryExecutionLog::new());
        let engine = ExecutionEngine::new(
            Arc::new(InMemoryWorkflowStore::with_workflows(vec![stored(1)])),
            Arc::new(ActionAdapterRegistry::new()),
            log.clone(),
        );
        let manual = Arc::new(ManualScheduler::new());
        let scheduler = Arc::new(FlakyCancel {
            inner: manual.clone(),
            failures: AtomicUsize::new(1),
        });
        let registry = TriggerRegistry::new(Arc::new(engine), scheduler);
        let id = registry
            .create_schedule_trigger(1, ScheduleTriggerSpec::cron("0 * * * *"))
            .await
            .unwrap();

        let err = registry.remove_trigger(&id).await.unwrap_err();
        assert!(matches!(err, Error::Scheduler(_)));
        assert!(registry.get_trigger(&id).await.is_ok());
        assert_eq!(manual.armed_count(), 1);

        // still armed, so a tick before the retry still runs
        manual.fire_all().await;
        assert_eq!(log.len().await, 3);

        registry.remove_trigger(&id).await.unwrap();
        assert!(registry.get_trigger(&id).await.unwrap_err().is_not_found());
        assert_eq!(manual.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_trigger_ids_are_unique_within_a_millisecond() {
        let h = harness();
        let a = h.registry.create_webhook_trigger(1, WebhookSpec::default()).await.unwrap();
        let b = h.registry.create_webhook_trigger(1, WebhookSpec::default()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(h.registry.get_all_webhook_paths().await.len(), 2);
        assert_eq!(h.registry.get_workflow_triggers(1).await.len(), 2);
        assert!(h.registry.get_workflow_triggers(7).await.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_auth_is_enforced() {
        let h = harness();
        let id = h
            .registry
            .create_webhook_trigger(
                1,
                WebhookSpec {
                    auth: Some(WebhookAuth::Bearer {
                        token: "tok".to_string(),
                    }),
                },
            )
            .await
            .unwrap();
        let path = webhook::webhook_path(&id);

        let err = h
            .registry
            .handle_webhook_request(&path, json!({}), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(h.log.is_empty().await);

        let headers = HashMap::from([("Authorization".to_string(), "Bearer tok".to_string())]);
        let result = h
            .registry
            .handle_webhook_request(&path, json!({ "n": 1 }), &headers)
            .await
            .unwrap()
            .unwrap();
        let entries = h.log.run_entries(result.run_id).await.unwrap();
        assert_eq!(entries[0].input["data"]["n"], 1);
        assert_eq!(entries[0].input["trigger"], "webhook");
    }

    #[tokio::test]
    async fn test_webhook_secret_never_reaches_the_log() {
        let h = harness();
        let id = h
            .registry
            .create_webhook_trigger(
                1,
                WebhookSpec {
                    auth: Some(WebhookAuth::Bearer {
                        token: "TOPSECRET".to_string(),
                    }),
                },
            )
            .await
            .unwrap();

        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer TOPSECRET".to_string()),
            ("X-Request-Id".to_string(), "r-1".to_string()),
        ]);
        let result = h
            .registry
            .handle_webhook_request(&webhook::webhook_path(&id), json!({}), &headers)
            .await
            .unwrap()
            .unwrap();

        let entries = h.log.run_entries(result.run_id).await.unwrap();
        assert_eq!(entries[0].input["headers"], json!({ "X-Request-Id": "r-1" }));
        for entry in &entries {
            assert!(!entry.input.to_string().contains("TOPSECRET"));
            assert!(!serde_json::to_string(&entry.output)
                .unwrap()
                .contains("TOPSECRET"));
        }
    }

    #[tokio::test]
    async fn test_database_trigger_runs_only_on_change_and_survives_errors() {
        let h = harness();
        let detector = Arc::new(Sequence {
            // popped from the back
            results: Mutex::new(vec![
                Ok(Some(json!({ "current": "8" }))),
                Err(Error::Storage("database is locked".to_string())),
                Ok(None),
            ]),
            polls: AtomicUsize::new(0),
        });
        let id = h
            .registry
            .create_database_trigger(
                1,
                PollSpec {
                    interval: None,
                    detector: detector.clone(),
                },
            )
            .await
            .unwrap();

        let info = h.registry.get_trigger(&id).await.unwrap();
        assert_eq!(info.config["pollIntervalSecs"], 60);

        h.scheduler.fire_all().await;
        h.scheduler.fire_all().await;
        assert!(h.log.is_empty().await);
        assert_eq!(h.scheduler.armed_count(), 1);

        h.scheduler.fire_all().await;
        let entries = h.log.all().await;
        assert_eq!(entries[0].input["trigger"], "database");
        assert_eq!(entries[0].input["changes"]["current"], "8");
        assert_eq!(detector.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_rejected() {
        let h = harness();
        let err = h
            .registry
            .create_database_trigger(
                1,
                PollSpec {
                    interval: Some(Duration::ZERO),
                    detector: Arc::new(Sequence {
                        results: Mutex::new(Vec::new()),
                        polls: AtomicUsize::new(0),
                    }),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_email_trigger_dispatch() {
        let h = harness();
        let mailbox = MailboxSpec {
            address: "orders@example.com".to_string(),
            provider: Some("imap".to_string()),
            folder: None,
            filter: None,
        };
        let email_id = h.registry.create_email_trigger(7, mailbox).await.unwrap();
        let hook_id = h.registry.create_webhook_trigger(7, WebhookSpec::default()).await.unwrap();

        let result = h
            .registry
            .dispatch_email(&email_id, json!({ "subject": "New order" }))
            .await
            .unwrap()
            .unwrap();
        let entries = h.log.run_entries(result.run_id).await.unwrap();
        assert_eq!(entries[0].input["email"]["subject"], "New order");
        assert_eq!(entries[0].input["mailbox"]["address"], "orders@example.com");

        assert!(matches!(
            h.registry.dispatch_email(&hook_id, json!({})).await.unwrap_err(),
            Error::Configuration(_)
        ));
        assert!(h
            .registry
            .dispatch_email("email_0_0", json!({}))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_arm_workflow_dispatches_on_trigger_kind() {
        let h = harness();
        let mut definition = stored(1).definition;
        definition.trigger = TriggerSpec::Schedule {
            cron_expression: Some("0 8 * * 1-5".to_string()),
            natural_language_schedule: None,
            timezone: None,
        };
        let id = h.registry.arm_workflow(&definition).await.unwrap();
        assert_eq!(h.registry.get_trigger(&id).await.unwrap().kind, TriggerKind::Schedule);

        definition.trigger = TriggerSpec::Webhook { auth: None };
        let id = h.registry.arm_workflow(&definition).await.unwrap();
        assert!(h.registry.get_trigger(&id).await.unwrap().webhook_path.is_some());

        definition.trigger = TriggerSpec::Database {
            poll_interval_secs: Some(30),
            detector: DetectorConfig {
                database_url: "sqlite::memory:".to_string(),
                query: "SELECT 1".to_string(),
            },
        };
        let id = h.registry.arm_workflow(&definition).await.unwrap();
        let info = h.registry.get_trigger(&id).await.unwrap();
        assert_eq!(info.kind, TriggerKind::Database);
        assert_eq!(info.config["pollIntervalSecs"], 30);
        assert_eq!(h.scheduler.armed_count(), 2);

        definition.trigger = TriggerSpec::Email {
            mailbox: MailboxSpec {
                address: "inbox@example.com".to_string(),
                provider: None,
                folder: None,
                filter: None,
            },
        };
        let id = h.registry.arm_workflow(&definition).await.unwrap();
        let info = h.registry.get_trigger(&id).await.unwrap();
        assert_eq!(info.kind, TriggerKind::Email);
        assert!(h
            .registry
            .dispatch_email(&id, json!({ "subject": "hello" }))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_arm_workflow_rejects_empty_detector_query() {
        let h = harness();
        let mut definition = stored(1).definition;
        definition.trigger = TriggerSpec::Database {
            poll_interval_secs: None,
            detector: DetectorConfig {
                database_url: "sqlite::memory:".to_string(),
                query: "  ".to_string(),
            },
        };
        let err = h.registry.arm_workflow(&definition).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(h.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let h = harness();
        h.registry
            .create_schedule_trigger(1, ScheduleTriggerSpec::cron("0 * * * *"))
            .await
            .unwrap();
        h.registry.create_webhook_trigger(1, WebhookSpec::default()).await.unwrap();

        h.registry.shutdown().await.unwrap();
        assert_eq!(h.registry.trigger_count().await, 0);
        assert!(h.registry.get_all_webhook_paths().await.is_empty());
        assert_eq!(h.scheduler.armed_count(), 0);
    }
}
