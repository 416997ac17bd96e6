//! Sequential workflow execution engine
//!
//! Loads a definition, runs its steps strictly in declared order, resolves
//! `{{dotted.path}}` parameters against the accumulated context and writes an
//! audit entry for every transition. The first adapter failure aborts the run.

use crate::error::{Error, Result};
use crate::runtime::adapters::ActionAdapterRegistry;
use crate::runtime::log::{ExecutionLog, LogEntry, StepStatus, WORKFLOW_COMPLETE, WORKFLOW_START};
use crate::runtime::template::resolve_params;
use crate::workflow::compiler::WorkflowCompiler;
use crate::workflow::store::WorkflowStore;
use crate::workflow::types::{Step, StepRole, WorkflowDefinition, WorkflowId};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Whether runs of the same workflow may overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Any number of concurrent runs per workflow
    #[default]
    Unbounded,
    /// A trigger firing while a run of the same workflow is in flight is skipped
    SingleFlight,
}

/// Outcome of a run that went through every step.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub workflow_id: WorkflowId,
    pub steps_executed: usize,
    /// Output of the last step
    pub output: Value,
    /// Trigger context merged with every step output
    pub context: Value,
}

/// Sequential step dispatcher
pub struct ExecutionEngine {
    store: Arc<dyn WorkflowStore>,
    adapters: Arc<ActionAdapterRegistry>,
    log: Arc<dyn ExecutionLog>,
    compiler: Option<Arc<dyn WorkflowCompiler>>,
    policy: ConcurrencyPolicy,
    in_flight: Mutex<HashSet<WorkflowId>>,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        adapters: Arc<ActionAdapterRegistry>,
        log: Arc<dyn ExecutionLog>,
    ) -> Self {
        Self {
            store,
            adapters,
            log,
            compiler: None,
            policy: ConcurrencyPolicy::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn WorkflowCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn log(&self) -> &Arc<dyn ExecutionLog> {
        &self.log
    }

    /// Compile free text into a definition through the external compiler and
    /// check the structural invariants. Semantic correctness is not checked.
    pub async fn parse_workflow(&self, free_text: &str) -> Result<WorkflowDefinition> {
        let compiler = self
            .compiler
            .as_ref()
            .ok_or_else(|| Error::Compiler("no workflow compiler configured".to_string()))?;
        let definition = compiler.compile(free_text).await?;
        definition.validate()?;
        tracing::info!(
            "🧩 Compiled workflow '{}' with {} steps",
            definition.name,
            definition.steps.len()
        );
        Ok(definition)
    }

    /// Run a workflow to completion or to its first failing step.
    ///
    /// Returns `Ok(None)` without executing or logging anything when the
    /// workflow is missing or inactive (a disabled workflow ignores its
    /// triggers), or when single-flight is on and a run is already in flight.
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        trigger_context: Value,
    ) -> Result<Option<ExecutionResult>> {
        let workflow = match self.store.get_workflow_by_id(workflow_id).await? {
            Some(wf) if wf.is_active => wf.definition,
            Some(_) => {
                tracing::debug!("⏭️ Workflow {} is inactive, ignoring trigger", workflow_id);
                return Ok(None);
            }
            None => {
                tracing::debug!("⏭️ Workflow {} not found, ignoring trigger", workflow_id);
                return Ok(None);
            }
        };

        let _lease = match self.acquire_lease(workflow_id) {
            Some(lease) => lease,
            None => {
                tracing::warn!(
                    "⏸️ Workflow {} already has a run in flight, skipping trigger",
                    workflow_id
                );
                return Ok(None);
            }
        };

        let run_id = Uuid::new_v4();
        let workflow_start_time = std::time::Instant::now();
        tracing::info!(
            "🚀 Starting run {} of workflow {} ('{}', {} steps)",
            run_id,
            workflow_id,
            workflow.name,
            workflow.steps.len()
        );

        let mut run = RunState {
            run_id,
            workflow_id,
            log: self.log.as_ref(),
        };
        run.append(0, WORKFLOW_START, StepStatus::Running, trigger_context.clone(), None, None)
            .await?;

        let mut context = match trigger_context {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        let mut last_output = Value::Null;

        for (position, step) in workflow.steps.iter().enumerate() {
            let step_index = position as u32 + 1;
            let input = Value::Object(resolve_params(&step.params, &Value::Object(context.clone())));
            tracing::info!(
                "📍 Step {}/{}: '{}' ({}.{})",
                step_index,
                workflow.steps.len(),
                step.id,
                step.integration,
                step.action
            );

            let outcome = self.dispatch(step, &input, &context).await;
            match outcome {
                Ok(output) => {
                    run.append(
                        step_index,
                        &step.id,
                        StepStatus::Success,
                        input,
                        Some(output.clone()),
                        None,
                    )
                    .await?;
                    merge_output(&mut context, &step.id, &output);
                    last_output = output;
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    tracing::error!(
                        "❌ Run {} failed at step {} ('{}'): {}",
                        run_id,
                        step_index,
                        step.id,
                        message
                    );
                    run.append(
                        step_index,
                        &step.id,
                        StepStatus::Error,
                        input,
                        None,
                        Some(message.clone()),
                    )
                    .await?;
                    return Err(Error::StepExecution {
                        step_index,
                        step_name: step.id.clone(),
                        message,
                    });
                }
            }
        }

        let complete_index = workflow.steps.len() as u32 + 1;
        run.append(
            complete_index,
            WORKFLOW_COMPLETE,
            StepStatus::Success,
            json!({ "stepsExecuted": workflow.steps.len() }),
            Some(last_output.clone()),
            None,
        )
        .await?;

        tracing::info!(
            "🎉 Run {} of workflow {} completed in {:?}",
            run_id,
            workflow_id,
            workflow_start_time.elapsed()
        );

        Ok(Some(ExecutionResult {
            run_id,
            workflow_id,
            steps_executed: workflow.steps.len(),
            output: last_output,
            context: Value::Object(context),
        }))
    }

    /// Trigger-role steps describe the event source; they pass the trigger
    /// context through instead of calling an adapter.
    async fn dispatch(
        &self,
        step: &Step,
        input: &Value,
        context: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        if step.role == StepRole::Trigger {
            return Ok(Value::Object(context.clone()));
        }
        let params = match input {
            Value::Object(map) => map,
            _ => return Err(anyhow::anyhow!("step parameters must be an object")),
        };
        let adapter = self.adapters.resolve(&step.integration, &step.action);
        adapter.execute(params).await
    }

    fn acquire_lease(&self, workflow_id: WorkflowId) -> Option<RunLease<'_>> {
        if self.policy == ConcurrencyPolicy::Unbounded {
            return Some(RunLease {
                in_flight: None,
                workflow_id,
            });
        }
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !in_flight.insert(workflow_id) {
            return None;
        }
        Some(RunLease {
            in_flight: Some(&self.in_flight),
            workflow_id,
        })
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("adapters", &self.adapters)
            .field("policy", &self.policy)
            .field("has_compiler", &self.compiler.is_some())
            .finish()
    }
}

/// Releases the single-flight slot when the run ends, however it ends.
struct RunLease<'a> {
    in_flight: Option<&'a Mutex<HashSet<WorkflowId>>>,
    workflow_id: WorkflowId,
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight {
            in_flight
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&self.workflow_id);
        }
    }
}

struct RunState<'a> {
    run_id: Uuid,
    workflow_id: WorkflowId,
    log: &'a dyn ExecutionLog,
}

impl RunState<'_> {
    async fn append(
        &mut self,
        step_index: u32,
        step_name: &str,
        status: StepStatus,
        input: Value,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        self.log
            .append(LogEntry {
                run_id: self.run_id,
                workflow_id: self.workflow_id,
                step_index,
                step_name: step_name.to_string(),
                status,
                input,
                output,
                error,
                timestamp: Utc::now(),
            })
            .await
    }
}

/// Store the output under `steps.<id>` and, for object outputs, merge its
/// keys into the root so later steps can reference them directly.
fn merge_output(context: &mut Map<String, Value>, step_id: &str, output: &Value) {
    let steps = context
        .entry("steps")
        .or_insert_with(|| Value::Object(Map::new()));
    if !steps.is_object() {
        *steps = Value::Object(Map::new());
    }
    if let Value::Object(steps) = steps {
        steps.insert(step_id.to_string(), output.clone());
    }

    if let Value::Object(fields) = output {
        for (key, value) in fields {
            if key != "steps" {
                context.insert(key.clone(), value.clone());
            }
        }
    }
}
