//! Append-only execution log
//!
//! Every run writes `workflow_start`, one entry per step, and either an
//! `error` entry or `workflow_complete`. A run's status is derived purely from
//! its entries, which is what the analytics helpers below rely on.

use crate::error::Result;
use crate::workflow::types::WorkflowId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const WORKFLOW_START: &str = "workflow_start";
pub const WORKFLOW_COMPLETE: &str = "workflow_complete";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(StepStatus::Running),
            "success" => Some(StepStatus::Success),
            "error" => Some(StepStatus::Error),
            _ => None,
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub run_id: Uuid,
    pub workflow_id: WorkflowId,
    /// 0 for `workflow_start`, 1..=N for steps, N+1 for `workflow_complete`
    pub step_index: u32,
    pub step_name: String,
    pub status: StepStatus,
    /// Trigger context for `workflow_start`, resolved params for steps
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn is_complete_marker(&self) -> bool {
        self.step_name == WORKFLOW_COMPLETE
    }
}

/// Overall state of a run, derived from its entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Still running, or aborted mid-flight without an error entry
    Running,
}

impl RunStatus {
    pub fn derive(entries: &[LogEntry]) -> Self {
        if entries.iter().any(|e| e.status == StepStatus::Error) {
            RunStatus::Failed
        } else if entries.iter().any(LogEntry::is_complete_marker) {
            RunStatus::Succeeded
        } else {
            RunStatus::Running
        }
    }
}

/// Per-run summary for analytics consumers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: Uuid,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub last_entry_at: DateTime<Utc>,
    /// Only set once the run reached a terminal state
    pub duration_ms: Option<i64>,
    pub steps_logged: usize,
    pub error: Option<String>,
}

/// Aggregate statistics for one workflow.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    pub total_runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub running: usize,
    /// succeeded / (succeeded + failed), 0.0 when nothing finished
    pub success_rate: f64,
    pub avg_duration_ms: Option<f64>,
    /// error message -> occurrences
    pub error_clusters: BTreeMap<String, usize>,
}

/// Group entries by run, in order of first appearance.
pub fn run_records(entries: &[LogEntry]) -> Vec<RunRecord> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut by_run: BTreeMap<Uuid, Vec<&LogEntry>> = BTreeMap::new();
    for entry in entries {
        by_run
            .entry(entry.run_id)
            .or_insert_with(|| {
                order.push(entry.run_id);
                Vec::new()
            })
            .push(entry);
    }

    order
        .into_iter()
        .filter_map(|run_id| {
            let run: Vec<LogEntry> = by_run.remove(&run_id)?.into_iter().cloned().collect();
            let first = run.first()?;
            let last = run.last()?;
            let status = RunStatus::derive(&run);
            let duration_ms = match status {
                RunStatus::Running => None,
                _ => Some((last.timestamp - first.timestamp).num_milliseconds()),
            };
            Some(RunRecord {
                run_id,
                workflow_id: first.workflow_id,
                status,
                started_at: first.timestamp,
                last_entry_at: last.timestamp,
                duration_ms,
                steps_logged: run.len(),
                error: run.iter().find_map(|e| e.error.clone()),
            })
        })
        .collect()
}

pub fn workflow_stats(records: &[RunRecord]) -> WorkflowStats {
    let mut stats = WorkflowStats {
        total_runs: records.len(),
        ..Default::default()
    };

    let mut durations = Vec::new();
    for record in records {
        match record.status {
            RunStatus::Succeeded => stats.succeeded += 1,
            RunStatus::Failed => stats.failed += 1,
            RunStatus::Running => stats.running += 1,
        }
        if let Some(ms) = record.duration_ms {
            durations.push(ms as f64);
        }
        if let Some(err) = &record.error {
            *stats.error_clusters.entry(err.clone()).or_insert(0) += 1;
        }
    }

    let finished = stats.succeeded + stats.failed;
    if finished > 0 {
        stats.success_rate = stats.succeeded as f64 / finished as f64;
    }
    if !durations.is_empty() {
        stats.avg_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
    }
    stats
}

/// Log sink plus the read-only query surface used by analytics.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<()>;

    /// Entries of one run, in append order.
    async fn run_entries(&self, run_id: Uuid) -> Result<Vec<LogEntry>>;

    /// Entries of every run of a workflow, in append order.
    async fn workflow_entries(&self, workflow_id: WorkflowId) -> Result<Vec<LogEntry>>;

    async fn run_records(&self, workflow_id: WorkflowId) -> Result<Vec<RunRecord>> {
        Ok(run_records(&self.workflow_entries(workflow_id).await?))
    }

    async fn workflow_stats(&self, workflow_id: WorkflowId) -> Result<WorkflowStats> {
        Ok(workflow_stats(&self.run_records(workflow_id).await?))
    }
}

/// Process-local log, used in tests and when no data directory is configured.
#[derive(Debug, Default)]
pub struct InMemoryExecutionLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<LogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn append(&self, entry: LogEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn run_entries(&self, run_id: Uuid) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn workflow_entries(&self, workflow_id: WorkflowId) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}
