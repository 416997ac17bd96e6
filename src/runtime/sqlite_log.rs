//! SQLite persistence for the execution log
//!
//! Append-only: the table is only ever INSERTed into. Input/output snapshots
//! are stored as JSON text, timestamps as RFC 3339.

use crate::error::{Error, Result};
use crate::runtime::log::{ExecutionLog, LogEntry, StepStatus};
use crate::workflow::types::WorkflowId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow},
    Row,
};
use std::path::Path;
use uuid::Uuid;

/// SQLite-backed execution log
#[derive(Debug, Clone)]
pub struct SqliteExecutionLog {
    pool: SqlitePool,
}

impl SqliteExecutionLog {
    /// Wrap an existing pool and make sure the schema exists.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let log = Self { pool };
        log.init_schema().await?;
        Ok(log)
    }

    /// Open (or create) the log database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("🗄️ Opening execution log database: {}", path.display());
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::new(pool).await
    }

    /// Safe to call multiple times (uses IF NOT EXISTS).
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                workflow_id INTEGER NOT NULL,
                step_index INTEGER NOT NULL,
                step_name TEXT NOT NULL,
                status TEXT NOT NULL,
                input JSON NOT NULL,
                output JSON,
                error TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_execution_log_run ON execution_log(run_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_execution_log_workflow ON execution_log(workflow_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn entry_from_row(row: &SqliteRow) -> Result<LogEntry> {
        let run_id: String = row.try_get("run_id")?;
        let status: String = row.try_get("status")?;
        let input: String = row.try_get("input")?;
        let output: Option<String> = row.try_get("output")?;
        let timestamp: String = row.try_get("timestamp")?;
        let step_index: i64 = row.try_get("step_index")?;

        Ok(LogEntry {
            run_id: Uuid::parse_str(&run_id)
                .map_err(|e| Error::Storage(format!("bad run_id '{run_id}': {e}")))?,
            workflow_id: row.try_get("workflow_id")?,
            step_index: u32::try_from(step_index)
                .map_err(|e| Error::Storage(format!("bad step_index {step_index}: {e}")))?,
            step_name: row.try_get("step_name")?,
            status: StepStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("unknown status '{status}'")))?,
            input: serde_json::from_str(&input)?,
            output: output.map(|o| serde_json::from_str(&o)).transpose()?,
            error: row.try_get("error")?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| Error::Storage(format!("bad timestamp '{timestamp}': {e}")))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl ExecutionLog for SqliteExecutionLog {
    async fn append(&self, entry: LogEntry) -> Result<()> {
        let input = serde_json::to_string(&entry.input)?;
        let output = entry.output.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO execution_log
                (run_id, workflow_id, step_index, step_name, status, input, output, error, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.run_id.to_string())
        .bind(entry.workflow_id)
        .bind(i64::from(entry.step_index))
        .bind(&entry.step_name)
        .bind(entry.status.as_str())
        .bind(input)
        .bind(output)
        .bind(&entry.error)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn run_entries(&self, run_id: Uuid) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query("SELECT * FROM execution_log WHERE run_id = ? ORDER BY seq")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn workflow_entries(&self, workflow_id: WorkflowId) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query("SELECT * FROM execution_log WHERE workflow_id = ? ORDER BY seq")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::entry_from_row).collect()
    }
}
