//! Change detection for database triggers
//!
//! A detector is polled on the trigger's interval and reports the change set
//! since its previous poll, or `None` when nothing moved.

use crate::error::{Error, Result};
use crate::workflow::types::DetectorConfig;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePool, Row};
use tokio::sync::Mutex;

#[async_trait]
pub trait ChangeDetector: Send + Sync {
    async fn detect(&self) -> Result<Option<Value>>;

    /// Serializable description shown in trigger listings.
    fn describe(&self) -> Value {
        Value::Null
    }
}

/// Watermark detector: runs a scalar query (e.g. `SELECT MAX(updated_at)
/// FROM orders`) and reports a change whenever the value differs from the
/// previous poll. The first poll only records the baseline.
pub struct SqlChangeDetector {
    pool: SqlitePool,
    database_url: String,
    query: String,
    watermark: Mutex<Option<Option<String>>>,
}

impl SqlChangeDetector {
    /// Connections are opened on first poll, so an unreachable database only
    /// surfaces as a failed poll.
    pub fn connect(config: &DetectorConfig) -> Result<Self> {
        if config.query.trim().is_empty() {
            return Err(Error::Configuration(
                "database trigger needs a watermark query".to_string(),
            ));
        }
        let pool = SqlitePool::connect_lazy(&config.database_url).map_err(|e| {
            Error::Configuration(format!(
                "invalid database url '{}': {e}",
                config.database_url
            ))
        })?;
        Ok(Self::with_pool(pool, config))
    }

    pub fn with_pool(pool: SqlitePool, config: &DetectorConfig) -> Self {
        Self {
            pool,
            database_url: config.database_url.clone(),
            query: config.query.trim().trim_end_matches(';').to_string(),
            watermark: Mutex::new(None),
        }
    }

    async fn current_watermark(&self) -> Result<Option<String>> {
        let sql = format!("SELECT CAST(({}) AS TEXT) AS watermark", self.query);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<Option<String>, _>("watermark")?)
    }
}

#[async_trait]
impl ChangeDetector for SqlChangeDetector {
    async fn detect(&self) -> Result<Option<Value>> {
        let current = self.current_watermark().await?;
        let mut previous = self.watermark.lock().await;

        match previous.replace(current.clone()) {
            None => {
                tracing::debug!("📌 Baseline watermark for '{}': {:?}", self.query, current);
                Ok(None)
            }
            Some(before) if before == current => Ok(None),
            Some(before) => {
                tracing::info!(
                    "🔄 Watermark moved for '{}': {:?} -> {:?}",
                    self.query,
                    before,
                    current
                );
                Ok(Some(json!({ "previous": before, "current": current })))
            }
        }
    }

    fn describe(&self) -> Value {
        json!({ "databaseUrl": self.database_url, "query": self.query })
    }
}

impl std::fmt::Debug for SqlChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlChangeDetector")
            .field("database_url", &self.database_url)
            .field("query", &self.query)
            .finish()
    }
}
