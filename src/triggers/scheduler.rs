//! Timer backends for schedule and poll triggers
//!
//! The registry only talks to the [`Scheduler`] trait: it hands over a
//! [`Cadence`] plus a callback and gets back a handle it can cancel.
//! [`CronScheduler`] runs jobs on tokio-cron-scheduler; [`ManualScheduler`]
//! never fires on its own and is driven explicitly, which keeps tests off the
//! wall clock.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Invoked with the tick time every time a schedule fires.
pub type TickCallback = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

/// When a recurring job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    /// 5-field cron expression evaluated in `timezone` (`UTC` or `+HH:MM`)
    Cron { expression: String, timezone: String },
    /// Fixed period, first tick one period after arming
    Interval(Duration),
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Cron {
                expression,
                timezone,
            } => write!(f, "cron '{expression}' ({timezone})"),
            Cadence::Interval(period) => write!(f, "every {:?}", period),
        }
    }
}

/// Opaque handle to an armed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(Uuid);

impl ScheduleHandle {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, cadence: Cadence, callback: TickCallback) -> Result<ScheduleHandle>;

    /// Cancelling an unknown or already cancelled handle is not an error.
    async fn cancel(&self, handle: &ScheduleHandle) -> Result<()>;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Parse `UTC`, `Z`, `+07:00`, `-05:30` or `UTC+07:00` into a fixed offset.
pub fn parse_timezone(timezone: &str) -> Result<FixedOffset> {
    let trimmed = timezone.trim();
    let offset = trimmed
        .strip_prefix("UTC")
        .or_else(|| trimmed.strip_prefix("GMT"))
        .unwrap_or(trimmed);

    if offset.is_empty() || offset == "Z" {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| Error::Configuration("invalid UTC offset".to_string()));
    }

    offset
        .parse::<FixedOffset>()
        .map_err(|e| Error::Configuration(format!("unsupported timezone '{timezone}': {e}")))
}

/// tokio-cron-scheduler wants a leading seconds field.
fn job_expression(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Production scheduler backed by `tokio-cron-scheduler`
pub struct CronScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    jobs: RwLock<HashMap<Uuid, Cadence>>,
}

impl CronScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            jobs: RwLock::new(HashMap::new()),
        })
    }

    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron scheduler");
        let scheduler = self.scheduler.read().await;
        scheduler.start().await?;
        tracing::info!("✅ Cron scheduler started");
        Ok(())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    fn build_job(cadence: &Cadence, callback: TickCallback) -> Result<Job> {
        match cadence {
            Cadence::Cron {
                expression,
                timezone,
            } => {
                let offset = parse_timezone(timezone)?;
                let expr = job_expression(expression);
                Job::new_async_tz(expr.as_str(), offset, move |_uuid, _l| {
                    let callback = Arc::clone(&callback);
                    Box::pin(async move {
                        callback(Utc::now()).await;
                    })
                })
                .map_err(|e| {
                    Error::Configuration(format!("invalid cron expression '{expression}': {e}"))
                })
            }
            Cadence::Interval(period) => {
                if period.is_zero() {
                    return Err(Error::Configuration(
                        "interval must be greater than zero".to_string(),
                    ));
                }
                Ok(Job::new_repeated_async(*period, move |_uuid, _l| {
                    let callback = Arc::clone(&callback);
                    Box::pin(async move {
                        callback(Utc::now()).await;
                    })
                })?)
            }
        }
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn schedule(&self, cadence: Cadence, callback: TickCallback) -> Result<ScheduleHandle> {
        let job = Self::build_job(&cadence, callback)?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };

        tracing::info!("📝 Armed job {} ({})", job_uuid, cadence);
        self.jobs.write().await.insert(job_uuid, cadence);
        Ok(ScheduleHandle(job_uuid))
    }

    async fn cancel(&self, handle: &ScheduleHandle) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&handle.0) {
            tracing::debug!("⏭️ Job {} already cancelled", handle);
            return Ok(());
        }

        // The job stays tracked until the backend has actually dropped it
        let scheduler = self.scheduler.read().await;
        if let Err(e) = scheduler.remove(&handle.0).await {
            tracing::warn!("⚠️ Failed to remove job {} from scheduler: {}", handle, e);
            return Err(e.into());
        }
        jobs.remove(&handle.0);
        tracing::debug!("🛑 Removed job {} from scheduler", handle);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron scheduler");
        self.jobs.write().await.clear();
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        tracing::info!("✅ Cron scheduler stopped");
        Ok(())
    }
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler").finish_non_exhaustive()
    }
}

struct ManualJob {
    cadence: Cadence,
    callback: TickCallback,
}

/// Virtual-clock scheduler. Nothing fires until [`ManualScheduler::fire`] or
/// [`ManualScheduler::fire_all`] is called.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<HashMap<ScheduleHandle, ManualJob>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_count(&self) -> usize {
        self.lock().len()
    }

    pub fn handles(&self) -> Vec<ScheduleHandle> {
        self.lock().keys().copied().collect()
    }

    pub fn cadence_of(&self, handle: &ScheduleHandle) -> Option<Cadence> {
        self.lock().get(handle).map(|job| job.cadence.clone())
    }

    /// Run one tick of `handle` to completion. Returns false when the handle
    /// is not armed.
    pub async fn fire(&self, handle: &ScheduleHandle) -> bool {
        let callback = match self.lock().get(handle) {
            Some(job) => Arc::clone(&job.callback),
            None => return false,
        };
        callback(Utc::now()).await;
        true
    }

    /// Tick every armed job once. Returns how many fired.
    pub async fn fire_all(&self) -> usize {
        let callbacks: Vec<TickCallback> = self
            .lock()
            .values()
            .map(|job| Arc::clone(&job.callback))
            .collect();
        let now = Utc::now();
        for callback in &callbacks {
            callback(now).await;
        }
        callbacks.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ScheduleHandle, ManualJob>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    async fn schedule(&self, cadence: Cadence, callback: TickCallback) -> Result<ScheduleHandle> {
        if let Cadence::Cron { timezone, .. } = &cadence {
            parse_timezone(timezone)?;
        }
        let handle = ScheduleHandle(Uuid::new_v4());
        self.lock().insert(handle, ManualJob { cadence, callback });
        Ok(handle)
    }

    async fn cancel(&self, handle: &ScheduleHandle) -> Result<()> {
        self.lock().remove(handle);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("armed", &self.armed_count())
            .finish()
    }
}
