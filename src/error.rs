//! Error taxonomy shared by the trigger registry and the execution engine.
//!
//! Construction-time problems surface as `Configuration`, lookups of unknown
//! triggers or webhook paths as `NotFound`, and adapter failures as
//! `StepExecution`. `RecurringTrigger` never reaches a caller: it only exists
//! so the schedule/poll callbacks can log a typed failure before swallowing it.

/// Errors produced by the automation core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid cron expression, timezone, poll interval or workflow shape.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unknown trigger id or unmapped webhook path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Webhook request did not satisfy the trigger's auth descriptor.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An action adapter failed; the run was aborted at this step.
    #[error("step {step_index} ({step_name}) failed: {message}")]
    StepExecution {
        step_index: u32,
        step_name: String,
        message: String,
    },

    /// A schedule or poll callback body failed.
    #[error("recurring trigger {0} failed")]
    RecurringTrigger(String),

    /// The timer backend rejected an operation.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Log store or detector database failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The external workflow compiler failed.
    #[error("workflow compiler error: {0}")]
    Compiler(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for Error {
    fn from(e: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Error::Scheduler(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
