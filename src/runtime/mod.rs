//! Runtime Execution Engine
//!
//! Sequential step dispatch, parameter templating, the action adapters steps
//! are dispatched to, and the append-only execution log.

// Sequential workflow runner
pub mod engine;

// `{{dotted.path}}` resolution
pub mod template;

// (integration, action) -> handler
pub mod adapters;

// Audit trail and run analytics
pub mod log;

// SQLite-backed log store
pub mod sqlite_log;

pub use adapters::{ActionAdapter, ActionAdapterRegistry, ActionKey};
pub use engine::{ConcurrencyPolicy, ExecutionEngine, ExecutionResult};
pub use log::{ExecutionLog, InMemoryExecutionLog, LogEntry, RunStatus, StepStatus};
pub use sqlite_log::SqliteExecutionLog;
