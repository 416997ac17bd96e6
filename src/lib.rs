//! autoloom: trigger registry and sequential execution engine for
//! natural-language automations.
//!
//! Workflows are armed against event sources (schedules, webhooks, database
//! polling, mailboxes) and run step by step through pluggable action
//! adapters, with every transition written to an append-only execution log.

// Crate-wide error taxonomy
pub mod error;

// Core configuration and setup
pub mod config;

// Workflow definitions and their collaborators (store, compiler)
pub mod workflow;

// Execution engine, adapters and execution log
pub mod runtime;

// Event sources and the registry that owns them
pub mod triggers;

// HTTP boundary for inbound webhooks
pub mod api;

// Server setup and initialization
pub mod server;

pub use error::{Error, Result};
pub use runtime::{ExecutionEngine, ExecutionResult};
pub use server::start_server;
pub use triggers::TriggerRegistry;
pub use workflow::{Step, TriggerSpec, WorkflowDefinition};
