//! Workflow Management Layer
//!
//! Definitions, the store the engine loads them from, and the compiler
//! collaborator that produces them from free text.

// Core workflow type definitions
pub mod types;

// Workflow store collaborator and in-memory implementation
pub mod store;

// Free text -> definition collaborator
pub mod compiler;

pub use compiler::{JsonWorkflowCompiler, WorkflowCompiler};
pub use store::{InMemoryWorkflowStore, WorkflowStore};
pub use types::{
    DetectorConfig, MailboxSpec, Step, StepRole, StoredWorkflow, TriggerKind, TriggerSpec,
    WebhookAuth, WorkflowDefinition, WorkflowId,
};
