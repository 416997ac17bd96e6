//! Workflow compiler collaborator
//!
//! Turning free text into a `WorkflowDefinition` is done by an external
//! generative service; the engine talks to it through `WorkflowCompiler`.

use crate::error::{Error, Result};
use crate::workflow::types::WorkflowDefinition;
use async_trait::async_trait;

#[async_trait]
pub trait WorkflowCompiler: Send + Sync {
    async fn compile(&self, free_text: &str) -> Result<WorkflowDefinition>;
}

/// Offline compiler that accepts an already-structured JSON definition.
///
/// Used when no generative backend is configured.
#[derive(Debug, Default, Clone)]
pub struct JsonWorkflowCompiler;

#[async_trait]
impl WorkflowCompiler for JsonWorkflowCompiler {
    async fn compile(&self, free_text: &str) -> Result<WorkflowDefinition> {
        serde_json::from_str(free_text.trim())
            .map_err(|e| Error::Compiler(format!("not a workflow definition: {e}")))
    }
}
