//! Workflow store collaborator
//!
//! The engine only needs `get_workflow_by_id`. Durable persistence lives
//! outside this crate; `InMemoryWorkflowStore` is the in-process
//! implementation used by the server and the tests.

use crate::error::Result;
use crate::workflow::types::{StoredWorkflow, WorkflowId};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

/// Lookup surface the execution engine loads definitions through.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Returns `None` when the workflow does not exist.
    async fn get_workflow_by_id(&self, id: WorkflowId) -> Result<Option<StoredWorkflow>>;
}

/// Lock-free in-memory workflow store
///
/// Uses ArcSwap for the id -> workflow map so a definition can be swapped in
/// or deactivated while runs of the previous version are still in flight.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: ArcSwap<HashMap<WorkflowId, StoredWorkflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Build a store pre-populated with `workflows`.
    pub fn with_workflows(workflows: impl IntoIterator<Item = StoredWorkflow>) -> Self {
        let map = workflows
            .into_iter()
            .map(|wf| (wf.definition.id, wf))
            .collect::<HashMap<_, _>>();
        Self {
            workflows: ArcSwap::new(Arc::new(map)),
        }
    }

    /// Insert or replace a workflow (atomic pointer swap).
    pub fn upsert(&self, workflow: StoredWorkflow) {
        let id = workflow.definition.id;
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(id, workflow.clone());
            next
        });
        tracing::info!("📥 Stored workflow: {}", id);
    }

    /// Flip the active flag. Returns false if the workflow is unknown.
    pub fn set_active(&self, id: WorkflowId, is_active: bool) -> bool {
        let mut found = false;
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            found = match next.get_mut(&id) {
                Some(wf) => {
                    wf.is_active = is_active;
                    true
                }
                None => false,
            };
            next
        });
        if found {
            tracing::info!("🔁 Workflow {} active = {}", id, is_active);
        }
        found
    }

    /// Remove a workflow. Returns false if it was not present.
    pub fn remove(&self, id: WorkflowId) -> bool {
        let mut removed = false;
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(&id).is_some();
            next
        });
        removed
    }

    pub fn list(&self) -> Vec<StoredWorkflow> {
        self.workflows.load().values().cloned().collect()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_workflow_by_id(&self, id: WorkflowId) -> Result<Option<StoredWorkflow>> {
        Ok(self.workflows.load().get(&id).cloned())
    }
}
