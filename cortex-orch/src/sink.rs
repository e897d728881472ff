//! Append-only workflow result log.
//!
//! Workflow state is discarded on completion unless the caller supplies a
//! sink. The in-memory sink ships for tests and single-process use;
//! durable backends implement the same trait.

use crate::runner::{StepStatus, WorkflowStatus};
use async_trait::async_trait;
use cortex_types::{Error, StepId, TenantId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One completed workflow execution, as appended to a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// The workflow that ran.
    pub workflow_id: WorkflowId,
    /// Its tenant.
    pub tenant: TenantId,
    /// Terminal status.
    pub status: WorkflowStatus,
    /// Every step's terminal status and attempt count.
    pub steps: Vec<(StepId, StepStatus, u32)>,
}

/// Receives workflow records after each execution. Append-only by
/// contract: implementations never mutate or reorder past records.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Append one record.
    async fn append(&self, record: WorkflowRecord) -> Result<(), Error>;
}

/// In-memory append-only sink.
pub struct MemorySink {
    records: Mutex<Vec<WorkflowRecord>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of all appended records, in append order.
    pub fn records(&self) -> Vec<WorkflowRecord> {
        self.records.lock().expect("sink lock").clone()
    }

    /// Number of appended records.
    pub fn len(&self) -> usize {
        self.records.lock().expect("sink lock").len()
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn append(&self, record: WorkflowRecord) -> Result<(), Error> {
        self.records.lock().expect("sink lock").push(record);
        Ok(())
    }
}
