use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use trilho_core::memory::WorkflowMemory;
use trilho_core::trace::RunTrace;
use trilho_core::types::{RunId, RunStatus};

/// Gate bookkeeping carried by a suspended run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingGate {
    pub step_id: String,
    /// Rendered approval prompt.
    pub prompt: String,
    /// Snapshot of the memory keys the gate's edits may touch, handed to
    /// the approver alongside the prompt.
    pub pending_payload: serde_json::Value,
}

/// The aggregate root for one workflow execution.
///
/// Created by `WorkflowExecutor::run`, mutated only by the executor, and
/// frozen once the status is terminal. Memory and trace are owned by the
/// run; nothing is shared across concurrent runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub memory: WorkflowMemory,
    pub trace: RunTrace,
    /// Present while the run is suspended at a human gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_gate: Option<PendingGate>,
    /// Terminal reason when the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Values of the agent-step output keys present in memory at the end
    /// of the run.
    #[serde(default)]
    pub final_output: HashMap<String, serde_json::Value>,
}

impl WorkflowRun {
    pub fn new(workflow: impl Into<String>) -> Self {
        let workflow = workflow.into();
        let run_id = RunId::new();
        Self {
            trace: RunTrace::new(run_id.0.clone(), workflow.clone()),
            run_id,
            workflow,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            memory: WorkflowMemory::new(),
            pending_gate: None,
            error: None,
            final_output: HashMap::new(),
        }
    }

    /// Attempt a state-machine transition. Returns false (and leaves the
    /// status untouched) for an illegal move; terminal states never leave.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        use RunStatus::*;
        let legal = matches!(
            (self.status, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Suspended)
                | (Suspended, Running)
        );
        if legal {
            self.status = next;
            self.trace.status = next;
            if next.is_terminal() {
                self.completed_at = Some(Utc::now());
            }
        }
        legal
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}
