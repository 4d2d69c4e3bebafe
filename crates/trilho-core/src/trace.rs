use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ResourceUsage, RunStatus, StepOutcome};

/// Audit record for a single step execution attempt.
///
/// One entry is appended per attempt, not per step: a step that retried
/// twice before succeeding contributes three entries. Entries are immutable
/// once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step_id: String,
    /// Agent name for agent steps; empty for conditions and gates.
    pub agent: String,
    /// Copy of the memory keys the step declared as reads, captured before
    /// execution. Never a live reference.
    pub input_snapshot: HashMap<String, serde_json::Value>,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub duration_ms: u64,
    pub llm_calls: u64,
    pub tokens_used: u64,
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on human-gate entries that were approved by policy rather than
    /// by an explicit resume call.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_approved: bool,
    pub recorded_at: DateTime<Utc>,
}

impl TraceEntry {
    pub fn succeeded(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// Complete, append-only audit trace for one workflow run.
///
/// The trace is always produced, including for failed runs: a partial
/// trace up to the failing step is a valid output, not an error case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<TraceEntry>,
    pub human_gates_encountered: u32,
    pub human_gates_approved: u32,
    pub total_llm_calls: u64,
    pub total_tokens_used: u64,
    pub total_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunTrace {
    pub fn new(workflow_id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            human_gates_encountered: 0,
            human_gates_approved: 0,
            total_llm_calls: 0,
            total_tokens_used: 0,
            total_duration_ms: 0,
            error: None,
        }
    }

    /// Append an attempt entry and fold its counters into the totals.
    pub fn add_entry(&mut self, entry: TraceEntry) {
        self.total_llm_calls += entry.llm_calls;
        self.total_tokens_used += entry.tokens_used;
        self.total_duration_ms += entry.duration_ms;
        self.steps.push(entry);
    }

    /// Mark the trace finished with a terminal (or suspended) status.
    pub fn complete(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Aggregate resource usage across all entries.
    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            llm_calls: self.total_llm_calls,
            tokens_used: self.total_tokens_used,
        }
    }

    /// Export the trace in the stable structured-record shape.
    ///
    /// The field names and nesting here are the contract external tooling
    /// depends on; fields may be added but never renamed.
    pub fn to_structured_record(&self) -> serde_json::Value {
        serde_json::json!({
            "workflow_id": self.workflow_id,
            "workflow_name": self.workflow_name,
            "started_at": self.started_at.to_rfc3339(),
            "completed_at": self.completed_at.map(|t| t.to_rfc3339()),
            "status": self.status.to_string(),
            "steps": self.steps.iter().map(|s| serde_json::json!({
                "step_id": s.step_id,
                "agent": s.agent,
                "input_snapshot": s.input_snapshot,
                "output": s.output,
                "confidence": s.confidence,
                "duration_ms": s.duration_ms,
                "llm_calls": s.llm_calls,
                "tokens_used": s.tokens_used,
                "attempt": s.attempt,
                "outcome": s.outcome,
                "error": s.error,
                "auto_approved": s.auto_approved,
            })).collect::<Vec<_>>(),
            "human_gates_encountered": self.human_gates_encountered,
            "human_gates_approved": self.human_gates_approved,
            "total_llm_calls": self.total_llm_calls,
            "total_tokens_used": self.total_tokens_used,
            "total_duration_ms": self.total_duration_ms,
            "error": self.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(step_id: &str, llm_calls: u64, tokens: u64) -> TraceEntry {
        TraceEntry {
            step_id: step_id.to_string(),
            agent: "test_agent".to_string(),
            input_snapshot: HashMap::new(),
            output: json!({"result": "ok"}),
            confidence: Some(0.9),
            duration_ms: 500,
            llm_calls,
            tokens_used: tokens,
            attempt: 1,
            outcome: StepOutcome::Success,
            error: None,
            auto_approved: false,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_entry_accumulates_totals() {
        let mut trace = RunTrace::new("run-1", "test");
        trace.add_entry(entry("step1", 1, 100));
        trace.add_entry(entry("step2", 2, 200));

        assert_eq!(trace.total_llm_calls, 3);
        assert_eq!(trace.total_tokens_used, 300);
        assert_eq!(trace.total_duration_ms, 1000);
        assert_eq!(trace.steps.len(), 2);
    }

    #[test]
    fn test_complete_sets_status() {
        let mut trace = RunTrace::new("run-1", "test");
        trace.complete(RunStatus::Completed, None);
        assert_eq!(trace.status, RunStatus::Completed);
        assert!(trace.completed_at.is_some());
    }

    #[test]
    fn test_suspended_has_no_completed_at() {
        let mut trace = RunTrace::new("run-1", "test");
        trace.complete(RunStatus::Suspended, None);
        assert!(trace.completed_at.is_none());
    }

    #[test]
    fn test_structured_record_contract_fields() {
        let mut trace = RunTrace::new("run-1", "triage");
        trace.add_entry(entry("classify", 1, 120));
        trace.complete(RunStatus::Completed, None);

        let record = trace.to_structured_record();
        // Top-level contract
        for field in [
            "workflow_id",
            "workflow_name",
            "started_at",
            "completed_at",
            "status",
            "steps",
            "human_gates_encountered",
            "human_gates_approved",
        ] {
            assert!(record.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(record["status"], "completed");

        // Per-step contract
        let step = &record["steps"][0];
        for field in [
            "step_id",
            "agent",
            "input_snapshot",
            "output",
            "confidence",
            "duration_ms",
            "llm_calls",
            "tokens_used",
            "attempt",
        ] {
            assert!(step.get(field).is_some(), "missing step field {field}");
        }
        assert_eq!(step["step_id"], "classify");
        assert_eq!(step["attempt"], 1);
    }

    #[test]
    fn test_failed_trace_keeps_entries() {
        let mut trace = RunTrace::new("run-1", "test");
        trace.add_entry(entry("step1", 1, 100));
        trace.complete(RunStatus::Failed, Some("agent exploded".into()));

        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.error.as_deref(), Some("agent exploded"));
        let record = trace.to_structured_record();
        assert_eq!(record["status"], "failed");
        assert_eq!(record["steps"].as_array().unwrap().len(), 1);
    }
}
