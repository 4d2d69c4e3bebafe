use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one workflow run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow run.
///
/// `Pending → Running → {Completed, Failed, Suspended}`;
/// `Suspended → Running` on resume (repeatable). `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Suspended,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Suspended => "suspended",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single step execution attempt, as recorded in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failure,
    /// Attempt failed but the retry budget was not yet exhausted.
    Retried,
    /// Attempt was in flight when the run was cancelled.
    Incomplete,
}

/// Decision carried by a `resume` call for a suspended human gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum GateDecision {
    Approve {
        /// Optional edits merged into memory, restricted to the gate's
        /// declared edit keys.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edits: Option<HashMap<String, serde_json::Value>>,
    },
    Reject,
}

impl GateDecision {
    pub fn approve() -> Self {
        Self::Approve { edits: None }
    }

    pub fn approve_with(edits: HashMap<String, serde_json::Value>) -> Self {
        Self::Approve { edits: Some(edits) }
    }
}

/// Resource counters reported by one agent invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub llm_calls: u64,
    pub tokens_used: u64,
}

impl ResourceUsage {
    pub fn add(&mut self, other: ResourceUsage) {
        self.llm_calls += other.llm_calls;
        self.tokens_used += other.tokens_used;
    }
}

/// Input handed to an agent invocation: a snapshot of the step's declared
/// read keys. Never a live view of memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInput {
    pub fields: HashMap<String, serde_json::Value>,
}

impl AgentInput {
    pub fn new(fields: HashMap<String, serde_json::Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}

/// Output returned by a successful agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Structured output written to the step's memory key.
    pub output: serde_json::Value,
    /// Self-reported confidence in [0.0, 1.0], if the agent provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Resource counters for this invocation.
    #[serde(default)]
    pub usage: ResourceUsage,
}

impl AgentOutput {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            confidence: None,
            usage: ResourceUsage::default(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_usage(mut self, llm_calls: u64, tokens_used: u64) -> Self {
        self.usage = ResourceUsage {
            llm_calls,
            tokens_used,
        };
        self
    }
}

/// Run-scoped metadata passed to each agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeContext {
    pub run_id: RunId,
    pub workflow: String,
    pub step_id: String,
    /// 1-based attempt number for this step.
    pub attempt: u32,
    /// Alternate prompt strategy selected by the retry policy, if any.
    pub prompt_hint: Option<String>,
}

/// Workflow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A run started executing.
    RunStarted { run_id: RunId, workflow: String },
    /// A step attempt started.
    StepStarted {
        run_id: RunId,
        step_id: String,
        attempt: u32,
    },
    /// A step attempt finished.
    StepFinished {
        run_id: RunId,
        step_id: String,
        outcome: StepOutcome,
    },
    /// A run suspended at a human gate. This is the `onSuspend` notification:
    /// the caller resumes via `WorkflowExecutor::resume`.
    RunSuspended {
        run_id: RunId,
        step_id: String,
        prompt: String,
        pending_payload: serde_json::Value,
    },
    /// A suspended run was resumed.
    RunResumed { run_id: RunId, approved: bool },
    /// A run reached a terminal state.
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        error: Option<String>,
    },
}

/// Wall-clock timestamp helper used across trace records.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
