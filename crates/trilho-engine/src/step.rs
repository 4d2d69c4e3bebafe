use serde::{Deserialize, Serialize};

use trilho_core::config::RetryPolicy;
use trilho_core::memory::WorkflowMemory;

use crate::condition::BranchExpr;

/// A step that invokes a registered agent capability.
///
/// The agent receives a snapshot of the declared `reads` keys and its output
/// lands under the single `writes` key, attributed to this step. Failures
/// are retried per the step's retry policy before surfacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    /// Unique step identifier within the workflow.
    pub id: String,
    /// Name of the agent capability to invoke (resolved via the registry).
    pub agent: String,
    /// Memory keys snapshotted as the agent's input.
    #[serde(default)]
    pub reads: Vec<String>,
    /// Memory key the agent's output is written to.
    pub writes: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub description: String,
}

impl AgentStep {
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        writes: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            reads: vec![],
            writes: writes.into(),
            retry: RetryPolicy::default(),
            description: String::new(),
        }
    }

    /// Set the memory keys this step reads.
    pub fn with_reads(mut self, keys: Vec<String>) -> Self {
        self.reads = keys;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A step that evaluates a pure expression over memory and returns a branch
/// label. Writes nothing, consumes no agent calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionStep {
    pub id: String,
    pub expr: BranchExpr,
    #[serde(default)]
    pub description: String,
}

impl ConditionStep {
    pub fn new(id: impl Into<String>, expr: BranchExpr) -> Self {
        Self {
            id: id.into(),
            expr,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A step that pauses the run for external approval.
///
/// In interactive mode the executor suspends the run here and the caller
/// resumes it with an approve/reject decision. In non-interactive mode the
/// gate is resolved by policy (auto-approve by default) and the trace entry
/// carries an explicit auto-approved flag; the gate is never silently
/// skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanGateStep {
    pub id: String,
    /// Prompt template shown to the approver. `{dot.path}` placeholders are
    /// filled from memory at suspension time.
    pub prompt_template: String,
    /// Memory keys an approving decision's edits may touch. Edits outside
    /// this set are rejected.
    #[serde(default)]
    pub edit_keys: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl HumanGateStep {
    pub fn new(id: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt_template: prompt_template.into(),
            edit_keys: vec![],
            description: String::new(),
        }
    }

    /// Set the memory keys resumable edits may write.
    pub fn with_edit_keys(mut self, keys: Vec<String>) -> Self {
        self.edit_keys = keys;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Render the approval prompt by filling `{dot.path}` placeholders from
    /// memory. Unresolvable placeholders render as `?`.
    pub fn render_prompt(&self, memory: &WorkflowMemory) -> String {
        let mut out = String::with_capacity(self.prompt_template.len());
        let mut rest = self.prompt_template.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let path = &after[..end];
                    match memory.get_path(path) {
                        Some(serde_json::Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&other.to_string()),
                        None => out.push('?'),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// The closed set of step kinds the executor knows how to drive.
///
/// Adding a new kind is a deliberate extension of this enum and the
/// executor's dispatch, not open-ended polymorphism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Agent(AgentStep),
    Condition(ConditionStep),
    Gate(HumanGateStep),
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Self::Agent(s) => &s.id,
            Self::Condition(s) => &s.id,
            Self::Gate(s) => &s.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Condition(_) => "condition",
            Self::Gate(_) => "human_gate",
        }
    }
}

impl From<AgentStep> for Step {
    fn from(s: AgentStep) -> Self {
        Self::Agent(s)
    }
}

impl From<ConditionStep> for Step {
    fn from(s: ConditionStep) -> Self {
        Self::Condition(s)
    }
}

impl From<HumanGateStep> for Step {
    fn from(s: HumanGateStep) -> Self {
        Self::Gate(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trilho_core::config::RetryPolicy;

    #[test]
    fn test_agent_step_builder() {
        let step = AgentStep::new("classify", "classifier", "classification")
            .with_reads(vec!["texto".into()])
            .with_retry(RetryPolicy::attempts(2))
            .with_description("Classificar o caso");

        assert_eq!(step.id, "classify");
        assert_eq!(step.agent, "classifier");
        assert_eq!(step.reads, vec!["texto"]);
        assert_eq!(step.writes, "classification");
        assert_eq!(step.retry.max_attempts, 2);
    }

    #[test]
    fn test_step_id_dispatch() {
        let agent: Step = AgentStep::new("a", "x", "out").into();
        let cond: Step = ConditionStep::new("c", crate::condition::BranchExpr::key_value("k")).into();
        let gate: Step = HumanGateStep::new("g", "Approve?").into();

        assert_eq!(agent.id(), "a");
        assert_eq!(cond.id(), "c");
        assert_eq!(gate.id(), "g");
        assert_eq!(agent.kind(), "agent");
        assert_eq!(cond.kind(), "condition");
        assert_eq!(gate.kind(), "human_gate");
    }

    #[test]
    fn test_render_prompt() {
        let mut m = WorkflowMemory::new();
        m.set(
            "classification",
            json!({"area": "trabalhista", "urgencia": "alta"}),
            "classify",
        );
        m.set("analise", json!({"probabilidade_exito": 0.7}), "analyze");

        let gate = HumanGateStep::new(
            "approval",
            "ÁREA: {classification.area}\nURGÊNCIA: {classification.urgencia}\nÊXITO: {analise.probabilidade_exito}\nFALTA: {missing.key}",
        );
        let prompt = gate.render_prompt(&m);
        assert!(prompt.contains("ÁREA: trabalhista"));
        assert!(prompt.contains("URGÊNCIA: alta"));
        assert!(prompt.contains("ÊXITO: 0.7"));
        assert!(prompt.contains("FALTA: ?"));
    }

    #[test]
    fn test_render_prompt_unclosed_brace() {
        let gate = HumanGateStep::new("g", "literal { brace");
        let m = WorkflowMemory::new();
        assert_eq!(gate.render_prompt(&m), "literal { brace");
    }
}
