use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use trilho_core::error::{Result, TrilhoError};

use crate::step::Step;

/// Label on a transition between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeLabel {
    /// The single unconditional successor of an agent or gate step.
    Next,
    /// Taken when a condition step returns this branch label.
    Branch(String),
    /// Taken when no branch edge matches the returned label.
    Default,
    /// Taken when an agent step exhausts its retry budget. Turns the
    /// failure into a normal transition instead of failing the run.
    OnFailure,
}

/// A directed, labeled transition in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub label: EdgeLabel,
    pub to: String,
}

impl Edge {
    pub fn next(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            label: EdgeLabel::Next,
            to: to.into(),
        }
    }

    pub fn branch(
        from: impl Into<String>,
        label: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            label: EdgeLabel::Branch(label.into()),
            to: to.into(),
        }
    }

    pub fn default_branch(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            label: EdgeLabel::Default,
            to: to.into(),
        }
    }

    pub fn on_failure(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            label: EdgeLabel::OnFailure,
            to: to.into(),
        }
    }
}

/// An immutable, named DAG of steps.
///
/// Built once, validated at registration, never mutated afterwards. The
/// executor walks it from `entry`, resolving the next step through the
/// labeled edges. A step with no outgoing edges is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub entry: String,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: default_version(),
            entry: String::new(),
            steps: vec![],
            edges: vec![],
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Find a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    /// All outgoing edges of a step.
    pub fn outgoing(&self, from: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == from).collect()
    }

    /// The `Next` successor of an agent or gate step, if any.
    pub fn next_of(&self, from: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.label == EdgeLabel::Next)
            .map(|e| e.to.as_str())
    }

    /// Resolve a branch label from a condition step: exact branch match
    /// first, then the default edge.
    pub fn branch_target(&self, from: &str, label: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.label == EdgeLabel::Branch(label.to_string()))
            .map(|e| e.to.as_str())
            .or_else(|| self.default_target(from))
    }

    /// The default-edge successor of a condition step, if declared.
    pub fn default_target(&self, from: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.label == EdgeLabel::Default)
            .map(|e| e.to.as_str())
    }

    /// The failure-handling successor of an agent step, if declared.
    pub fn failure_target(&self, from: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.label == EdgeLabel::OnFailure)
            .map(|e| e.to.as_str())
    }

    fn malformed(&self, reason: impl Into<String>) -> TrilhoError {
        TrilhoError::MalformedWorkflow {
            workflow: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Validate the definition. Called by the registry at registration;
    /// a definition that fails here is never runnable.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(self.malformed("workflow has no steps"));
        }

        // Unique step ids
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id()) {
                return Err(self.malformed(format!("duplicate step id '{}'", step.id())));
            }
        }

        // Entry must be a declared step
        if self.entry.is_empty() {
            return Err(self.malformed("no entry step declared"));
        }
        if !ids.contains(self.entry.as_str()) {
            return Err(self.malformed(format!("entry step '{}' not declared", self.entry)));
        }

        // Every edge endpoint must be a declared step
        for edge in &self.edges {
            for id in [&edge.from, &edge.to] {
                if !ids.contains(id.as_str()) {
                    return Err(
                        self.malformed(format!("edge references undeclared step '{}'", id))
                    );
                }
            }
        }

        // Per-step edge shape
        for step in &self.steps {
            let outgoing = self.outgoing(step.id());
            match step {
                Step::Agent(_) => {
                    let next = outgoing
                        .iter()
                        .filter(|e| e.label == EdgeLabel::Next)
                        .count();
                    if next > 1 {
                        return Err(self.malformed(format!(
                            "agent step '{}' has {} Next edges, at most one allowed",
                            step.id(),
                            next
                        )));
                    }
                    if outgoing.iter().any(|e| {
                        matches!(e.label, EdgeLabel::Branch(_) | EdgeLabel::Default)
                    }) {
                        return Err(self.malformed(format!(
                            "agent step '{}' has branch edges; only conditions branch",
                            step.id()
                        )));
                    }
                }
                Step::Gate(_) => {
                    let next = outgoing
                        .iter()
                        .filter(|e| e.label == EdgeLabel::Next)
                        .count();
                    if next > 1 || outgoing.len() != next {
                        return Err(self.malformed(format!(
                            "gate step '{}' must have at most one Next edge and nothing else",
                            step.id()
                        )));
                    }
                }
                Step::Condition(cond) => {
                    if outgoing.is_empty() {
                        return Err(self.malformed(format!(
                            "condition step '{}' has no outgoing edges (dead end)",
                            step.id()
                        )));
                    }
                    if outgoing.iter().any(|e| {
                        matches!(e.label, EdgeLabel::Next | EdgeLabel::OnFailure)
                    }) {
                        return Err(self.malformed(format!(
                            "condition step '{}' may only have branch and default edges",
                            step.id()
                        )));
                    }
                    let has_default =
                        outgoing.iter().any(|e| e.label == EdgeLabel::Default);
                    if cond.expr.is_open_ended() && !has_default {
                        return Err(self.malformed(format!(
                            "condition step '{}' is open-ended but declares no default edge",
                            step.id()
                        )));
                    }
                    if !has_default {
                        // Closed label set: every producible label must route
                        for label in cond.expr.labels() {
                            let routed = outgoing.iter().any(|e| {
                                e.label == EdgeLabel::Branch(label.to_string())
                            });
                            if !routed {
                                return Err(self.malformed(format!(
                                    "condition step '{}' can return label '{}' but no edge routes it",
                                    step.id(),
                                    label
                                )));
                            }
                        }
                    }
                }
            }
        }

        // At least one terminal step
        let has_terminal = self.steps.iter().any(|s| self.outgoing(s.id()).is_empty());
        if !has_terminal {
            return Err(self.malformed("workflow has no terminal step"));
        }

        self.check_acyclic()
    }

    /// Iterative three-color DFS over all edges. Cycles are rejected at
    /// registration, never executed.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let adjacency: HashMap<&str, Vec<&str>> = {
            let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
            for edge in &self.edges {
                map.entry(edge.from.as_str())
                    .or_default()
                    .push(edge.to.as_str());
            }
            map
        };

        let mut color: HashMap<&str, Color> = self
            .steps
            .iter()
            .map(|s| (s.id(), Color::White))
            .collect();

        for start in self.steps.iter().map(|s| s.id()) {
            if color[start] != Color::White {
                continue;
            }
            // (node, next child index)
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            color.insert(start, Color::Gray);

            while let Some((node, child_idx)) = stack.pop() {
                let children = adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]);
                if child_idx < children.len() {
                    stack.push((node, child_idx + 1));
                    let child = children[child_idx];
                    match color[child] {
                        Color::Gray => {
                            return Err(self.malformed(format!(
                                "cycle detected through step '{}'",
                                child
                            )));
                        }
                        Color::White => {
                            color.insert(child, Color::Gray);
                            stack.push((child, 0));
                        }
                        Color::Black => {}
                    }
                } else {
                    color.insert(node, Color::Black);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{BranchExpr, BranchRule, RuleOp};
    use crate::step::{AgentStep, ConditionStep, HumanGateStep};
    use serde_json::json;

    fn linear() -> WorkflowDefinition {
        WorkflowDefinition::new("linear")
            .with_entry("classify")
            .with_step(AgentStep::new("classify", "classifier", "classification"))
            .with_step(AgentStep::new("respond", "responder", "resposta"))
            .with_edge(Edge::next("classify", "respond"))
    }

    #[test]
    fn test_valid_linear() {
        assert!(linear().validate().is_ok());
    }

    #[test]
    fn test_duplicate_step_id() {
        let def = linear().with_step(AgentStep::new("classify", "other", "x"));
        assert!(matches!(
            def.validate(),
            Err(TrilhoError::MalformedWorkflow { .. })
        ));
    }

    #[test]
    fn test_missing_entry() {
        let def = WorkflowDefinition::new("w")
            .with_step(AgentStep::new("a", "x", "out"));
        assert!(def.validate().is_err());

        let def = linear().with_entry("nonexistent");
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_edge_to_undeclared_step() {
        let def = linear().with_edge(Edge::next("respond", "ghost"));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let def = linear().with_edge(Edge::next("respond", "classify"));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_loop_rejected() {
        let def = WorkflowDefinition::new("w")
            .with_entry("a")
            .with_step(AgentStep::new("a", "x", "out"))
            .with_edge(Edge::on_failure("a", "a"));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_condition_without_edges_is_dead_end() {
        let def = WorkflowDefinition::new("w")
            .with_entry("route")
            .with_step(ConditionStep::new("route", BranchExpr::key_value("k")));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_open_ended_condition_requires_default() {
        let base = WorkflowDefinition::new("w")
            .with_entry("classify")
            .with_step(AgentStep::new("classify", "classifier", "classification"))
            .with_step(ConditionStep::new(
                "route",
                BranchExpr::key_value("classification.urgencia"),
            ))
            .with_step(AgentStep::new("expedite", "analyst", "analise"))
            .with_step(AgentStep::new("queue", "analyst", "analise"))
            .with_edge(Edge::next("classify", "route"))
            .with_edge(Edge::branch("route", "alta", "expedite"));

        // No default edge: rejected
        assert!(base.clone().validate().is_err());

        // With a default edge: accepted
        let ok = base.with_edge(Edge::default_branch("route", "queue"));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_closed_rules_do_not_require_default() {
        let expr = BranchExpr::rules(
            vec![BranchRule::new("analise.viavel", RuleOp::Eq, json!(true), "draft")],
            Some("archive".to_string()),
        );
        let def = WorkflowDefinition::new("w")
            .with_entry("analyze")
            .with_step(AgentStep::new("analyze", "analyst", "analise"))
            .with_step(ConditionStep::new("viability", expr))
            .with_step(AgentStep::new("draft", "drafter", "minuta"))
            .with_step(AgentStep::new("archive", "archivist", "arquivo"))
            .with_edge(Edge::next("analyze", "viability"))
            .with_edge(Edge::branch("viability", "draft", "draft"))
            .with_edge(Edge::branch("viability", "archive", "archive"));
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_closed_rules_with_unrouted_label_rejected() {
        let expr = BranchExpr::rules(
            vec![BranchRule::new("analise.viavel", RuleOp::Eq, json!(true), "draft")],
            Some("archive".to_string()),
        );
        let def = WorkflowDefinition::new("w")
            .with_entry("analyze")
            .with_step(AgentStep::new("analyze", "analyst", "analise"))
            .with_step(ConditionStep::new("viability", expr))
            .with_step(AgentStep::new("draft", "drafter", "minuta"))
            .with_edge(Edge::next("analyze", "viability"))
            .with_edge(Edge::branch("viability", "draft", "draft"));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("archive"));
    }

    #[test]
    fn test_agent_step_with_two_next_edges_rejected() {
        let def = linear()
            .with_step(AgentStep::new("extra", "x", "out"))
            .with_edge(Edge::next("classify", "extra"));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_gate_with_branch_edge_rejected() {
        let def = WorkflowDefinition::new("w")
            .with_entry("gate")
            .with_step(HumanGateStep::new("gate", "Approve?"))
            .with_step(AgentStep::new("a", "x", "out"))
            .with_step(AgentStep::new("b", "x", "out"))
            .with_edge(Edge::branch("gate", "yes", "a"))
            .with_edge(Edge::branch("gate", "no", "b"));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_branch_target_prefers_exact_match() {
        let def = WorkflowDefinition::new("w")
            .with_entry("classify")
            .with_step(AgentStep::new("classify", "classifier", "classification"))
            .with_step(ConditionStep::new(
                "route",
                BranchExpr::key_value("classification.urgencia"),
            ))
            .with_step(AgentStep::new("expedite", "analyst", "analise"))
            .with_step(AgentStep::new("queue", "analyst", "analise"))
            .with_edge(Edge::next("classify", "route"))
            .with_edge(Edge::branch("route", "alta", "expedite"))
            .with_edge(Edge::default_branch("route", "queue"));

        assert_eq!(def.branch_target("route", "alta"), Some("expedite"));
        assert_eq!(def.branch_target("route", "baixa"), Some("queue"));
        assert_eq!(def.next_of("classify"), Some("route"));
        assert_eq!(def.next_of("queue"), None);
    }

    #[test]
    fn test_serde_roundtrip() {
        let def = linear();
        let json = serde_json::to_string(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "linear");
        assert_eq!(parsed.steps.len(), 2);
        assert!(parsed.validate().is_ok());
    }
}
