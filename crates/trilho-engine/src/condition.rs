use serde::{Deserialize, Serialize};

use trilho_core::error::{Result, TrilhoError};
use trilho_core::memory::WorkflowMemory;

/// Comparison operator for a branch rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    Eq,
    Ne,
    Contains,
    /// Numeric greater-than-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
}

/// One rule in a rule-based branch expression: `path OP value => label`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRule {
    /// Dot path into memory, e.g. `"classification.urgencia"`.
    pub path: String,
    pub op: RuleOp,
    pub value: serde_json::Value,
    /// Branch label produced when this rule matches.
    pub label: String,
}

impl BranchRule {
    pub fn new(
        path: impl Into<String>,
        op: RuleOp,
        value: serde_json::Value,
        label: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            op,
            value,
            label: label.into(),
        }
    }

    fn matches(&self, actual: &serde_json::Value) -> bool {
        match self.op {
            RuleOp::Eq => actual == &self.value,
            RuleOp::Ne => actual != &self.value,
            RuleOp::Contains => match (actual.as_str(), self.value.as_str()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
            RuleOp::Gte => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a >= b,
                _ => false,
            },
            RuleOp::Lt => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

/// Pure expression a condition step evaluates against memory to pick a
/// branch label. Never writes memory, never consumes agent calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchExpr {
    /// The label is the string value at a dot path. Open-ended: the set of
    /// possible labels is whatever the writing step produced, so routing
    /// must declare a default edge.
    KeyValue { path: String },
    /// First matching rule wins. With a fallback label the expression is
    /// closed over `rules' labels + fallback`.
    Rules {
        rules: Vec<BranchRule>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<String>,
    },
}

impl BranchExpr {
    pub fn key_value(path: impl Into<String>) -> Self {
        Self::KeyValue { path: path.into() }
    }

    pub fn rules(rules: Vec<BranchRule>, fallback: Option<String>) -> Self {
        Self::Rules { rules, fallback }
    }

    /// Whether the label set cannot be enumerated statically.
    /// Open-ended expressions require a default edge at validation time.
    pub fn is_open_ended(&self) -> bool {
        match self {
            Self::KeyValue { .. } => true,
            Self::Rules { fallback, .. } => fallback.is_none(),
        }
    }

    /// Labels this expression can produce, when the set is closed.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Self::KeyValue { .. } => vec![],
            Self::Rules { rules, fallback } => {
                let mut labels: Vec<&str> = rules.iter().map(|r| r.label.as_str()).collect();
                if let Some(fb) = fallback {
                    labels.push(fb.as_str());
                }
                labels
            }
        }
    }

    /// Evaluate against memory and return the branch label.
    ///
    /// `Ok(None)` means no rule matched and no fallback label is declared:
    /// routing then falls through to the step's default edge (which
    /// validation requires for this shape). Fails with
    /// `ConditionEvaluation` if a referenced path is missing; that is a
    /// workflow-authoring bug, surfaced as-is.
    pub fn evaluate(&self, step_id: &str, memory: &WorkflowMemory) -> Result<Option<String>> {
        match self {
            Self::KeyValue { path } => {
                let value = memory.get_path(path).ok_or_else(|| {
                    TrilhoError::ConditionEvaluation {
                        step: step_id.to_string(),
                        message: format!("memory path '{}' not found", path),
                    }
                })?;
                match value.as_str() {
                    Some(s) => Ok(Some(s.to_string())),
                    None => Ok(Some(value.to_string())),
                }
            }
            Self::Rules { rules, fallback } => {
                for rule in rules {
                    let actual = memory.get_path(&rule.path).ok_or_else(|| {
                        TrilhoError::ConditionEvaluation {
                            step: step_id.to_string(),
                            message: format!("memory path '{}' not found", rule.path),
                        }
                    })?;
                    if rule.matches(actual) {
                        return Ok(Some(rule.label.clone()));
                    }
                }
                Ok(fallback.clone())
            }
        }
    }
}
