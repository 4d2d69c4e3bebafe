use serde::{Deserialize, Serialize};

/// Retry policy for one agent step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retry).
    pub max_attempts: u32,
    /// Base backoff between attempts; doubled per retry with jitter.
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Alternate prompt strategies, rotated per retry: attempt 2 gets the
    /// first entry, attempt 3 the second, and so on. Attempt 1 gets none.
    #[serde(default)]
    pub alternate_prompts: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            alternate_prompts: vec![],
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_alternate_prompts(mut self, prompts: Vec<String>) -> Self {
        self.alternate_prompts = prompts;
        self
    }

    /// The prompt hint for a given 1-based attempt, if one is configured.
    pub fn prompt_hint(&self, attempt: u32) -> Option<&str> {
        if attempt < 2 {
            return None;
        }
        self.alternate_prompts
            .get((attempt - 2) as usize)
            .map(|s| s.as_str())
    }
}

/// What happens when a run reaches a human gate in non-interactive mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Approve the gate automatically and record it as auto-approved.
    #[default]
    AutoApprove,
    /// Suspend anyway, exactly as in interactive mode.
    Suspend,
}

/// Engine-wide execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard bound on executed steps per run. The registration-time cycle
    /// check makes runaway loops impossible for valid definitions; this
    /// bound guards the executor against a future definition shape that
    /// slips past validation.
    pub max_steps: u32,
    /// Timeout for a single agent invocation attempt, in seconds.
    /// A timed-out attempt counts against the retry budget.
    pub attempt_timeout_secs: u64,
    /// Non-interactive gate behavior.
    pub gate_policy: GatePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 64,
            attempt_timeout_secs: 120,
            gate_policy: GatePolicy::AutoApprove,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_hint_rotation() {
        let policy = RetryPolicy::attempts(3)
            .with_alternate_prompts(vec!["be terse".into(), "be thorough".into()]);

        assert_eq!(policy.prompt_hint(1), None);
        assert_eq!(policy.prompt_hint(2), Some("be terse"));
        assert_eq!(policy.prompt_hint(3), Some("be thorough"));
        assert_eq!(policy.prompt_hint(4), None);
    }

    #[test]
    fn test_attempts_floor() {
        assert_eq!(RetryPolicy::attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_steps, 64);
        assert_eq!(cfg.gate_policy, GatePolicy::AutoApprove);
    }
}
