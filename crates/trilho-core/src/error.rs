use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrilhoError {
    // Definition-time errors
    #[error("Workflow already registered: {0}")]
    DuplicateWorkflow(String),

    #[error("Malformed workflow '{workflow}': {reason}")]
    MalformedWorkflow { workflow: String, reason: String },

    // Lookup errors
    #[error("Workflow not registered: {0}")]
    WorkflowNotFound(String),

    #[error("Agent not registered: {0}")]
    AgentNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    // Runtime errors: workflow-authoring bugs
    #[error("Memory key not found: {0}")]
    MissingKey(String),

    #[error("Condition evaluation failed at step {step}: {message}")]
    ConditionEvaluation { step: String, message: String },

    #[error("No edge matches branch label '{label}' from step {step}")]
    UnroutableCondition { step: String, label: String },

    // Runtime errors at the agent boundary
    #[error("Agent execution failed at step {step} after {attempts} attempt(s): {message}")]
    AgentExecution {
        step: String,
        attempts: u32,
        message: String,
    },

    // Human gate errors
    #[error("Human gate {step} rejected")]
    GateRejected { step: String },

    #[error("Gate edit touches undeclared key '{key}' at step {step}")]
    GateEditNotAllowed { step: String, key: String },

    #[error("Run {run} is not suspended")]
    NotSuspended { run: String },

    #[error("Run {run} already resumed with a different decision")]
    ResumeConflict { run: String },

    // Externally triggered
    #[error("Run cancelled")]
    Cancelled,

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrilhoError>;
