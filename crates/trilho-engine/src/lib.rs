//! Workflow execution engine: definitions, registries and the executor.
//!
//! A workflow is an immutable DAG of steps (agent, condition, human gate)
//! connected by labeled edges. The [`WorkflowExecutor`] drives a run from
//! the entry step to a terminal step, snapshotting inputs, retrying failed
//! agent attempts, suspending at human gates and recording one trace entry
//! per attempt.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use trilho_core::config::EngineConfig;
//! use trilho_core::event::EventBus;
//! use trilho_engine::{catalog, AgentRegistry, WorkflowExecutor, WorkflowRegistry};
//!
//! # async fn demo(agents: AgentRegistry) -> trilho_core::error::Result<()> {
//! let mut workflows = WorkflowRegistry::new();
//! catalog::install(&mut workflows)?;
//!
//! let executor = WorkflowExecutor::new(
//!     Arc::new(workflows),
//!     Arc::new(agents),
//!     EngineConfig::default(),
//!     Arc::new(EventBus::default()),
//! );
//!
//! let mut input = HashMap::new();
//! input.insert("caso".to_string(), serde_json::json!("reclamação trabalhista"));
//! let run = executor.run("triage", input, false).await?;
//! println!("{}", run.status);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod condition;
pub mod definition;
pub mod executor;
pub mod registry;
pub mod run;
pub mod step;

pub use condition::{BranchExpr, BranchRule, RuleOp};
pub use definition::{Edge, EdgeLabel, WorkflowDefinition};
pub use executor::WorkflowExecutor;
pub use registry::{AgentRegistry, WorkflowRegistry};
pub use run::{PendingGate, WorkflowRun};
pub use step::{AgentStep, ConditionStep, HumanGateStep, Step};
