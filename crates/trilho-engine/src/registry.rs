use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use trilho_core::error::{Result, TrilhoError};
use trilho_core::traits::AgentInvoker;

use crate::definition::WorkflowDefinition;

/// Registry of workflow definitions.
///
/// Definitions are registered at startup and looked up by name at run time.
/// Registration validates the definition; a registered workflow is immutable.
/// The registry is an explicit object, not ambient state; several can
/// coexist (e.g., one per tenant).
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition.
    ///
    /// Fails with `DuplicateWorkflow` if the name is taken and with
    /// `MalformedWorkflow` if validation rejects the definition.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<()> {
        if self.workflows.contains_key(&definition.name) {
            return Err(TrilhoError::DuplicateWorkflow(definition.name));
        }
        definition.validate()?;

        info!(
            workflow = %definition.name,
            steps = definition.steps.len(),
            edges = definition.edges.len(),
            "Registered workflow"
        );
        self.workflows
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<WorkflowDefinition>> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| TrilhoError::WorkflowNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(|k| k.as_str()).collect()
    }
}

/// Registry of agent capabilities, keyed by agent name.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentInvoker>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent capability. A later registration under the same
    /// name replaces the earlier one.
    pub fn register(&mut self, agent: Arc<dyn AgentInvoker>) {
        debug!(agent = %agent.name(), "Registered agent capability");
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentInvoker>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| TrilhoError::AgentNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(|k| k.as_str()).collect()
    }
}
