use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{AgentInput, AgentOutput, InvokeContext};

/// Agent capability: the unit of work the executor delegates to.
///
/// Implementations wrap whatever actually does the reasoning (an LLM call,
/// a rules engine, a fixture in tests). The executor only sees this
/// contract: a snapshot of declared input keys in, structured output plus
/// confidence and resource counters out. Calls may be long-running and
/// network-bound; the executor bounds each attempt with a timeout and
/// never blocks other runs on one invocation.
pub trait AgentInvoker: Send + Sync + 'static {
    /// Unique agent name, referenced by `AgentStep::agent`.
    fn name(&self) -> &str;

    /// Execute one invocation attempt.
    fn invoke(
        &self,
        input: AgentInput,
        ctx: InvokeContext,
    ) -> BoxFuture<'_, Result<AgentOutput>>;
}
