//! Run the prebuilt petition workflow with scripted agents, pause at the
//! human gate and approve it.
//!
//! ```sh
//! cargo run -p trilho-engine --example petition
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use trilho_core::config::EngineConfig;
use trilho_core::error::Result;
use trilho_core::event::EventBus;
use trilho_core::traits::AgentInvoker;
use trilho_core::types::{AgentInput, AgentOutput, GateDecision, InvokeContext};
use trilho_engine::{catalog, AgentRegistry, WorkflowExecutor, WorkflowRegistry};

struct ScriptedAgent {
    name: &'static str,
    output: Value,
}

impl AgentInvoker for ScriptedAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn invoke(&self, _input: AgentInput, ctx: InvokeContext) -> BoxFuture<'_, Result<AgentOutput>> {
        let output = self.output.clone();
        Box::pin(async move {
            tracing::debug!(step = %ctx.step_id, attempt = ctx.attempt, "scripted agent invoked");
            Ok(AgentOutput::new(output)
                .with_confidence(0.88)
                .with_usage(1, 420))
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut workflows = WorkflowRegistry::new();
    catalog::install(&mut workflows)?;

    let mut agents = AgentRegistry::new();
    for agent in [
        ScriptedAgent {
            name: "classifier",
            output: json!({"area": "trabalhista", "urgencia": "alta", "confidence": 0.9}),
        },
        ScriptedAgent {
            name: "researcher",
            output: json!({"fontes": ["CLT art. 477", "Súmula 443 TST"]}),
        },
        ScriptedAgent {
            name: "analyst",
            output: json!({"probabilidade_exito": 0.72, "estrategia": "acordo"}),
        },
        ScriptedAgent {
            name: "drafter",
            output: json!({"tipo_peca": "peticao_inicial", "texto": "Excelentíssimo Senhor Doutor Juiz..."}),
        },
        ScriptedAgent {
            name: "reviewer",
            output: json!({"recomendacao": "aprovar", "score_qualidade": 0.93}),
        },
        ScriptedAgent {
            name: "filer",
            output: json!({"numero": "0001234-56.2026.5.02.0001"}),
        },
    ] {
        agents.register(Arc::new(agent));
    }

    let executor = WorkflowExecutor::new(
        Arc::new(workflows),
        Arc::new(agents),
        EngineConfig::default(),
        Arc::new(EventBus::default()),
    );

    let mut input = HashMap::new();
    input.insert(
        "caso".to_string(),
        json!("Dispensa sem justa causa, verbas rescisórias em aberto há 60 dias"),
    );

    let suspended = executor.run("petition", input, true).await?;
    let gate = suspended.pending_gate.as_ref().expect("run should suspend");
    println!("--- aguardando aprovação ---");
    println!("{}\n", gate.prompt);

    let run = executor
        .resume(&suspended.run_id, GateDecision::approve())
        .await?;

    println!("status: {}", run.status);
    println!(
        "{}",
        serde_json::to_string_pretty(&run.trace.to_structured_record())?
    );
    Ok(())
}
