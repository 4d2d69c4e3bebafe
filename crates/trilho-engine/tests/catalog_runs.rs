//! The prebuilt legal workflows executed end to end with canned agents.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use trilho_core::config::EngineConfig;
use trilho_core::error::Result;
use trilho_core::event::EventBus;
use trilho_core::traits::AgentInvoker;
use trilho_core::types::{AgentInput, AgentOutput, GateDecision, InvokeContext, RunStatus};
use trilho_engine::{catalog, AgentRegistry, WorkflowExecutor, WorkflowRegistry};

/// One canned output per agent name.
struct CannedAgent {
    name: &'static str,
    output: Value,
}

impl AgentInvoker for CannedAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn invoke(&self, _input: AgentInput, _ctx: InvokeContext) -> BoxFuture<'_, Result<AgentOutput>> {
        let output = self.output.clone();
        Box::pin(async move {
            Ok(AgentOutput::new(output)
                .with_confidence(0.85)
                .with_usage(1, 350))
        })
    }
}

fn legal_agents(probabilidade_exito: f64, urgencia: &str) -> AgentRegistry {
    let canned: Vec<CannedAgent> = vec![
        CannedAgent {
            name: "classifier",
            output: json!({
                "area": "trabalhista",
                "urgencia": urgencia,
                "confidence": 0.9,
            }),
        },
        CannedAgent {
            name: "researcher",
            output: json!({"fontes": ["CLT art. 477", "Súmula 443 TST"]}),
        },
        CannedAgent {
            name: "analyst",
            output: json!({
                "probabilidade_exito": probabilidade_exito,
                "estrategia": "acordo",
            }),
        },
        CannedAgent {
            name: "drafter",
            output: json!({"tipo_peca": "peticao_inicial", "texto": "Excelentíssimo..."}),
        },
        CannedAgent {
            name: "reviewer",
            output: json!({"recomendacao": "aprovar", "score_qualidade": 0.92}),
        },
        CannedAgent {
            name: "filer",
            output: json!({"numero": "0001234-56.2026.5.02.0001"}),
        },
    ];

    let mut agents = AgentRegistry::new();
    for agent in canned {
        agents.register(Arc::new(agent));
    }
    agents
}

fn executor(agents: AgentRegistry) -> WorkflowExecutor {
    let mut workflows = WorkflowRegistry::new();
    catalog::install(&mut workflows).unwrap();
    WorkflowExecutor::new(
        Arc::new(workflows),
        Arc::new(agents),
        EngineConfig::default(),
        Arc::new(EventBus::default()),
    )
}

fn caso() -> HashMap<String, Value> {
    let mut input = HashMap::new();
    input.insert(
        "caso".to_string(),
        json!("Dispensa sem justa causa, verbas rescisórias em aberto"),
    );
    input
}

#[tokio::test]
async fn triage_expedites_urgent_cases() {
    let executor = executor(legal_agents(0.7, "alta"));
    let run = executor.run("triage", caso(), false).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.trace.steps.iter().any(|e| e.step_id == "analyze_now"));
    assert!(run.memory.contains("analise"));
}

#[tokio::test]
async fn triage_queues_routine_cases() {
    let executor = executor(legal_agents(0.7, "baixa"));
    let run = executor.run("triage", caso(), false).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.trace.steps.iter().any(|e| e.step_id == "analyze_queued"));
}

#[tokio::test]
async fn drafting_produces_a_draft_for_viable_cases() {
    let executor = executor(legal_agents(0.7, "baixa"));
    let run = executor.run("drafting", caso(), false).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        run.memory.get("minuta").unwrap()["tipo_peca"],
        json!("peticao_inicial")
    );
    assert!(run.trace.steps.iter().all(|e| e.step_id != "opine"));
}

#[tokio::test]
async fn drafting_writes_an_opinion_for_inviable_cases() {
    let executor = executor(legal_agents(0.1, "baixa"));
    let run = executor.run("drafting", caso(), false).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.memory.contains("parecer"));
    assert!(!run.memory.contains("minuta"));
}

#[tokio::test]
async fn petition_suspends_at_approval_then_files() {
    let executor = executor(legal_agents(0.7, "alta"));
    let suspended = executor.run("petition", caso(), true).await.unwrap();

    assert_eq!(suspended.status, RunStatus::Suspended);
    let gate = suspended.pending_gate.as_ref().unwrap();
    assert_eq!(gate.step_id, "approval");
    // The prompt was rendered from memory
    assert!(gate.prompt.contains("ÁREA: trabalhista"));
    assert!(gate.prompt.contains("PROBABILIDADE DE ÊXITO: 0.7"));
    assert!(gate.prompt.contains("REVISÃO: aprovar"));

    let run = executor
        .resume(&suspended.run_id, GateDecision::approve())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.trace.human_gates_encountered, 1);
    assert_eq!(run.trace.human_gates_approved, 1);
    assert_eq!(
        run.final_output["protocolo"]["numero"],
        json!("0001234-56.2026.5.02.0001")
    );
}

#[tokio::test]
async fn petition_batch_mode_auto_approves_and_files() {
    let executor = executor(legal_agents(0.7, "alta"));
    let run = executor.run("petition", caso(), false).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.trace.human_gates_approved, 1);
    let gate_entry = run
        .trace
        .steps
        .iter()
        .find(|e| e.step_id == "approval")
        .unwrap();
    assert!(gate_entry.auto_approved);
    assert!(run.memory.contains("protocolo"));
}

#[tokio::test]
async fn petition_inviable_case_skips_drafting_entirely() {
    let executor = executor(legal_agents(0.05, "baixa"));
    let run = executor.run("petition", caso(), true).await.unwrap();

    // No gate on the inviable path, so interactive mode never suspends
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.trace.human_gates_encountered, 0);
    assert!(run.memory.contains("parecer"));
    assert!(!run.memory.contains("minuta"));
}
