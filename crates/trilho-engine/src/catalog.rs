//! Prebuilt legal workflow definitions.
//!
//! Three DAGs of increasing complexity over the same agent capabilities
//! (`classifier`, `researcher`, `analyst`, `drafter`, `reviewer`, `filer`):
//!
//! 1. `triage`: classify, then route on urgency to an immediate or queued
//!    viability analysis. Quick answer before committing to full research.
//! 2. `drafting`: classify, research, analyze, then draft only if the case
//!    is viable. Research failures degrade to an analysis without sources
//!    instead of failing the run. For batch use, no human gate.
//! 3. `petition`: the full chain with review, a human approval gate and a
//!    filing step. For cases that require sign-off by the responsible lawyer.

use serde_json::json;

use trilho_core::config::RetryPolicy;
use trilho_core::error::Result;

use crate::condition::{BranchExpr, BranchRule, RuleOp};
use crate::definition::{Edge, WorkflowDefinition};
use crate::registry::WorkflowRegistry;
use crate::step::{AgentStep, ConditionStep, HumanGateStep};

/// Quick triage: classification plus viability analysis, expedited when the
/// case is urgent.
pub fn triage() -> WorkflowDefinition {
    WorkflowDefinition::new("triage")
        .with_description("Triagem: classificação e análise de viabilidade sem pesquisa")
        .with_entry("classify")
        .with_step(
            AgentStep::new("classify", "classifier", "classification")
                .with_reads(vec!["caso".into()])
                .with_retry(RetryPolicy::attempts(2))
                .with_description("Classificar tipo, urgência e complexidade do caso"),
        )
        .with_step(ConditionStep::new(
            "route_urgency",
            BranchExpr::rules(
                vec![BranchRule::new(
                    "classification.urgencia",
                    RuleOp::Eq,
                    json!("alta"),
                    "expedite",
                )],
                Some("queue".to_string()),
            ),
        ))
        .with_step(
            AgentStep::new("analyze_now", "analyst", "analise")
                .with_reads(vec!["caso".into(), "classification".into()])
                .with_description("Análise imediata de viabilidade (caso urgente)"),
        )
        .with_step(
            AgentStep::new("analyze_queued", "analyst", "analise")
                .with_reads(vec!["caso".into(), "classification".into()])
                .with_description("Análise de viabilidade em fila normal"),
        )
        .with_edge(Edge::next("classify", "route_urgency"))
        .with_edge(Edge::branch("route_urgency", "expedite", "analyze_now"))
        .with_edge(Edge::branch("route_urgency", "queue", "analyze_queued"))
}

/// Drafting without human review, for batch use.
///
/// A research failure follows the `OnFailure` edge into an analysis without
/// sources rather than failing the whole run. Drafting happens only when
/// the analysis finds the case viable; otherwise an opinion is written.
pub fn drafting() -> WorkflowDefinition {
    WorkflowDefinition::new("drafting")
        .with_description("Recurso: classificação, pesquisa, análise e minuta")
        .with_entry("classify")
        .with_step(
            AgentStep::new("classify", "classifier", "classification")
                .with_reads(vec!["caso".into()])
                .with_retry(RetryPolicy::attempts(2))
                .with_description("Classificar o caso"),
        )
        .with_step(
            AgentStep::new("research", "researcher", "pesquisa")
                .with_reads(vec!["caso".into(), "classification".into()])
                .with_retry(RetryPolicy::attempts(2))
                .with_description("Pesquisar legislação e jurisprudência"),
        )
        .with_step(
            AgentStep::new("analyze", "analyst", "analise")
                .with_reads(vec![
                    "caso".into(),
                    "classification".into(),
                    "pesquisa".into(),
                ])
                .with_description("Analisar mérito e estratégia"),
        )
        .with_step(
            AgentStep::new("analyze_unresearched", "analyst", "analise")
                .with_reads(vec!["caso".into(), "classification".into()])
                .with_description("Análise sem fontes, quando a pesquisa falhou"),
        )
        .with_step(ConditionStep::new(
            "check_viability",
            BranchExpr::rules(
                vec![BranchRule::new(
                    "analise.probabilidade_exito",
                    RuleOp::Gte,
                    json!(0.2),
                    "viable",
                )],
                Some("inviable".to_string()),
            ),
        ))
        .with_step(
            AgentStep::new("draft", "drafter", "minuta")
                .with_reads(vec![
                    "classification".into(),
                    "pesquisa".into(),
                    "analise".into(),
                ])
                .with_retry(RetryPolicy::attempts(2).with_alternate_prompts(vec![
                    "Redija de forma mais concisa e objetiva".to_string(),
                ]))
                .with_description("Redigir a minuta do recurso"),
        )
        .with_step(
            AgentStep::new("opine", "analyst", "parecer")
                .with_reads(vec!["classification".into(), "analise".into()])
                .with_description("Parecer de inviabilidade em vez de minuta"),
        )
        .with_edge(Edge::next("classify", "research"))
        .with_edge(Edge::next("research", "analyze"))
        .with_edge(Edge::on_failure("research", "analyze_unresearched"))
        .with_edge(Edge::next("analyze", "check_viability"))
        .with_edge(Edge::next("analyze_unresearched", "check_viability"))
        .with_edge(Edge::branch("check_viability", "viable", "draft"))
        .with_edge(Edge::branch("check_viability", "inviable", "opine"))
}

/// Full initial-petition chain with review, human approval and filing.
pub fn petition() -> WorkflowDefinition {
    WorkflowDefinition::new("petition")
        .with_description(
            "Petição inicial: classificação, pesquisa, análise, minuta, revisão e aprovação",
        )
        .with_entry("classify")
        .with_step(
            AgentStep::new("classify", "classifier", "classification")
                .with_reads(vec!["caso".into()])
                .with_retry(RetryPolicy::attempts(2))
                .with_description("Classificar o caso jurídico"),
        )
        .with_step(
            AgentStep::new("research", "researcher", "pesquisa")
                .with_reads(vec!["caso".into(), "classification".into()])
                .with_retry(RetryPolicy::attempts(2))
                .with_description("Pesquisar fundamentos jurídicos"),
        )
        .with_step(
            AgentStep::new("analyze", "analyst", "analise")
                .with_reads(vec![
                    "caso".into(),
                    "classification".into(),
                    "pesquisa".into(),
                ])
                .with_description("Analisar mérito e definir estratégia"),
        )
        .with_step(ConditionStep::new(
            "check_viability",
            BranchExpr::rules(
                vec![BranchRule::new(
                    "analise.probabilidade_exito",
                    RuleOp::Gte,
                    json!(0.2),
                    "viable",
                )],
                Some("inviable".to_string()),
            ),
        ))
        .with_step(
            AgentStep::new("draft", "drafter", "minuta")
                .with_reads(vec![
                    "classification".into(),
                    "pesquisa".into(),
                    "analise".into(),
                ])
                .with_retry(RetryPolicy::attempts(2).with_alternate_prompts(vec![
                    "Redija de forma mais concisa e objetiva".to_string(),
                ]))
                .with_description("Redigir a petição inicial"),
        )
        .with_step(
            AgentStep::new("review", "reviewer", "revisao")
                .with_reads(vec!["minuta".into(), "analise".into()])
                .with_description("Revisar a minuta produzida"),
        )
        .with_step(
            HumanGateStep::new(
                "approval",
                "ÁREA: {classification.area}\n\
                 URGÊNCIA: {classification.urgencia}\n\
                 PROBABILIDADE DE ÊXITO: {analise.probabilidade_exito}\n\
                 REVISÃO: {revisao.recomendacao}\n\
                 PEÇA: {minuta.tipo_peca}",
            )
            .with_edit_keys(vec!["minuta".into()])
            .with_description("Revisão e aprovação pelo advogado responsável"),
        )
        .with_step(
            AgentStep::new("file", "filer", "protocolo")
                .with_reads(vec!["classification".into(), "minuta".into()])
                .with_description("Protocolar a petição aprovada"),
        )
        .with_step(
            AgentStep::new("opine", "analyst", "parecer")
                .with_reads(vec!["classification".into(), "analise".into()])
                .with_description("Parecer de inviabilidade em vez de petição"),
        )
        .with_edge(Edge::next("classify", "research"))
        .with_edge(Edge::next("research", "analyze"))
        .with_edge(Edge::next("analyze", "check_viability"))
        .with_edge(Edge::branch("check_viability", "viable", "draft"))
        .with_edge(Edge::branch("check_viability", "inviable", "opine"))
        .with_edge(Edge::next("draft", "review"))
        // A failed review is not fatal: the gate still sees the draft
        .with_edge(Edge::on_failure("review", "approval"))
        .with_edge(Edge::next("review", "approval"))
        .with_edge(Edge::next("approval", "file"))
}

/// Register all prebuilt workflows.
pub fn install(registry: &mut WorkflowRegistry) -> Result<()> {
    registry.register(triage())?;
    registry.register(drafting())?;
    registry.register(petition())?;
    Ok(())
}
