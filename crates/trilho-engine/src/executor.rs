use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use trilho_core::config::{EngineConfig, GatePolicy, RetryPolicy};
use trilho_core::error::{Result, TrilhoError};
use trilho_core::event::EventBus;
use trilho_core::trace::TraceEntry;
use trilho_core::types::{
    AgentInput, GateDecision, InvokeContext, RunId, RunStatus, StepOutcome, WorkflowEvent,
};

use crate::definition::WorkflowDefinition;
use crate::registry::{AgentRegistry, WorkflowRegistry};
use crate::run::{PendingGate, WorkflowRun};
use crate::step::{AgentStep, ConditionStep, HumanGateStep, Step};

/// A run parked at a human gate, waiting for a resume call.
struct SuspendedRun {
    run: WorkflowRun,
    definition: Arc<WorkflowDefinition>,
    gate_step: String,
    interactive: bool,
    executed: u32,
}

/// The last applied resume decision and the run state it produced.
/// Duplicate resume calls with the identical decision replay this
/// snapshot instead of advancing the run again.
struct ResumeRecord {
    decision: GateDecision,
    result: WorkflowRun,
}

/// How many resumed runs keep a replay snapshot. Oldest entries are
/// evicted first, after which a duplicate resume reports `RunNotFound`.
const RESUME_REPLAY_CAP: usize = 256;

/// Replay snapshots of resumed runs, bounded so the table cannot grow
/// with the lifetime of the executor.
#[derive(Default)]
struct ReplayTable {
    records: HashMap<RunId, ResumeRecord>,
    order: VecDeque<RunId>,
}

impl ReplayTable {
    fn get(&self, run_id: &RunId) -> Option<&ResumeRecord> {
        self.records.get(run_id)
    }

    /// Insert or overwrite a record. A run resumed several times (one
    /// gate after another) keeps a single slot.
    fn insert(&mut self, run_id: RunId, record: ResumeRecord) {
        if self.records.insert(run_id.clone(), record).is_none() {
            self.order.push_back(run_id);
            while self.order.len() > RESUME_REPLAY_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.records.remove(&evicted);
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Outcome of driving one agent step through its retry budget.
enum AgentFlow {
    Success,
    /// Retry budget exhausted; may still route through an OnFailure edge.
    Exhausted(TrilhoError),
    /// Not subject to retry or failure edges: fails the run directly.
    Fatal(TrilhoError),
}

/// Drives workflow runs from entry to a terminal step.
///
/// One executor serves many concurrent runs: all per-run state (memory,
/// trace, current step) lives in the `WorkflowRun`, so runs never contend
/// except on the small suspended/cancellation tables. Steps within one run
/// execute strictly sequentially.
pub struct WorkflowExecutor {
    workflows: Arc<WorkflowRegistry>,
    agents: Arc<AgentRegistry>,
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    suspended: Mutex<HashMap<RunId, SuspendedRun>>,
    resumed: Mutex<ReplayTable>,
    cancellations: Mutex<HashMap<RunId, CancellationToken>>,
}

impl WorkflowExecutor {
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        agents: Arc<AgentRegistry>,
        config: EngineConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            workflows,
            agents,
            config,
            event_bus,
            suspended: Mutex::new(HashMap::new()),
            resumed: Mutex::new(ReplayTable::default()),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a registered workflow from an initial input.
    ///
    /// Returns the run in whatever state it reached: `Completed`, `Failed`
    /// (with the terminal error recorded), or `Suspended` at a human gate.
    /// Runtime failures do not surface as `Err`: the trace up to the
    /// failing step is part of the returned run. Only a lookup failure
    /// (unknown workflow) is an `Err`.
    pub async fn run(
        &self,
        workflow_name: &str,
        initial_input: HashMap<String, serde_json::Value>,
        interactive: bool,
    ) -> Result<WorkflowRun> {
        let definition = self.workflows.get(workflow_name)?;

        let mut run = WorkflowRun::new(workflow_name);
        run.memory.update(initial_input, "__input__");
        run.transition(RunStatus::Running);

        let cancel = CancellationToken::new();
        self.cancellations
            .lock()
            .await
            .insert(run.run_id.clone(), cancel.clone());

        info!(
            run_id = %run.run_id,
            workflow = %workflow_name,
            interactive,
            "Starting workflow run"
        );
        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id: run.run_id.clone(),
            workflow: workflow_name.to_string(),
        });

        let entry = definition.entry.clone();
        Ok(self
            .drive(definition, run, Some(entry), interactive, 0, cancel)
            .await)
    }

    /// Resume a suspended run with an approve/reject decision.
    ///
    /// Idempotent under duplicates: a second call with the identical
    /// decision returns the same resulting run without advancing anything
    /// or appending trace entries.
    pub async fn resume(&self, run_id: &RunId, decision: GateDecision) -> Result<WorkflowRun> {
        let suspended = {
            let mut table = self.suspended.lock().await;
            match table.remove(run_id) {
                Some(s) => s,
                None => {
                    drop(table);
                    // Not suspended: replay an identical prior decision,
                    // otherwise reject the call.
                    let resumed = self.resumed.lock().await;
                    return match resumed.get(run_id) {
                        Some(record) if record.decision == decision => {
                            debug!(run_id = %run_id, "Duplicate resume, replaying result");
                            Ok(record.result.clone())
                        }
                        Some(_) => Err(TrilhoError::ResumeConflict {
                            run: run_id.to_string(),
                        }),
                        None => Err(TrilhoError::RunNotFound(run_id.to_string())),
                    };
                }
            }
        };

        let SuspendedRun {
            mut run,
            definition,
            gate_step,
            interactive,
            executed,
        } = suspended;

        let gate = match definition.step(&gate_step) {
            Some(Step::Gate(g)) => g.clone(),
            _ => {
                return Err(TrilhoError::MalformedWorkflow {
                    workflow: definition.name.clone(),
                    reason: format!("suspended at '{}' which is not a gate", gate_step),
                });
            }
        };

        // Validate edits before consuming the suspension.
        if let GateDecision::Approve { edits: Some(ref edits) } = decision {
            for key in edits.keys() {
                if !gate.edit_keys.contains(key) {
                    let err = TrilhoError::GateEditNotAllowed {
                        step: gate_step.clone(),
                        key: key.clone(),
                    };
                    self.suspended.lock().await.insert(
                        run.run_id.clone(),
                        SuspendedRun {
                            run,
                            definition,
                            gate_step,
                            interactive,
                            executed,
                        },
                    );
                    return Err(err);
                }
            }
        }

        run.transition(RunStatus::Running);
        run.pending_gate = None;

        let approved = matches!(decision, GateDecision::Approve { .. });
        info!(
            run_id = %run.run_id,
            gate = %gate_step,
            approved,
            "Resuming suspended run"
        );
        self.event_bus.publish(WorkflowEvent::RunResumed {
            run_id: run.run_id.clone(),
            approved,
        });

        self.record_gate_entry(&mut run, &gate, approved, false);

        let result = if approved {
            run.trace.human_gates_approved += 1;
            if let GateDecision::Approve { edits: Some(ref edits) } = decision {
                for (key, value) in edits {
                    run.memory.set(key.clone(), value.clone(), gate_step.clone());
                }
            }

            // The suspension dropped the run's token; driving needs a
            // fresh one.
            let cancel = CancellationToken::new();
            self.cancellations
                .lock()
                .await
                .insert(run.run_id.clone(), cancel.clone());
            let next = definition.next_of(&gate_step).map(|s| s.to_string());
            self.drive(definition, run, next, interactive, executed, cancel)
                .await
        } else {
            self.finalize_failed(run, TrilhoError::GateRejected { step: gate_step })
                .await
        };

        self.resumed.lock().await.insert(
            result.run_id.clone(),
            ResumeRecord {
                decision,
                result: result.clone(),
            },
        );
        Ok(result)
    }

    /// Cancel a run between step boundaries.
    ///
    /// For an executing run the cancellation is delivered through its
    /// token and the in-flight `run()` call returns the failed run; this
    /// returns `None`. For a suspended run the run is finalized here and
    /// returned. Returns `None` as well when the run id is unknown.
    pub async fn cancel(&self, run_id: &RunId) -> Option<WorkflowRun> {
        if let Some(suspended) = self.suspended.lock().await.remove(run_id) {
            info!(run_id = %run_id, "Cancelling suspended run");
            let mut run = suspended.run;
            run.transition(RunStatus::Running);
            return Some(self.finalize_failed(run, TrilhoError::Cancelled).await);
        }
        if let Some(token) = self.cancellations.lock().await.get(run_id) {
            info!(run_id = %run_id, "Cancellation requested");
            token.cancel();
        }
        None
    }

    /// Pending approval prompts of all currently suspended runs.
    pub async fn pending_gates(&self) -> Vec<(RunId, PendingGate)> {
        self.suspended
            .lock()
            .await
            .values()
            .filter_map(|s| {
                s.run
                    .pending_gate
                    .clone()
                    .map(|g| (s.run.run_id.clone(), g))
            })
            .collect()
    }

    /// Main scheduling loop: execute the current step, append trace
    /// entries, resolve the next step through the labeled edges.
    async fn drive(
        &self,
        definition: Arc<WorkflowDefinition>,
        mut run: WorkflowRun,
        mut current: Option<String>,
        interactive: bool,
        mut executed: u32,
        cancel: CancellationToken,
    ) -> WorkflowRun {
        while let Some(step_id) = current {
            if cancel.is_cancelled() {
                return self.finalize_failed(run, TrilhoError::Cancelled).await;
            }

            executed += 1;
            // The acyclicity check makes runaway loops impossible for
            // validated definitions; this bound is defense in depth.
            if executed > self.config.max_steps {
                let err = TrilhoError::MalformedWorkflow {
                    workflow: definition.name.clone(),
                    reason: format!("step bound of {} exceeded", self.config.max_steps),
                };
                return self.finalize_failed(run, err).await;
            }

            let step = match definition.step(&step_id) {
                Some(s) => s.clone(),
                None => {
                    let err = TrilhoError::MalformedWorkflow {
                        workflow: definition.name.clone(),
                        reason: format!("edge routed to undeclared step '{}'", step_id),
                    };
                    return self.finalize_failed(run, err).await;
                }
            };

            debug!(
                run_id = %run.run_id,
                step_id = %step_id,
                kind = step.kind(),
                "Executing step"
            );

            match step {
                Step::Agent(agent_step) => {
                    match self.execute_agent(&mut run, &agent_step, &cancel).await {
                        AgentFlow::Success => {
                            current = definition.next_of(&step_id).map(|s| s.to_string());
                        }
                        AgentFlow::Exhausted(err) => {
                            if let Some(target) = definition.failure_target(&step_id) {
                                warn!(
                                    run_id = %run.run_id,
                                    step_id = %step_id,
                                    target,
                                    "Step failed, following failure edge"
                                );
                                current = Some(target.to_string());
                            } else {
                                return self.finalize_failed(run, err).await;
                            }
                        }
                        AgentFlow::Fatal(err) => {
                            return self.finalize_failed(run, err).await;
                        }
                    }
                }
                Step::Condition(cond_step) => {
                    match self.execute_condition(&mut run, &cond_step) {
                        Ok(label) => {
                            // No label means no rule matched: only the
                            // default edge can route it.
                            let target = match &label {
                                Some(l) => definition.branch_target(&step_id, l),
                                None => definition.default_target(&step_id),
                            };
                            match target {
                                Some(target) => current = Some(target.to_string()),
                                None => {
                                    let err = TrilhoError::UnroutableCondition {
                                        step: step_id.clone(),
                                        label: label.unwrap_or_else(|| "<no match>".to_string()),
                                    };
                                    return self.finalize_failed(run, err).await;
                                }
                            }
                        }
                        Err(err) => {
                            return self.finalize_failed(run, err).await;
                        }
                    }
                }
                Step::Gate(gate_step) => {
                    run.trace.human_gates_encountered += 1;

                    let must_suspend =
                        interactive || self.config.gate_policy == GatePolicy::Suspend;
                    if must_suspend {
                        let prompt = gate_step.render_prompt(&run.memory);
                        let payload =
                            serde_json::json!(run.memory.snapshot(&gate_step.edit_keys));
                        run.pending_gate = Some(PendingGate {
                            step_id: step_id.clone(),
                            prompt: prompt.clone(),
                            pending_payload: payload.clone(),
                        });
                        run.transition(RunStatus::Suspended);

                        info!(
                            run_id = %run.run_id,
                            gate = %step_id,
                            "Run suspended at human gate"
                        );
                        self.event_bus.publish(WorkflowEvent::RunSuspended {
                            run_id: run.run_id.clone(),
                            step_id: step_id.clone(),
                            prompt,
                            pending_payload: payload,
                        });

                        // A suspended run is not executing: release its
                        // cancellation token. Cancelling while suspended
                        // goes through the suspended table instead.
                        self.cancellations.lock().await.remove(&run.run_id);

                        let snapshot = run.clone();
                        self.suspended.lock().await.insert(
                            run.run_id.clone(),
                            SuspendedRun {
                                run,
                                definition: definition.clone(),
                                gate_step: step_id,
                                interactive,
                                executed,
                            },
                        );
                        return snapshot;
                    }

                    // Non-interactive: resolved by policy and recorded
                    // explicitly, never silently skipped.
                    info!(
                        run_id = %run.run_id,
                        gate = %step_id,
                        "Human gate auto-approved (non-interactive)"
                    );
                    self.record_gate_entry(&mut run, &gate_step, true, true);
                    run.trace.human_gates_approved += 1;
                    current = definition.next_of(&step_id).map(|s| s.to_string());
                }
            }
        }

        self.finalize_completed(&definition, run).await
    }

    /// Execute one agent step through its retry budget, appending a trace
    /// entry per attempt.
    async fn execute_agent(
        &self,
        run: &mut WorkflowRun,
        step: &AgentStep,
        cancel: &CancellationToken,
    ) -> AgentFlow {
        let invoker = match self.agents.get(&step.agent) {
            Ok(a) => a,
            // Unknown agent is a wiring bug, not a retryable failure
            Err(e) => return AgentFlow::Fatal(e),
        };

        let input_snapshot = run.memory.snapshot(&step.reads);
        let timeout = Duration::from_secs(self.config.attempt_timeout_secs);
        let max_attempts = step.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return AgentFlow::Fatal(TrilhoError::Cancelled);
            }

            self.event_bus.publish(WorkflowEvent::StepStarted {
                run_id: run.run_id.clone(),
                step_id: step.id.clone(),
                attempt,
            });

            let ctx = InvokeContext {
                run_id: run.run_id.clone(),
                workflow: run.workflow.clone(),
                step_id: step.id.clone(),
                attempt,
                prompt_hint: step.retry.prompt_hint(attempt).map(String::from),
            };
            let input = AgentInput::new(input_snapshot.clone());
            let started = Instant::now();

            let attempt_result = tokio::select! {
                _ = cancel.cancelled() => {
                    // Cancelled mid-attempt: the entry stays in the trace,
                    // marked incomplete.
                    run.trace.add_entry(TraceEntry {
                        step_id: step.id.clone(),
                        agent: step.agent.clone(),
                        input_snapshot: input_snapshot.clone(),
                        output: serde_json::Value::Null,
                        confidence: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        llm_calls: 0,
                        tokens_used: 0,
                        attempt,
                        outcome: StepOutcome::Incomplete,
                        error: Some("cancelled mid-attempt".to_string()),
                        auto_approved: false,
                        recorded_at: Utc::now(),
                    });
                    self.publish_step_finished(run, &step.id, StepOutcome::Incomplete);
                    return AgentFlow::Fatal(TrilhoError::Cancelled);
                }
                result = tokio::time::timeout(timeout, invoker.invoke(input, ctx)) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(TrilhoError::AgentExecution {
                            step: step.id.clone(),
                            attempts: attempt,
                            message: format!(
                                "attempt timed out after {}s",
                                self.config.attempt_timeout_secs
                            ),
                        }),
                    }
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match attempt_result {
                Ok(output) => {
                    run.trace.add_entry(TraceEntry {
                        step_id: step.id.clone(),
                        agent: step.agent.clone(),
                        input_snapshot: input_snapshot.clone(),
                        output: output.output.clone(),
                        confidence: output.confidence,
                        duration_ms,
                        llm_calls: output.usage.llm_calls,
                        tokens_used: output.usage.tokens_used,
                        attempt,
                        outcome: StepOutcome::Success,
                        error: None,
                        auto_approved: false,
                        recorded_at: Utc::now(),
                    });
                    run.memory
                        .set(step.writes.clone(), output.output, step.id.clone());

                    info!(
                        run_id = %run.run_id,
                        step_id = %step.id,
                        attempt,
                        duration_ms,
                        confidence = output.confidence,
                        "Step completed"
                    );
                    self.publish_step_finished(run, &step.id, StepOutcome::Success);
                    return AgentFlow::Success;
                }
                Err(e) => {
                    last_error = e.to_string();
                    let exhausted = attempt == max_attempts;
                    let outcome = if exhausted {
                        StepOutcome::Failure
                    } else {
                        StepOutcome::Retried
                    };
                    run.trace.add_entry(TraceEntry {
                        step_id: step.id.clone(),
                        agent: step.agent.clone(),
                        input_snapshot: input_snapshot.clone(),
                        output: serde_json::Value::Null,
                        confidence: None,
                        duration_ms,
                        llm_calls: 0,
                        tokens_used: 0,
                        attempt,
                        outcome,
                        error: Some(last_error.clone()),
                        auto_approved: false,
                        recorded_at: Utc::now(),
                    });
                    self.publish_step_finished(run, &step.id, outcome);

                    if exhausted {
                        error!(
                            run_id = %run.run_id,
                            step_id = %step.id,
                            attempts = max_attempts,
                            error = %last_error,
                            "Step failed, retry budget exhausted"
                        );
                    } else {
                        let backoff = calculate_backoff(attempt - 1, &step.retry);
                        warn!(
                            run_id = %run.run_id,
                            step_id = %step.id,
                            attempt,
                            max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %last_error,
                            "Step attempt failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        AgentFlow::Exhausted(TrilhoError::AgentExecution {
            step: step.id.clone(),
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// Evaluate a condition step. Pure over memory: writes nothing,
    /// consumes no agent calls.
    fn execute_condition(
        &self,
        run: &mut WorkflowRun,
        step: &ConditionStep,
    ) -> Result<Option<String>> {
        let started = Instant::now();
        let result = step.expr.evaluate(&step.id, &run.memory);
        let duration_ms = started.elapsed().as_millis() as u64;

        let (output, outcome, error) = match &result {
            Ok(label) => (
                serde_json::json!({ "branch": label }),
                StepOutcome::Success,
                None,
            ),
            Err(e) => (serde_json::Value::Null, StepOutcome::Failure, Some(e.to_string())),
        };
        run.trace.add_entry(TraceEntry {
            step_id: step.id.clone(),
            agent: String::new(),
            input_snapshot: HashMap::new(),
            output,
            confidence: None,
            duration_ms,
            llm_calls: 0,
            tokens_used: 0,
            attempt: 1,
            outcome,
            error,
            auto_approved: false,
            recorded_at: Utc::now(),
        });
        self.publish_step_finished(run, &step.id, outcome);

        if let Ok(ref label) = result {
            debug!(
                run_id = %run.run_id,
                step_id = %step.id,
                branch = label.as_deref().unwrap_or("<no match>"),
                "Condition evaluated"
            );
        }
        result
    }

    /// Append the trace entry for a resolved human gate.
    fn record_gate_entry(
        &self,
        run: &mut WorkflowRun,
        gate: &HumanGateStep,
        approved: bool,
        auto_approved: bool,
    ) {
        let decision = if approved { "approve" } else { "reject" };
        run.trace.add_entry(TraceEntry {
            step_id: gate.id.clone(),
            agent: String::new(),
            input_snapshot: run.memory.snapshot(&gate.edit_keys),
            output: serde_json::json!({ "decision": decision }),
            confidence: None,
            duration_ms: 0,
            llm_calls: 0,
            tokens_used: 0,
            attempt: 1,
            outcome: if approved {
                StepOutcome::Success
            } else {
                StepOutcome::Failure
            },
            error: None,
            auto_approved,
            recorded_at: Utc::now(),
        });
        let outcome = if approved {
            StepOutcome::Success
        } else {
            StepOutcome::Failure
        };
        self.publish_step_finished(run, &gate.id, outcome);
    }

    fn publish_step_finished(&self, run: &WorkflowRun, step_id: &str, outcome: StepOutcome) {
        self.event_bus.publish(WorkflowEvent::StepFinished {
            run_id: run.run_id.clone(),
            step_id: step_id.to_string(),
            outcome,
        });
    }

    async fn finalize_completed(
        &self,
        definition: &WorkflowDefinition,
        mut run: WorkflowRun,
    ) -> WorkflowRun {
        for step in &definition.steps {
            if let Step::Agent(a) = step {
                if let Some(value) = run.memory.try_get(&a.writes) {
                    run.final_output.insert(a.writes.clone(), value.clone());
                }
            }
        }
        run.transition(RunStatus::Completed);
        run.trace.complete(RunStatus::Completed, None);
        self.cancellations.lock().await.remove(&run.run_id);

        info!(
            run_id = %run.run_id,
            workflow = %run.workflow,
            steps = run.trace.steps.len(),
            llm_calls = run.trace.total_llm_calls,
            tokens = run.trace.total_tokens_used,
            "Workflow run completed"
        );
        self.event_bus.publish(WorkflowEvent::RunFinished {
            run_id: run.run_id.clone(),
            status: RunStatus::Completed,
            error: None,
        });
        run
    }

    async fn finalize_failed(&self, mut run: WorkflowRun, err: TrilhoError) -> WorkflowRun {
        let reason = err.to_string();
        run.error = Some(reason.clone());
        run.transition(RunStatus::Failed);
        run.trace.complete(RunStatus::Failed, Some(reason.clone()));
        self.cancellations.lock().await.remove(&run.run_id);

        error!(
            run_id = %run.run_id,
            workflow = %run.workflow,
            error = %reason,
            "Workflow run failed"
        );
        self.event_bus.publish(WorkflowEvent::RunFinished {
            run_id: run.run_id.clone(),
            status: RunStatus::Failed,
            error: Some(reason),
        });
        run
    }
}

/// Exponential backoff with jitter for retry waits.
fn calculate_backoff(retry_index: u32, policy: &RetryPolicy) -> Duration {
    let ms = (policy.initial_backoff_ms * 2u64.pow(retry_index)).min(policy.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
