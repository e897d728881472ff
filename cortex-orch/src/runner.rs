//! The DAG workflow runner.

use crate::sink::{ResultSink, WorkflowRecord};
use crate::workflow::{FailurePolicy, StepCondition, Workflow, WorkflowConfig, WorkflowStep};
use cortex_agent::Agent;
use cortex_manager::Manager;
use cortex_types::{
    CallContext, Clock, Component, Error, RetryPolicy, StepId, SystemClock, Task, TenantId,
    WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Terminal state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The agent completed the task.
    Success,
    /// Retries exhausted.
    Failed,
    /// Condition was false, or an upstream failure made the step
    /// unreachable.
    Skipped,
    /// Cancelled while in flight.
    Cancelled,
}

/// Result of one step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Terminal status.
    pub status: StepStatus,
    /// Attempts actually made (0 for steps that never started).
    pub attempts: u32,
    /// On success, the agent's output as `{"text": ...}` — the document
    /// step conditions evaluate against.
    pub output: Option<serde_json::Value>,
    /// On failure or cancellation, the final error.
    pub error: Option<Error>,
}

impl StepResult {
    fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            attempts: 0,
            output: None,
            error: None,
        }
    }
}

/// Terminal state of the whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Every step terminated Success or Skipped.
    Completed,
    /// At least one step failed.
    Failed,
    /// The caller cancelled the run.
    Cancelled,
}

/// Aggregate result of a workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    /// The workflow that ran.
    pub workflow_id: WorkflowId,
    /// Terminal status.
    pub status: WorkflowStatus,
    /// Ids of successful steps, sorted.
    pub completed_steps: Vec<StepId>,
    /// Every step's result (partial results included on failure).
    pub step_results: HashMap<StepId, StepResult>,
    /// The first step that failed, when any did.
    pub failed_step: Option<StepId>,
}

/// Dispatches workflows to agents through the manager.
///
/// The manager stays the sole owner of agents; the orchestrator looks
/// them up by id at dispatch time, so registration changes between runs
/// are picked up naturally.
pub struct Orchestrator {
    manager: Arc<Manager>,
    config: WorkflowConfig,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl Orchestrator {
    /// Create an orchestrator with the default configuration.
    pub fn new(manager: Arc<Manager>) -> Self {
        Self {
            manager,
            config: WorkflowConfig::default(),
            clock: Arc::new(SystemClock::new()),
            sink: None,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a result sink; every execution appends one record.
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The manager agents are resolved through.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub(crate) fn max_parallel(&self) -> usize {
        self.config.max_parallel_steps.max(1)
    }

    pub(crate) fn clock_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Execute a workflow to completion.
    ///
    /// Structural problems (cycles, duplicate or unknown step ids) fail
    /// with `WorkflowInvalid` before anything runs. Execution failures
    /// are reported *inside* the returned [`WorkflowResult`] so partial
    /// results survive.
    pub async fn execute_workflow(
        &self,
        workflow: Workflow,
        ctx: &CallContext,
    ) -> Result<WorkflowResult, Error> {
        workflow.validate()?;

        let workflow_id = workflow.id.clone();
        let tenant = workflow.tenant.clone();
        let wf_ctx = ctx.child();

        let steps: HashMap<StepId, WorkflowStep> = workflow
            .steps
            .into_iter()
            .map(|s| (s.step_id.clone(), s))
            .collect();
        let mut in_degree: HashMap<StepId, usize> = steps
            .iter()
            .map(|(id, s)| (id.clone(), s.depends_on.len()))
            .collect();
        let mut successors: HashMap<StepId, Vec<StepId>> = HashMap::new();
        for (id, step) in &steps {
            for dep in &step.depends_on {
                successors.entry(dep.clone()).or_default().push(id.clone());
            }
        }

        let mut ready: BTreeSet<StepId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut results: HashMap<StepId, StepResult> = HashMap::new();
        let mut running: JoinSet<(StepId, StepResult)> = JoinSet::new();
        let mut failed_step: Option<StepId> = None;
        let mut caller_cancelled = false;

        loop {
            let halted = caller_cancelled
                || (failed_step.is_some() && self.config.failure_policy == FailurePolicy::FailFast);

            // Dispatch ready steps, lexicographically smallest first, up
            // to the parallelism bound.
            while !halted && running.len() < self.config.max_parallel_steps {
                let Some(step_id) = ready.first().cloned() else {
                    break;
                };
                ready.remove(&step_id);
                let step = steps.get(&step_id).expect("known step").clone();

                if let Some(condition) = &step.condition {
                    if !condition_holds(condition, &results) {
                        tracing::debug!(workflow = %workflow_id, step = %step_id, "condition false, skipping");
                        results.insert(step_id.clone(), StepResult::skipped());
                        unlock_successors(&step_id, &successors, &mut in_degree, &mut ready);
                        continue;
                    }
                }

                match self.manager.get(&step.agent_id) {
                    Err(e) => {
                        tracing::warn!(workflow = %workflow_id, step = %step_id, agent = %step.agent_id, "unknown agent");
                        results.insert(
                            step_id.clone(),
                            StepResult {
                                status: StepStatus::Failed,
                                attempts: 0,
                                output: None,
                                error: Some(e),
                            },
                        );
                        failed_step.get_or_insert(step_id.clone());
                        if self.config.failure_policy == FailurePolicy::FailFast {
                            wf_ctx.cancel();
                            break;
                        }
                    }
                    Ok(agent) => {
                        running.spawn(run_step(
                            step,
                            agent,
                            tenant.clone(),
                            workflow_id.clone(),
                            self.step_timeout(&steps[&step_id]),
                            RetryPolicy {
                                max_retries: steps[&step_id].retry_count,
                                ..self.config.backoff.clone()
                            },
                            Arc::clone(&self.clock),
                            wf_ctx.child(),
                        ));
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = ctx.cancelled(), if !caller_cancelled => {
                    caller_cancelled = true;
                    wf_ctx.cancel();
                }
                joined = running.join_next() => {
                    let (step_id, result) = match joined {
                        Some(Ok(pair)) => pair,
                        Some(Err(join_error)) => {
                            return Err(Error::invariant(
                                Component::Orchestrator,
                                format!("step task panicked: {join_error}"),
                            ));
                        }
                        None => continue,
                    };
                    tracing::debug!(
                        workflow = %workflow_id,
                        step = %step_id,
                        status = ?result.status,
                        attempts = result.attempts,
                        "step terminal"
                    );
                    match result.status {
                        StepStatus::Success | StepStatus::Skipped => {
                            unlock_successors(&step_id, &successors, &mut in_degree, &mut ready);
                        }
                        StepStatus::Failed => {
                            failed_step.get_or_insert(step_id.clone());
                            if self.config.failure_policy == FailurePolicy::FailFast {
                                wf_ctx.cancel();
                            }
                        }
                        StepStatus::Cancelled => {}
                    }
                    results.insert(step_id, result);
                }
            }
        }

        // Anything that never started terminates here: Cancelled when the
        // caller pulled the plug, Skipped otherwise (unreachable after a
        // failure upstream).
        for step_id in steps.keys() {
            if !results.contains_key(step_id) {
                let status = if caller_cancelled {
                    StepStatus::Cancelled
                } else {
                    StepStatus::Skipped
                };
                results.insert(
                    step_id.clone(),
                    StepResult {
                        status,
                        attempts: 0,
                        output: None,
                        error: None,
                    },
                );
            }
        }

        let status = if caller_cancelled {
            WorkflowStatus::Cancelled
        } else if failed_step.is_some() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        let mut completed_steps: Vec<StepId> = results
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Success)
            .map(|(id, _)| id.clone())
            .collect();
        completed_steps.sort();

        let result = WorkflowResult {
            workflow_id: workflow_id.clone(),
            status,
            completed_steps,
            step_results: results,
            failed_step,
        };

        if let Some(sink) = &self.sink {
            let mut steps: Vec<(StepId, StepStatus, u32)> = result
                .step_results
                .iter()
                .map(|(id, r)| (id.clone(), r.status, r.attempts))
                .collect();
            steps.sort_by(|a, b| a.0.cmp(&b.0));
            let record = WorkflowRecord {
                workflow_id,
                tenant,
                status: result.status,
                steps,
            };
            if let Err(e) = sink.append(record).await {
                tracing::warn!(error = %e, "workflow result sink append failed");
            }
        }

        Ok(result)
    }

    fn step_timeout(&self, step: &WorkflowStep) -> Duration {
        step.timeout
            .unwrap_or(self.config.default_timeout)
            .to_std()
    }
}

/// Decrement each successor's in-degree; those reaching zero join the
/// ready set.
fn unlock_successors(
    step_id: &StepId,
    successors: &HashMap<StepId, Vec<StepId>>,
    in_degree: &mut HashMap<StepId, usize>,
    ready: &mut BTreeSet<StepId>,
) {
    if let Some(next) = successors.get(step_id) {
        for succ in next {
            let degree = in_degree.get_mut(succ).expect("known step");
            *degree -= 1;
            if *degree == 0 {
                ready.insert(succ.clone());
            }
        }
    }
}

/// Evaluate a step condition against accumulated results.
fn condition_holds(condition: &StepCondition, results: &HashMap<StepId, StepResult>) -> bool {
    match condition {
        StepCondition::StepSucceeded(step) => results
            .get(step)
            .is_some_and(|r| r.status == StepStatus::Success),
        StepCondition::ResultEquals { step, pointer, value } => results
            .get(step)
            .and_then(|r| r.output.as_ref())
            .and_then(|output| output.pointer(pointer))
            .is_some_and(|found| found == value),
    }
}

/// Run one step: per-attempt timeout, retry with backoff, cooperative
/// cancellation. The orchestrator retries whole steps; the agent below
/// never retries on its own.
#[allow(clippy::too_many_arguments)]
async fn run_step(
    step: WorkflowStep,
    agent: Arc<Agent>,
    tenant: TenantId,
    workflow_id: WorkflowId,
    timeout: Duration,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    ctx: CallContext,
) -> (StepId, StepResult) {
    let step_id = step.step_id.clone();
    let max_attempts = step.retry_count + 1;
    let mut last_error: Option<Error> = None;

    for attempt in 1..=max_attempts {
        if ctx.is_cancelled() {
            return (
                step_id,
                StepResult {
                    status: StepStatus::Cancelled,
                    attempts: attempt - 1,
                    output: None,
                    error: Some(Error::cancelled(Component::Orchestrator)),
                },
            );
        }

        let mut task = Task::new(
            format!("{workflow_id}/{}/{attempt}", step.step_id),
            step.task_type.clone(),
            tenant.clone(),
            clock.now_millis(),
        );
        task.params = step.params.clone();

        let attempt_ctx = ctx.child().with_timeout(timeout);
        let outcome = tokio::time::timeout(timeout, agent.execute(task, &attempt_ctx)).await;

        match outcome {
            Ok(Ok(done)) => {
                return (
                    step_id,
                    StepResult {
                        status: StepStatus::Success,
                        attempts: attempt,
                        output: Some(serde_json::json!({
                            "text": done.text,
                            "turns": done.turns,
                        })),
                        error: None,
                    },
                );
            }
            Ok(Err(e)) if e.is_cancelled() => {
                return (
                    step_id,
                    StepResult {
                        status: StepStatus::Cancelled,
                        attempts: attempt,
                        output: None,
                        error: Some(e),
                    },
                );
            }
            Ok(Err(e)) => {
                last_error = Some(e);
            }
            Err(_elapsed) => {
                // Stop the in-flight attempt before trying again.
                attempt_ctx.cancel();
                last_error = Some(
                    Error::timeout(
                        Component::Orchestrator,
                        format!("step `{}` attempt {attempt} timed out", step.step_id),
                    )
                    .with_tenant(tenant.clone()),
                );
            }
        }

        if attempt < max_attempts {
            let delay = retry.delay(attempt);
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return (
                        step_id,
                        StepResult {
                            status: StepStatus::Cancelled,
                            attempts: attempt,
                            output: None,
                            error: Some(Error::cancelled(Component::Orchestrator)),
                        },
                    );
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    (
        step_id,
        StepResult {
            status: StepStatus::Failed,
            attempts: max_attempts,
            output: None,
            error: last_error,
        },
    )
}
