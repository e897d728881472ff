//! Workflow definitions and validation.

use cortex_types::{
    AgentId, Component, DurationMs, Error, ErrorKind, RetryPolicy, StepId, TenantId, WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What to do when a step exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel everything in flight, skip everything downstream.
    #[default]
    FailFast,
    /// Let branches that do not depend on the failed step finish.
    ContinueIndependent,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Default step retry count.
    pub default_retry: u32,
    /// Default step timeout.
    pub default_timeout: DurationMs,
    /// Maximum concurrently-running steps.
    pub max_parallel_steps: usize,
    /// What a failed step does to the rest of the workflow.
    pub failure_policy: FailurePolicy,
    /// Backoff shape for step retries (`max_retries` is taken from the
    /// step, not from here).
    pub backoff: RetryPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_retry: 0,
            default_timeout: DurationMs::from_secs(300),
            max_parallel_steps: 5,
            failure_policy: FailurePolicy::FailFast,
            backoff: RetryPolicy::default(),
        }
    }
}

/// A predicate over accumulated step results. False means the step is
/// skipped (its successors still run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    /// The named step terminated with Success.
    StepSucceeded(StepId),
    /// A JSON pointer into the named step's output equals `value`.
    ResultEquals {
        /// The step whose output is inspected.
        step: StepId,
        /// JSON pointer (e.g. `/text`).
        pointer: String,
        /// The expected value.
        value: serde_json::Value,
    },
}

/// One workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique step id within the workflow.
    pub step_id: StepId,
    /// The agent this step is dispatched to.
    pub agent_id: AgentId,
    /// Task type passed to the agent.
    pub task_type: String,
    /// Task parameters (must include `prompt` for LLM-backed agents).
    pub params: serde_json::Value,
    /// Steps that must be terminal before this one starts.
    pub depends_on: BTreeSet<StepId>,
    /// Retries after the first attempt.
    pub retry_count: u32,
    /// Per-attempt timeout; `None` uses the config default.
    pub timeout: Option<DurationMs>,
    /// Optional predicate; false ⇒ Skipped.
    pub condition: Option<StepCondition>,
}

impl WorkflowStep {
    /// A step with no dependencies, no retries, default timeout.
    pub fn new(
        step_id: impl Into<StepId>,
        agent_id: impl Into<AgentId>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id: agent_id.into(),
            task_type: task_type.into(),
            params: serde_json::Value::Object(serde_json::Map::new()),
            depends_on: BTreeSet::new(),
            retry_count: 0,
            timeout: None,
            condition: None,
        }
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &mut self.params {
            map.insert(key.into(), value);
        }
        self
    }

    /// Add a dependency.
    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.depends_on.insert(step.into());
        self
    }

    /// Set the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: DurationMs) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a condition.
    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A workflow: steps plus the tenant everything runs under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow id.
    pub id: WorkflowId,
    /// The steps.
    pub steps: Vec<WorkflowStep>,
    /// Tenant all step tasks carry.
    pub tenant: TenantId,
}

impl Workflow {
    /// Create a workflow.
    pub fn new(id: impl Into<WorkflowId>, tenant: impl Into<TenantId>) -> Self {
        Self {
            id: id.into(),
            steps: vec![],
            tenant: tenant.into(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Check structural invariants: non-empty tenant, unique step ids,
    /// dependencies that exist, and acyclicity (Kahn's algorithm).
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| {
            Error::new(ErrorKind::WorkflowInvalid, Component::Orchestrator, message)
                .with_tenant(self.tenant.clone())
        };

        if self.tenant.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                Component::Orchestrator,
                "workflow has no tenant",
            ));
        }
        if self.steps.is_empty() {
            return Err(invalid(format!("workflow `{}` has no steps", self.id)));
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.clone()) {
                return Err(invalid(format!("duplicate step id `{}`", step.step_id)));
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep) {
                    return Err(invalid(format!(
                        "step `{}` depends on unknown step `{dep}`",
                        step.step_id
                    )));
                }
                if dep == &step.step_id {
                    return Err(invalid(format!("step `{}` depends on itself", step.step_id)));
                }
            }
        }

        // Kahn's algorithm: if a topological order covers every step,
        // the graph is acyclic.
        let mut in_degree: BTreeMap<&StepId, usize> = self
            .steps
            .iter()
            .map(|s| (&s.step_id, s.depends_on.len()))
            .collect();
        let mut successors: HashMap<&StepId, Vec<&StepId>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                successors.entry(dep).or_default().push(&step.step_id);
            }
        }
        let mut queue: Vec<&StepId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        while let Some(id) = queue.pop() {
            visited += 1;
            if let Some(next) = successors.get(id) {
                for succ in next {
                    let d = in_degree.get_mut(succ).expect("known step");
                    *d -= 1;
                    if *d == 0 {
                        queue.push(succ);
                    }
                }
            }
        }
        if visited != self.steps.len() {
            return Err(invalid(format!(
                "workflow `{}` contains a dependency cycle",
                self.id
            )));
        }
        Ok(())
    }
}
