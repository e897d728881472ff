//! Named coordination patterns.
//!
//! Thin wrappers over ad-hoc dispatch through the manager: the same
//! agents, tenancy rules, and parallelism bound as workflow steps, in
//! four fixed shapes — leader/follower, peer-to-peer, pipeline, and
//! broadcast.

use crate::runner::Orchestrator;
use cortex_agent::TaskOutcome;
use cortex_manager::Delivery;
use cortex_types::{AgentId, CallContext, Error, Task, TenantId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Per-agent results of a fan-out pattern.
pub type PatternOutcome = HashMap<AgentId, Result<TaskOutcome, Error>>;

/// Result of [`Orchestrator::leader_follower`].
#[derive(Debug)]
pub struct LeaderFollowerOutcome {
    /// The leader's completed task.
    pub leader: TaskOutcome,
    /// Each follower's result.
    pub followers: PatternOutcome,
}

/// Result of [`Orchestrator::pipeline`].
#[derive(Debug)]
pub struct Pipeline {
    /// Every stage's outcome, in chain order.
    pub stages: Vec<(AgentId, TaskOutcome)>,
    /// The last stage's text.
    pub final_text: String,
}

impl Orchestrator {
    /// Leader/follower: the leader runs first; its output becomes the
    /// `leader_output` parameter of every follower, which then run in
    /// parallel (bounded by `max_parallel_steps`).
    pub async fn leader_follower(
        &self,
        tenant: &TenantId,
        leader: &AgentId,
        followers: &[AgentId],
        task_type: &str,
        params: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<LeaderFollowerOutcome, Error> {
        let leader_agent = self.manager().get(leader)?;
        let task = self.pattern_task("leader", leader, tenant, task_type, params.clone());
        let leader_outcome = leader_agent.execute(task, ctx).await?;

        let mut follower_params = params;
        if let serde_json::Value::Object(map) = &mut follower_params {
            map.insert(
                "leader_output".into(),
                serde_json::Value::String(leader_outcome.text.clone()),
            );
        }
        let followers = self
            .fan_out(tenant, followers, task_type, follower_params, ctx)
            .await;

        Ok(LeaderFollowerOutcome {
            leader: leader_outcome,
            followers,
        })
    }

    /// Peer-to-peer: every agent runs the same task in parallel; results
    /// come back keyed by agent id.
    pub async fn peer_to_peer(
        &self,
        tenant: &TenantId,
        agents: &[AgentId],
        task_type: &str,
        params: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<PatternOutcome, Error> {
        Ok(self.fan_out(tenant, agents, task_type, params, ctx).await)
    }

    /// Pipeline: a linear chain where each agent's prompt is the previous
    /// agent's output, optionally passed through `transform` between
    /// stages. The first stage receives `initial_prompt`.
    pub async fn pipeline(
        &self,
        tenant: &TenantId,
        agents: &[AgentId],
        task_type: &str,
        initial_prompt: &str,
        transform: Option<Arc<dyn Fn(&str) -> String + Send + Sync>>,
        ctx: &CallContext,
    ) -> Result<Pipeline, Error> {
        let mut stages = Vec::with_capacity(agents.len());
        let mut input = initial_prompt.to_string();

        for agent_id in agents {
            let agent = self.manager().get(agent_id)?;
            let task = self.pattern_task(
                "pipeline",
                agent_id,
                tenant,
                task_type,
                serde_json::json!({ "prompt": input }),
            );
            let outcome = agent.execute(task, ctx).await?;
            input = match &transform {
                Some(transform) => transform(&outcome.text),
                None => outcome.text.clone(),
            };
            stages.push((agent_id.clone(), outcome));
        }

        Ok(Pipeline {
            final_text: input,
            stages,
        })
    }

    /// Broadcast: one agent publishes a message to every other agent of
    /// its tenant via the manager. Returns the per-recipient delivery
    /// reports (including drop events from full inboxes).
    pub fn broadcast(
        &self,
        from: &AgentId,
        kind: &str,
        body: serde_json::Value,
    ) -> Result<Vec<(AgentId, Delivery)>, Error> {
        self.manager().broadcast_from(from, kind, body)
    }

    /// Dispatch the same task to many agents in parallel, bounded by the
    /// configured parallelism. Unknown agents produce error entries
    /// rather than failing the whole fan-out.
    async fn fan_out(
        &self,
        tenant: &TenantId,
        agents: &[AgentId],
        task_type: &str,
        params: serde_json::Value,
        ctx: &CallContext,
    ) -> PatternOutcome {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel()));
        let mut join: JoinSet<(AgentId, Result<TaskOutcome, Error>)> = JoinSet::new();

        for agent_id in agents {
            let id = agent_id.clone();
            match self.manager().get(agent_id) {
                Err(e) => {
                    join.spawn(async move { (id, Err(e)) });
                }
                Ok(agent) => {
                    let task =
                        self.pattern_task("peer", agent_id, tenant, task_type, params.clone());
                    let ctx = ctx.child();
                    let semaphore = Arc::clone(&semaphore);
                    join.spawn(async move {
                        let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                        (id, agent.execute(task, &ctx).await)
                    });
                }
            }
        }

        let mut outcome = PatternOutcome::new();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((id, result)) => {
                    outcome.insert(id, result);
                }
                Err(join_error) => {
                    tracing::warn!(error = %join_error, "pattern task join failed");
                }
            }
        }
        outcome
    }

    fn pattern_task(
        &self,
        pattern: &str,
        agent: &AgentId,
        tenant: &TenantId,
        task_type: &str,
        params: serde_json::Value,
    ) -> Task {
        let now = self.clock_millis();
        let mut task = Task::new(
            format!("{pattern}/{agent}/{now}"),
            task_type,
            tenant.clone(),
            now,
        );
        task.params = params;
        task
    }
}
