//! Workflow runner and coordination pattern behavior against scripted
//! agents (no live provider).

use async_trait::async_trait;
use cortex_agent::{Agent, AgentConfig};
use cortex_gateway::{
    ChatRole, EmbedRequest, FinishReason, GenerateRequest, GenerateResponse, ModelGateway,
    TokenUsage,
};
use cortex_manager::Manager;
use cortex_orch::{
    FailurePolicy, MemorySink, Orchestrator, StepCondition, StepStatus, Workflow, WorkflowConfig,
    WorkflowStatus, WorkflowStep,
};
use cortex_types::{
    AgentId, CallContext, Component, DurationMs, Error, ErrorKind, StepId, TenantId,
};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScriptedGateway — behavior keyed on the prompt text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Prompts containing `FAIL` always fail (retryably); prompts containing
/// `SLOW` hang until cancelled. Everything else echoes. Every served
/// prompt is recorded in arrival order.
struct ScriptedGateway {
    order: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            order: Mutex::new(vec![]),
        }
    }

    fn served(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(
        &self,
        request: GenerateRequest,
        ctx: &CallContext,
    ) -> Result<GenerateResponse, Error> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.order.lock().unwrap().push(prompt.clone());

        if prompt.contains("FAIL") {
            return Err(Error::new(
                ErrorKind::ProviderUnavailable,
                Component::Gateway,
                "scripted failure",
            ));
        }
        if prompt.contains("SLOW") {
            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::cancelled(Component::Gateway)),
                _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
            }
        }
        Ok(GenerateResponse {
            text: format!("echo:{prompt}"),
            tool_calls: vec![],
            tokens: TokenUsage::new(2, 2),
            finish_reason: FinishReason::Stop,
            model: request.model,
            cost_estimate: Decimal::ZERO,
        })
    }

    async fn embed(
        &self,
        request: EmbedRequest,
        _ctx: &CallContext,
    ) -> Result<Vec<Vec<f32>>, Error> {
        Ok(request.texts.iter().map(|_| vec![0.0]).collect())
    }
}

fn setup(agent_ids: &[&str]) -> (Arc<ScriptedGateway>, Arc<Manager>, Orchestrator) {
    let gateway = Arc::new(ScriptedGateway::new());
    let manager = Arc::new(Manager::new());
    for id in agent_ids {
        manager.register(Arc::new(Agent::new(
            AgentConfig::new(*id, "t1", "m-fast"),
            Arc::clone(&gateway) as Arc<dyn ModelGateway>,
        )));
    }
    let orchestrator = Orchestrator::new(Arc::clone(&manager));
    (gateway, manager, orchestrator)
}

fn step(id: &str, agent: &str, prompt: &str) -> WorkflowStep {
    WorkflowStep::new(id, agent, "ask").with_param("prompt", serde_json::json!(prompt))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DAG execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn linear_chain_respects_dependencies() {
    let (gateway, _manager, orchestrator) = setup(&["a1"]);
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "a1", "one"))
        .step(step("b", "a1", "two").depends_on("a"))
        .step(step("c", "a1", "three").depends_on("b"));

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(gateway.served(), vec!["one", "two", "three"]);
    let ids: Vec<&str> = result.completed_steps.iter().map(|s| s.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(result.failed_step.is_none());
}

#[tokio::test]
async fn diamond_completes_with_join_last() {
    let (gateway, _manager, orchestrator) = setup(&["a1"]);
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "a1", "root"))
        .step(step("b", "a1", "left").depends_on("a"))
        .step(step("c", "a1", "right").depends_on("a"))
        .step(step("d", "a1", "join").depends_on("b").depends_on("c"));

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    let served = gateway.served();
    assert_eq!(served.first().map(String::as_str), Some("root"));
    assert_eq!(served.last().map(String::as_str), Some("join"));
    assert_eq!(served.len(), 4);
}

#[tokio::test]
async fn cycle_is_rejected_before_execution() {
    let (gateway, _manager, orchestrator) = setup(&["a1"]);
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "a1", "x").depends_on("b"))
        .step(step("b", "a1", "y").depends_on("a"));

    let err = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::WorkflowInvalid);
    assert!(gateway.served().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fail_fast_cancels_inflight_and_skips_downstream() {
    let (_gateway, _manager, orchestrator) = setup(&["ok", "bad", "slow"]);
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "ok", "fine"))
        .step(step("b", "bad", "FAIL now").depends_on("a").with_retries(2))
        .step(step("c", "slow", "SLOW reply").depends_on("a"));

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.failed_step.as_ref().unwrap().as_str(), "b");

    let a = &result.step_results[&StepId::new("a")];
    assert_eq!(a.status, StepStatus::Success);

    let b = &result.step_results[&StepId::new("b")];
    assert_eq!(b.status, StepStatus::Failed);
    assert_eq!(b.attempts, 3);

    let c = &result.step_results[&StepId::new("c")];
    assert!(matches!(c.status, StepStatus::Cancelled | StepStatus::Skipped));

    let ids: Vec<&str> = result.completed_steps.iter().map(|s| s.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn continue_independent_lets_other_branches_finish() {
    let (_gateway, _manager, orchestrator) = setup(&["bad", "ok"]);
    let orchestrator = orchestrator.with_config(WorkflowConfig {
        failure_policy: FailurePolicy::ContinueIndependent,
        ..WorkflowConfig::default()
    });
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "bad", "FAIL"))
        .step(step("b", "ok", "downstream").depends_on("a"))
        .step(step("x", "ok", "independent"));

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.step_results[&StepId::new("a")].status, StepStatus::Failed);
    assert_eq!(result.step_results[&StepId::new("x")].status, StepStatus::Success);
    // Downstream of the failure never becomes ready; it terminates Skipped.
    assert_eq!(result.step_results[&StepId::new("b")].status, StepStatus::Skipped);
}

#[tokio::test]
async fn false_condition_skips_but_unblocks_successors() {
    let (gateway, _manager, orchestrator) = setup(&["a1"]);
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "a1", "first"))
        .step(
            step("b", "a1", "conditional").depends_on("a").with_condition(
                StepCondition::ResultEquals {
                    step: StepId::new("a"),
                    pointer: "/text".into(),
                    value: serde_json::json!("something else"),
                },
            ),
        )
        .step(step("c", "a1", "after").depends_on("b"));

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.step_results[&StepId::new("b")].status, StepStatus::Skipped);
    assert_eq!(result.step_results[&StepId::new("b")].attempts, 0);
    assert_eq!(result.step_results[&StepId::new("c")].status, StepStatus::Success);
    assert_eq!(gateway.served(), vec!["first", "after"]);
}

#[tokio::test]
async fn true_condition_runs_the_step() {
    let (_gateway, _manager, orchestrator) = setup(&["a1"]);
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "a1", "first"))
        .step(
            step("b", "a1", "conditional")
                .depends_on("a")
                .with_condition(StepCondition::StepSucceeded(StepId::new("a"))),
        );

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();
    assert_eq!(result.step_results[&StepId::new("b")].status, StepStatus::Success);
}

#[tokio::test]
async fn parallelism_bound_of_one_serializes_lexicographically() {
    let (gateway, _manager, orchestrator) = setup(&["a1"]);
    let orchestrator = orchestrator.with_config(WorkflowConfig {
        max_parallel_steps: 1,
        ..WorkflowConfig::default()
    });
    // Insert out of order; the ready set still drains a, b, c.
    let workflow = Workflow::new("wf", "t1")
        .step(step("c", "a1", "third"))
        .step(step("a", "a1", "first"))
        .step(step("b", "a1", "second"));

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(gateway.served(), vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn step_timeout_counts_as_failure_and_retries() {
    let (gateway, _manager, orchestrator) = setup(&["slow"]);
    let workflow = Workflow::new("wf", "t1").step(
        step("a", "slow", "SLOW call")
            .with_timeout(DurationMs::from_secs(1))
            .with_retries(1),
    );

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();

    let a = &result.step_results[&StepId::new("a")];
    assert_eq!(a.status, StepStatus::Failed);
    assert_eq!(a.attempts, 2);
    assert_eq!(a.error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(gateway.served().len(), 2);
}

#[tokio::test]
async fn unknown_agent_fails_the_step() {
    let (_gateway, _manager, orchestrator) = setup(&["a1"]);
    let workflow = Workflow::new("wf", "t1").step(step("a", "ghost", "hello"));

    let result = orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();
    assert_eq!(result.status, WorkflowStatus::Failed);
    let a = &result.step_results[&StepId::new("a")];
    assert_eq!(a.status, StepStatus::Failed);
    assert_eq!(a.error.as_ref().unwrap().kind, ErrorKind::UnknownAgent);
}

#[tokio::test]
async fn caller_cancellation_terminates_the_workflow() {
    let (_gateway, _manager, orchestrator) = setup(&["slow"]);
    let orchestrator = Arc::new(orchestrator);
    let workflow = Workflow::new("wf", "t1")
        .step(step("a", "slow", "SLOW one"))
        .step(step("b", "slow", "never runs").depends_on("a"));

    let ctx = CallContext::background();
    let cancel = ctx.clone();
    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.execute_workflow(workflow, &ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Cancelled);
    assert_eq!(
        result.step_results[&StepId::new("a")].status,
        StepStatus::Cancelled
    );
    assert_eq!(
        result.step_results[&StepId::new("b")].status,
        StepStatus::Cancelled
    );
}

#[tokio::test]
async fn sink_receives_one_record_per_run()  {
    let (_gateway, _manager, orchestrator) = setup(&["a1"]);
    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator.with_sink(Arc::clone(&sink) as _);

    let workflow = Workflow::new("wf", "t1").step(step("a", "a1", "hello"));
    orchestrator
        .execute_workflow(workflow, &CallContext::background())
        .await
        .unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].workflow_id.as_str(), "wf");
    assert_eq!(records[0].status, WorkflowStatus::Completed);
    assert_eq!(records[0].steps, vec![(StepId::new("a"), StepStatus::Success, 1)]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordination patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn leader_follower_passes_leader_output() {
    let (_gateway, _manager, orchestrator) = setup(&["lead", "f1", "f2"]);
    let tenant = TenantId::new("t1");

    let outcome = orchestrator
        .leader_follower(
            &tenant,
            &AgentId::new("lead"),
            &[AgentId::new("f1"), AgentId::new("f2")],
            "ask",
            serde_json::json!({"prompt": "plan the work"}),
            &CallContext::background(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.leader.text, "echo:plan the work");
    assert_eq!(outcome.followers.len(), 2);
    assert!(outcome.followers[&AgentId::new("f1")].is_ok());
    assert!(outcome.followers[&AgentId::new("f2")].is_ok());
}

#[tokio::test]
async fn peer_to_peer_returns_result_per_agent() {
    let (_gateway, _manager, orchestrator) = setup(&["p1", "p2", "p3"]);
    let tenant = TenantId::new("t1");
    let agents = [AgentId::new("p1"), AgentId::new("p2"), AgentId::new("p3")];

    let outcome = orchestrator
        .peer_to_peer(
            &tenant,
            &agents,
            "ask",
            serde_json::json!({"prompt": "vote"}),
            &CallContext::background(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.len(), 3);
    for agent in &agents {
        assert_eq!(outcome[agent].as_ref().unwrap().text, "echo:vote");
    }
}

#[tokio::test]
async fn peer_to_peer_reports_unknown_agents_inline() {
    let (_gateway, _manager, orchestrator) = setup(&["p1"]);
    let tenant = TenantId::new("t1");
    let agents = [AgentId::new("p1"), AgentId::new("ghost")];

    let outcome = orchestrator
        .peer_to_peer(
            &tenant,
            &agents,
            "ask",
            serde_json::json!({"prompt": "vote"}),
            &CallContext::background(),
        )
        .await
        .unwrap();
    assert!(outcome[&AgentId::new("p1")].is_ok());
    assert_eq!(
        outcome[&AgentId::new("ghost")].as_ref().unwrap_err().kind,
        ErrorKind::UnknownAgent
    );
}

#[tokio::test]
async fn pipeline_chains_outputs_with_transform() {
    let (_gateway, _manager, orchestrator) = setup(&["s1", "s2"]);
    let tenant = TenantId::new("t1");

    let outcome = orchestrator
        .pipeline(
            &tenant,
            &[AgentId::new("s1"), AgentId::new("s2")],
            "ask",
            "start",
            Some(Arc::new(|text: &str| text.to_uppercase())),
            &CallContext::background(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.stages.len(), 2);
    // Stage 1 echoes "start", transform uppercases, stage 2 echoes that.
    assert_eq!(outcome.stages[0].1.text, "echo:start");
    assert_eq!(outcome.stages[1].1.text, "echo:ECHO:START");
    assert_eq!(outcome.final_text, "ECHO:ECHO:START");
}

#[tokio::test]
async fn broadcast_delivers_to_tenant_peers() {
    let (_gateway, manager, orchestrator) = setup(&["pub", "sub1", "sub2"]);

    let reports = orchestrator
        .broadcast(&AgentId::new("pub"), "announce", serde_json::json!({"v": 1}))
        .unwrap();
    assert_eq!(reports.len(), 2);

    let sub1 = manager.get(&AgentId::new("sub1")).unwrap();
    let messages = sub1.take_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, "announce");
    assert_eq!(messages[0].from.as_str(), "pub");
}
