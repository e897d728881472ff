//! End-to-end scenarios over the full stack — real gateway, real agents,
//! real orchestrator, canned provider. No network, no API keys.

use async_trait::async_trait;
use cortex_agent::{Agent, AgentConfig, AgentStatus};
use cortex_gateway::{
    ChatMessage, FinishReason, Gateway, GatewayConfig, GenerateRequest, GenerateResponse,
    ModelGateway, ModelProvider, ProviderError, TokenUsage, ToolCallRequest,
};
use cortex_guard::{CircuitBreakerConfig, CircuitState, RateLimiterConfig};
use cortex_manager::Manager;
use cortex_orch::{Orchestrator, StepStatus, Workflow, WorkflowStatus, WorkflowStep};
use cortex_tool::{FnTool, ToolRegistry};
use cortex_types::{CallContext, ErrorKind, RetryPolicy, StepId, Task};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canned provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CannedProvider {
    responses: Mutex<VecDeque<Result<GenerateResponse, ProviderError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    /// When set, prompts containing this marker fail (used by the
    /// workflow scenario to break exactly one agent's steps).
    fail_marker: Option<String>,
}

impl CannedProvider {
    fn new(responses: Vec<Result<GenerateResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            delay: None,
            fail_marker: None,
        }
    }

    fn echoing() -> Self {
        Self::new(vec![])
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_fail_marker(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn response(text: &str, prompt_tokens: u64, completion_tokens: u64) -> GenerateResponse {
    GenerateResponse {
        text: text.to_string(),
        tool_calls: vec![],
        tokens: TokenUsage::new(prompt_tokens, completion_tokens),
        finish_reason: FinishReason::Stop,
        model: "m-fast".into(),
        cost_estimate: Decimal::new(1, 4),
    }
}

#[async_trait]
impl ModelProvider for CannedProvider {
    async fn complete(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let prompt_text = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<String>();
        if let Some(marker) = &self.fail_marker {
            if prompt_text.contains(marker) {
                return Err(ProviderError::Transient("scripted failure".into()));
            }
        }
        if prompt_text.contains("HANG") {
            // Parked until the gateway cancels the underlying call.
            tokio::time::sleep(Duration::from_secs(86_400)).await;
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(queued) => queued,
            None => {
                let prompt = request
                    .messages
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                Ok(response(&format!("echo:{prompt}"), 2, 2))
            }
        }
    }

    async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|_| vec![1.0]).collect())
    }
}

fn quick_gateway(provider: Arc<CannedProvider>) -> Arc<Gateway> {
    Arc::new(Gateway::new(
        provider,
        GatewayConfig {
            retry: RetryPolicy::NONE,
            ..GatewayConfig::default()
        },
    ))
}

fn ask(prompt: &str) -> Task {
    Task::new("task-1", "ask", "t1", 0).with_param("prompt", json!(prompt))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1 — single agent, single LLM call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_agent_single_call() {
    let provider = Arc::new(CannedProvider::new(vec![Ok(response("4", 3, 1))]));
    let gateway = quick_gateway(Arc::clone(&provider));
    let agent = Agent::new(
        AgentConfig::new("a1", "t1", "m-fast"),
        gateway as Arc<dyn ModelGateway>,
    );

    let outcome = agent
        .execute(ask("2+2"), &CallContext::background())
        .await
        .unwrap();

    assert_eq!(outcome.text, "4");
    assert_eq!(outcome.tokens.prompt, 3);
    assert_eq!(outcome.tokens.completion, 1);
    assert_eq!(outcome.tokens.total, 4);
    assert_eq!(agent.status(), AgentStatus::Idle);
    assert_eq!(provider.calls(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2 — tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_loop_two_turns() {
    let provider = Arc::new(CannedProvider::new(vec![
        Ok(GenerateResponse {
            text: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".into(),
                name: "add".into(),
                arguments: json!({"a": 3, "b": 5}),
            }],
            tokens: TokenUsage::new(10, 5),
            finish_reason: FinishReason::Tool,
            model: "m-fast".into(),
            cost_estimate: Decimal::new(2, 4),
        }),
        Ok(response("8", 12, 1)),
    ]));
    let gateway = quick_gateway(Arc::clone(&provider));

    let invocations = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&invocations);
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FnTool::new(
        "add",
        "Adds two integers",
        json!({
            "type": "object",
            "required": ["a", "b"],
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}
        }),
        move |args, _ctx| {
            observed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            })
        },
    )));

    let agent = Agent::new(
        AgentConfig::new("a1", "t1", "m-fast"),
        gateway as Arc<dyn ModelGateway>,
    )
    .with_tools(Arc::new(registry));

    let outcome = agent
        .execute(ask("what is 3+5?"), &CallContext::background())
        .await
        .unwrap();

    assert_eq!(outcome.text, "8");
    assert_eq!(provider.calls(), 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.tool_invocations, 1);
    assert!(outcome.turns <= 10);
    assert_eq!(agent.status(), AgentStatus::Idle);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3 — dedupe under concurrency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn ten_identical_generates_one_provider_call() {
    let provider = Arc::new(
        CannedProvider::new(vec![Ok(response("shared", 3, 1))])
            .with_delay(Duration::from_millis(50)),
    );
    let gateway = quick_gateway(Arc::clone(&provider));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            gateway
                .generate(
                    GenerateRequest::new("t1", "m-fast", vec![ChatMessage::user("same prompt")]),
                    &CallContext::background(),
                )
                .await
        }));
    }

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(provider.calls(), 1);
    assert!(responses.iter().all(|r| r == &responses[0]));
    // One underlying call means one usage record.
    assert_eq!(gateway.usage().len(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4 — rate limit with queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn rate_limit_queue_admits_in_order_and_sheds() {
    let provider = Arc::new(CannedProvider::echoing());
    let gateway = Arc::new(Gateway::new(
        Arc::clone(&provider) as Arc<dyn ModelProvider>,
        GatewayConfig {
            retry: RetryPolicy::NONE,
            rate_limiter: RateLimiterConfig {
                requests_per_minute: 60, // 1 per second
                tokens_per_minute: 6_000_000,
                burst: 1,
                queue_bound: 2,
                queue_wait_deadline: Duration::from_secs(2),
            },
            ..GatewayConfig::default()
        },
    ));

    let start = tokio::time::Instant::now();
    let mut handles = Vec::new();
    for i in 0..4 {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            let result = gateway
                .generate(
                    GenerateRequest::new(
                        "t1",
                        "m-fast",
                        vec![ChatMessage::user(format!("distinct prompt {i}"))],
                    ),
                    &CallContext::background(),
                )
                .await;
            (result, start.elapsed())
        }));
    }

    let mut admitted = Vec::new();
    let mut shed = 0;
    for handle in handles {
        let (result, elapsed) = handle.await.unwrap();
        match result {
            Ok(_) => admitted.push(elapsed),
            Err(e) => {
                assert_eq!(e.kind, ErrorKind::RateLimited);
                shed += 1;
            }
        }
    }

    assert_eq!(shed, 1);
    admitted.sort();
    assert_eq!(admitted.len(), 3);
    assert!(admitted[0] < Duration::from_millis(100));
    assert!(admitted[1] >= Duration::from_millis(900) && admitted[1] <= Duration::from_millis(1100));
    assert!(admitted[2] >= Duration::from_millis(1900) && admitted[2] <= Duration::from_millis(2100));
    assert_eq!(provider.calls(), 3);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5 — circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn breaker_opens_cools_down_probes_and_recovers() {
    let mut responses: Vec<Result<GenerateResponse, ProviderError>> = (0..5)
        .map(|_| Err(ProviderError::Transient("down".into())))
        .collect();
    responses.push(Ok(response("probe 1", 1, 1)));
    responses.push(Ok(response("probe 2", 1, 1)));
    let provider = Arc::new(CannedProvider::new(responses));
    let gateway = Arc::new(Gateway::new(
        Arc::clone(&provider) as Arc<dyn ModelProvider>,
        GatewayConfig {
            retry: RetryPolicy::NONE,
            breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 2,
                cooldown: Duration::from_millis(100),
                window: Duration::from_secs(60),
            },
            ..GatewayConfig::default()
        },
    ));
    let ctx = CallContext::background();

    for i in 0..5 {
        let err = gateway
            .generate(
                GenerateRequest::new("t1", "m-fast", vec![ChatMessage::user(format!("try {i}"))]),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
    }
    assert_eq!(gateway.breaker_for_model("m-fast").state(), CircuitState::Open);

    // While open, calls fail fast without touching the provider.
    let err = gateway
        .generate(
            GenerateRequest::new("t1", "m-fast", vec![ChatMessage::user("while open")]),
            &ctx,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircuitOpen);
    assert_eq!(provider.calls(), 5);

    // After the cooldown a probe is admitted; two successes close it.
    tokio::time::advance(Duration::from_millis(150)).await;
    gateway
        .generate(
            GenerateRequest::new("t1", "m-fast", vec![ChatMessage::user("probe one")]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(
        gateway.breaker_for_model("m-fast").state(),
        CircuitState::HalfOpen
    );
    gateway
        .generate(
            GenerateRequest::new("t1", "m-fast", vec![ChatMessage::user("probe two")]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(
        gateway.breaker_for_model("m-fast").state(),
        CircuitState::Closed
    );
    assert_eq!(provider.calls(), 7);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6 — workflow with dependency and failure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn workflow_fail_fast_with_retries() {
    let provider = Arc::new(CannedProvider::echoing().with_fail_marker("BROKEN"));
    let gateway = quick_gateway(Arc::clone(&provider));
    let manager = Arc::new(Manager::new());
    for id in ["worker-a", "worker-b", "worker-c"] {
        manager.register(Arc::new(Agent::new(
            AgentConfig::new(id, "t1", "m-fast"),
            Arc::clone(&gateway) as Arc<dyn ModelGateway>,
        )));
    }
    let orchestrator = Orchestrator::new(Arc::clone(&manager));

    let workflow = Workflow::new("wf", "t1")
        .step(WorkflowStep::new("a", "worker-a", "ask").with_param("prompt", json!("step a")))
        .step(
            WorkflowStep::new("b", "worker-b", "ask")
                .with_param("prompt", json!("BROKEN step"))
                .depends_on("a")
                .with_retries(2),
        )
        .step(
            WorkflowStep::new("c", "worker-c", "ask")
                .with_param("prompt", json!("HANG step c"))
                .depends_on("a"),
        );

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

    // C was cancelled in flight or never started.
    let c = &result.step_results[&StepId::new("c")];
    assert!(matches!(
        c.status,
        StepStatus::Cancelled | StepStatus::Skipped
    ));
}
