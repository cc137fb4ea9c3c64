//! # 执行引擎单元测试
//!
//! 使用脚本化模型验证串行绑定、并行顺序、工具循环、配额与流式输出

use crate::{
    Collaborators, EngineConfig, ExecRequest, FlowEngine, MemoryAgentRepository,
    MemorySessionRepository, MemoryStatsRepository, ResponseBody, TokenBudgetQuota,
    ToolRegistry, TraceSink,
};
use agentflow_compiler::{MasterAgent, MasterAgentLoader};
use agentflow_context::{RequestClock, TokenUsage};
use agentflow_core::{
    AgentCallErrorKind, AggregatedStats, BillingService, ChunkKind, ContentPart, ExecutionState,
    FlowError, LanguageModel, Message, ModelError, ModelRequest, ModelResponse, Role,
    SessionRepository, SessionUsage, StatsRepository, Tool, ToolCall, ToolContext, ToolError,
    ToolSpec, TraceChunk, UsageStat, ValidationError,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const WRITER: &str = r#"{
    "id": "writer",
    "displayName": "Writer",
    "inputs": [
        {"name": "topic", "type": "shortText", "required": true},
        {"name": "note", "type": "shortText"}
    ],
    "agents": [
        {"name": "draft", "model": "draft", "system": "Today is {{currentDateTimeIso}} ({{sessionId}})"},
        {"name": "review", "model": "review"},
        {"name": "slow", "model": "slow"},
        {"name": "broken", "model": "broken"}
    ],
    "flows": [
        {"name": "main", "flow": {"type": "sequence", "steps": [
            {"type": "agentCall", "agent": "draft", "input": "Write about {{topic}}"},
            {"type": "agentCall", "agent": "review", "input": "Review: {{draft}}"}
        ]}},
        {"name": "fanout", "code": "fan", "flow": {"type": "parallel", "steps": [
            {"type": "agentCall", "agent": "slow", "input": "{{topic}}"},
            {"type": "agentCall", "agent": "draft", "input": "{{topic}}"}
        ]}},
        {"name": "failing", "flow": {"type": "sequence", "steps": [
            {"type": "agentCall", "agent": "broken", "input": "{{topic}}"},
            {"type": "agentCall", "agent": "review", "input": "{{topic}}"}
        ]}},
        {"name": "risky", "flow": {"type": "parallel", "steps": [
            {"type": "agentCall", "agent": "slow", "input": "{{topic}}"},
            {"type": "agentCall", "agent": "broken", "input": "{{topic}}"}
        ]}},
        {"name": "annotated", "flow": {"type": "sequence", "steps": [
            {"type": "agentCall", "agent": "draft", "input": "secret plan"},
            {"type": "agentCall", "agent": "review", "input": "User note: {{note}}"}
        ]}}
    ]
}"#;

const SHOUTER: &str = r#"{
    "id": "shouter",
    "inputs": [{"name": "topic"}],
    "agents": [{"name": "shout", "model": "tooling", "tools": [{"name": "upper"}]}],
    "flows": [{"name": "main", "flow": {"type": "agentCall", "agent": "shout", "input": "{{topic}}"}}]
}"#;

/// 按模型名回显输入的脚本化模型
#[derive(Default)]
struct ScriptedModel {
    delays: HashMap<String, u64>,
    failing: HashSet<String>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new() -> Self {
        let mut model = Self::default();
        model.delays.insert("slow".into(), 60);
        model.failing.insert("broken".into());
        model
    }

    async fn models_called(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|r| r.model.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().await.push(request.clone());
        if let Some(delay) = self.delays.get(&request.model) {
            tokio::time::sleep(Duration::from_millis(*delay)).await;
        }
        if self.failing.contains(&request.model) {
            return Err(ModelError::Request("upstream unavailable".into()));
        }
        let input = request.messages.last().map(Message::text).unwrap_or_default();
        Ok(ModelResponse {
            text: format!("{}<{}>", request.model, input),
            tool_calls: Vec::new(),
            usage: TokenUsage::new(10, 5),
            finish_reason: "stop".into(),
        })
    }
}

/// 第一轮请求工具，第二轮返回工具结果
struct ToolingModel;

#[async_trait]
impl LanguageModel for ToolingModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let last = request
            .messages
            .last()
            .ok_or_else(|| ModelError::InvalidResponse("no messages".into()))?;

        if last.role == Role::Tool {
            let text = last
                .content
                .iter()
                .find_map(|part| match part {
                    ContentPart::ToolResult { result, .. } => result.as_str().map(str::to_string),
                    _ => None,
                })
                .unwrap_or_default();
            return Ok(ModelResponse {
                text,
                usage: TokenUsage::new(4, 2),
                finish_reason: "stop".into(),
                ..ModelResponse::default()
            });
        }

        let handle = request
            .tools
            .iter()
            .find(|spec| spec.name.starts_with("upper_"))
            .map(|spec| spec.name.clone())
            .ok_or_else(|| ModelError::InvalidResponse("upper tool not offered".into()))?;
        Ok(ModelResponse {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: "call-1".into(),
                name: handle,
                arguments: json!({"text": last.text()}),
            }],
            usage: TokenUsage::new(6, 3),
            finish_reason: "tool-calls".into(),
        })
    }
}

struct Upper;

#[async_trait]
impl Tool for Upper {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "upper".into(),
            description: "uppercase text".into(),
            parameters: json!({"type": "object"}),
        }
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = args["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("text".into()))?;
        Ok(Value::String(text.to_uppercase()))
    }
}

/// 总是失败的 `upper` 工具
struct BrokenUpper;

#[async_trait]
impl Tool for BrokenUpper {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "upper".into(),
            description: "uppercase text".into(),
            parameters: json!({"type": "object"}),
        }
    }

    async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::Execution("disk full".into()))
    }
}

struct DownBilling;

#[async_trait]
impl BillingService for DownBilling {
    async fn report(&self, _usage: &SessionUsage, _stat: &UsageStat) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("billing unavailable"))
    }
}

/// 汇总可读、写入失败的统计仓库
struct ReadOnlyStats;

#[async_trait]
impl StatsRepository for ReadOnlyStats {
    async fn aggregate(&self, _stat: UsageStat) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("stats store is read-only"))
    }

    async fn summary(&self, _now: chrono::DateTime<Utc>) -> anyhow::Result<AggregatedStats> {
        Ok(AggregatedStats::default())
    }
}

fn load(definition: &str) -> MasterAgent {
    let agent = MasterAgentLoader::from_json_str(definition).unwrap();
    MasterAgentLoader::validate(&agent).unwrap();
    agent
}

async fn collaborators(model: Arc<dyn LanguageModel>) -> Collaborators {
    let agents = Arc::new(MemoryAgentRepository::new());
    agents.insert(load(WRITER)).await;
    agents.insert(load(SHOUTER)).await;
    Collaborators::new(agents, model)
}

fn request(flow: &str) -> ExecRequest {
    ExecRequest::new("writer", json!({"topic": "rust"}))
        .with_flow(flow)
        .buffered()
}

fn kinds(trace: &[agentflow_core::TraceChunk]) -> Vec<ChunkKind> {
    trace.iter().map(|chunk| chunk.kind()).collect()
}

#[tokio::test]
async fn test_sequence_binds_previous_output() {
    let model = Arc::new(ScriptedModel::new());
    let engine = FlowEngine::new(collaborators(model.clone()).await, EngineConfig::default()).unwrap();

    let report = engine.execute_buffered(request("main")).await.unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(
        report.result,
        Some(json!("review<Review: draft<Write about rust>>"))
    );
    assert_eq!(
        kinds(&report.trace),
        vec![
            ChunkKind::FlowStart,
            ChunkKind::StepFinish,
            ChunkKind::FlowStart,
            ChunkKind::StepFinish,
            ChunkKind::FinalResponse,
        ]
    );
    assert_eq!(report.context.summary().success, 2);
    assert_eq!(model.models_called().await, vec!["draft", "review"]);
}

#[tokio::test]
async fn test_trace_timestamps_strictly_increase() {
    let engine = FlowEngine::new(
        collaborators(Arc::new(ScriptedModel::new())).await,
        EngineConfig::default(),
    )
    .unwrap();

    let report = engine.execute_buffered(request("main")).await.unwrap();
    let stamps: Vec<_> = report.trace.iter().filter_map(|c| c.timestamp()).collect();
    assert_eq!(stamps.len(), report.trace.len());
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_session_usage_is_accumulated_and_finalized() {
    let sessions = Arc::new(MemorySessionRepository::new());
    let collaborators = collaborators(Arc::new(ScriptedModel::new()))
        .await
        .with_sessions(sessions.clone());
    let engine = FlowEngine::new(collaborators, EngineConfig::default()).unwrap();

    let report = engine
        .execute_buffered(request("main").with_session_id("s-usage"))
        .await
        .unwrap();

    let session = report.session.unwrap();
    assert_eq!(session.prompt_tokens, 20);
    assert_eq!(session.completion_tokens, 10);
    assert!(session.finalized_at.is_some());

    let stored = sessions.find("s-usage").await.unwrap().unwrap();
    assert_eq!(stored.usage().total(), 30);
}

#[tokio::test]
async fn test_parallel_results_keep_declaration_order() {
    let engine = FlowEngine::new(
        collaborators(Arc::new(ScriptedModel::new())).await,
        EngineConfig::default(),
    )
    .unwrap();

    let report = engine.execute_buffered(request("fan")).await.unwrap();

    assert_eq!(report.result, Some(json!(["slow<rust>", "draft<rust>"])));
    #[cfg(feature = "perf-metrics")]
    {
        assert_eq!(report.stats.agent_calls, 2);
        assert_eq!(report.stats.model_calls, 2);
    }
}

#[tokio::test]
async fn test_failure_ends_trace_with_error() {
    let model = Arc::new(ScriptedModel::new());
    let engine = FlowEngine::new(collaborators(model.clone()).await, EngineConfig::default()).unwrap();

    let report = engine.execute_buffered(request("failing")).await.unwrap();

    assert!(matches!(report.state, ExecutionState::Failed(_)));
    assert_eq!(
        kinds(&report.trace),
        vec![ChunkKind::FlowStart, ChunkKind::Error]
    );
    let summary = report.context.summary();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(model.models_called().await, vec!["broken"]);

    let err = report.into_result().unwrap_err();
    assert_eq!(err.status_code(), 499);
    assert!(matches!(
        err,
        FlowError::AgentCall(ref e) if matches!(e.kind, AgentCallErrorKind::Model(_))
    ));
}

#[tokio::test]
async fn test_quota_exceeded_emits_nothing() {
    let stats = Arc::new(MemoryStatsRepository::new());
    stats
        .seed(UsageStat::new("flow", TokenUsage::new(80, 40), Some("stop"), Utc::now()))
        .await;
    let model = Arc::new(ScriptedModel::new());
    let collaborators = collaborators(model.clone())
        .await
        .with_stats(stats)
        .with_quota(Arc::new(TokenBudgetQuota::new(100)));
    let engine = FlowEngine::new(collaborators, EngineConfig::default()).unwrap();

    let sink = TraceSink::buffered();
    let err = engine.execute(request("main"), sink.clone()).await.unwrap_err();

    assert!(matches!(err, FlowError::QuotaExceeded(_)));
    assert_eq!(err.status_code(), 403);
    assert_eq!(sink.len().await, 0);
    assert!(model.models_called().await.is_empty());
}

#[tokio::test]
async fn test_preflight_validation_errors() {
    let model = Arc::new(ScriptedModel::new());
    let engine = FlowEngine::new(collaborators(model.clone()).await, EngineConfig::default()).unwrap();

    let err = engine
        .execute_buffered(ExecRequest::new("nobody", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Validation(ValidationError::AgentNotFound(_))
    ));

    let err = engine
        .execute_buffered(ExecRequest::new("writer", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Validation(ValidationError::MissingInput { .. })
    ));

    let err = engine.execute_buffered(request("nope")).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Validation(ValidationError::FlowNotFound(_))
    ));
    assert!(model.models_called().await.is_empty());
}

#[tokio::test]
async fn test_system_prompt_uses_request_clock_and_session() {
    let model = Arc::new(ScriptedModel::new());
    let engine = FlowEngine::new(collaborators(model.clone()).await, EngineConfig::default()).unwrap();

    let clock = RequestClock::new("2024-01-01T00:00:00.000Z", "2024-01-01 01:00:00", "Europe/Paris");
    engine
        .execute_buffered(request("main").with_session_id("s-1").with_clock(clock))
        .await
        .unwrap();

    let requests = model.requests.lock().await;
    assert_eq!(requests[0].system, "Today is 2024-01-01T00:00:00.000Z (s-1)");
    assert!(requests[0].tools.iter().any(|t| t.name == "saveResults"));
}

#[tokio::test]
async fn test_tool_calls_loop_back_to_model() {
    let mut tools = ToolRegistry::new();
    tools.register_tool(Arc::new(Upper));
    let collaborators = collaborators(Arc::new(ToolingModel))
        .await
        .with_tools(Arc::new(tools));
    let engine = FlowEngine::new(collaborators, EngineConfig::default()).unwrap();

    let report = engine
        .execute_buffered(ExecRequest::new("shouter", json!({"topic": "rust"})))
        .await
        .unwrap();

    assert_eq!(report.result, Some(json!("RUST")));
    let finishes: Vec<_> = report
        .trace
        .iter()
        .filter(|c| c.kind() == ChunkKind::StepFinish)
        .collect();
    assert_eq!(finishes.len(), 2);
    match finishes[0] {
        agentflow_core::TraceChunk::StepFinish { messages, usage, .. } => {
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[1].role, Role::Tool);
            assert_eq!(*usage, TokenUsage::new(6, 3));
        }
        other => panic!("unexpected chunk {other:?}"),
    }
    assert_eq!(report.session.as_ref().unwrap().usage(), TokenUsage::new(10, 5));
    #[cfg(feature = "perf-metrics")]
    assert_eq!(report.stats.tool_calls, 1);
}

#[tokio::test]
async fn test_step_timeout_fails_the_call() {
    let engine = FlowEngine::new(
        collaborators(Arc::new(ScriptedModel::new())).await,
        EngineConfig::default().timeout(Duration::from_millis(10)),
    )
    .unwrap();

    let report = engine.execute_buffered(request("fan")).await.unwrap();
    let err = report.into_result().unwrap_err();
    assert!(matches!(
        err,
        FlowError::AgentCall(ref e) if e.agent == "slow" && matches!(e.kind, AgentCallErrorKind::Timeout(_))
    ));
}

#[tokio::test]
async fn test_streaming_writes_ndjson_and_closes() {
    let engine = FlowEngine::new(
        collaborators(Arc::new(ScriptedModel::new())).await,
        EngineConfig::default(),
    )
    .unwrap();

    let stream = engine
        .execute_streaming(ExecRequest::new("writer", json!({"topic": "rust"})))
        .await
        .unwrap();
    let lines: Vec<Vec<u8>> = stream.collect().await;

    assert_eq!(lines.len(), 5);
    for line in &lines {
        assert_eq!(line.last(), Some(&b'\n'));
    }
    let last: Value = serde_json::from_slice(&lines[4]).unwrap();
    assert_eq!(last["type"], json!("finalResponse"));
    assert_eq!(last["result"], json!("review<Review: draft<Write about rust>>"));
}

#[tokio::test]
async fn test_handle_maps_modes_to_responses() {
    let engine = FlowEngine::new(
        collaborators(Arc::new(ScriptedModel::new())).await,
        EngineConfig::default(),
    )
    .unwrap();

    let response = engine.handle(request("main")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.json_body().unwrap()["type"], json!("finalResponse"));

    let response = engine.handle(ExecRequest::new("nobody", json!({}))).await;
    assert_eq!(response.status, 400);
    assert!(matches!(response.body, ResponseBody::Json(_)));

    let response = engine
        .handle(ExecRequest::new("writer", json!({"topic": "rust"})))
        .await;
    assert!(response.is_stream());
    assert_eq!(response.header("Transfer-Encoding"), Some("chunked"));
}

#[tokio::test]
async fn test_compilation_is_deterministic() {
    let engine = FlowEngine::new(
        collaborators(Arc::new(ScriptedModel::new())).await,
        EngineConfig::default(),
    )
    .unwrap();

    let first = engine
        .prepare(request("main"), TraceSink::buffered())
        .await
        .unwrap();
    let second = engine
        .prepare(request("main"), TraceSink::buffered())
        .await
        .unwrap();
    assert_eq!(first.flow, second.flow);

    let report = engine.run(first).await;
    assert!(report.is_success());
    assert_eq!(second.flow.metadata.agent_calls, 2);
}

#[tokio::test]
async fn test_failed_tool_still_records_model_usage() {
    let mut tools = ToolRegistry::new();
    tools.register_tool(Arc::new(BrokenUpper));
    let sessions = Arc::new(MemorySessionRepository::new());
    let collaborators = collaborators(Arc::new(ToolingModel))
        .await
        .with_tools(Arc::new(tools))
        .with_sessions(sessions.clone());
    let engine = FlowEngine::new(collaborators, EngineConfig::default()).unwrap();

    let report = engine
        .execute_buffered(
            ExecRequest::new("shouter", json!({"topic": "rust"})).with_session_id("s-tool"),
        )
        .await
        .unwrap();

    assert!(matches!(report.state, ExecutionState::Failed(_)));
    assert_eq!(
        kinds(&report.trace),
        vec![ChunkKind::FlowStart, ChunkKind::StepFinish, ChunkKind::Error]
    );
    match &report.trace[1] {
        TraceChunk::StepFinish { messages, usage, .. } => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].role, Role::Assistant);
            assert_eq!(*usage, TokenUsage::new(6, 3));
        }
        other => panic!("unexpected chunk {other:?}"),
    }
    assert_eq!(report.session.as_ref().unwrap().usage(), TokenUsage::new(6, 3));
    let stored = sessions.find("s-tool").await.unwrap().unwrap();
    assert_eq!(stored.usage(), TokenUsage::new(6, 3));

    let err = report.into_result().unwrap_err();
    assert!(matches!(
        err,
        FlowError::AgentCall(ref e) if matches!(e.kind, AgentCallErrorKind::Tool { .. })
    ));
}

#[tokio::test]
async fn test_substituted_text_is_not_rebound() {
    let model = Arc::new(ScriptedModel::new());
    let engine = FlowEngine::new(collaborators(model.clone()).await, EngineConfig::default()).unwrap();

    let report = engine
        .execute_buffered(
            ExecRequest::new("writer", json!({"topic": "rust", "note": "literally {{draft}}"}))
                .with_flow("annotated")
                .buffered(),
        )
        .await
        .unwrap();

    assert_eq!(
        report.result,
        Some(json!("review<User note: literally {{draft}}>"))
    );
    let requests = model.requests.lock().await;
    assert_eq!(requests[1].model, "review");
    let sent = requests[1].messages[0].text();
    assert_eq!(sent, "User note: literally {{draft}}");
    assert!(!sent.contains("secret plan"));
}

#[tokio::test]
async fn test_billing_and_stats_failures_do_not_fail_the_run() {
    let sessions = Arc::new(MemorySessionRepository::new());
    let collaborators = collaborators(Arc::new(ScriptedModel::new()))
        .await
        .with_sessions(sessions.clone())
        .with_stats(Arc::new(ReadOnlyStats))
        .with_billing(Arc::new(DownBilling));
    let engine = FlowEngine::new(collaborators, EngineConfig::default()).unwrap();

    let report = engine
        .execute_buffered(request("main").with_session_id("s-billing"))
        .await
        .unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(
        report.result,
        Some(json!("review<Review: draft<Write about rust>>"))
    );
    let stored = sessions.find("s-billing").await.unwrap().unwrap();
    assert_eq!(stored.usage(), TokenUsage::new(20, 10));
    assert!(stored.finalized_at.is_some());
}

#[tokio::test]
async fn test_parallel_failure_waits_for_in_flight_sibling() {
    let sessions = Arc::new(MemorySessionRepository::new());
    let model = Arc::new(ScriptedModel::new());
    let collaborators = collaborators(model.clone())
        .await
        .with_sessions(sessions.clone());
    let engine = FlowEngine::new(collaborators, EngineConfig::default()).unwrap();

    let report = engine
        .execute_buffered(request("risky").with_session_id("s-risky"))
        .await
        .unwrap();

    assert!(matches!(report.state, ExecutionState::Failed(_)));
    let trace_kinds = kinds(&report.trace);
    assert_eq!(trace_kinds.last(), Some(&ChunkKind::Error));
    assert_eq!(
        trace_kinds.iter().filter(|k| **k == ChunkKind::Error).count(),
        1
    );
    let slow_finish = report
        .trace
        .iter()
        .position(|c| c.kind() == ChunkKind::StepFinish && c.name() == Some("slow"))
        .expect("slow sibling finished");
    assert!(slow_finish < report.trace.len() - 1);

    assert_eq!(report.session.as_ref().unwrap().usage(), TokenUsage::new(10, 5));
    let stored = sessions.find("s-risky").await.unwrap().unwrap();
    assert_eq!(stored.usage(), TokenUsage::new(10, 5));

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, FlowError::AgentCall(ref e) if e.agent == "broken"));
}
