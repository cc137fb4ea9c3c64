//! # AgentFlow Runtime - 执行引擎
//!
//! 一次请求的完整生命周期：配额 → 加载 → 校验 → 解析输入 → 编译 → 构建注册表 → 执行 → 收尾

use crate::agents::{AgentRegistry, RegistryDeps, StepInterceptor};
use crate::config::EngineConfig;
use crate::executor::{ExecutionStats, FlowExecutor};
use crate::parallel::ParallelConfig;
use crate::request::ExecRequest;
use crate::response::ExecResponse;
use crate::stores::{
    MemoryResultRepository, MemorySessionRepository, MemoryStatsRepository, TokenBudgetQuota,
};
use crate::tools::ToolRegistry;
use crate::trace::TraceSink;
use crate::usage::UsageAccountant;
use agentflow_compiler::{
    AgentRepository, FlowCompiler, InputSchema, MasterAgent, TemplateEngine, VariableResolver,
};
use agentflow_context::{ExecutionContext, Session, SharedContext};
use agentflow_core::{
    BillingService, CompiledFlow, DocumentExtractor, ExecutionState, FlowError, FlowResult,
    LanguageModel, QuotaService, ResultRepository, SessionRepository, StatsRepository,
    ToolLookup, TraceChunk, ValidationError,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

/// 引擎依赖的外部能力
#[derive(Clone)]
pub struct Collaborators {
    pub agents: Arc<dyn AgentRepository>,
    pub model: Arc<dyn LanguageModel>,
    pub tools: Arc<dyn ToolLookup>,
    pub quota: Arc<dyn QuotaService>,
    pub sessions: Arc<dyn SessionRepository>,
    pub stats: Arc<dyn StatsRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub billing: Option<Arc<dyn BillingService>>,
    pub extractor: Option<Arc<dyn DocumentExtractor>>,
}

impl Collaborators {
    /// 以内存实现填充除代理仓库与模型之外的全部能力
    pub fn new(agents: Arc<dyn AgentRepository>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            agents,
            model,
            tools: Arc::new(ToolRegistry::new()),
            quota: Arc::new(TokenBudgetQuota::unlimited()),
            sessions: Arc::new(MemorySessionRepository::new()),
            stats: Arc::new(MemoryStatsRepository::new()),
            results: Arc::new(MemoryResultRepository::new()),
            billing: None,
            extractor: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolLookup>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_quota(mut self, quota: Arc<dyn QuotaService>) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionRepository>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsRepository>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_results(mut self, results: Arc<dyn ResultRepository>) -> Self {
        self.results = results;
        self
    }

    pub fn with_billing(mut self, billing: Arc<dyn BillingService>) -> Self {
        self.billing = Some(billing);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }
}

/// 已通过全部预检、尚未开始执行的请求
pub struct PreparedRun {
    pub request: ExecRequest,
    pub master: MasterAgent,
    pub flow: CompiledFlow,
    pub state: ExecutionState,
    registry: AgentRegistry,
    accountant: UsageAccountant,
    context: SharedContext,
    sink: TraceSink,
}

/// 一次执行的结果
#[derive(Debug)]
pub struct RunReport {
    pub flow_name: String,
    pub state: ExecutionState,
    pub result: Option<Value>,
    pub error: Option<FlowError>,
    pub trace: Vec<TraceChunk>,
    pub stats: ExecutionStats,
    pub context: ExecutionContext,
    pub session: Option<Session>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    pub fn final_chunk(&self) -> Option<&TraceChunk> {
        self.trace.last()
    }

    pub fn into_result(self) -> FlowResult<Value> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(err),
            (Some(value), None) => Ok(value),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// 流程执行引擎
#[derive(Clone)]
pub struct FlowEngine {
    collaborators: Collaborators,
    config: EngineConfig,
    template: TemplateEngine,
    resolver: VariableResolver,
}

impl FlowEngine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> anyhow::Result<Self> {
        let template = TemplateEngine::new()?;
        let mut resolver =
            VariableResolver::new().with_document_extraction(config.extract_documents);
        if let Some(extractor) = &collaborators.extractor {
            resolver = resolver.with_extractor(extractor.clone());
        }
        Ok(Self {
            collaborators,
            config,
            template,
            resolver,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// 预检并编译请求；任何失败都发生在输出第一个轨迹事件之前
    #[tracing::instrument(level = "info", skip_all, fields(agent_id = %request.agent_id, session_id = %request.session_id))]
    pub async fn prepare(&self, request: ExecRequest, sink: TraceSink) -> FlowResult<PreparedRun> {
        let mut state = ExecutionState::Idle;
        let accountant = UsageAccountant::new(
            self.collaborators.sessions.clone(),
            self.collaborators.stats.clone(),
            self.config.stats_event_name.clone(),
            request.session_id.clone(),
            request.agent_id.clone(),
        )
        .with_billing(self.collaborators.billing.clone());

        accountant
            .check_quota(self.collaborators.quota.as_ref(), Utc::now())
            .await?;

        let master = self
            .collaborators
            .agents
            .find(&request.agent_id)
            .await?
            .ok_or_else(|| ValidationError::AgentNotFound(request.agent_id.clone()))?;

        state.advance(ExecutionState::Compiling);
        InputSchema::from_declarations(&master.inputs).validate(&request.input)?;

        let resolved = self.resolver.resolve(&master.inputs, &request.input).await;
        if self.config.strict_extraction {
            if let Some(err) = resolved.errors.first() {
                return Err(err.clone().into());
            }
        }

        let flow = FlowCompiler::new(self.template.clone())
            .with_default_injection(self.config.default_injection)
            .compile(&master, request.flow.as_deref(), &resolved)?;
        flow.validate()?;

        let deps = RegistryDeps {
            model: self.collaborators.model.clone(),
            tools: self.collaborators.tools.clone(),
            results: self.collaborators.results.clone(),
            interceptor: StepInterceptor::new(accountant.clone(), sink.clone()),
            template: self.template.clone(),
            clock: request.clock.clone(),
            agent_id: request.agent_id.clone(),
            session_id: request.session_id.clone(),
            default_result_format: master.default_result_format.clone(),
            max_tool_steps: self.config.max_tool_steps,
            step_timeout: self.config.step_timeout(),
        };
        let registry = AgentRegistry::build(&master.agents, &deps)?;

        let mut context = ExecutionContext::new(
            request.session_id.clone(),
            request.agent_id.clone(),
            request.clock.clone(),
        );
        context.set_flow_name(flow.name.clone());

        tracing::info!(
            trace_id = %context.trace_id,
            flow = %flow.name,
            agent_calls = flow.metadata.agent_calls,
            file_inputs = resolved.files.len(),
            extraction_errors = resolved.errors.len(),
            "flow prepared"
        );

        Ok(PreparedRun {
            request,
            master,
            flow,
            state,
            registry,
            accountant,
            context: Arc::new(Mutex::new(context)),
            sink,
        })
    }

    /// 执行已准备的请求；执行期的失败成为最后一个 `error` 事件
    #[tracing::instrument(level = "info", skip_all, fields(flow = %prepared.flow.name, session_id = %prepared.request.session_id))]
    pub async fn run(&self, prepared: PreparedRun) -> RunReport {
        let PreparedRun {
            flow,
            mut state,
            registry,
            accountant,
            context,
            sink,
            ..
        } = prepared;

        state.advance(ExecutionState::Running);
        let executor = FlowExecutor::new(
            registry,
            sink.clone(),
            context.clone(),
            ParallelConfig::from(&self.config),
        );

        let (result, error) = match executor.execute(&flow).await {
            Ok(value) => {
                sink.emit_with(|at| TraceChunk::FinalResponse {
                    name: flow.name.clone(),
                    result: value.clone(),
                    finished_at: at,
                })
                .await;
                state.advance(ExecutionState::Completed);
                (Some(value), None)
            }
            Err(err) => {
                tracing::error!(flow = %flow.name, error = %err, "flow execution failed");
                sink.emit(err.to_chunk()).await;
                {
                    let mut ctx = context.lock().await;
                    ctx.ok = false;
                    ctx.errors.push(err.to_string());
                }
                state.advance(ExecutionState::Failed(err.to_string()));
                (None, Some(err))
            }
        };

        let session = accountant.finalize(Utc::now()).await;
        sink.close().await;

        let context = context.lock().await.clone();
        RunReport {
            flow_name: flow.name,
            state,
            result,
            error,
            trace: sink.chunks().await,
            stats: executor.stats().await,
            context,
            session,
        }
    }

    /// 预检并执行，轨迹写入给定的 sink
    pub async fn execute(&self, request: ExecRequest, sink: TraceSink) -> FlowResult<RunReport> {
        let prepared = self.prepare(request, sink).await?;
        Ok(self.run(prepared).await)
    }

    pub async fn execute_buffered(&self, request: ExecRequest) -> FlowResult<RunReport> {
        self.execute(request, TraceSink::buffered()).await
    }

    /// 预检通过后在后台执行，返回 NDJSON 字节流
    pub async fn execute_streaming(
        &self,
        request: ExecRequest,
    ) -> FlowResult<ReceiverStream<Vec<u8>>> {
        let (sink, stream) = TraceSink::streaming(self.config.stream_buffer);
        let prepared = self.prepare(request, sink).await?;

        let engine = self.clone();
        tokio::spawn(async move {
            let report = engine.run(prepared).await;
            tracing::debug!(state = ?report.state, chunks = report.trace.len(), "streamed run finished");
        });
        Ok(stream)
    }

    /// 按输出模式处理请求
    pub async fn handle(&self, request: ExecRequest) -> ExecResponse {
        if request.is_streaming() {
            return match self.execute_streaming(request).await {
                Ok(stream) => ExecResponse::stream(stream),
                Err(err) => ExecResponse::error(&err),
            };
        }

        match self.execute_buffered(request).await {
            Ok(report) => match (&report.error, report.final_chunk()) {
                (Some(err), _) => ExecResponse::error(err),
                (None, Some(chunk)) => ExecResponse::final_response(chunk),
                (None, None) => ExecResponse::json(200, Value::Null),
            },
            Err(err) => ExecResponse::error(&err),
        }
    }
}
