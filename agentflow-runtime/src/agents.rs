//! # AgentFlow Runtime - 代理注册表
//!
//! 为每个声明的代理构建可调用的句柄：模型、系统提示词、合并后的工具集，
//! 以及每次模型调用完成后触发的拦截器

use crate::tools::{tool_handle, SaveResultTool, SAVE_RESULTS_TOOL};
use crate::trace::TraceSink;
use crate::usage::UsageAccountant;
use agentflow_compiler::{AgentConfig, TemplateEngine};
use agentflow_context::{RequestClock, TokenUsage};
use agentflow_core::{
    AgentCallError, AgentCallErrorKind, ContentPart, LanguageModel, Message, ModelRequest,
    ModelResponse, ResultRepository, Role, Tool, ToolCall, ToolContext, ToolLookup, ToolSpec,
    TraceChunk,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// 构建注册表所需的依赖
#[derive(Clone)]
pub struct RegistryDeps {
    pub model: Arc<dyn LanguageModel>,
    pub tools: Arc<dyn ToolLookup>,
    pub results: Arc<dyn ResultRepository>,
    pub interceptor: StepInterceptor,
    pub template: TemplateEngine,
    pub clock: RequestClock,
    pub agent_id: String,
    pub session_id: String,
    pub default_result_format: String,
    pub max_tool_steps: u32,
    pub step_timeout: Option<Duration>,
}

/// 代理注册表
#[derive(Clone, Default)]
pub struct AgentRegistry {
    handles: HashMap<String, Arc<AgentHandle>>,
}

impl AgentRegistry {
    /// 为每个代理构建句柄
    #[tracing::instrument(level = "debug", skip_all, fields(agents = agents.len(), session_id = %deps.session_id))]
    pub fn build(agents: &[AgentConfig], deps: &RegistryDeps) -> Result<Self, AgentCallError> {
        let session_id = deps.session_id.as_str();
        let mut prompt_vars: Vec<(&str, &str)> = deps.clock.variables().to_vec();
        prompt_vars.push(("sessionId", session_id));

        let save_results: Arc<dyn Tool> = Arc::new(SaveResultTool::new(
            deps.results.clone(),
            deps.default_result_format.clone(),
        ));

        let mut handles = HashMap::new();
        for config in agents {
            let context = ToolContext {
                agent_id: deps.agent_id.clone(),
                session_id: deps.session_id.clone(),
                agent_name: config.name.clone(),
                step: String::new(),
            };

            let mut tools = BTreeMap::new();
            for binding in &config.tools {
                let tool = deps
                    .tools
                    .resolve(&binding.name, &binding.options, &context)
                    .map_err(|source| {
                        AgentCallError::new(
                            &config.name,
                            AgentCallErrorKind::Tool {
                                tool: binding.name.clone(),
                                source,
                            },
                        )
                    })?;
                tools.insert(tool_handle(&binding.name), tool);
            }
            tools.insert(SAVE_RESULTS_TOOL.to_string(), save_results.clone());

            let system = deps
                .template
                .render_pairs(&config.system, prompt_vars.iter().copied());

            let handle = AgentHandle {
                name: config.name.clone(),
                model: config.model.clone(),
                system,
                tools,
                context,
                client: deps.model.clone(),
                interceptor: deps.interceptor.clone(),
                max_tool_steps: deps.max_tool_steps.max(1),
                step_timeout: deps.step_timeout,
            };
            handles.insert(config.name.clone(), Arc::new(handle));
        }

        tracing::debug!(handles = handles.len(), "agent registry built");
        Ok(Self { handles })
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentHandle>> {
        self.handles.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// 一次代理调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    pub usage: TokenUsage,
    pub model_calls: usize,
    pub tool_calls: usize,
}

/// 可调用的代理句柄，除闭包捕获的配置外无状态
pub struct AgentHandle {
    name: String,
    model: String,
    system: String,
    tools: BTreeMap<String, Arc<dyn Tool>>,
    context: ToolContext,
    client: Arc<dyn LanguageModel>,
    interceptor: StepInterceptor,
    max_tool_steps: u32,
    step_timeout: Option<Duration>,
}

impl AgentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// 模型可见的工具句柄名
    pub fn tool_handles(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|(handle, tool)| ToolSpec {
                name: handle.clone(),
                ..tool.spec()
            })
            .collect()
    }

    /// 调用代理：模型往返 → 拦截器 → 若请求了工具则执行后继续
    #[tracing::instrument(level = "debug", skip(self, message), fields(agent = %self.name, model = %self.model))]
    pub async fn invoke(&self, step: &str, message: Message) -> Result<AgentReply, AgentCallError> {
        let mut history = vec![message];
        let mut reply = AgentReply {
            text: String::new(),
            usage: TokenUsage::default(),
            model_calls: 0,
            tool_calls: 0,
        };
        let specs = self.tool_specs();
        let context = ToolContext {
            step: step.to_string(),
            ..self.context.clone()
        };

        for round in 1..=self.max_tool_steps {
            let request = ModelRequest {
                model: self.model.clone(),
                system: self.system.clone(),
                messages: history.clone(),
                tools: specs.clone(),
            };
            let response = self.complete(request).await?;
            reply.model_calls += 1;
            reply.usage += response.usage;
            reply.text = response.text.clone();

            let mut assistant = Vec::new();
            if !response.text.is_empty() {
                assistant.push(ContentPart::text(&response.text));
            }
            for call in &response.tool_calls {
                assistant.push(ContentPart::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                });
            }
            let mut round_messages = vec![Message::new(Role::Assistant, assistant)];

            let mut results = Vec::new();
            let mut failure = None;
            for call in &response.tool_calls {
                match self.run_tool(call, &context).await {
                    Ok(result) => {
                        reply.tool_calls += 1;
                        results.push(ContentPart::ToolResult {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            result,
                        });
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            if !results.is_empty() {
                round_messages.push(Message::new(Role::Tool, results));
            }

            // usage of a completed model call is committed before any tool error surfaces
            self.interceptor
                .on_step_finish(&self.name, &self.model, step, &round_messages, &response)
                .await?;
            if let Some(e) = failure {
                return Err(e);
            }

            if response.tool_calls.is_empty() {
                return Ok(reply);
            }
            if round == self.max_tool_steps {
                tracing::warn!(agent = %self.name, rounds = round, "tool loop stopped at round limit");
                break;
            }
            history.extend(round_messages);
        }

        Ok(reply)
    }

    async fn run_tool(&self, call: &ToolCall, context: &ToolContext) -> Result<Value, AgentCallError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| {
            AgentCallError::new(&self.name, AgentCallErrorKind::UnknownTool(call.name.clone()))
        })?;
        tool.invoke(call.arguments.clone(), context)
            .await
            .map_err(|source| {
                AgentCallError::new(
                    &self.name,
                    AgentCallErrorKind::Tool {
                        tool: call.name.clone(),
                        source,
                    },
                )
            })
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, AgentCallError> {
        let call = self.client.complete(request);
        let result = match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AgentCallError::new(&self.name, AgentCallErrorKind::Timeout(limit)))?,
            None => call.await,
        };
        result.map_err(|e| AgentCallError::new(&self.name, AgentCallErrorKind::Model(e)))
    }
}

/// 模型调用完成拦截器：依次更新会话、统计/计费、发出 stepFinish
#[derive(Clone)]
pub struct StepInterceptor {
    accountant: UsageAccountant,
    sink: TraceSink,
}

impl StepInterceptor {
    pub fn new(accountant: UsageAccountant, sink: TraceSink) -> Self {
        Self { accountant, sink }
    }

    pub async fn on_step_finish(
        &self,
        agent: &str,
        model: &str,
        step: &str,
        messages: &[Message],
        response: &ModelResponse,
    ) -> Result<(), AgentCallError> {
        let now = chrono::Utc::now();
        let (session, usage) = self
            .accountant
            .record_session(response.usage, now)
            .await
            .map_err(|e| AgentCallError::new(agent, AgentCallErrorKind::Accounting(e.to_string())))?;

        self.accountant
            .record_stat(&usage, &response.finish_reason)
            .await;

        self.sink
            .emit_with(|at| TraceChunk::StepFinish {
                name: agent.to_string(),
                model: model.to_string(),
                step: step.to_string(),
                messages: messages.to_vec(),
                usage: response.usage,
                finish_reason: response.finish_reason.clone(),
                finished_at: at,
            })
            .await;

        tracing::debug!(
            agent = %agent,
            model = %model,
            step = %step,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            session_total = session.usage().total(),
            "step finished"
        );
        Ok(())
    }
}
