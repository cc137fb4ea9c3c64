//! # AgentFlow Runtime - 流程执行器
//!
//! 按节点语义遍历编译后的步骤树：串行、并行、代理调用

use crate::agents::AgentRegistry;
use crate::parallel::{Branch, BranchOutcome, ParallelConfig, ParallelExecutor};
use crate::trace::TraceSink;
use agentflow_context::SharedContext;
use agentflow_core::{
    AgentCallError, AgentCallErrorKind, AgentCallStep, CompiledFlow, CompiledStep, CompositeStep,
    FlowError, FlowResult, TraceChunk,
};
use futures::FutureExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// 已完成步骤的输出，按稳定步骤名与代理名绑定
pub type Bindings = BTreeMap<String, Value>;

/// 单个步骤的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// 步骤结果
    pub value: Value,
    /// 该步骤（含子步骤）产生的绑定
    pub bindings: Bindings,
}

/// 执行统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    /// 完成的代理调用数
    pub agent_calls: usize,
    /// 模型往返次数
    pub model_calls: usize,
    /// 工具调用次数
    pub tool_calls: usize,
    /// 总执行时间
    pub total_duration: Duration,
}

/// 流程执行器
#[derive(Clone)]
pub struct FlowExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    registry: AgentRegistry,
    sink: TraceSink,
    context: SharedContext,
    parallel: ParallelConfig,
    stats: Mutex<ExecutionStats>,
}

impl FlowExecutor {
    /// 创建流程执行器
    pub fn new(
        registry: AgentRegistry,
        sink: TraceSink,
        context: SharedContext,
            parallel: ParallelConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                registry,
                sink,
                context,
                parallel,
                stats: Mutex::new(ExecutionStats::default()),
            }),
        }
    }

    /// 执行编译后的流程，返回根步骤的结果
    #[tracing::instrument(level = "info", skip(self, flow), fields(flow = %flow.name, steps = flow.metadata.total_steps))]
    pub async fn execute(&self, flow: &CompiledFlow) -> FlowResult<Value> {
        let start_time = Instant::now();

        #[cfg(feature = "detailed-logging")]
        {
            tracing::info!(flow = %flow.name, agent_calls = flow.metadata.agent_calls, max_depth = flow.metadata.max_depth, "开始执行流程");
        }

        let result = self.execute_step(flow.root.clone(), Bindings::new()).await;

        #[cfg(feature = "perf-metrics")]
        {
            self.inner.stats.lock().await.total_duration = start_time.elapsed();
        }
        #[cfg(not(feature = "perf-metrics"))]
        let _ = start_time;

        result.map(|outcome| outcome.value)
    }

    /// 执行统计
    pub async fn stats(&self) -> ExecutionStats {
        self.inner.stats.lock().await.clone()
    }

    /// 执行单个步骤（递归）
    pub fn execute_step(
        &self,
        step: CompiledStep,
        scope: Bindings,
    ) -> Branch<StepOutcome> {
        let this = self.clone();
        async move {
            #[cfg(feature = "detailed-logging")]
            {
                tracing::debug!(step = %step.name(), kind = step.kind().as_str(), bound = scope.len(), "执行节点");
            }

            match step {
                CompiledStep::AgentCall(call) => this.execute_agent_call(call, &scope).await,
                CompiledStep::Sequence(seq) => this.execute_sequence(seq, scope).await,
                CompiledStep::Parallel(par) => this.execute_parallel(par, scope).await,
            }
        }
        .boxed()
    }

    async fn execute_agent_call(
        &self,
        call: AgentCallStep,
        scope: &Bindings,
    ) -> FlowResult<StepOutcome> {
        self.inner.context.lock().await.start_step(call.name.clone());

        let message = call.bind(|name| scope.get(name).map(value_text));
        let input = serde_json::to_value(&message).unwrap_or(Value::Null);
        self.inner
            .sink
            .emit_with(|at| TraceChunk::FlowStart {
                name: call.agent.clone(),
                step: call.name.clone(),
                input,
                started_at: at,
            })
            .await;

        let result = match self.inner.registry.get(&call.agent) {
            Some(handle) => handle.invoke(&call.name, message).await,
            None => Err(AgentCallError::new(&call.agent, AgentCallErrorKind::UnknownAgent)),
        };

        match result {
            Ok(reply) => {
                self.inner.context.lock().await.end_step_success(&call.name);

                #[cfg(feature = "perf-metrics")]
                {
                    let mut stats = self.inner.stats.lock().await;
                    stats.agent_calls += 1;
                    stats.model_calls += reply.model_calls;
                    stats.tool_calls += reply.tool_calls;
                }

                let value = Value::String(reply.text);
                let mut bindings = Bindings::new();
                bindings.insert(call.name, value.clone());
                bindings.insert(call.agent, value.clone());
                Ok(StepOutcome { value, bindings })
            }
            Err(e) => {
                self.inner
                    .context
                    .lock()
                    .await
                    .end_step_failed(&call.name, &e.to_string());
                Err(e.into())
            }
        }
    }

    async fn execute_sequence(
        &self,
        seq: CompositeStep,
        mut scope: Bindings,
    ) -> FlowResult<StepOutcome> {
        let mut produced = Bindings::new();
        let mut last = Value::Null;
        let mut children = seq.steps.into_iter();

        while let Some(child) = children.next() {
            match self.execute_step(child, scope.clone()).await {
                Ok(outcome) => {
                    scope.extend(outcome.bindings.clone());
                    produced.extend(outcome.bindings);
                    last = outcome.value;
                }
                Err(e) => {
                    let mut ctx = self.inner.context.lock().await;
                    for skipped in children {
                        ctx.end_step_skipped(skipped.name(), "previous step failed");
                    }
                    return Err(e);
                }
            }
        }

        produced.insert(seq.name, last.clone());
        Ok(StepOutcome {
            value: last,
            bindings: produced,
        })
    }

    async fn execute_parallel(
        &self,
        par: CompositeStep,
        scope: Bindings,
    ) -> FlowResult<StepOutcome> {
        let names: Vec<String> = par.steps.iter().map(|s| s.name().to_string()).collect();
        let branches: Vec<Branch<StepOutcome>> = par
            .steps
            .into_iter()
            .map(|child| self.execute_step(child, scope.clone()))
            .collect();

        let outcomes = ParallelExecutor::with_config(self.inner.parallel.clone())
            .execute_branches(branches)
            .await;

        let mut values = Vec::with_capacity(names.len());
        let mut produced = Bindings::new();
        let mut first_error: Option<FlowError> = None;
        let mut aborted: Option<&str> = None;

        for (name, outcome) in names.iter().zip(outcomes) {
            match outcome {
                BranchOutcome::Completed(out) => {
                    values.push(out.value);
                    produced.extend(out.bindings);
                }
                BranchOutcome::Failed(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                BranchOutcome::Skipped => {
                    self.inner
                        .context
                        .lock()
                        .await
                        .end_step_skipped(name, "sibling failed");
                }
                BranchOutcome::Cancelled => {
                    self.inner
                        .context
                        .lock()
                        .await
                        .end_step_skipped(name, "cancelled");
                    aborted.get_or_insert(name.as_str());
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Some(name) = aborted {
            return Err(FlowError::Collaborator(anyhow::anyhow!(
                "parallel branch `{}` was aborted",
                name
            )));
        }

        let value = Value::Array(values);
        produced.insert(par.name, value.clone());
        Ok(StepOutcome {
            value,
            bindings: produced,
        })
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
