//! # AgentFlow Logger
//!
//! Tracing initialisation and structured run summaries for AgentFlow

use agentflow_context::{ExecutionContext, StepStatus, StepSummary, TokenUsage};
use agentflow_core::{ChunkKind, ExecutionState, TraceChunk};
use agentflow_runtime::RunReport;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Initialize a human-readable tracing subscriber driven by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Initialize a JSON tracing subscriber driven by `RUST_LOG`
pub fn init_json_tracing() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Counts of trace chunks by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
    pub flow_start: usize,
    pub step_finish: usize,
    pub final_response: usize,
    pub error: usize,
}

impl ChunkCounts {
    pub fn from_trace(trace: &[TraceChunk]) -> Self {
        let mut counts = Self::default();
        for chunk in trace {
            match chunk.kind() {
                ChunkKind::FlowStart => counts.flow_start += 1,
                ChunkKind::StepFinish => counts.step_finish += 1,
                ChunkKind::FinalResponse => counts.final_response += 1,
                ChunkKind::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.flow_start + self.step_finish + self.final_response + self.error
    }
}

/// Summary of one finished execution
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub trace_id: String,
    pub session_id: String,
    pub flow_name: String,
    pub succeeded: bool,
    pub steps: StepSummary,
    pub chunks: ChunkCounts,
    /// Usage reported by the step-finish chunks of this run
    pub usage: TokenUsage,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        let usage = report
            .trace
            .iter()
            .filter_map(|chunk| match chunk {
                TraceChunk::StepFinish { usage, .. } => Some(*usage),
                _ => None,
            })
            .sum();

        Self {
            trace_id: report.context.trace_id.clone(),
            session_id: report.context.session_id.clone(),
            flow_name: report.flow_name.clone(),
            succeeded: report.state == ExecutionState::Completed,
            steps: report.context.summary(),
            chunks: ChunkCounts::from_trace(&report.trace),
            usage,
            error: report.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Logger for AgentFlow runs
pub struct RunLogger {
    pub trace_id: String,
}

impl RunLogger {
    /// Create a new logger
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a logger with a specific trace ID
    pub fn with_trace_id(trace_id: String) -> Self {
        Self { trace_id }
    }

    /// Logger bound to the trace ID of an execution
    pub fn for_context(context: &ExecutionContext) -> Self {
        Self::with_trace_id(context.trace_id.clone())
    }

    pub fn info(&self, message: &str) {
        info!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(trace_id = %self.trace_id, "{}", message);
    }

    /// Log the summary of a finished run and return it
    pub fn log_report(&self, report: &RunReport) -> RunSummary {
        let summary = RunSummary::from_report(report);
        info!(
            trace_id = %summary.trace_id,
            session_id = %summary.session_id,
            flow = %summary.flow_name,
            succeeded = summary.succeeded,
            steps = summary.steps.total,
            success = summary.steps.success,
            failed = summary.steps.failed,
            skipped = summary.steps.skipped,
            chunks = summary.chunks.total(),
            step_finish = summary.chunks.step_finish,
            prompt_tokens = summary.usage.prompt_tokens,
            completion_tokens = summary.usage.completion_tokens,
            "Flow run summary"
        );
        if let Some(session) = &report.session {
            debug!(
                trace_id = %summary.trace_id,
                session_id = %session.id,
                session_tokens = session.usage().total(),
                finalized = session.finalized_at.is_some(),
                "Session totals"
            );
        }
        if let Some(err) = &summary.error {
            error!(trace_id = %summary.trace_id, flow = %summary.flow_name, "Flow error: {}", err);
        }
        summary
    }

    /// Log execution context summary
    pub fn log_context_summary(&self, context: &ExecutionContext) {
        let steps = context.summary();
        info!(
            trace_id = %context.trace_id,
            flow = %context.flow_name,
            total_steps = steps.total,
            success = steps.success,
            failed = steps.failed,
            skipped = steps.skipped,
            errors = context.errors.len(),
            elapsed_ms = context.started_at.elapsed().as_millis(),
            "Execution context summary"
        );

        for error in &context.errors {
            error!(trace_id = %context.trace_id, "Flow error: {}", error);
        }
    }

    /// Log step execution details
    pub fn log_step_details(&self, context: &ExecutionContext) {
        for step_log in &context.step_logs {
            let duration = step_log
                .end_time
                .map(|end| end.duration_since(step_log.start_time))
                .unwrap_or_default();

            match step_log.status {
                StepStatus::Success => {
                    info!(
                        trace_id = %step_log.trace_id,
                        step_name = %step_log.step_name,
                        duration_ms = duration.as_millis(),
                        "Step completed successfully"
                    );
                }
                StepStatus::Failed => {
                    error!(
                        trace_id = %step_log.trace_id,
                        step_name = %step_log.step_name,
                        duration_ms = duration.as_millis(),
                        error = %step_log.error_message.as_deref().unwrap_or("Unknown error"),
                        "Step failed"
                    );
                }
                StepStatus::Skipped => {
                    warn!(
                        trace_id = %step_log.trace_id,
                        step_name = %step_log.step_name,
                        "Step skipped"
                    );
                }
                StepStatus::Running => {
                    warn!(
                        trace_id = %step_log.trace_id,
                        step_name = %step_log.step_name,
                        "Step still running"
                    );
                }
            }
        }
    }
}

impl Default for RunLogger {
    fn default() -> Self {
        Self::new()
    }
}
