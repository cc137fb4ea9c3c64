//! # AgentFlow Context
//!
//! Per-execution context, request clock and session token accounting

mod clock;
mod session;

pub use clock::RequestClock;
pub use session::{Session, TokenUsage};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub trace_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub flow_name: String,
    pub clock: RequestClock,
    pub ok: bool,
    pub errors: Vec<String>,
    pub step_logs: Vec<StepLog>,
    pub started_at: Instant,
}

#[derive(Debug, Clone)]
pub struct StepLog {
    pub step_name: String,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub trace_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Running,
    Success,
    Failed,
    Skipped,
}

/// Counts of step logs by final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub running: usize,
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        clock: RequestClock,
    ) -> Self {
        Self::new_with_trace_id(
            Uuid::new_v4().to_string(),
            session_id,
            agent_id,
            clock,
        )
    }

    pub fn new_with_trace_id(
        trace_id: String,
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        clock: RequestClock,
    ) -> Self {
        Self {
            trace_id,
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            flow_name: String::new(),
            clock,
            ok: true,
            errors: Vec::new(),
            step_logs: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn set_flow_name(&mut self, flow_name: impl Into<String>) {
        self.flow_name = flow_name.into();
    }

    pub fn start_step(&mut self, step_name: String) {
        let step_log = StepLog {
            step_name: step_name.clone(),
            start_time: Instant::now(),
            end_time: None,
            status: StepStatus::Running,
            error_message: None,
            trace_id: self.trace_id.clone(),
        };
        self.step_logs.push(step_log);

        tracing::debug!(trace_id = %self.trace_id, step = %step_name, "step starting");
    }

    pub fn end_step_success(&mut self, step_name: &str) {
        if let Some(log) = self.running_step(step_name) {
            let now = Instant::now();
            log.end_time = Some(now);
            log.status = StepStatus::Success;
            let duration = now.duration_since(log.start_time);

            tracing::debug!(trace_id = %self.trace_id, step = %step_name, duration_ms = ?duration, "step success");
        }
    }

    pub fn end_step_failed(&mut self, step_name: &str, error: &str) {
        if let Some(log) = self.running_step(step_name) {
            let now = Instant::now();
            log.end_time = Some(now);
            log.status = StepStatus::Failed;
            log.error_message = Some(error.to_string());
            let duration = now.duration_since(log.start_time);

            tracing::error!(trace_id = %self.trace_id, step = %step_name, duration_ms = ?duration, error = %error, "step failed");
        }
        self.ok = false;
        self.errors
            .push(format!("[{}] {}: {}", self.trace_id, step_name, error));
    }

    /// Records a step that never ran because an earlier sibling failed.
    pub fn end_step_skipped(&mut self, step_name: &str, reason: &str) {
        let now = Instant::now();
        self.step_logs.push(StepLog {
            step_name: step_name.to_string(),
            start_time: now,
            end_time: Some(now),
            status: StepStatus::Skipped,
            error_message: None,
            trace_id: self.trace_id.clone(),
        });

        tracing::warn!(trace_id = %self.trace_id, step = %step_name, reason = %reason, "step skipped");
    }

    pub fn summary(&self) -> StepSummary {
        let mut summary = StepSummary {
            total: self.step_logs.len(),
            ..StepSummary::default()
        };
        for log in &self.step_logs {
            match log.status {
                StepStatus::Success => summary.success += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::Skipped => summary.skipped += 1,
                StepStatus::Running => summary.running += 1,
            }
        }
        summary
    }

    fn running_step(&mut self, step_name: &str) -> Option<&mut StepLog> {
        self.step_logs.iter_mut().rev().find(|log| {
            log.step_name == step_name && log.status == StepStatus::Running
        })
    }
}

pub type SharedContext = Arc<Mutex<ExecutionContext>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::new_with_trace_id(
            "trace-1".to_string(),
            "session-1",
            "agent-1",
            RequestClock::utc_now(),
        )
    }

    #[test]
    fn test_step_lifecycle() {
        let mut ctx = context();
        ctx.start_step("main/0:draft".to_string());
        ctx.end_step_success("main/0:draft");
        ctx.start_step("main/1:review".to_string());
        ctx.end_step_failed("main/1:review", "model unavailable");
        ctx.end_step_skipped("main/2:publish", "sibling failed");

        let summary = ctx.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!ctx.ok);
        assert_eq!(ctx.errors.len(), 1);
        assert!(ctx.errors[0].starts_with("[trace-1] main/1:review"));
    }

    #[test]
    fn test_end_step_targets_latest_running_entry() {
        let mut ctx = context();
        ctx.start_step("loop".to_string());
        ctx.end_step_success("loop");
        ctx.start_step("loop".to_string());
        ctx.end_step_failed("loop", "boom");

        assert_eq!(ctx.step_logs[0].status, StepStatus::Success);
        assert_eq!(ctx.step_logs[1].status, StepStatus::Failed);
    }
}
