use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 并行分支失败时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelFailurePolicy {
    /// 已派发的兄弟分支继续运行直到结束
    #[default]
    CompleteInFlight,
    /// 第一个失败立即丢弃仍在运行的兄弟分支
    CancelSiblings,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrently running children of one parallel node (None for unlimited)
    pub max_concurrency: Option<usize>,
    /// Timeout of one model round trip, in milliseconds
    pub step_timeout_ms: Option<u64>,
    /// Maximum model round trips per agent invocation
    pub max_tool_steps: u32,
    pub parallel_failure: ParallelFailurePolicy,
    /// Inject every declared input into steps that reference none
    pub default_injection: bool,
    /// Hand document payloads to the document extractor
    pub extract_documents: bool,
    /// Fail the request when a file input cannot be extracted
    pub strict_extraction: bool,
    /// Outbound stream channel capacity
    pub stream_buffer: usize,
    pub stats_event_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            step_timeout_ms: None,
            max_tool_steps: 5,
            parallel_failure: ParallelFailurePolicy::CompleteInFlight,
            default_injection: true,
            extract_documents: true,
            strict_extraction: false,
            stream_buffer: 64,
            stats_event_name: "flow".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).with_context(|| "Failed to parse engine config")
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    /// Set maximum concurrency
    pub fn max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = Some(concurrency);
        self
    }

    /// Set model round trip timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn max_tool_steps(mut self, steps: u32) -> Self {
        self.max_tool_steps = steps.max(1);
        self
    }

    /// Drop in-flight siblings on the first parallel failure
    pub fn with_cancel_siblings(mut self) -> Self {
        self.parallel_failure = ParallelFailurePolicy::CancelSiblings;
        self
    }

    pub fn default_injection(mut self, enabled: bool) -> Self {
        self.default_injection = enabled;
        self
    }

    pub fn extract_documents(mut self, enabled: bool) -> Self {
        self.extract_documents = enabled;
        self
    }

    pub fn strict_extraction(mut self, enabled: bool) -> Self {
        self.strict_extraction = enabled;
        self
    }

    pub fn stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }
}
