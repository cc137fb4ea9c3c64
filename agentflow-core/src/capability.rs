//! Capabilities the engine consumes from its collaborators.
//!
//! Model providers, tools, quota, persistence and billing live outside the
//! engine; it only sees them through these traits.

use crate::error::{ModelError, ToolError};
use crate::message::{Message, ToolCall};
use crate::usage::{AggregatedStats, UsageStat, UsageTotals};
use agentflow_context::{Session, TokenUsage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Where a tool is being invoked from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub agent_id: String,
    pub session_id: String,
    pub agent_name: String,
    pub step: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn invoke(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError>;

    fn name(&self) -> String {
        self.spec().name
    }
}

/// Resolves a tool binding (name + per-binding options) to an implementation.
pub trait ToolLookup: Send + Sync {
    fn resolve(
        &self,
        name: &str,
        options: &Value,
        context: &ToolContext,
    ) -> Result<Arc<dyn Tool>, ToolError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

/// One model round trip, keyed by model identifier in the request.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheck {
    pub agent_id: String,
    pub session_id: String,
    pub usage: UsageTotals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u64,
    pub budget: u64,
    pub reason: Option<String>,
}

impl QuotaDecision {
    pub fn allow(used: u64, budget: u64) -> Self {
        Self {
            allowed: true,
            used,
            budget,
            reason: None,
        }
    }

    pub fn deny(used: u64, budget: u64, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            used,
            budget,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn check(&self, check: &QuotaCheck) -> anyhow::Result<QuotaDecision>;
}

/// Token delta of one completed model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUsage {
    pub session_id: String,
    pub agent_id: String,
    pub delta: TokenUsage,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, session_id: &str) -> anyhow::Result<Option<Session>>;

    /// Find-or-create the session and add `usage.delta` to its counters.
    async fn record_usage(&self, usage: &SessionUsage) -> anyhow::Result<Session>;

    async fn finalize(&self, session_id: &str, at: DateTime<Utc>) -> anyhow::Result<Option<Session>>;
}

#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Append the record, merging it into an existing record of the same bucket.
    async fn aggregate(&self, stat: UsageStat) -> anyhow::Result<()>;

    async fn summary(&self, now: DateTime<Utc>) -> anyhow::Result<AggregatedStats>;
}

#[async_trait]
pub trait BillingService: Send + Sync {
    async fn report(&self, usage: &SessionUsage, stat: &UsageStat) -> anyhow::Result<()>;
}

/// A result persisted by an agent through the save-result tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub agent_id: String,
    pub session_id: String,
    pub content: String,
    pub format: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn save(&self, record: ResultRecord) -> anyhow::Result<()>;

    async fn find(&self, agent_id: &str, session_id: &str) -> anyhow::Result<Vec<ResultRecord>>;
}

/// Text extraction for document payloads (PDF, office files, scans).
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, mime_type: &str, bytes: &[u8]) -> anyhow::Result<String>;
}
