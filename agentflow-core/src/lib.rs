//! # AgentFlow Core
//!
//! Compiled flow model, trace events, error taxonomy and collaborator
//! capabilities shared by the compiler and the runtime.

mod capability;
mod error;
mod executor;
mod message;
mod plan;
mod trace;
mod usage;


pub use capability::{
    BillingService, DocumentExtractor, LanguageModel, ModelRequest, ModelResponse,
    QuotaCheck, QuotaDecision, QuotaService, ResultRecord, ResultRepository,
    SessionRepository, SessionUsage, StatsRepository, Tool, ToolContext, ToolLookup,
    ToolSpec,
};
pub use error::{
    AgentCallError, AgentCallErrorKind, ExtractionError, ExtractionErrorKind, FlowError,
    FlowResult, ModelError, QuotaExceededError, StreamWriteError, ToolError,
    ValidationError,
};
pub use executor::ExecutionState;
pub use message::{ContentPart, Message, ResolvedMessage, Role, ToolCall};
pub use plan::{
    AgentCallStep, CompiledFlow, CompiledStep, CompositeStep, LateBinding, PlanMetadata, StepKind,
};
pub use trace::{ChunkKind, TraceChunk};
pub use usage::{AggregatedStats, StatKey, UsageStat, UsageTotals};

/// Prelude module for core functionality
pub mod prelude {
    pub use crate::{
        AgentCallError, CompiledFlow, CompiledStep, ContentPart, ExecutionState,
        FlowError, FlowResult, LanguageModel, Message, ResolvedMessage, Tool,
        ToolContext, ToolLookup, TraceChunk, ValidationError,
    };
    pub use agentflow_context::{ExecutionContext, SharedContext, TokenUsage};
}
