//! # AgentFlow Runtime
//!
//! Agent registry, flow execution, trace emission and usage accounting
//! for compiled agent flows

mod agents;
mod config;
mod engine;
mod executor;
mod parallel;
mod request;
mod response;
mod stores;
mod tools;
mod trace;
mod usage;

#[cfg(test)]
mod tests;

pub use agents::{AgentHandle, AgentRegistry, AgentReply, RegistryDeps, StepInterceptor};
pub use config::{EngineConfig, ParallelFailurePolicy};
pub use engine::{Collaborators, FlowEngine, PreparedRun, RunReport};
pub use executor::{Bindings, ExecutionStats, FlowExecutor, StepOutcome};
pub use parallel::{Branch, BranchOutcome, ParallelConfig, ParallelExecutor};
pub use request::{
    ExecBody, ExecMode, ExecRequest, OutputMode, DATETIME_HEADER, DATETIME_ISO_HEADER,
    SESSION_ID_HEADER, TIMEZONE_HEADER,
};
pub use response::{ExecResponse, ResponseBody};
pub use stores::{
    MemoryAgentRepository, MemoryResultRepository, MemorySessionRepository,
    MemoryStatsRepository, TokenBudgetQuota,
};
pub use tools::{tool_handle, SaveResultTool, ToolFactory, ToolRegistry, SAVE_RESULTS_TOOL};
pub use trace::TraceSink;
pub use usage::UsageAccountant;

/// Prelude module for runtime functionality
pub mod prelude {
    pub use crate::{
        Collaborators, EngineConfig, ExecRequest, ExecResponse, FlowEngine, FlowExecutor,
        MemoryAgentRepository, ParallelConfig, ParallelFailurePolicy, RunReport,
        ToolRegistry, TraceSink,
    };
}
