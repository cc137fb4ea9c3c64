//! # AgentFlow - Multi-Agent Flow Execution Engine
//!
//! AgentFlow runs stored master agents: it resolves caller inputs, compiles the
//! selected flow into a tree of agent calls, executes it with sequence and
//! parallel semantics, streams a trace of every model round trip and accounts
//! token usage per session.
//!
//! ## Features
//!
//! - `parallel` (default): concurrent execution of `parallel` nodes
//! - `perf-metrics` (default): execution statistics in run reports
//! - `logger` (default): tracing initialisation and run summaries
//! - `detailed-logging`: per-node debug logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//!
//! let agents = Arc::new(MemoryAgentRepository::new());
//! agents.insert(MasterAgentLoader::from_yaml_file("writer.yaml")?).await;
//!
//! let engine = FlowEngine::new(Collaborators::new(agents, model), EngineConfig::default())?;
//! let report = engine
//!     .execute_buffered(ExecRequest::new("writer", json!({"topic": "rust"})))
//!     .await?;
//! println!("{:?}", report.result);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use agentflow_compiler as compiler;
pub use agentflow_context as context;
pub use agentflow_core::*;
pub use agentflow_runtime as runtime;

#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
pub use agentflow_logger as logger;

/// Prelude module for easy imports
pub mod prelude {
    pub use agentflow_compiler::prelude::*;
    pub use agentflow_context::{ExecutionContext, RequestClock, SharedContext, TokenUsage};
    pub use agentflow_core::prelude::*;
    pub use agentflow_runtime::prelude::*;
    pub use agentflow_runtime::{ExecMode, OutputMode, ResponseBody};

    #[cfg(feature = "perf-metrics")]
    pub use agentflow_runtime::ExecutionStats;

    #[cfg(feature = "logger")]
    #[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
    pub use agentflow_logger::{init_tracing, RunLogger, RunSummary};

    pub use serde_json::json;
    pub use std::sync::Arc;
}
