//! # AgentFlow Compiler
//!
//! Stored agent definitions, input resolution and flow compilation

mod compiler;
mod definition;
mod loader;
mod media;
mod schema;
mod template;
mod variables;


pub use compiler::*;
pub use definition::*;
pub use loader::*;
pub use media::*;
pub use schema::*;
pub use template::*;
pub use variables::*;

/// Prelude module for compiler functionality
pub mod prelude {
    pub use crate::{
        AgentConfig, AgentRepository, FlowCompiler, FlowDefinition, InputDeclaration,
        InputKind, InputSchema, MasterAgent, MasterAgentLoader, ResolvedInputs, StepNode,
        TemplateEngine, VariableResolver,
    };
}
