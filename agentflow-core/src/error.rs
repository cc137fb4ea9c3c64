use crate::trace::TraceChunk;
use std::time::Duration;
use thiserror::Error;

/// Malformed stored definitions, compiled flows or caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("agent `{agent}` referenced by step `{step}` is not declared")]
    UnknownAgent { agent: String, step: String },
    #[error("agent name `{0}` is declared more than once")]
    DuplicateAgent(String),
    #[error("input name `{0}` is declared more than once")]
    DuplicateInput(String),
    #[error("flow code `{0}` is declared more than once")]
    DuplicateFlow(String),
    #[error("flow `{0}` not found")]
    FlowNotFound(String),
    #[error("master agent `{0}` not found")]
    AgentNotFound(String),
    #[error("{kind} step `{step}` has no children")]
    EmptyComposite { kind: String, step: String },
    #[error("missing required input `{name}`")]
    MissingInput { name: String },
    #[error("invalid input `{name}`: {reason}")]
    InvalidInput { name: String, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    /// Payload is neither a data URL nor valid base64.
    Decode(String),
    /// No extraction path exists for this media type.
    Unsupported(String),
    /// The document extractor failed.
    Failed(String),
}

/// A bad file payload, localized to one declared input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot extract input `{input}`: {}", describe_extraction(.kind))]
pub struct ExtractionError {
    pub input: String,
    pub kind: ExtractionErrorKind,
}

fn describe_extraction(kind: &ExtractionErrorKind) -> String {
    match kind {
        ExtractionErrorKind::Decode(reason) => format!("decode failed ({reason})"),
        ExtractionErrorKind::Unsupported(mime) => {
            format!("unsupported media type {mime}")
        }
        ExtractionErrorKind::Failed(reason) => format!("extraction failed ({reason})"),
    }
}

impl ExtractionError {
    pub fn new(input: impl Into<String>, kind: ExtractionErrorKind) -> Self {
        Self {
            input: input.into(),
            kind,
        }
    }
}

/// Failure reported by a language model capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model response invalid: {0}")]
    InvalidResponse(String),
}

/// Failure reported by a tool capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution error: {0}")]
    Execution(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentCallErrorKind {
    #[error("agent is not registered")]
    UnknownAgent,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("tool `{tool}` failed: {source}")]
    Tool { tool: String, source: ToolError },
    #[error("model requested unknown tool `{0}`")]
    UnknownTool(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("usage accounting failed: {0}")]
    Accounting(String),
}

/// A model or tool failure inside one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("agent `{agent}` failed: {kind}")]
pub struct AgentCallError {
    pub agent: String,
    pub kind: AgentCallErrorKind,
}

impl AgentCallError {
    pub fn new(agent: impl Into<String>, kind: AgentCallErrorKind) -> Self {
        Self {
            agent: agent.into(),
            kind,
        }
    }
}

/// Pre-flight quota denial.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("quota exceeded: {reason} (used {used} of {allowed} tokens)")]
pub struct QuotaExceededError {
    pub reason: String,
    pub used: u64,
    pub allowed: u64,
}

/// The outbound trace channel rejected a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("trace stream write failed: {message}")]
pub struct StreamWriteError {
    pub message: String,
}

/// Every way a flow execution can fail.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    AgentCall(#[from] AgentCallError),
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceededError),
    #[error(transparent)]
    StreamWrite(#[from] StreamWriteError),
    #[error("collaborator failed: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl FlowError {
    /// Response status used when this error ends a request.
    pub fn status_code(&self) -> u16 {
        match self {
            FlowError::Validation(_) | FlowError::Extraction(_) => 400,
            FlowError::QuotaExceeded(_) => 403,
            _ => 499,
        }
    }

    pub fn to_chunk(&self) -> TraceChunk {
        TraceChunk::error(self.to_string())
    }

    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            FlowError::Validation(_)
                | FlowError::Extraction(_)
                | FlowError::QuotaExceeded(_)
        )
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
