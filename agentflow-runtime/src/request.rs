use agentflow_context::RequestClock;
use agentflow_core::ValidationError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SESSION_ID_HEADER: &str = "agent-session-id";
pub const DATETIME_ISO_HEADER: &str = "current-datetime-iso";
pub const DATETIME_HEADER: &str = "current-datetime";
pub const TIMEZONE_HEADER: &str = "current-timezone";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMode {
    #[default]
    Stream,
    #[serde(alias = "buffered")]
    Buffer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecMode {
    #[default]
    Sync,
    Async,
}

/// Request body of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecBody {
    pub output_mode: OutputMode,
    pub exec_mode: ExecMode,
    pub flow: Option<String>,
    pub input: Value,
}

/// One execution request against a stored master agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub agent_id: String,
    pub session_id: String,
    pub clock: RequestClock,
    pub output_mode: OutputMode,
    pub exec_mode: ExecMode,
    pub flow: Option<String>,
    pub input: Value,
}

impl ExecRequest {
    /// Synchronous streaming request with a fresh session and the server clock.
    pub fn new(agent_id: impl Into<String>, input: Value) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: Uuid::new_v4().to_string(),
            clock: RequestClock::utc_now(),
            output_mode: OutputMode::Stream,
            exec_mode: ExecMode::Sync,
            flow: None,
            input,
        }
    }

    /// Builds a request from raw headers and a JSON body. Header names are case-insensitive.
    pub fn from_parts<I, K, V>(
        agent_id: impl Into<String>,
        headers: I,
        body: &Value,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let agent_id = agent_id.into();
        if agent_id.trim().is_empty() {
            return Err(ValidationError::InvalidRequest("empty agent id".to_string()));
        }

        let mut session_id = None;
        let mut iso = None;
        let mut local = None;
        let mut timezone = None;
        for (name, value) in headers {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match name.as_ref().to_ascii_lowercase().as_str() {
                SESSION_ID_HEADER => session_id = Some(value.to_string()),
                DATETIME_ISO_HEADER => iso = Some(value.to_string()),
                DATETIME_HEADER => local = Some(value.to_string()),
                TIMEZONE_HEADER => timezone = Some(value.to_string()),
                _ => {}
            }
        }

        let body: ExecBody = if body.is_null() {
            ExecBody::default()
        } else {
            serde_json::from_value(body.clone())
                .map_err(|e| ValidationError::InvalidRequest(e.to_string()))?
        };

        let server = RequestClock::at(Utc::now());
        let clock = RequestClock::new(
            iso.unwrap_or(server.current_date_time_iso),
            local.unwrap_or(server.current_local_date_time),
            timezone.unwrap_or(server.current_timezone),
        );

        Ok(Self {
            agent_id,
            session_id: session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            clock,
            output_mode: body.output_mode,
            exec_mode: body.exec_mode,
            flow: body.flow,
            input: body.input,
        })
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_clock(mut self, clock: RequestClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_flow(mut self, flow: impl Into<String>) -> Self {
        self.flow = Some(flow.into());
        self
    }

    pub fn buffered(mut self) -> Self {
        self.output_mode = OutputMode::Buffer;
        self
    }

    pub fn with_exec_mode(mut self, mode: ExecMode) -> Self {
        self.exec_mode = mode;
        self
    }

    /// Only synchronous stream requests are streamed; everything else is buffered.
    pub fn is_streaming(&self) -> bool {
        self.output_mode == OutputMode::Stream && self.exec_mode == ExecMode::Sync
    }
}
