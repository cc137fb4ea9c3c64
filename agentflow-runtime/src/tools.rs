use agentflow_core::{
    ResultRecord, ResultRepository, Tool, ToolContext, ToolError, ToolLookup, ToolSpec,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Builds a tool instance from per-binding options.
pub type ToolFactory =
    Arc<dyn Fn(&Value, &ToolContext) -> Result<Arc<dyn Tool>, ToolError> + Send + Sync>;

/// String-keyed tool lookup.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    factories: HashMap<String, ToolFactory>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory invoked once per binding
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value, &ToolContext) -> Result<Arc<dyn Tool>, ToolError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register a tool instance shared by every binding
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        self.register(name, move |_, _| Ok(tool.clone()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ToolLookup for ToolRegistry {
    fn resolve(
        &self,
        name: &str,
        options: &Value,
        context: &ToolContext,
    ) -> Result<Arc<dyn Tool>, ToolError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        factory(options, context)
    }
}

/// Fresh model-facing handle for a tool binding: `<toolName>_<8 hex>`.
pub fn tool_handle(tool_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", tool_name, &id[..8])
}

pub const SAVE_RESULTS_TOOL: &str = "saveResults";

/// Standing tool that persists an agent's final artifact.
pub struct SaveResultTool {
    repository: Arc<dyn ResultRepository>,
    default_format: String,
}

impl SaveResultTool {
    pub fn new(repository: Arc<dyn ResultRepository>, default_format: impl Into<String>) -> Self {
        Self {
            repository,
            default_format: default_format.into(),
        }
    }
}

#[async_trait]
impl Tool for SaveResultTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: SAVE_RESULTS_TOOL.to_string(),
            description: "Save the final result of the conversation".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "format": {"type": "string", "description": "Result format, e.g. markdown or json"},
                    "result": {"type": "string", "description": "The result content"}
                },
                "required": ["result"]
            }),
        }
    }

    async fn invoke(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let content = match args.get("result") {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => return Err(ToolError::InvalidArguments("missing `result`".to_string())),
        };
        let format = args
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_format)
            .to_string();

        let now = Utc::now();
        let record = ResultRecord {
            agent_id: context.agent_id.clone(),
            session_id: context.session_id.clone(),
            content,
            format: format.clone(),
            created_at: now,
            updated_at: now,
            finalized_at: Some(now),
        };
        self.repository
            .save(record)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        tracing::debug!(agent = %context.agent_name, session_id = %context.session_id, format = %format, "result saved");
        Ok(json!({"saved": true, "format": format}))
    }
}
