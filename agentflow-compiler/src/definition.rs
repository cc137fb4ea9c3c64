use agentflow_core::ValidationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 存储的主代理定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAgent {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputDeclaration>,
    pub agents: Vec<AgentConfig>,
    pub flows: Vec<FlowDefinition>,
    #[serde(default = "default_result_format")]
    pub default_result_format: String,
}

fn default_result_format() -> String {
    "markdown".to_string()
}

/// 输入声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: InputKind,
    #[serde(default)]
    pub required: bool,
}

/// 输入类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    #[default]
    #[serde(alias = "text", alias = "string")]
    ShortText,
    LongText,
    Number,
    Json,
    Date,
    FileBase64,
}

impl InputKind {
    pub fn is_file(&self) -> bool {
        matches!(self, InputKind::FileBase64)
    }
}

/// 代理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
}

/// 工具绑定（名称 + 绑定级选项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,
    #[serde(default)]
    pub options: Value,
}

/// 流程定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub flow: StepNode,
}

impl FlowDefinition {
    /// 请求选择流程使用的键：`code`，缺省为 `name`
    pub fn key(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.name)
    }
}

/// 存储形式的步骤树
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepNode {
    #[serde(alias = "step")]
    AgentCall {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },
    Sequence { steps: Vec<StepNode> },
    Parallel { steps: Vec<StepNode> },
}

impl StepNode {
    pub fn agent_call(agent: impl Into<String>, input: impl Into<String>) -> Self {
        StepNode::AgentCall {
            agent: agent.into(),
            input: Some(input.into()),
        }
    }
}

impl MasterAgent {
    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|agent| agent.name == name)
    }

    /// 按 code（或 name）选择流程；未指定时取第一个
    pub fn flow(&self, code: Option<&str>) -> Result<&FlowDefinition, ValidationError> {
        match code {
            Some(code) => self
                .flows
                .iter()
                .find(|flow| flow.key() == code || flow.name == code)
                .ok_or_else(|| ValidationError::FlowNotFound(code.to_string())),
            None => self
                .flows
                .first()
                .ok_or_else(|| ValidationError::FlowNotFound("<default>".to_string())),
        }
    }
}

/// 按标识加载主代理定义
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find(&self, agent_id: &str) -> anyhow::Result<Option<MasterAgent>>;
}
