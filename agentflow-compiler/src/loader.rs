use crate::definition::{MasterAgent, StepNode};
use agentflow_core::ValidationError;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// 主代理加载器，支持从文件或字符串加载定义
pub struct MasterAgentLoader;

impl MasterAgentLoader {
    /// 从 YAML 文件加载主代理定义
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<MasterAgent> {
        let content = fs::read_to_string(&path).with_context(|| {
            format!("Failed to read YAML file: {:?}", path.as_ref())
        })?;
        Self::from_yaml_str(&content)
    }

    /// 从 YAML 字符串加载主代理定义
    pub fn from_yaml_str(content: &str) -> Result<MasterAgent> {
        serde_yaml::from_str(content)
            .with_context(|| "Failed to parse YAML content")
    }

    /// 从 JSON 文件加载主代理定义
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<MasterAgent> {
        let content = fs::read_to_string(&path).with_context(|| {
            format!("Failed to read JSON file: {:?}", path.as_ref())
        })?;
        Self::from_json_str(&content)
    }

    /// 从 JSON 字符串加载主代理定义
    pub fn from_json_str(content: &str) -> Result<MasterAgent> {
        serde_json::from_str(content)
            .with_context(|| "Failed to parse JSON content")
    }

    /// 验证主代理定义的基本有效性
    pub fn validate(agent: &MasterAgent) -> Result<(), ValidationError> {
        if agent.agents.is_empty() {
            return Err(ValidationError::InvalidDefinition(
                "master agent must declare at least one agent".to_string(),
            ));
        }
        if agent.flows.is_empty() {
            return Err(ValidationError::InvalidDefinition(
                "master agent must declare at least one flow".to_string(),
            ));
        }

        // 检查代理名称的唯一性
        let mut agent_names = HashSet::new();
        for config in &agent.agents {
            if !agent_names.insert(config.name.as_str()) {
                return Err(ValidationError::DuplicateAgent(config.name.clone()));
            }
        }

        // 检查输入名称的唯一性
        let mut input_names = HashSet::new();
        for input in &agent.inputs {
            if !input_names.insert(input.name.as_str()) {
                return Err(ValidationError::DuplicateInput(input.name.clone()));
            }
        }

        // 检查流程 code 的唯一性与步骤结构
        let mut flow_keys = HashSet::new();
        for flow in &agent.flows {
            if !flow_keys.insert(flow.key()) {
                return Err(ValidationError::DuplicateFlow(flow.key().to_string()));
            }
            Self::validate_node(&flow.flow, &flow.name)?;
        }

        Ok(())
    }

    fn validate_node(node: &StepNode, path: &str) -> Result<(), ValidationError> {
        let (kind, steps) = match node {
            StepNode::AgentCall { .. } => return Ok(()),
            StepNode::Sequence { steps } => ("sequence", steps),
            StepNode::Parallel { steps } => ("parallel", steps),
        };
        if steps.is_empty() {
            return Err(ValidationError::EmptyComposite {
                kind: kind.to_string(),
                step: path.to_string(),
            });
        }
        for (index, child) in steps.iter().enumerate() {
            Self::validate_node(child, &format!("{path}/{index}"))?;
        }
        Ok(())
    }
}
