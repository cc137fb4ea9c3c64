//! # AgentFlow Core - 编译后的执行计划
//!
//! 定义编译器输出、执行器输入的步骤树

use crate::error::ValidationError;
use crate::message::{ContentPart, ResolvedMessage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 编译后的流程 - 每次执行请求生成一份，不在请求之间共享
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledFlow {
    /// 流程名称
    pub name: String,
    /// 根步骤
    pub root: CompiledStep,
    /// 计划元数据
    pub metadata: PlanMetadata,
}

/// 步骤节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CompiledStep {
    /// 调用代理
    AgentCall(AgentCallStep),
    /// 串行执行子步骤
    Sequence(CompositeStep),
    /// 并行执行子步骤
    Parallel(CompositeStep),
}

/// 代理调用步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCallStep {
    /// 稳定的路径式步骤名
    pub name: String,
    /// 代理名称
    pub agent: String,
    /// 已解析的输入消息
    pub message: ResolvedMessage,
    /// 编译时未解析、留给运行时绑定的占位符
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub late_bindings: Vec<LateBinding>,
}

/// 消息中待绑定占位符的位置（`part` 号文本部分内的字节区间）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateBinding {
    pub part: usize,
    pub start: usize,
    pub end: usize,
    pub name: String,
}

impl AgentCallStep {
    /// 只替换记录下的占位符；`lookup` 返回 `None` 的保持原样
    pub fn bind<F>(&self, mut lookup: F) -> ResolvedMessage
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut message = self.message.clone();
        for slot in self.late_bindings.iter().rev() {
            let Some(ContentPart::Text { text }) = message.content.get_mut(slot.part) else {
                continue;
            };
            if slot.end > text.len() || !text.is_char_boundary(slot.start) || !text.is_char_boundary(slot.end) {
                continue;
            }
            if let Some(value) = lookup(&slot.name) {
                text.replace_range(slot.start..slot.end, &value);
            }
        }
        message
    }
}

/// 复合步骤（串行或并行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeStep {
    /// 稳定的路径式步骤名
    pub name: String,
    /// 子步骤
    pub steps: Vec<CompiledStep>,
}

/// 步骤类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    AgentCall,
    Sequence,
    Parallel,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::AgentCall => "agentCall",
            StepKind::Sequence => "sequence",
            StepKind::Parallel => "parallel",
        }
    }
}

/// 计划元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    /// 流程名称
    pub flow_name: String,
    /// 总步骤数（含复合步骤）
    pub total_steps: usize,
    /// 代理调用步骤数
    pub agent_calls: usize,
    /// 最大嵌套深度
    pub max_depth: usize,
}

impl CompiledStep {
    pub fn name(&self) -> &str {
        match self {
            CompiledStep::AgentCall(step) => &step.name,
            CompiledStep::Sequence(step) | CompiledStep::Parallel(step) => {
                &step.name
            }
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            CompiledStep::AgentCall(_) => StepKind::AgentCall,
            CompiledStep::Sequence(_) => StepKind::Sequence,
            CompiledStep::Parallel(_) => StepKind::Parallel,
        }
    }

    pub fn children(&self) -> &[CompiledStep] {
        match self {
            CompiledStep::AgentCall(_) => &[],
            CompiledStep::Sequence(step) | CompiledStep::Parallel(step) => {
                &step.steps
            }
        }
    }

    /// 深度优先遍历
    pub fn walk<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a CompiledStep),
    {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(CompiledStep::depth)
            .max()
            .unwrap_or(0)
    }
}

impl CompiledFlow {
    /// 创建编译后的流程并计算元数据
    pub fn new(name: impl Into<String>, root: CompiledStep) -> Self {
        let name = name.into();
        let mut total_steps = 0;
        let mut agent_calls = 0;
        root.walk(&mut |step| {
            total_steps += 1;
            if step.kind() == StepKind::AgentCall {
                agent_calls += 1;
            }
        });
        let metadata = PlanMetadata {
            flow_name: name.clone(),
            total_steps,
            agent_calls,
            max_depth: root.depth(),
        };

        Self {
            name,
            root,
            metadata,
        }
    }

    /// 流程引用的全部代理名称
    pub fn agent_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.root.walk(&mut |step| {
            if let CompiledStep::AgentCall(call) = step {
                names.insert(call.agent.as_str());
            }
        });
        names
    }

    /// 按名称查找步骤
    pub fn find_step(&self, name: &str) -> Option<&CompiledStep> {
        let mut found = None;
        self.root.walk(&mut |step| {
            if found.is_none() && step.name() == name {
                found = Some(step);
            }
        });
        found
    }

    /// 验证计划的有效性
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut result = Ok(());
        let mut names = BTreeSet::new();
        self.root.walk(&mut |step| {
            if result.is_err() {
                return;
            }
            if !names.insert(step.name()) {
                result = Err(ValidationError::InvalidDefinition(format!(
                    "duplicate step name {}",
                    step.name()
                )));
                return;
            }
            if step.kind() != StepKind::AgentCall && step.children().is_empty()
            {
                result = Err(ValidationError::EmptyComposite {
                    kind: step.kind().as_str().to_string(),
                    step: step.name().to_string(),
                });
            }
        });
        result
    }
}
