//! # AgentFlow Compiler - 流程编译器
//!
//! 将存储的步骤树与解析后的输入编译为可执行的步骤树

use crate::definition::{InputDeclaration, MasterAgent, StepNode};
use crate::template::TemplateEngine;
use crate::variables::{ResolvedFile, ResolvedInputs};
use agentflow_core::{
    AgentCallStep, CompiledFlow, CompiledStep, CompositeStep, ContentPart, LateBinding, Message,
    ValidationError,
};
use std::collections::HashSet;

/// 流程编译器 - 纯函数：相同定义 + 相同输入 ⇒ 相同输出
#[derive(Debug, Clone)]
pub struct FlowCompiler {
    template: TemplateEngine,
    default_injection: bool,
}

impl FlowCompiler {
    /// 创建流程编译器（默认开启缺省注入）
    pub fn new(template: TemplateEngine) -> Self {
        Self {
            template,
            default_injection: true,
        }
    }

    /// 未引用任何变量时是否注入全部声明的输入
    pub fn with_default_injection(mut self, enabled: bool) -> Self {
        self.default_injection = enabled;
        self
    }

    /// 编译流程
    #[tracing::instrument(level = "debug", skip_all, fields(flow = %flow_code.unwrap_or("<default>")))]
    pub fn compile(
        &self,
        master: &MasterAgent,
        flow_code: Option<&str>,
        inputs: &ResolvedInputs,
    ) -> Result<CompiledFlow, ValidationError> {
        let definition = master.flow(flow_code)?;
        let agents: HashSet<&str> =
            master.agents.iter().map(|a| a.name.as_str()).collect();

        let scope = CompileScope {
            agents: &agents,
            declarations: &master.inputs,
            inputs,
        };
        let root = self.compile_node(&definition.flow, definition.name.clone(), &scope)?;
        let compiled = CompiledFlow::new(definition.name.clone(), root);

        tracing::debug!(
            total_steps = compiled.metadata.total_steps,
            agent_calls = compiled.metadata.agent_calls,
            max_depth = compiled.metadata.max_depth,
            "flow compiled"
        );
        Ok(compiled)
    }

    fn compile_node(
        &self,
        node: &StepNode,
        name: String,
        scope: &CompileScope<'_>,
    ) -> Result<CompiledStep, ValidationError> {
        match node {
            StepNode::AgentCall { agent, input } => {
                if !scope.agents.contains(agent.as_str()) {
                    return Err(ValidationError::UnknownAgent {
                        agent: agent.clone(),
                        step: name,
                    });
                }
                let (message, late_bindings) =
                    self.build_message(input.as_deref().unwrap_or(""), scope);
                Ok(CompiledStep::AgentCall(AgentCallStep {
                    name,
                    agent: agent.clone(),
                    message,
                    late_bindings,
                }))
            }
            StepNode::Sequence { steps } => Ok(CompiledStep::Sequence(
                self.compile_composite("sequence", steps, name, scope)?,
            )),
            StepNode::Parallel { steps } => Ok(CompiledStep::Parallel(
                self.compile_composite("parallel", steps, name, scope)?,
            )),
        }
    }

    fn compile_composite(
        &self,
        kind: &str,
        steps: &[StepNode],
        name: String,
        scope: &CompileScope<'_>,
    ) -> Result<CompositeStep, ValidationError> {
        if steps.is_empty() {
            return Err(ValidationError::EmptyComposite {
                kind: kind.to_string(),
                step: name,
            });
        }

        let children = steps
            .iter()
            .enumerate()
            .map(|(index, child)| {
                let label = match child {
                    StepNode::AgentCall { agent, .. } => agent.as_str(),
                    StepNode::Sequence { .. } => "sequence",
                    StepNode::Parallel { .. } => "parallel",
                };
                self.compile_node(child, format!("{name}/{index}:{label}"), scope)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompositeStep {
            name,
            steps: children,
        })
    }

    /// 将模板字符串改写为多部分消息，并记录留给运行时绑定的占位符
    fn build_message(
        &self,
        template: &str,
        scope: &CompileScope<'_>,
    ) -> (Message, Vec<LateBinding>) {
        let inputs = scope.inputs;
        let referenced = self.template.placeholders(template);
        let fallback = referenced.is_empty() && self.default_injection;
        let injected: Vec<String> = if fallback {
            scope.declarations.iter().map(|d| d.name.clone()).collect()
        } else {
            referenced
        };

        // 文件占位符从文本中移除；未声明的名称留给运行时绑定
        let (text, mut late_bindings) = self.template.render_with_slots(template, |name| {
            if let Some(value) = inputs.variables.get(name) {
                Some(value.clone())
            } else if scope.is_declared(name) {
                Some(String::new())
            } else {
                None
            }
        });

        let mut content = Vec::new();
        if text.trim().is_empty() {
            late_bindings.clear();
        } else {
            content.push(ContentPart::text(text));
        }
        for name in &injected {
            if fallback {
                if let Some(value) = inputs.variables.get(name) {
                    content.push(ContentPart::text(format!("{name}: {value}")));
                }
            }
            if let Some(files) = inputs.files.get(name) {
                content.extend(files.iter().map(file_part));
            }
        }

        (Message::user(content), late_bindings)
    }
}

struct CompileScope<'a> {
    agents: &'a HashSet<&'a str>,
    declarations: &'a [InputDeclaration],
    inputs: &'a ResolvedInputs,
}

impl CompileScope<'_> {
    fn is_declared(&self, name: &str) -> bool {
        self.declarations.iter().any(|d| d.name == name)
    }
}

fn file_part(file: &ResolvedFile) -> ContentPart {
    match file {
        ResolvedFile::Image { mime_type, data } => ContentPart::image(mime_type, data),
        ResolvedFile::Text { text, .. } => ContentPart::text(text),
    }
}
