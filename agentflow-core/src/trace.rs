//! # AgentFlow Core - 执行轨迹事件
//!
//! 一次执行对外可见的全部记录，按发出顺序严格排列

use crate::message::Message;
use agentflow_context::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 轨迹事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TraceChunk {
    /// 代理调用开始
    #[serde(rename_all = "camelCase")]
    FlowStart {
        name: String,
        step: String,
        input: Value,
        started_at: DateTime<Utc>,
    },
    /// 一次模型往返完成
    #[serde(rename_all = "camelCase")]
    StepFinish {
        name: String,
        model: String,
        step: String,
        messages: Vec<Message>,
        usage: TokenUsage,
        finish_reason: String,
        finished_at: DateTime<Utc>,
    },
    /// 根步骤完成
    #[serde(rename_all = "camelCase")]
    FinalResponse {
        name: String,
        result: Value,
        finished_at: DateTime<Utc>,
    },
    /// 执行失败，总是最后一个事件
    Error { message: String },
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    FlowStart,
    StepFinish,
    FinalResponse,
    Error,
}

impl TraceChunk {
    pub fn error(message: impl Into<String>) -> Self {
        TraceChunk::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ChunkKind {
        match self {
            TraceChunk::FlowStart { .. } => ChunkKind::FlowStart,
            TraceChunk::StepFinish { .. } => ChunkKind::StepFinish,
            TraceChunk::FinalResponse { .. } => ChunkKind::FinalResponse,
            TraceChunk::Error { .. } => ChunkKind::Error,
        }
    }

    /// 事件时间戳；`error` 事件没有时间戳
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            TraceChunk::FlowStart { started_at, .. } => Some(*started_at),
            TraceChunk::StepFinish { finished_at, .. }
            | TraceChunk::FinalResponse { finished_at, .. } => {
                Some(*finished_at)
            }
            TraceChunk::Error { .. } => None,
        }
    }

    /// 事件名称（代理名或流程名）
    pub fn name(&self) -> Option<&str> {
        match self {
            TraceChunk::FlowStart { name, .. }
            | TraceChunk::StepFinish { name, .. }
            | TraceChunk::FinalResponse { name, .. } => Some(name),
            TraceChunk::Error { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TraceChunk::FinalResponse { .. } | TraceChunk::Error { .. }
        )
    }

    /// 序列化为一行 JSON（以换行结尾）
    pub fn to_json_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
