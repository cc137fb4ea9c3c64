use serde::Serialize;

/// 执行状态机：`Idle → Compiling → Running → {Completed | Failed}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum ExecutionState {
    /// 空闲状态
    Idle,
    /// 正在解析输入并编译流程
    Compiling,
    /// 运行中
    Running,
    /// 已完成
    Completed,
    /// 失败（终态）
    Failed(String),
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed(_))
    }

    /// 是否允许迁移到 `next`
    pub fn can_transition_to(&self, next: &ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Idle, Compiling)
                | (Compiling, Running)
                | (Compiling, Failed(_))
                | (Running, Completed)
                | (Running, Failed(_))
        )
    }

    /// 迁移状态；非法迁移被忽略并返回 `false`
    pub fn advance(&mut self, next: ExecutionState) -> bool {
        if !self.can_transition_to(&next) {
            tracing::warn!(from = ?self, to = ?next, "ignoring invalid state transition");
            return false;
        }
        *self = next;
        true
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        ExecutionState::Idle
    }
}
