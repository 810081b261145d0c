//! ReAct 过程事件：用于流式展示思考、动作、观察与反思

use serde::Serialize;

use crate::tools::ToolParams;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// ReAct 步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用 LLM 思考
    Thinking,
    /// 思考内容（预览）
    ThinkingContent { text: String },
    /// 调用操作
    ToolCall { tool: String, args: ToolParams },
    /// 操作返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 操作失败
    ToolFailure { tool: String, reason: String },
    /// 反思
    Reflection { text: String, success: bool },
    /// 轨迹结束
    Finished { steps: usize, reason: String },
    /// 错误
    Error { text: String },
}
