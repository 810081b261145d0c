//! 编排层错误类型
//!
//! 推理服务失败（网络、鉴权）原样上抛；解析失败在各自模块内降级为默认值，不会出现在这里；
//! 工具失败走纠错引擎，只有编排层无法继续时才以 AgentError 形式离开。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("A stream is already in progress")]
    AlreadyStreaming,

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No active plan to resume")]
    NothingToResume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_converts() {
        let e: AgentError = LlmError::Request("503".to_string()).into();
        assert!(matches!(e, AgentError::Llm(_)));
        assert_eq!(e.to_string(), "LLM error: Request failed: 503");
    }
}
