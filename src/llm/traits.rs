//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Scripted）实现 LlmClient：complete（非流式）、complete_stream（流式片段）。
//! 流式片段是带类型的：文本增量、工具调用开始/增量/结束、推理增量、完成、错误。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::llm::Message;

/// 推理服务调用失败（网络、鉴权、限流）；规划/执行层不会自行重试，直接上抛给调用方
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Provider not configured")]
    NotConfigured,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Stream error: {0}")]
    Stream(String),
}

/// 流式响应片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFragment {
    TextDelta(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, delta: String },
    ToolCallEnd { id: String },
    ReasoningDelta(String),
    Done,
    Error(String),
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = StreamFragment> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回片段流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成，返回片段流
    async fn complete_stream(&self, messages: &[Message]) -> Result<FragmentStream, LlmError>;

    /// 是否已配置（有可用 API Key / 端点）；未配置的客户端不参与双层路由
    fn is_configured(&self) -> bool {
        true
    }

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
