//! 流的下游：UI 更新、工具调用分派、完成与错误回调

use serde::Serialize;

use crate::tools::ToolParams;

/// 工具调用的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeSource {
    /// 提供方的结构化工具调用片段（start/delta/end）
    Structured,
    /// 正文中的 [ACTION: ...] 信封
    Text,
}

/// 一次完整的工具调用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallEnvelope {
    pub id: Option<String>,
    pub operation: String,
    pub params: ToolParams,
    /// 结构化调用的原始参数文本
    pub raw_arguments: String,
    pub source: EnvelopeSource,
}

impl ToolCallEnvelope {
    /// 由结构化片段组装；参数为 JSON 对象时展开为字符串表，否则保留原文
    pub fn structured(id: String, operation: String, raw_arguments: String) -> Self {
        let params = match serde_json::from_str::<serde_json::Value>(&raw_arguments) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
            _ => ToolParams::new(),
        };
        Self {
            id: Some(id),
            operation,
            params,
            raw_arguments,
            source: EnvelopeSource::Structured,
        }
    }

    pub fn text(operation: String, params: ToolParams) -> Self {
        Self {
            id: None,
            operation,
            params,
            raw_arguments: String::new(),
            source: EnvelopeSource::Text,
        }
    }
}

/// 流的接收方；回调在协调器所在任务中同步调用，实现方不应阻塞
pub trait StreamSink: Send + Sync {
    /// 一批可显示的文本
    fn on_update(&self, text: &str);

    fn on_tool_call(&self, _call: &ToolCallEnvelope) {}

    fn on_reasoning(&self, _text: &str) {}

    /// 正常结束，附完整文本
    fn on_complete(&self, full_text: &str);

    /// 终止性错误（含取消）
    fn on_error(&self, message: &str);
}
