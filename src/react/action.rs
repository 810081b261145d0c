//! 动作信封：模型在思考文本中嵌入的纯文本微协议
//!
//! ```text
//! [ACTION: add_component]
//! target: Player
//! component: Rigidbody
//! [/ACTION]
//! ```
//!
//! 不用 JSON，是为了在流式/截断输出下也能稳定识别：没有结束标记的信封一律忽略。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::tools::ToolParams;

static ACTION_BLOCK: OnceLock<Regex> = OnceLock::new();

fn action_block() -> &'static Regex {
    ACTION_BLOCK.get_or_init(|| {
        Regex::new(r"(?is)\[ACTION:\s*([A-Za-z0-9_.\-]+)\s*\](.*?)\[/ACTION\]").unwrap()
    })
}

/// 解析出的动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionEnvelope {
    pub operation: String,
    pub params: ToolParams,
}

impl ActionEnvelope {
    pub fn new(operation: impl Into<String>, params: ToolParams) -> Self {
        Self {
            operation: operation.into(),
            params,
        }
    }

    /// 渲染为线格式
    pub fn render(&self) -> String {
        let mut s = format!("[ACTION: {}]\n", self.operation);
        for (k, v) in &self.params {
            s.push_str(&format!("{}: {}\n", k, v));
        }
        s.push_str("[/ACTION]");
        s
    }
}

fn envelope_from(caps: &regex::Captures<'_>) -> Option<ActionEnvelope> {
    let operation = caps.get(1)?.as_str().to_string();
    let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let params = body
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect();
    Some(ActionEnvelope { operation, params })
}

/// 取第一个完整信封；没有则表示本步只是推理
pub fn parse_action(text: &str) -> Option<ActionEnvelope> {
    action_block()
        .captures(text)
        .and_then(|c| envelope_from(&c))
}

/// 全部完整信封（流式响应结束后分派用）
pub fn parse_actions(text: &str) -> Vec<ActionEnvelope> {
    action_block()
        .captures_iter(text)
        .filter_map(|c| envelope_from(&c))
        .collect()
}
