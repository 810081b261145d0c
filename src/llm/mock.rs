//! 脚本化 LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序返回预设回复，用完后重复最后一条；记录收到的每次 prompt，便于断言路由与上下文内容。

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::Mutex;

use crate::llm::{FragmentStream, LlmClient, LlmError, Message, StreamFragment};

/// 流式回放时每段字符数
const STREAM_CHUNK_CHARS: usize = 8;

/// 脚本化客户端：按序回放回复
#[derive(Debug)]
pub struct ScriptedLlmClient {
    name: String,
    responses: Mutex<Vec<Result<String, LlmError>>>,
    last: Mutex<Option<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    configured: bool,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|s| Ok(s.into())))
    }

    /// 可混入错误的脚本（如第二次调用时网络失败）
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        let mut responses: Vec<_> = results.into_iter().collect();
        responses.reverse();
        Self {
            name: "scripted".to_string(),
            responses: Mutex::new(responses),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            configured: true,
        }
    }

    /// 始终失败的客户端
    pub fn failing(err: LlmError) -> Self {
        Self::from_results([Err(err)])
    }

    /// 未配置的客户端：is_configured() 返回 false，调用时返回 NotConfigured
    pub fn unconfigured() -> Self {
        let mut client = Self::failing(LlmError::NotConfigured);
        client.configured = false;
        client
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 已收到的 prompt（每次调用拼接所有消息内容）
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.prompts.lock().await.len()
    }

    async fn next_response(&self, messages: &[Message]) -> Result<String, LlmError> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.prompts.lock().await.push(prompt);

        let next = self.responses.lock().await.pop();
        let mut last = self.last.lock().await;
        match next {
            Some(r) => {
                *last = Some(r.clone());
                r
            }
            None => last.clone().unwrap_or_else(|| Ok(String::new())),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if !self.configured {
            return Err(LlmError::NotConfigured);
        }
        self.next_response(messages).await
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<FragmentStream, LlmError> {
        let content = self.complete(messages).await?;
        let chars: Vec<char> = content.chars().collect();
        let mut fragments: Vec<StreamFragment> = chars
            .chunks(STREAM_CHUNK_CHARS)
            .map(|c| StreamFragment::TextDelta(c.iter().collect()))
            .collect();
        fragments.push(StreamFragment::Done);
        Ok(Box::pin(stream::iter(fragments)))
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_replays_in_order_then_repeats_last() {
        let client = ScriptedLlmClient::new(["a", "b"]);
        let msgs = [Message::user("hi")];
        assert_eq!(client.complete(&msgs).await.unwrap(), "a");
        assert_eq!(client.complete(&msgs).await.unwrap(), "b");
        assert_eq!(client.complete(&msgs).await.unwrap(), "b");
        assert_eq!(client.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_unconfigured_client() {
        let client = ScriptedLlmClient::unconfigured();
        assert!(!client.is_configured());
        let err = client.complete(&[Message::user("x")]).await.unwrap_err();
        assert_eq!(err, LlmError::NotConfigured);
    }

    #[tokio::test]
    async fn test_stream_ends_with_done() {
        let client = ScriptedLlmClient::new(["hello streaming world"]);
        let stream = client.complete_stream(&[Message::user("x")]).await.unwrap();
        let fragments: Vec<_> = stream.collect().await;
        assert_eq!(fragments.last(), Some(&StreamFragment::Done));
        let text: String = fragments
            .iter()
            .filter_map(|f| match f {
                StreamFragment::TextDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "hello streaming world");
    }
}
