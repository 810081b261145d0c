//! 流协调器：消费片段流，按计时器 / 阈值批量刷新到 UI，并识别工具调用
//!
//! - 缓冲满足刷新条件或计时器到点（且有内容）即刷新，每个 tick 至多一次
//! - ToolCallStart 到来前先强制刷新已缓冲文本，保证 UI 中文本与工具调用的先后顺序
//! - 取消通过 CancellationToken 协作完成，并以错误回调结束，不会静默停止
//! - 正常结束时无条件刷新一次，再以完整文本回调 on_complete

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::StreamSection;
use crate::core::AgentError;
use crate::llm::{FragmentStream, LlmError, StreamFragment};
use crate::react::parse_actions;
use crate::stream::{StreamBuffer, StreamSink, ToolCallEnvelope};

/// 流协调器；同一时刻只允许一个流
#[derive(Debug)]
pub struct StreamCoordinator {
    flush_interval: Duration,
    threshold_chars: usize,
    active: AtomicBool,
}

/// 离开作用域时释放「正在流式」标记
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 尚未结束的结构化工具调用
struct PendingCall {
    name: String,
    arguments: String,
}

impl StreamCoordinator {
    pub fn new(config: &StreamSection) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            threshold_chars: config.flush_threshold_chars,
            active: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 消费整条流，返回完整文本
    pub async fn consume(
        &self,
        mut stream: FragmentStream,
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        if self.active.swap(true, Ordering::AcqRel) {
            tracing::warn!("rejecting overlapping stream");
            return Err(AgentError::AlreadyStreaming);
        }
        let _guard = ActiveGuard(&self.active);

        let mut buffer = StreamBuffer::new(self.threshold_chars);
        let mut full = String::new();
        let mut calls: BTreeMap<String, PendingCall> = BTreeMap::new();
        let mut flushed_this_tick = false;

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 第一次 tick 立即完成
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(chars = full.len(), "stream cancelled");
                    sink.on_error("Cancelled by user");
                    return Err(AgentError::Cancelled);
                }
                _ = ticker.tick() => {
                    flushed_this_tick = false;
                    if !buffer.is_empty() {
                        sink.on_update(&buffer.take());
                        flushed_this_tick = true;
                    }
                }
                fragment = stream.next() => {
                    let Some(fragment) = fragment else { break };
                    match fragment {
                        StreamFragment::TextDelta(text) => {
                            full.push_str(&text);
                            buffer.push(&text);
                            if buffer.should_flush() && !flushed_this_tick {
                                sink.on_update(&buffer.take());
                                flushed_this_tick = true;
                            }
                        }
                        StreamFragment::ToolCallStart { id, name } => {
                            if !buffer.is_empty() {
                                sink.on_update(&buffer.take());
                            }
                            calls.insert(id, PendingCall { name, arguments: String::new() });
                        }
                        StreamFragment::ToolCallDelta { id, delta } => match calls.get_mut(&id) {
                            Some(call) => call.arguments.push_str(&delta),
                            None => tracing::debug!(%id, "delta for unknown tool call"),
                        },
                        StreamFragment::ToolCallEnd { id } => match calls.remove(&id) {
                            Some(call) => {
                                let envelope = ToolCallEnvelope::structured(id, call.name, call.arguments);
                                sink.on_tool_call(&envelope);
                            }
                            None => tracing::debug!(%id, "end for unknown tool call"),
                        },
                        StreamFragment::ReasoningDelta(text) => sink.on_reasoning(&text),
                        StreamFragment::Done => break,
                        StreamFragment::Error(message) => {
                            if !buffer.is_empty() {
                                sink.on_update(&buffer.take());
                            }
                            sink.on_error(&message);
                            return Err(AgentError::Llm(LlmError::Stream(message)));
                        }
                    }
                }
            }
        }

        if !buffer.is_empty() {
            sink.on_update(&buffer.take());
        }
        if !calls.is_empty() {
            tracing::debug!(unfinished = calls.len(), "dropping unfinished tool calls");
        }
        for action in parse_actions(&full) {
            sink.on_tool_call(&ToolCallEnvelope::text(action.operation, action.params));
        }
        sink.on_complete(&full);
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EnvelopeSource;
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Update(String),
        Tool(String, EnvelopeSource),
        Reasoning(String),
        Complete(String),
        Error(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl StreamSink for RecordingSink {
        fn on_update(&self, text: &str) {
            self.events.lock().unwrap().push(Event::Update(text.to_string()));
        }
        fn on_tool_call(&self, call: &ToolCallEnvelope) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Tool(call.operation.clone(), call.source));
        }
        fn on_reasoning(&self, text: &str) {
            self.events.lock().unwrap().push(Event::Reasoning(text.to_string()));
        }
        fn on_complete(&self, full_text: &str) {
            self.events.lock().unwrap().push(Event::Complete(full_text.to_string()));
        }
        fn on_error(&self, message: &str) {
            self.events.lock().unwrap().push(Event::Error(message.to_string()));
        }
    }

    fn coordinator(threshold: usize) -> StreamCoordinator {
        StreamCoordinator::new(&StreamSection {
            flush_interval_ms: 50,
            flush_threshold_chars: threshold,
        })
    }

    fn fragments(items: Vec<StreamFragment>) -> FragmentStream {
        Box::pin(stream::iter(items))
    }

    /// 每个片段前先等待给定毫秒数
    fn paced(items: Vec<(u64, StreamFragment)>) -> FragmentStream {
        Box::pin(stream::iter(items).then(|(delay_ms, fragment)| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            fragment
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_idle_buffer_before_next_fragment() {
        let c = coordinator(1000);
        let sink = RecordingSink::default();
        let s = paced(vec![
            (0, StreamFragment::TextDelta("ab".into())),
            (120, StreamFragment::TextDelta("cd".into())),
            (0, StreamFragment::Done),
        ]);
        let full = c.consume(s, &sink, &CancellationToken::new()).await.unwrap();
        assert_eq!(full, "abcd");
        assert_eq!(
            sink.events(),
            vec![
                Event::Update("ab".into()),
                Event::Update("cd".into()),
                Event::Complete("abcd".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_call_start_flushes_pending_text_first() {
        let c = coordinator(1000);
        let sink = RecordingSink::default();
        let s = fragments(vec![
            StreamFragment::TextDelta("Adding physics".into()),
            StreamFragment::ToolCallStart { id: "1".into(), name: "add_component".into() },
            StreamFragment::ToolCallDelta { id: "1".into(), delta: "{\"target\":\"Player\",".into() },
            StreamFragment::ToolCallDelta { id: "1".into(), delta: "\"component\":\"Rigidbody\"}".into() },
            StreamFragment::ToolCallEnd { id: "1".into() },
            StreamFragment::Done,
        ]);
        let full = c.consume(s, &sink, &CancellationToken::new()).await.unwrap();
        assert_eq!(full, "Adding physics");
        assert_eq!(
            sink.events(),
            vec![
                Event::Update("Adding physics".into()),
                Event::Tool("add_component".into(), EnvelopeSource::Structured),
                Event::Complete("Adding physics".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_threshold_flush_per_tick() {
        let c = coordinator(2);
        let sink = RecordingSink::default();
        let s = fragments(vec![
            StreamFragment::TextDelta("ab".into()),
            StreamFragment::TextDelta("cd".into()),
            StreamFragment::TextDelta("ef".into()),
            StreamFragment::Done,
        ]);
        let full = c.consume(s, &sink, &CancellationToken::new()).await.unwrap();
        assert_eq!(full, "abcdef");
        // 同一 tick 内第一次阈值刷新后，剩余内容留到结束时的最终刷新
        assert_eq!(
            sink.events(),
            vec![
                Event::Update("ab".into()),
                Event::Update("cdef".into()),
                Event::Complete("abcdef".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_envelopes_dispatched_and_reasoning_forwarded() {
        let c = coordinator(1000);
        let sink = RecordingSink::default();
        let s = fragments(vec![
            StreamFragment::ReasoningDelta("hmm".into()),
            StreamFragment::TextDelta("[ACTION: create_gameobject]\nname: Ti".into()),
            StreamFragment::TextDelta("mer\n[/ACTION]".into()),
        ]);
        c.consume(s, &sink, &CancellationToken::new()).await.unwrap();
        let events = sink.events();
        assert_eq!(events[0], Event::Reasoning("hmm".into()));
        assert!(events.contains(&Event::Tool("create_gameobject".into(), EnvelopeSource::Text)));
        assert!(matches!(events.last(), Some(Event::Complete(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_surfaces_as_error() {
        let c = coordinator(1000);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let pending: FragmentStream = Box::pin(stream::pending::<StreamFragment>());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });
        let err = c.consume(pending, &sink, &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(sink.events(), vec![Event::Error("Cancelled by user".into())]);
        assert!(!c.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_fragment_and_overlap_guard() {
        let c = coordinator(1000);
        let sink = RecordingSink::default();
        let s = fragments(vec![
            StreamFragment::TextDelta("partial".into()),
            StreamFragment::Error("connection reset".into()),
        ]);
        let err = c.consume(s, &sink, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::Stream(_))));
        assert_eq!(
            sink.events(),
            vec![
                Event::Update("partial".into()),
                Event::Error("connection reset".into()),
            ]
        );

        c.active.store(true, Ordering::Release);
        let err = c
            .consume(fragments(vec![]), &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AlreadyStreaming));
    }
}
