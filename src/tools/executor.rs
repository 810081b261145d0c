//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，invoke(operation, params) 在超时内调用 registry；
//! 超时转为带失败标记的文本；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::tools::{ToolParams, ToolRegistry, ToolSurface, FAILURE_MARKER};

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolSurface for ToolExecutor {
    async fn invoke(&self, operation: &str, params: &ToolParams) -> String {
        let start = Instant::now();
        let result = timeout(self.timeout, self.registry.invoke(operation, params)).await;

        let outcome = match &result {
            Ok(text) if text.contains(FAILURE_MARKER) => "failure_marker",
            Ok(_) => "returned",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "operation": operation,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "params_preview": params_preview(params),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(text) => text,
            Err(_) => format!(
                "{FAILURE_MARKER} Tool timeout: '{operation}' failed to finish within {}s",
                self.timeout.as_secs_f32()
            ),
        }
    }

    fn operation_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn params_preview(params: &ToolParams) -> String {
    let s = serde_json::to_string(params).unwrap_or_default();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
