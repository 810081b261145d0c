//! Echo 工具（测试用）

use async_trait::async_trait;

use crate::tools::{Tool, ToolParams};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text (for testing). Params: text"
    }

    async fn invoke(&self, params: &ToolParams) -> String {
        params
            .get("text")
            .cloned()
            .unwrap_or_else(|| "(empty)".to_string())
    }
}
