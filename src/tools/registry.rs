//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / invoke），由 ToolRegistry 按名注册与查找。
//! 编排核心只通过 ToolSurface 调用工具：输入操作名与字符串参数，输出带标记的文本
//! （✅ 表示成功，❌ 表示失败），边界上不传递结构化错误。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

/// 工具参数：参数名 -> 字符串值
pub type ToolParams = BTreeMap<String, String>;

/// 成功标记
pub const SUCCESS_MARKER: &str = "✅";
/// 失败标记
pub const FAILURE_MARKER: &str = "❌";

/// 单个命名操作
#[async_trait]
pub trait Tool: Send + Sync {
    /// 操作名（与动作信封、计划中的 requiredTools 一致）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 执行操作，返回带标记的文本
    async fn invoke(&self, params: &ToolParams) -> String;
}

/// 能力组：一组共享状态的操作（如场景图的增删查）一次性注册
pub trait ToolGroup {
    fn tools(&self) -> Vec<Arc<dyn Tool>>;
}

/// 工具面：编排核心看到的唯一工具接口
#[async_trait]
pub trait ToolSurface: Send + Sync {
    async fn invoke(&self, operation: &str, params: &ToolParams) -> String;

    fn operation_names(&self) -> Vec<String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(operation = %name, "Tool re-registered, previous entry replaced");
        }
    }

    pub fn register_group(&mut self, group: &impl ToolGroup) {
        for tool in group.tools() {
            self.register_arc(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ToolSurface for ToolRegistry {
    async fn invoke(&self, operation: &str, params: &ToolParams) -> String {
        match self.tools.get(operation) {
            Some(tool) => tool.invoke(params).await,
            None => format!("{FAILURE_MARKER} Unknown operation '{operation}' does not exist"),
        }
    }

    fn operation_names(&self) -> Vec<String> {
        self.tool_names()
    }
}

/// 便捷构造参数表：params(&[("name", "Player")])
pub fn params(pairs: &[(&str, &str)]) -> ToolParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[tokio::test]
    async fn test_unknown_operation_returns_failure_marker() {
        let registry = ToolRegistry::new();
        let out = registry.invoke("nope", &ToolParams::new()).await;
        assert!(out.starts_with(FAILURE_MARKER));
        assert!(out.contains("nope"));
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        assert_eq!(registry.operation_names(), vec!["echo".to_string()]);
        let out = registry.invoke("echo", &params(&[("text", "hi")])).await;
        assert_eq!(out, "hi");
    }
}
