//! 编排器构建器：统一的组件初始化逻辑
//!
//! 工具面、双层模型、纠错引擎与 ReAct 执行体共享同一套配置；
//! 未显式注入的组件按配置构建。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::Orchestrator;
use crate::correction::SelfCorrectionEngine;
use crate::llm::{LlmClient, OpenAiClient, ScriptedLlmClient};
use crate::planning::DualTierExecutor;
use crate::react::ReactAgent;
use crate::stream::StreamSink;
use crate::tools::{EchoTool, SceneTools, ToolExecutor, ToolRegistry, ToolSurface};

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    registry: Option<ToolRegistry>,
    surface: Option<Arc<dyn ToolSurface>>,
    planner: Option<Arc<dyn LlmClient>>,
    executor: Option<Arc<dyn LlmClient>>,
    sink: Option<Arc<dyn StreamSink>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: None,
            surface: None,
            planner: None,
            executor: None,
            sink: None,
        }
    }

    /// 使用给定注册表（外加执行超时）作为工具面
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 直接指定工具面（测试中可注入任意实现）
    pub fn with_surface(mut self, surface: Arc<dyn ToolSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// 单一提供方承担两种角色
    pub fn with_llm(self, llm: Arc<dyn LlmClient>) -> Self {
        self.with_planner(Arc::clone(&llm)).with_executor(llm)
    }

    pub fn with_planner(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.planner = Some(llm);
        self
    }

    pub fn with_executor(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.executor = Some(llm);
        self
    }

    /// 挂接流式输出；不挂接时执行层走非流式调用
    pub fn with_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 默认工具注册表：echo 加内存场景
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register_group(&SceneTools::new());
        tools
    }

    /// 按 [llm] 段构建两个层级；缺少模型名或 API Key 时得到未配置的客户端
    pub fn build_llms(&self) -> (Arc<dyn LlmClient>, Arc<dyn LlmClient>) {
        let llm = &self.config.llm;
        let api_key = std::env::var(&llm.api_key_env).ok();
        let build = |model: Option<&String>, role: &str| -> Arc<dyn LlmClient> {
            match model {
                Some(model) => Arc::new(OpenAiClient::new(llm.base_url.as_deref(), model, api_key.as_deref())),
                None => {
                    tracing::info!(role, "no model configured for tier");
                    Arc::new(ScriptedLlmClient::unconfigured())
                }
            }
        };
        (
            build(llm.planner_model.as_ref(), "planner"),
            build(llm.executor_model.as_ref(), "executor"),
        )
    }

    pub fn build(mut self) -> Orchestrator {
        let surface: Arc<dyn ToolSurface> = match self.surface.clone() {
            Some(surface) => surface,
            None => {
                let registry = match self.registry.take() {
                    Some(r) => r,
                    None => self.build_tool_registry(),
                };
                Arc::new(ToolExecutor::new(registry, self.config.tools.tool_timeout_secs))
            }
        };

        let (planner, executor) = match (self.planner.clone(), self.executor.clone()) {
            (Some(p), Some(e)) => (p, e),
            (p, e) => {
                let (built_p, built_e) = self.build_llms();
                (p.unwrap_or(built_p), e.unwrap_or(built_e))
            }
        };

        let dual = DualTierExecutor::new(planner, executor).with_operations(surface.operation_names());
        let correction = Arc::new(SelfCorrectionEngine::new(Arc::clone(&surface), &self.config.correction));

        let mut react = ReactAgent::new(Arc::clone(&surface), &self.config.react).with_llm(Arc::clone(dual.executor_llm()));
        if self.config.react.use_correction {
            react = react.with_correction(Arc::clone(&correction));
        }

        tracing::info!(
            operations = surface.operation_names().len(),
            degraded = dual.is_degraded(),
            mode = ?self.config.workflow.step_mode,
            "orchestrator built"
        );
        Orchestrator::from_parts(&self.config, dual, correction, react, self.sink)
    }
}
