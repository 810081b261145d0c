//! 双层执行器：规划层（高质量）负责创建与修订计划，执行层（快速便宜）负责单步执行与结果校验
//!
//! 只配置了一个提供方时两种角色都由它承担（降级模式），方法签名不变，只是路由不同；
//! 降级只在构造时记录一次日志。推理失败一律上抛，不在这里重试。

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::planning::{Plan, Step, TaskPlanner};
use crate::stream::{StreamCoordinator, StreamSink};

const EXECUTOR_SYSTEM_PROMPT: &str = "You are the executor inside a game development editor. \
Carry out exactly the step you are given. To invoke an operation, write an action block:\n\
[ACTION: operation_name]\nkey: value\n[/ACTION]\n\
Use one block per operation. Keep any prose short.";

const VALIDATOR_SYSTEM_PROMPT: &str = "You check whether a step was carried out. \
Answer with exactly one word: SUCCESS, PARTIAL or FAILED.";

/// 步骤校验结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Partial,
    Failed,
}

/// 步骤校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepValidation {
    /// 非 Failed 即有效（Partial 也推进）
    pub valid: bool,
    pub status: StepStatus,
    pub message: String,
}

impl StepValidation {
    /// 按单词匹配：PARTIAL 优先，其次 SUCCESS / SUCCESSFUL，其余一律 Failed
    pub fn from_reply(reply: &str) -> Self {
        let upper = reply.to_uppercase();
        let words: Vec<&str> = upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let status = if words.contains(&"PARTIAL") || words.contains(&"PARTIALLY") {
            StepStatus::Partial
        } else if words.contains(&"SUCCESS") || words.contains(&"SUCCESSFUL") {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };
        Self {
            valid: status != StepStatus::Failed,
            status,
            message: reply.trim().to_string(),
        }
    }
}

/// 双层执行器
pub struct DualTierExecutor {
    planner: TaskPlanner,
    executor: Arc<dyn LlmClient>,
    degraded: bool,
}

impl DualTierExecutor {
    /// 按配置情况决定路由；只有一方可用时两种角色共用它
    pub fn new(planner: Arc<dyn LlmClient>, executor: Arc<dyn LlmClient>) -> Self {
        let (planner, executor, degraded) = match (planner.is_configured(), executor.is_configured()) {
            (true, true) => (planner, executor, false),
            (true, false) => {
                tracing::info!(model = planner.model_name(), "executor tier not configured, planner serves both roles");
                let shared = Arc::clone(&planner);
                (planner, shared, true)
            }
            (false, true) => {
                tracing::info!(model = executor.model_name(), "planner tier not configured, executor serves both roles");
                let shared = Arc::clone(&executor);
                (shared, executor, true)
            }
            (false, false) => {
                tracing::warn!("no inference provider configured");
                (planner, executor, false)
            }
        };
        Self {
            planner: TaskPlanner::new(planner),
            executor,
            degraded,
        }
    }

    /// 单一提供方承担两种角色
    pub fn single(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(Arc::clone(&llm), llm)
    }

    pub fn with_operations(mut self, operations: Vec<String>) -> Self {
        self.planner = self.planner.with_operations(operations);
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn executor_llm(&self) -> &Arc<dyn LlmClient> {
        &self.executor
    }

    pub async fn create_plan(&self, goal: &str, context: &str) -> Result<Plan, AgentError> {
        self.planner.create_plan(goal, context).await
    }

    pub async fn revise_plan(&self, current: &Plan, issue: &str) -> Result<Plan, AgentError> {
        self.planner.revise_plan(current, issue).await
    }

    fn step_messages(step: &Step, context: &str) -> Vec<Message> {
        let mut user = format!("Step: {}", step.description);
        if !step.required_tools().is_empty() {
            let ops: Vec<&str> = step.required_tools().iter().map(String::as_str).collect();
            user.push_str(&format!("\nOperations: {}", ops.join(", ")));
        }
        if !step.suggested_parameters.is_empty() {
            user.push_str("\nSuggested parameters:");
            for (k, v) in &step.suggested_parameters {
                user.push_str(&format!("\n  {}: {}", k, v));
            }
        }
        if !context.trim().is_empty() {
            user.push_str(&format!("\n\nContext:\n{}", context));
        }
        vec![Message::system(EXECUTOR_SYSTEM_PROMPT), Message::user(user)]
    }

    /// 单次执行层调用，原样返回文本
    pub async fn execute_step(&self, step: &Step, context: &str) -> Result<String, AgentError> {
        let messages = Self::step_messages(step, context);
        Ok(self.executor.complete(&messages).await?)
    }

    /// 流式执行：片段经协调器刷新到 sink，返回完整文本；取消会中止进行中的请求
    pub async fn execute_step_streaming(
        &self,
        step: &Step,
        context: &str,
        coordinator: &StreamCoordinator,
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let messages = Self::step_messages(step, context);
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                sink.on_error("Cancelled by user");
                return Err(AgentError::Cancelled);
            }
            s = self.executor.complete_stream(&messages) => s?,
        };
        coordinator.consume(stream, sink, cancel).await
    }

    /// 让执行层用一个词评价结果；无法识别的回答按 Failed 处理
    pub async fn validate_step(&self, step: &Step, result: &str) -> Result<StepValidation, AgentError> {
        let user = format!(
            "Step: {}\n\nResult:\n{}\n\nWas the step carried out?",
            step.description, result
        );
        let messages = vec![Message::system(VALIDATOR_SYSTEM_PROMPT), Message::user(user)];
        let reply = self.executor.complete(&messages).await?;
        let validation = StepValidation::from_reply(&reply);
        tracing::debug!(step = %step.description, status = ?validation.status, "step validated");
        Ok(validation)
    }
}
