//! ReAct 主循环
//!
//! Thought -> Action -> Observation -> Reflection，直到某条记录 continue=false、
//! 失败且不可恢复、或达到步数上限。每轮无论结果如何都追加一条记录。
//! 步骤内的推理错误与取消不会上抛：写成失败的终止记录，返回轨迹。
//! 没有可用提供方时使用基于规则的思考生成（降级模式）。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ReactSection;
use crate::core::{claims_completion, AgentError};
use crate::correction::{classify, OutcomePolicy, SelfCorrectionEngine};
use crate::llm::{LlmClient, Message};
use crate::react::{estimate, parse_action, ActionEnvelope, ReactEvent, ReactStepRecord, Trajectory};
use crate::tools::{ToolParams, ToolSurface};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;

const REACT_SYSTEM_PROMPT: &str = "You are an assistant working inside a game development editor. \
Think step by step about the current objective. When an operation is needed, embed exactly one action block:\n\
[ACTION: operation_name]\nkey: value\n[/ACTION]\n\
When the whole task is done, say \"Task complete\".";

/// ReAct 执行体：持有提供方、工具面与可选的纠错引擎
pub struct ReactAgent {
    llm: Option<Arc<dyn LlmClient>>,
    surface: Arc<dyn ToolSurface>,
    correction: Option<Arc<SelfCorrectionEngine>>,
    history_window: usize,
    max_steps_override: Option<usize>,
    policy: OutcomePolicy,
    event_tx: Option<mpsc::UnboundedSender<ReactEvent>>,
}

impl ReactAgent {
    pub fn new(surface: Arc<dyn ToolSurface>, config: &ReactSection) -> Self {
        Self {
            llm: None,
            surface,
            correction: None,
            history_window: config.history_window.max(1),
            max_steps_override: config.max_steps,
            policy: OutcomePolicy::default(),
            event_tx: None,
        }
    }

    /// 未配置的提供方视同没有
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        if llm.is_configured() {
            self.llm = Some(llm);
        } else {
            tracing::info!("react loop has no configured provider, using rule-based thoughts");
        }
        self
    }

    /// 动作经纠错引擎执行，成功判定沿用引擎的策略
    pub fn with_correction(mut self, engine: Arc<SelfCorrectionEngine>) -> Self {
        self.policy = engine.policy();
        self.correction = Some(engine);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps_override = Some(max_steps);
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send_event(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 执行一条完整轨迹
    pub async fn run(&self, task: &str, cancel: &CancellationToken) -> Trajectory {
        let plan = estimate(task);
        let max_steps = self.max_steps_override.unwrap_or(plan.max_steps).max(1);
        let mut trajectory = Trajectory::new(task, max_steps);
        tracing::debug!(task, complexity = ?plan.complexity, max_steps, "react loop start");

        while !trajectory.is_complete() {
            let index = trajectory.len();
            self.send_event(ReactEvent::StepUpdate {
                step: index + 1,
                max_steps,
            });

            if cancel.is_cancelled() {
                self.send_event(ReactEvent::Error {
                    text: "Cancelled by user".to_string(),
                });
                trajectory.push(ReactStepRecord::failed("", AgentError::Cancelled.to_string()));
                break;
            }

            let objective = plan.objective(index);
            self.send_event(ReactEvent::Thinking);
            let thought = match self.think(task, objective, &trajectory, cancel).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(task, step = index + 1, error = %e, "thought generation failed");
                    self.send_event(ReactEvent::Error { text: e.to_string() });
                    trajectory.push(ReactStepRecord::failed("", format!("Step failed: {}", e)));
                    break;
                }
            };
            self.send_event(ReactEvent::ThinkingContent {
                text: preview(&thought, THINKING_PREVIEW_CHARS),
            });

            let record = self.act_and_reflect(thought).await;
            self.send_event(ReactEvent::Reflection {
                text: record.reflection.clone(),
                success: record.success,
            });
            trajectory.push(record);
        }

        let reason = if trajectory.completed_by_ceiling() {
            format!("Stopped at the step ceiling ({})", trajectory.max_steps())
        } else {
            trajectory
                .last()
                .map(|r| r.reflection.clone())
                .unwrap_or_default()
        };
        tracing::info!(task, steps = trajectory.len(), success = trajectory.succeeded(), %reason, "react loop finished");
        self.send_event(ReactEvent::Finished {
            steps: trajectory.len(),
            reason: reason.clone(),
        });
        trajectory.final_result = Some(reason);
        trajectory
    }

    /// 解析动作 → 执行 → 反思，生成本轮记录
    async fn act_and_reflect(&self, thought: String) -> ReactStepRecord {
        let action = parse_action(&thought);

        let (observation, success) = match &action {
            Some(a) => {
                self.send_event(ReactEvent::ToolCall {
                    tool: a.operation.clone(),
                    args: a.params.clone(),
                });
                let out = self.act(a).await;
                let ok = self.policy.is_success(&out);
                if ok {
                    self.send_event(ReactEvent::Observation {
                        tool: a.operation.clone(),
                        preview: preview(&out, OBSERVATION_PREVIEW_CHARS),
                    });
                } else {
                    self.send_event(ReactEvent::ToolFailure {
                        tool: a.operation.clone(),
                        reason: preview(&out, OBSERVATION_PREVIEW_CHARS),
                    });
                }
                (Some(out), ok)
            }
            // 没有动作即纯推理，按成功处理
            None => (None, true),
        };

        let (reflection, should_continue) = reflect(&thought, action.as_ref(), observation.as_deref(), success);

        ReactStepRecord {
            action: action.as_ref().map(|a| a.operation.clone()),
            action_params: action.map(|a| a.params).unwrap_or_default(),
            thought,
            observation,
            reflection,
            success,
            should_continue,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    async fn act(&self, action: &ActionEnvelope) -> String {
        match &self.correction {
            Some(engine) => {
                engine
                    .execute_with_correction(&action.operation, &action.params)
                    .await
            }
            None => self.surface.invoke(&action.operation, &action.params).await,
        }
    }

    async fn think(
        &self,
        task: &str,
        objective: &str,
        trajectory: &Trajectory,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let Some(llm) = &self.llm else {
            return Ok(rule_based_thought(task, trajectory));
        };

        let mut context = format!("Task: {}\nCurrent objective: {}\n", task, objective);
        let recent = trajectory.recent(self.history_window);
        if !recent.is_empty() {
            context.push_str("\nRecent steps:\n");
            let offset = trajectory.len() - recent.len();
            for (i, r) in recent.iter().enumerate() {
                context.push_str(&format!(
                    "{}. action: {}, {}, reflection: {}\n",
                    offset + i + 1,
                    r.action.as_deref().unwrap_or("none"),
                    if r.success { "succeeded" } else { "failed" },
                    r.reflection
                ));
            }
        }

        let operations = self.surface.operation_names();
        let system = if operations.is_empty() {
            REACT_SYSTEM_PROMPT.to_string()
        } else {
            format!("{}\nAvailable operations: {}", REACT_SYSTEM_PROMPT, operations.join(", "))
        };
        let messages = vec![Message::system(system), Message::user(context)];

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = llm.complete(&messages) => Ok(r?),
        }
    }
}

/// 由成功标志生成反思，并决定是否继续
fn reflect(
    thought: &str,
    action: Option<&ActionEnvelope>,
    observation: Option<&str>,
    success: bool,
) -> (String, bool) {
    if !success {
        let analysis = classify(observation.unwrap_or(""));
        let op = action.map(|a| a.operation.as_str()).unwrap_or("action");
        if analysis.category.is_recoverable() {
            return (
                format!("Action '{}' failed ({:?}): {}. Will try another approach", op, analysis.category, analysis.root_cause),
                true,
            );
        }
        return (
            format!("Action '{}' failed ({:?}): {}. Unrecoverable, stopping", op, analysis.category, analysis.root_cause),
            false,
        );
    }

    let reflection = if claims_completion(thought) {
        "Task complete: the goal has been reached".to_string()
    } else {
        match action {
            Some(a) => format!("Action '{}' succeeded, moving to the next objective", a.operation),
            None => "Reasoning only, no action taken".to_string(),
        }
    };
    let should_continue = !claims_completion(&reflection);
    (reflection, should_continue)
}

/// 降级模式：第一步按任务文本尝试创建对象，之后宣告完成
fn rule_based_thought(task: &str, trajectory: &Trajectory) -> String {
    if let Some(last) = trajectory.last() {
        if !last.success {
            return "The previous action failed and no provider is available to reason about it. Task complete as far as possible.".to_string();
        }
        return "Task complete: nothing more can be done without a provider.".to_string();
    }
    let lower = task.to_lowercase();
    let wants_object = ["create", "make", "build", "add", "spawn"]
        .iter()
        .any(|v| lower.split_whitespace().any(|w| w == *v));
    match (wants_object, guess_entity_name(task)) {
        (true, Some(name)) => {
            let mut params = ToolParams::new();
            params.insert("name".to_string(), name);
            format!(
                "Creating the object the task asks for.\n{}",
                ActionEnvelope::new("create_gameobject", params).render()
            )
        }
        _ => format!("No provider configured; cannot plan an action for '{}'. Task complete.", task),
    }
}

/// 引号内的名字优先，否则取第一个非句首的大写单词
fn guess_entity_name(task: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        let mut parts = task.split(quote);
        if let (Some(_), Some(inner), Some(_)) = (parts.next(), parts.next(), parts.next()) {
            if !inner.trim().is_empty() {
                return Some(inner.trim().to_string());
            }
        }
    }
    task.split_whitespace()
        .skip(1)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|w| w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false))
        .map(str::to_string)
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}
