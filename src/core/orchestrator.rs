//! 编排器：主控循环
//!
//! 单一所有者持有状态机、计划、纠错引擎与 ReAct 执行体（&mut self 保证不会并发运行同一工作流）。
//! Planning → Executing → Validating →（Executing | Healing → Executing / Replanning → Executing | Failed）→ Complete。
//! 每个通过校验的步骤之后询问续行闸门，闸门说停就以 AwaitingInput 返回，由 resume() 继续。
//! 计划游标只在这里推进；任何失败都以带完整转移历史的报告返回。

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{load_config, AppConfig, StepMode, WorkflowSection};
use crate::core::{
    AgentError, ContinuationGate, OrchestratorBuilder, SessionSupervisor, WorkflowSnapshot, WorkflowState,
    WorkflowStateMachine,
};
use crate::correction::SelfCorrectionEngine;
use crate::planning::{DualTierExecutor, Plan, Step, StepStatus, StepValidation};
use crate::react::{parse_actions, ReactAgent};
use crate::stream::{StreamCoordinator, StreamSink};
use crate::tools::ToolParams;

/// 最近几步的结果写入执行上下文
const CONTEXT_RECENT_STEPS: usize = 3;
/// 上下文中每条结果的最大字符数
const CONTEXT_RESULT_CHARS: usize = 300;

/// 一次运行的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    /// 续行闸门要求人工确认；调用 resume() 继续
    AwaitingInput,
}

/// 步骤中一次受保护操作的结果
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub operation: String,
    pub params: ToolParams,
    pub output: String,
    pub success: bool,
    pub attempts: usize,
    pub fixes_applied: usize,
}

/// 单步观察记录
#[derive(Debug, Clone, Serialize)]
pub struct StepObservation {
    /// 从 1 开始，对应当时计划中的位置
    pub step: usize,
    pub description: String,
    /// 执行层文本（react 模式为最后一次思考）
    pub response: String,
    pub actions: Vec<ActionResult>,
    pub validation: StepValidation,
    /// react 模式下轨迹的步数
    pub react_steps: Option<usize>,
}

impl StepObservation {
    fn last_tool_result(&self) -> &str {
        self.actions.last().map(|a| a.output.as_str()).unwrap_or("")
    }
}

/// 最终报告：状态、说明、计划、转移历史与每步观察
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub status: RunStatus,
    pub message: String,
    pub plan: Option<Plan>,
    pub workflow: WorkflowSnapshot,
    pub observations: Vec<StepObservation>,
}

impl WorkflowReport {
    /// 人类可读的摘要
    pub fn summary(&self) -> String {
        let mut s = format!("Status: {:?}\n{}\n", self.status, self.message);
        if let Some(plan) = &self.plan {
            s.push('\n');
            s.push_str(&plan.summary());
        }
        s.push_str(&format!(
            "\nTransitions ({}/{}):\n",
            self.workflow.iteration, self.workflow.max_iterations
        ));
        for r in &self.workflow.history {
            s.push_str(&format!(
                "  {:>3}. {} -> {}{}: {}\n",
                r.iteration,
                r.from,
                r.to,
                if r.forced { " (forced)" } else { "" },
                r.reason
            ));
        }
        s
    }
}

/// 主控循环内部的结局（不离开本模块）
enum Halt {
    Failed(String),
    Awaiting(String),
    Completed(String),
}

/// 编排器
pub struct Orchestrator {
    state: WorkflowStateMachine,
    dual: DualTierExecutor,
    correction: Arc<SelfCorrectionEngine>,
    react: ReactAgent,
    gate: ContinuationGate,
    coordinator: StreamCoordinator,
    sink: Option<Arc<dyn StreamSink>>,
    supervisor: SessionSupervisor,
    workflow: WorkflowSection,
    plan: Option<Plan>,
    context: String,
    observations: Vec<StepObservation>,
    step_retries: usize,
    replans: usize,
}

impl Orchestrator {
    pub(crate) fn from_parts(
        config: &AppConfig,
        dual: DualTierExecutor,
        correction: Arc<SelfCorrectionEngine>,
        react: ReactAgent,
        sink: Option<Arc<dyn StreamSink>>,
    ) -> Self {
        Self {
            state: WorkflowStateMachine::new(config.workflow.max_iterations),
            dual,
            correction,
            react,
            gate: ContinuationGate::new(config.continuation.cooldown()),
            coordinator: StreamCoordinator::new(&config.stream),
            sink,
            supervisor: SessionSupervisor::new(),
            workflow: config.workflow.clone(),
            plan: None,
            context: String::new(),
            observations: Vec::new(),
            step_retries: 0,
            replans: 0,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state.state()
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn correction(&self) -> &SelfCorrectionEngine {
        &self.correction
    }

    /// 状态变化通知（进度展示 / 日志）
    pub fn on_state_change(&mut self, observer: impl Fn(WorkflowState, WorkflowState) + Send + Sync + 'static) {
        self.state.add_observer(observer);
    }

    /// 以新目标开始：丢弃旧计划，重置状态机
    pub async fn run_goal(&mut self, goal: &str, context: &str) -> WorkflowReport {
        if self.state.state() != WorkflowState::Idle {
            self.state.transition(WorkflowState::Idle, "new goal");
        }
        self.plan = None;
        self.context = context.to_string();
        self.observations.clear();
        self.step_retries = 0;
        self.replans = 0;

        let cancel = self.supervisor.child_token();
        let halt = match self.plan_goal(goal, &cancel).await {
            Ok(()) => self.drive(&cancel).await,
            Err(halt) => halt,
        };
        self.finish(halt)
    }

    /// 继续一个等待确认的计划
    pub async fn resume(&mut self) -> Result<WorkflowReport, AgentError> {
        // 闸门停在 Validating，暂停停在 Executing
        let state = self.state.state();
        let awaiting = matches!(state, WorkflowState::Validating | WorkflowState::Executing)
            && self.plan.as_ref().map(|p| !p.is_complete()).unwrap_or(false);
        if !awaiting {
            return Err(AgentError::NothingToResume);
        }
        self.supervisor.set_paused(false);
        let cancel = self.supervisor.child_token();
        let resumed = match state {
            WorkflowState::Validating => self.go(WorkflowState::Executing, "resumed by user"),
            _ => Ok(()),
        };
        let halt = match resumed {
            Ok(()) => self.drive(&cancel).await,
            Err(halt) => halt,
        };
        Ok(self.finish(halt))
    }

    async fn plan_goal(&mut self, goal: &str, cancel: &CancellationToken) -> Result<(), Halt> {
        self.go(WorkflowState::Planning, format!("goal received: {}", goal))?;
        let planned = until_cancelled(cancel, self.dual.create_plan(goal, &self.context)).await;
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(format!("Planning failed: {}", e))),
        };

        let steps = plan.len();
        self.plan = Some(plan);
        self.go(WorkflowState::Executing, format!("plan ready with {} step(s)", steps))
    }

    /// 主控循环：从 Executing 出发，直到完成、失败或等待确认
    async fn drive(&mut self, cancel: &CancellationToken) -> Halt {
        loop {
            if cancel.is_cancelled() {
                return self.fail(AgentError::Cancelled.to_string());
            }
            if self.supervisor.is_paused() {
                return Halt::Awaiting("Paused by user".to_string());
            }

            let Some(plan) = self.plan.as_ref() else {
                return self.fail("No active plan".to_string());
            };
            let Some(step) = plan.current_step().cloned() else {
                return self.complete();
            };
            let index = plan.cursor() + 1;

            let observation = match self.execute_step(index, &step, cancel).await {
                Ok(o) => o,
                Err(e) => return self.fail(format!("Step {} failed: {}", index, e)),
            };
            if let Err(halt) = self.go(WorkflowState::Validating, format!("step {} executed", index)) {
                return halt;
            }

            let valid = observation.validation.valid;
            let message = observation.validation.message.clone();
            let response = observation.response.clone();
            let tool_result = observation.last_tool_result().to_string();
            self.observations.push(observation);

            let halt = if valid {
                self.on_step_passed(index, &response, &tool_result)
            } else {
                self.on_step_failed(index, &step, &message, cancel).await
            };
            if let Err(halt) = halt {
                return halt;
            }
        }
    }

    fn on_step_passed(&mut self, index: usize, response: &str, tool_result: &str) -> Result<(), Halt> {
        self.step_retries = 0;
        if let Some(plan) = self.plan.as_mut() {
            if let Some(step) = plan.current_step_mut() {
                step.mark_completed(if tool_result.is_empty() { response } else { tool_result });
            }
            plan.advance();
        }

        let plan = self.plan.as_ref();
        if plan.map(|p| p.is_complete()).unwrap_or(true) {
            return Err(self.complete());
        }
        if !self.gate.should_auto_continue(plan, response, tool_result) {
            return Err(Halt::Awaiting(format!(
                "Step {} done; waiting for confirmation before step {}",
                index,
                index + 1
            )));
        }
        self.go(WorkflowState::Executing, format!("step {} passed, continuing", index))
    }

    async fn on_step_failed(
        &mut self,
        index: usize,
        step: &Step,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        self.go(WorkflowState::Healing, format!("step {} failed validation: {}", index, message))?;

        if self.step_retries < self.workflow.max_step_retries {
            self.step_retries += 1;
            return self.go(
                WorkflowState::Executing,
                format!("retrying step {} ({}/{})", index, self.step_retries, self.workflow.max_step_retries),
            );
        }

        if self.replans >= self.workflow.max_replans {
            if let Some(s) = self.plan.as_mut().and_then(|p| p.current_step_mut()) {
                s.mark_failed(message);
            }
            return Err(self.fail(format!(
                "Step {} '{}' failed after {} retr(ies) and {} replan(s): {}",
                index, step.description, self.step_retries, self.replans, message
            )));
        }

        self.go(WorkflowState::Replanning, format!("replanning after step {} failed", index))?;
        let issue = format!("Step '{}' failed: {}", step.description, message);
        let revised = match self.plan.as_ref() {
            Some(plan) => until_cancelled(cancel, self.dual.revise_plan(plan, &issue)).await,
            None => Err(AgentError::NothingToResume),
        };
        match revised {
            Ok(plan) => {
                self.replans += 1;
                self.step_retries = 0;
                let steps = plan.len();
                self.plan = Some(plan);
                self.go(
                    WorkflowState::Executing,
                    format!("plan revised ({}/{}), {} step(s)", self.replans, self.workflow.max_replans, steps),
                )
            }
            Err(e) => Err(self.fail(format!("Replanning failed: {}", e))),
        }
    }

    async fn execute_step(
        &mut self,
        index: usize,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<StepObservation, AgentError> {
        tracing::info!(step = index, description = %step.description, mode = ?self.workflow.step_mode, "executing step");
        match self.workflow.step_mode {
            StepMode::Direct => self.execute_direct(index, step, cancel).await,
            StepMode::React => self.execute_react(index, step, cancel).await,
        }
    }

    /// 执行层给出文本，文本中的动作逐个经纠错引擎执行
    async fn execute_direct(
        &mut self,
        index: usize,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<StepObservation, AgentError> {
        let context = self.step_context();
        let response = match &self.sink {
            Some(sink) => {
                self.dual
                    .execute_step_streaming(step, &context, &self.coordinator, sink.as_ref(), cancel)
                    .await?
            }
            None => until_cancelled(cancel, self.dual.execute_step(step, &context)).await?,
        };

        let mut actions = Vec::new();
        for action in parse_actions(&response) {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let session = self.correction.run(&action.operation, &action.params).await;
            let output = session.final_output().to_string();
            let success = session.success
                && self
                    .correction
                    .validate(&action.operation, &action.params, &output)
                    .await;
            actions.push(ActionResult {
                operation: action.operation,
                params: action.params,
                output,
                success,
                attempts: session.attempts.len(),
                fixes_applied: session.fixes_applied(),
            });
        }

        let validation = match actions.iter().find(|a| !a.success) {
            Some(failed) => StepValidation {
                valid: false,
                status: StepStatus::Failed,
                message: format!("'{}' failed: {}", failed.operation, failed.output),
            },
            None => {
                let evidence = if actions.is_empty() {
                    response.clone()
                } else {
                    actions.iter().map(|a| a.output.as_str()).collect::<Vec<_>>().join("\n")
                };
                until_cancelled(cancel, self.dual.validate_step(step, &evidence)).await?
            }
        };
        if validation.status == StepStatus::Partial {
            tracing::warn!(step = index, message = %validation.message, "step partially succeeded, advancing");
        }

        Ok(StepObservation {
            step: index,
            description: step.description.clone(),
            response,
            actions,
            validation,
            react_steps: None,
        })
    }

    /// 每个步骤跑一条 ReAct 轨迹
    async fn execute_react(
        &mut self,
        index: usize,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<StepObservation, AgentError> {
        let plan_goal = self.plan.as_ref().map(|p| p.goal.clone()).unwrap_or_default();
        let mut task = format!("{}\nCurrent step: {}", plan_goal, step.description);
        for (k, v) in &step.suggested_parameters {
            task.push_str(&format!("\n{}: {}", k, v));
        }

        let trajectory = self.react.run(&task, cancel).await;
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let actions: Vec<ActionResult> = trajectory
            .steps()
            .iter()
            .filter_map(|r| {
                Some(ActionResult {
                    operation: r.action.clone()?,
                    params: r.action_params.clone(),
                    output: r.observation.clone().unwrap_or_default(),
                    success: r.success,
                    attempts: 1,
                    fixes_applied: 0,
                })
            })
            .collect();

        let validation = if trajectory.succeeded() {
            let evidence = match trajectory.observations() {
                o if o.is_empty() => trajectory.final_result.clone().unwrap_or_default(),
                o => o,
            };
            until_cancelled(cancel, self.dual.validate_step(step, &evidence)).await?
        } else {
            StepValidation {
                valid: false,
                status: StepStatus::Failed,
                message: trajectory.final_result.clone().unwrap_or_default(),
            }
        };

        Ok(StepObservation {
            step: index,
            description: step.description.clone(),
            response: trajectory.last().map(|r| r.thought.clone()).unwrap_or_default(),
            actions,
            validation,
            react_steps: Some(trajectory.len()),
        })
    }

    /// 执行层上下文：目标、进度与最近几步结果
    fn step_context(&self) -> String {
        let mut s = String::new();
        if let Some(plan) = &self.plan {
            s.push_str(&plan.summary());
            for line in &plan.history {
                s.push_str(&format!("Earlier: {}\n", line));
            }
        }
        let recent = self.observations.len().saturating_sub(CONTEXT_RECENT_STEPS);
        for o in &self.observations[recent..] {
            let result = match o.last_tool_result() {
                "" => o.response.as_str(),
                r => r,
            };
            let result: String = result.chars().take(CONTEXT_RESULT_CHARS).collect();
            s.push_str(&format!("Step {} result: {}\n", o.step, result));
        }
        if !self.context.trim().is_empty() {
            s.push_str(&format!("\n{}\n", self.context));
        }
        s
    }

    /// 请求转移；被拒绝或被强制为 Failed 时返回对应的结局
    fn go(&mut self, to: WorkflowState, reason: impl Into<String>) -> Result<(), Halt> {
        let from = self.state.state();
        if self.state.transition(to, reason) {
            return Ok(());
        }
        if self.state.state() == WorkflowState::Failed {
            let reason = self.state.last_reason().unwrap_or("Iteration ceiling reached").to_string();
            return Err(Halt::Failed(reason));
        }
        let err = AgentError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        };
        Err(self.fail(err.to_string()))
    }

    fn fail(&mut self, message: String) -> Halt {
        if self.state.state() != WorkflowState::Failed {
            self.state.transition(WorkflowState::Failed, message.clone());
        }
        Halt::Failed(message)
    }

    fn complete(&mut self) -> Halt {
        match self.go(WorkflowState::Complete, "all steps done") {
            Ok(()) => Halt::Completed("All steps completed".to_string()),
            Err(halt) => halt,
        }
    }

    fn finish(&mut self, halt: Halt) -> WorkflowReport {
        let (status, message) = match halt {
            Halt::Completed(m) => (RunStatus::Completed, m),
            Halt::Failed(m) => (RunStatus::Failed, m),
            Halt::Awaiting(m) => (RunStatus::AwaitingInput, m),
        };
        match status {
            RunStatus::Failed => tracing::warn!(%message, "workflow failed"),
            _ => tracing::info!(?status, %message, "workflow halted"),
        }
        WorkflowReport {
            status,
            message,
            plan: self.plan.clone(),
            workflow: self.state.snapshot(),
            observations: self.observations.clone(),
        }
    }
}

/// 推理调用与取消竞争；取消时立即丢弃进行中的请求
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        r = call => r,
    }
}

/// 从配置创建编排器：显式给出的配置文件必须能加载；否则加载失败回退默认值
pub fn create_orchestrator(config_path: Option<PathBuf>) -> anyhow::Result<Orchestrator> {
    let cfg = match (&config_path, load_config(config_path.clone())) {
        (_, Ok(cfg)) => cfg,
        (Some(path), Err(e)) => {
            return Err(e).with_context(|| format!("Failed to load config from {}", path.display()));
        }
        (None, Err(e)) => {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }
    };
    Ok(OrchestratorBuilder::new(cfg).build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::llm::{FragmentStream, LlmClient, LlmError, Message, ScriptedLlmClient};
    use crate::tools::SceneTools;

    /// 前 answers 次按脚本回答，之后的调用永不返回
    struct StallingLlm {
        script: ScriptedLlmClient,
        answers: usize,
        calls: AtomicUsize,
    }

    impl StallingLlm {
        fn new(answers: &[&str]) -> Self {
            Self {
                script: ScriptedLlmClient::new(answers.iter().copied()),
                answers: answers.len(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StallingLlm {
        async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.answers {
                std::future::pending::<()>().await;
            }
            self.script.complete(messages).await
        }

        async fn complete_stream(&self, messages: &[Message]) -> Result<FragmentStream, LlmError> {
            self.script.complete_stream(messages).await
        }
    }

    async fn run_cancelled_after(orchestrator: &mut Orchestrator, delay: Duration) -> Option<WorkflowReport> {
        let token = orchestrator.supervisor().cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
        tokio::time::timeout(Duration::from_secs(2), orchestrator.run_goal("Make a crate", ""))
            .await
            .ok()
    }

    const ONE_STEP_PLAN: &str =
        r#"{"subTasks": [{"description": "Create the Crate object", "requiredTools": ["create_gameobject"], "suggestedParameters": {"name": "Crate"}}]}"#;

    const TWO_STEP_PLAN: &str = r#"```json
{"subTasks": [
  {"description": "Create the Player object", "requiredTools": ["create_gameobject"]},
  {"description": "Add a Rigidbody to the Player", "requiredTools": ["add_component"]}
]}
```"#;

    const CREATE_CRATE: &str = "[ACTION: create_gameobject]\nname: Crate\n[/ACTION]";

    fn test_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.continuation.cooldown_ms = 0;
        cfg
    }

    fn build(cfg: AppConfig, llm: Arc<ScriptedLlmClient>) -> (Orchestrator, SceneTools) {
        let scene = SceneTools::new();
        let orchestrator = OrchestratorBuilder::new(cfg)
            .with_registry(scene.registry())
            .with_llm(llm)
            .build();
        (orchestrator, scene)
    }

    fn visited(report: &WorkflowReport) -> Vec<WorkflowState> {
        report.workflow.history.iter().map(|r| r.to).collect()
    }

    #[tokio::test]
    async fn test_run_goal_completes_plan() {
        let llm = Arc::new(ScriptedLlmClient::new([
            TWO_STEP_PLAN,
            "[ACTION: create_gameobject]\nname: Player\n[/ACTION]",
            "SUCCESS",
            "[ACTION: add_component]\ntarget: Player\ncomponent: Rigidbody\n[/ACTION]",
            "SUCCESS",
        ]));
        let (mut orchestrator, scene) = build(test_config(), llm);

        let report = orchestrator.run_goal("Make a falling player", "").await;

        assert_eq!(report.status, RunStatus::Completed, "{}", report.message);
        assert_eq!(orchestrator.state(), WorkflowState::Complete);
        assert_eq!(report.observations.len(), 2);
        assert!(report.plan.as_ref().map(|p| p.is_complete()).unwrap_or(false));
        let scene = scene.scene();
        let scene = scene.read().await;
        assert!(scene
            .components("Player")
            .map(|c| c.iter().any(|n| n == "Rigidbody"))
            .unwrap_or(false));
        assert_eq!(visited(&report).last(), Some(&WorkflowState::Complete));
    }

    #[tokio::test]
    async fn test_failed_validation_retries_step() {
        let llm = Arc::new(ScriptedLlmClient::new([
            ONE_STEP_PLAN,
            "I am not sure what to do.",
            "FAILED",
            CREATE_CRATE,
            "SUCCESS",
        ]));
        let (mut orchestrator, _scene) = build(test_config(), llm);

        let report = orchestrator.run_goal("Make a crate", "").await;

        assert_eq!(report.status, RunStatus::Completed, "{}", report.message);
        assert!(visited(&report).contains(&WorkflowState::Healing));
        assert!(!visited(&report).contains(&WorkflowState::Replanning));
        assert_eq!(report.observations.len(), 2);
    }

    #[tokio::test]
    async fn test_replans_after_retries_exhausted() {
        let mut cfg = test_config();
        cfg.workflow.max_step_retries = 0;
        cfg.workflow.max_replans = 1;
        let llm = Arc::new(ScriptedLlmClient::new([
            ONE_STEP_PLAN,
            "Nothing happened.",
            "FAILED",
            ONE_STEP_PLAN,
            CREATE_CRATE,
            "SUCCESS",
        ]));
        let (mut orchestrator, _scene) = build(cfg, llm);

        let report = orchestrator.run_goal("Make a crate", "").await;

        assert_eq!(report.status, RunStatus::Completed, "{}", report.message);
        assert!(visited(&report).contains(&WorkflowState::Replanning));
    }

    #[tokio::test]
    async fn test_exhausted_recovery_fails_step() {
        let mut cfg = test_config();
        cfg.workflow.max_step_retries = 0;
        cfg.workflow.max_replans = 0;
        cfg.correction.max_retries = 2;
        let llm = Arc::new(ScriptedLlmClient::new([
            ONE_STEP_PLAN,
            "[ACTION: explode]\ntarget: Crate\n[/ACTION]",
        ]));
        let (mut orchestrator, _scene) = build(cfg, llm);

        let report = orchestrator.run_goal("Make a crate", "").await;

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(orchestrator.state(), WorkflowState::Failed);
        let action = &report.observations[0].actions[0];
        assert!(!action.success);
        assert_eq!(action.attempts, 2);
        let plan = report.plan.as_ref().map(|p| p.steps()[0].is_failed());
        assert_eq!(plan, Some(true));
    }

    #[tokio::test]
    async fn test_gate_halts_and_resume_continues() {
        let llm = Arc::new(ScriptedLlmClient::new([
            TWO_STEP_PLAN,
            "Reviewed the scene, nothing to change yet.",
            "SUCCESS",
            "[ACTION: create_gameobject]\nname: Player\n[/ACTION]",
            "SUCCESS",
        ]));
        let (mut orchestrator, _scene) = build(test_config(), llm);

        let report = orchestrator.run_goal("Make a falling player", "").await;
        assert_eq!(report.status, RunStatus::AwaitingInput);
        assert_eq!(orchestrator.state(), WorkflowState::Validating);
        assert_eq!(orchestrator.plan().map(|p| p.cursor()), Some(1));

        let report = orchestrator.resume().await.unwrap();
        assert_eq!(report.status, RunStatus::Completed, "{}", report.message);

        assert!(matches!(orchestrator.resume().await, Err(AgentError::NothingToResume)));
    }

    #[tokio::test]
    async fn test_cancel_before_planning_fails_run() {
        let llm = Arc::new(ScriptedLlmClient::new([ONE_STEP_PLAN]));
        let (mut orchestrator, _scene) = build(test_config(), Arc::clone(&llm));
        orchestrator.supervisor().cancel();

        let report = orchestrator.run_goal("Make a crate", "").await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.contains("Cancelled"));
        assert_eq!(llm.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_iteration_ceiling_forces_failure() {
        let mut cfg = test_config();
        cfg.workflow.max_iterations = 3;
        let llm = Arc::new(ScriptedLlmClient::new([ONE_STEP_PLAN, CREATE_CRATE, "SUCCESS"]));
        let (mut orchestrator, _scene) = build(cfg, llm);

        let report = orchestrator.run_goal("Make a crate", "").await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.contains("Iteration ceiling"), "{}", report.message);
        assert!(report.workflow.iteration <= report.workflow.max_iterations);
        assert!(report.workflow.history.last().map(|r| r.forced).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_react_mode_runs_trajectory_per_step() {
        let mut cfg = test_config();
        cfg.workflow.step_mode = StepMode::React;
        let llm = Arc::new(ScriptedLlmClient::new([
            ONE_STEP_PLAN,
            CREATE_CRATE,
            "The crate exists. Task complete.",
            "SUCCESS",
        ]));
        let (mut orchestrator, scene) = build(cfg, llm);

        let report = orchestrator.run_goal("Make a crate", "").await;

        assert_eq!(report.status, RunStatus::Completed, "{}", report.message);
        assert_eq!(report.observations[0].react_steps, Some(2));
        assert_eq!(report.observations[0].actions.len(), 1);
        assert!(scene.scene().read().await.contains("Crate"));
    }

    #[tokio::test]
    async fn test_new_goal_resets_previous_run() {
        let llm = Arc::new(ScriptedLlmClient::new([ONE_STEP_PLAN, CREATE_CRATE, "SUCCESS"]));
        let (mut orchestrator, _scene) = build(test_config(), llm);

        let first = orchestrator.run_goal("Make a crate", "").await;
        assert_eq!(first.status, RunStatus::Completed);
        let second = orchestrator.run_goal("Make a crate", "").await;
        assert_eq!(second.status, RunStatus::Completed, "{}", second.message);
        assert_eq!(second.observations.len(), 1);
        assert_eq!(second.workflow.history[0].from, WorkflowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pending_validation() {
        let llm = Arc::new(StallingLlm::new(&[ONE_STEP_PLAN, CREATE_CRATE]));
        let mut orchestrator = OrchestratorBuilder::new(test_config())
            .with_registry(SceneTools::new().registry())
            .with_llm(llm)
            .build();

        let report = run_cancelled_after(&mut orchestrator, Duration::from_millis(100)).await;

        let report = report.expect("run should return once cancelled");
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.contains("Cancelled"), "{}", report.message);
        assert_eq!(orchestrator.state(), WorkflowState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pending_replan() {
        let mut cfg = test_config();
        cfg.workflow.max_step_retries = 0;
        cfg.workflow.max_replans = 1;
        let llm = Arc::new(StallingLlm::new(&[ONE_STEP_PLAN, "Nothing happened.", "FAILED"]));
        let mut orchestrator = OrchestratorBuilder::new(cfg)
            .with_registry(SceneTools::new().registry())
            .with_llm(llm)
            .build();

        let report = run_cancelled_after(&mut orchestrator, Duration::from_millis(100)).await;

        let report = report.expect("run should return once cancelled");
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.starts_with("Replanning failed"), "{}", report.message);
        assert!(report.message.contains("Cancelled"));
    }

    #[tokio::test]
    async fn test_pause_halts_before_step_and_resume_completes() {
        let llm = Arc::new(ScriptedLlmClient::new([ONE_STEP_PLAN, CREATE_CRATE, "SUCCESS"]));
        let (mut orchestrator, scene) = build(test_config(), Arc::clone(&llm));
        orchestrator.supervisor().set_paused(true);

        let report = orchestrator.run_goal("Make a crate", "").await;
        assert_eq!(report.status, RunStatus::AwaitingInput);
        assert_eq!(orchestrator.state(), WorkflowState::Executing);
        assert_eq!(llm.call_count().await, 1);
        assert!(report.observations.is_empty());

        let report = orchestrator.resume().await.unwrap();
        assert_eq!(report.status, RunStatus::Completed, "{}", report.message);
        assert!(!orchestrator.supervisor().is_paused());
        let scene = scene.scene();
        assert!(scene.read().await.contains("Crate"));
    }

    #[test]
    fn test_create_orchestrator_rejects_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = create_orchestrator(Some(dir.path().join("typo.toml")));
        assert!(result.is_err());
    }
}
