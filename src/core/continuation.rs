//! 自动续行判定
//!
//! 每次工具结果返回后调用，决定是否无需人工回合直接进入下一步。
//! 除冷却时钟外无状态；冷却窗口是防止紧密重入循环的唯一保护。

use std::time::Duration;

use tokio::time::Instant;

use crate::correction::contains_error_markers;
use crate::planning::Plan;

/// 模型自称已完成的措辞（小写匹配）
const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "task is complete",
    "task completed",
    "all steps complete",
    "all done",
    "goal achieved",
    "completed successfully",
    "finished the task",
    "nothing left to do",
];

/// 文本是否声称任务已完成
pub fn claims_completion(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
}

/// 续行闸门
#[derive(Debug)]
pub struct ContinuationGate {
    cooldown: Duration,
    last_continue: Option<Instant>,
}

impl ContinuationGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_continue: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// 按顺序判定：
    /// 冷却期内 → false；无计划或计划已完成 → false；工具结果含错误 → false；
    /// 模型自称完成但计划未完成 / 当前步骤需要多个操作 / 工具结果干净且仍有步骤 → true（并重置冷却）；
    /// 否则 false
    pub fn should_auto_continue(
        &mut self,
        plan: Option<&Plan>,
        last_response_text: &str,
        last_tool_result: &str,
    ) -> bool {
        if let Some(at) = self.last_continue {
            if at.elapsed() < self.cooldown {
                tracing::debug!("auto-continue suppressed by cooldown");
                return false;
            }
        }

        let Some(plan) = plan.filter(|p| !p.is_complete()) else {
            return false;
        };

        if contains_error_markers(last_tool_result) {
            return false;
        }

        let multi_operation = plan
            .current_step()
            .map(|s| s.required_tools().len() > 1)
            .unwrap_or(false);
        let clean_result = !last_tool_result.trim().is_empty();

        let reason = if claims_completion(last_response_text) {
            "model claims completion but plan has steps left"
        } else if multi_operation {
            "current step needs more than one operation"
        } else if clean_result {
            "clean tool result and steps remain"
        } else {
            return false;
        };

        tracing::debug!(reason, remaining = plan.remaining(), "auto-continue");
        self.last_continue = Some(Instant::now());
        true
    }
}
