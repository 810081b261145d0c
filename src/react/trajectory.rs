//! ReAct 轨迹：只追加的步骤记录 + 步数上限
//!
//! 每次追加后检查是否完成：某条记录 continue=false，或记录数达到上限，先到者为准。
//! 轨迹本身就是携带错误的返回值，失败原因写在最后一条记录的 reflection 里。

use serde::Serialize;

use crate::tools::ToolParams;

/// 单步记录
#[derive(Debug, Clone, Serialize)]
pub struct ReactStepRecord {
    pub thought: String,
    pub action: Option<String>,
    pub action_params: ToolParams,
    pub observation: Option<String>,
    pub reflection: String,
    pub success: bool,
    #[serde(rename = "continue")]
    pub should_continue: bool,
    pub timestamp: i64,
}

impl ReactStepRecord {
    /// 执行出错 / 取消时的终止记录
    pub fn failed(thought: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            action: None,
            action_params: ToolParams::new(),
            observation: None,
            reflection: reason.into(),
            success: false,
            should_continue: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 一次任务执行的轨迹
#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    pub task: String,
    steps: Vec<ReactStepRecord>,
    max_steps: usize,
    pub final_result: Option<String>,
}

impl Trajectory {
    pub fn new(task: impl Into<String>, max_steps: usize) -> Self {
        Self {
            task: task.into(),
            steps: Vec::new(),
            max_steps: max_steps.max(1),
            final_result: None,
        }
    }

    pub fn steps(&self) -> &[ReactStepRecord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// 追加一条记录，返回追加后是否完成；完成后拒绝追加
    pub fn push(&mut self, record: ReactStepRecord) -> bool {
        if self.is_complete() {
            tracing::debug!(task = %self.task, "record after completion dropped");
            return true;
        }
        self.steps.push(record);
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.stopped_by_record() || self.steps.len() >= self.max_steps
    }

    /// 有记录主动停止
    pub fn stopped_by_record(&self) -> bool {
        self.steps.iter().any(|s| !s.should_continue)
    }

    /// 因步数上限而完成（没有记录主动停止）
    pub fn completed_by_ceiling(&self) -> bool {
        self.steps.len() >= self.max_steps && !self.stopped_by_record()
    }

    pub fn last(&self) -> Option<&ReactStepRecord> {
        self.steps.last()
    }

    /// 最后一步是否成功
    pub fn succeeded(&self) -> bool {
        self.last().map(|s| s.success).unwrap_or(false)
    }

    /// 最近 n 步（Thought 上下文窗口）
    pub fn recent(&self, n: usize) -> &[ReactStepRecord] {
        let start = self.steps.len().saturating_sub(n);
        &self.steps[start..]
    }

    /// 所有观察结果，按执行顺序拼接
    pub fn observations(&self) -> String {
        self.steps
            .iter()
            .filter_map(|s| s.observation.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
