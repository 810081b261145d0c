//! 计划与步骤
//!
//! Plan 持有目标与有序步骤（插入顺序即执行顺序，永不重排）以及进度游标。
//! 游标始终在 [0, len] 内，cursor == len 即完成。计划只能通过推进游标或整体替换（重新规划）改变。

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use uuid::Uuid;

/// 单个步骤：所需操作集合创建后不可变，只有完成状态会变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub description: String,
    required_tools: BTreeSet<String>,
    pub suggested_parameters: BTreeMap<String, String>,
    completed: bool,
    failed: bool,
    result: Option<String>,
}

impl Step {
    pub fn new<I, S>(
        description: impl Into<String>,
        required_tools: I,
        suggested_parameters: BTreeMap<String, String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            required_tools: required_tools
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.trim().is_empty())
                .collect(),
            suggested_parameters,
            completed: false,
            failed: false,
            result: None,
        }
    }

    /// 只有描述的步骤
    pub fn simple(description: impl Into<String>) -> Self {
        Self::new(description, Vec::<String>::new(), BTreeMap::new())
    }

    pub fn required_tools(&self) -> &BTreeSet<String> {
        &self.required_tools
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// 只能设置一次；已有结论时返回 false
    pub fn mark_completed(&mut self, result: impl Into<String>) -> bool {
        if self.completed || self.failed {
            return false;
        }
        self.completed = true;
        self.result = Some(result.into());
        true
    }

    /// 只能设置一次；已有结论时返回 false
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        if self.completed || self.failed {
            return false;
        }
        self.failed = true;
        self.result = Some(reason.into());
        true
    }

    /// 未完成的副本（重新规划时沿用待办步骤）
    pub fn pending_copy(&self) -> Self {
        Self {
            completed: false,
            failed: false,
            result: None,
            ..self.clone()
        }
    }
}

/// 计划
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    steps: Vec<Step>,
    cursor: usize,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    /// 被替换前已完成步骤的文本记录（重新规划时保留，不会重放）
    pub history: Vec<String>,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        let mut plan = Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps,
            cursor: 0,
            started_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
            history: Vec::new(),
        };
        if plan.steps.is_empty() {
            plan.completed_at = Some(plan.started_at);
        }
        plan
    }

    /// 解析失败时的兜底计划：单步，直接以目标为描述
    pub fn fallback(goal: impl Into<String>) -> Self {
        let goal = goal.into();
        Self::new(goal.clone(), vec![Step::simple(goal)])
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.steps.len()
    }

    pub fn remaining(&self) -> usize {
        self.steps.len() - self.cursor
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.cursor)
    }

    /// 推进游标；已完成时返回 false
    pub fn advance(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.cursor += 1;
        if self.is_complete() {
            self.completed_at = Some(chrono::Utc::now().timestamp_millis());
        }
        true
    }

    pub fn completed_steps(&self) -> &[Step] {
        &self.steps[..self.cursor]
    }

    pub fn pending_steps(&self) -> &[Step] {
        &self.steps[self.cursor..]
    }

    /// 用新步骤整体替换：游标归零，已完成步骤只作为文本记录保留
    pub fn revise(&self, steps: Vec<Step>) -> Self {
        let mut next = Plan::new(self.goal.clone(), steps);
        next.history = self.history.clone();
        next.history.extend(self.completed_steps().iter().map(|s| {
            format!(
                "{} => {}",
                s.description,
                s.result().unwrap_or("(no result)")
            )
        }));
        next
    }

    /// 人类可读的进度摘要
    pub fn summary(&self) -> String {
        let mut s = format!("Goal: {}\nProgress: {}/{}\n", self.goal, self.cursor, self.len());
        for (i, step) in self.steps.iter().enumerate() {
            let mark = if step.is_completed() {
                "x"
            } else if step.is_failed() {
                "!"
            } else if i == self.cursor {
                ">"
            } else {
                " "
            };
            s.push_str(&format!("[{}] {}. {}\n", mark, i + 1, step.description));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_steps() -> Plan {
        Plan::new(
            "build a timer",
            vec![
                Step::simple("create object"),
                Step::simple("add script"),
                Step::simple("verify"),
            ],
        )
    }

    #[test]
    fn test_cursor_bounds() {
        let mut plan = three_steps();
        assert_eq!(plan.cursor(), 0);
        assert!(!plan.is_complete());
        assert!(plan.advance());
        assert!(plan.advance());
        assert!(plan.advance());
        assert!(plan.is_complete());
        assert!(plan.completed_at.is_some());
        assert!(!plan.advance());
        assert_eq!(plan.cursor(), 3);
        assert!(plan.current_step().is_none());
    }

    #[test]
    fn test_step_state_set_once() {
        let mut step = Step::new("s", ["a", "b", "a", " "], BTreeMap::new());
        assert_eq!(step.required_tools().len(), 2);
        assert!(step.mark_completed("ok"));
        assert!(!step.mark_failed("late"));
        assert_eq!(step.result(), Some("ok"));
    }

    #[test]
    fn test_revise_resets_cursor_and_keeps_record() {
        let mut plan = three_steps();
        plan.current_step_mut().unwrap().mark_completed("✅ Created");
        plan.advance();
        let revised = plan.revise(vec![Step::simple("retry script"), Step::simple("verify")]);
        assert_eq!(revised.cursor(), 0);
        assert_eq!(revised.len(), 2);
        assert_eq!(revised.history, vec!["create object => ✅ Created".to_string()]);
        assert_eq!(revised.goal, plan.goal);
    }

    #[test]
    fn test_fallback_has_one_step() {
        let plan = Plan::fallback("build a timer");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.cursor(), 0);
        assert_eq!(plan.steps()[0].description, "build a timer");
    }
}
