//! 任务规划器：目标 → 计划，计划 + 问题 → 修订后的计划
//!
//! 只调用一次规划层模型；推理失败上抛，解析失败降级为兜底计划，调用方永远拿不到空计划。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::planning::{parse_plan_steps, plan_schema, Plan, Step};

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant inside a game development editor. \
Break the user's goal into a short ordered list of concrete sub-tasks. \
Respond with a single JSON object and nothing else, matching this JSON Schema:";

/// 任务规划器，持有规划层客户端与可用操作名
pub struct TaskPlanner {
    llm: Arc<dyn LlmClient>,
    operations: Vec<String>,
}

impl TaskPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            operations: Vec::new(),
        }
    }

    /// 告知模型可用的操作名（写入提示词）
    pub fn with_operations(mut self, operations: Vec<String>) -> Self {
        self.operations = operations;
        self
    }

    fn system_prompt(&self) -> String {
        let mut s = format!("{}\n{}\n", PLANNER_SYSTEM_PROMPT, plan_schema());
        if !self.operations.is_empty() {
            s.push_str(&format!(
                "\nUse only these operation names in requiredTools: {}\n",
                self.operations.join(", ")
            ));
        }
        s
    }

    /// 目标 → 计划；零步骤时返回以目标为唯一步骤的兜底计划
    pub async fn create_plan(&self, goal: &str, context: &str) -> Result<Plan, AgentError> {
        let mut user = format!("Goal: {}", goal);
        if !context.trim().is_empty() {
            user.push_str(&format!("\n\nContext:\n{}", context));
        }
        let messages = vec![Message::system(self.system_prompt()), Message::user(user)];
        let response = self.llm.complete(&messages).await?;

        let steps = parse_plan_steps(&response);
        if steps.is_empty() {
            tracing::warn!(goal, "plan response unparseable or empty, using fallback plan");
            return Ok(Plan::fallback(goal));
        }
        tracing::info!(goal, steps = steps.len(), "plan created");
        Ok(Plan::new(goal, steps))
    }

    /// 针对剩余工作重新规划；新计划游标归零，已完成步骤只作为文本保留。
    /// 解析失败时沿用尚未执行的步骤；若已无待办，则生成一个以问题为描述的单步计划
    pub async fn revise_plan(&self, current: &Plan, issue: &str) -> Result<Plan, AgentError> {
        let completed = list_steps(current.completed_steps(), true);
        let pending = list_steps(current.pending_steps(), false);
        let user = format!(
            "Goal: {}\n\nCompleted steps:\n{}\nPending steps:\n{}\nIssue: {}\n\n\
             Produce a new plan covering only the remaining work.",
            current.goal, completed, pending, issue
        );
        let messages = vec![Message::system(self.system_prompt()), Message::user(user)];
        let response = self.llm.complete(&messages).await?;

        let mut steps = parse_plan_steps(&response);
        if steps.is_empty() {
            tracing::warn!(issue, "revision unparseable, keeping pending steps");
            steps = current.pending_steps().iter().map(Step::pending_copy).collect();
            if steps.is_empty() {
                steps.push(Step::simple(format!("Resolve: {}", issue)));
            }
        }
        tracing::info!(steps = steps.len(), "plan revised");
        Ok(current.revise(steps))
    }
}

fn list_steps(steps: &[Step], with_result: bool) -> String {
    if steps.is_empty() {
        return "(none)\n".to_string();
    }
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| match (with_result, s.result()) {
            (true, Some(r)) => format!("{}. {} => {}\n", i + 1, s.description, r),
            _ => format!("{}. {}\n", i + 1, s.description),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};

    #[tokio::test]
    async fn test_create_plan_parses_steps() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"subTasks":[{"description":"Create Timer","requiredTools":["create_gameobject"]},{"description":"Write script"}]}"#,
        ]));
        let planner = TaskPlanner::new(llm.clone()).with_operations(vec!["create_gameobject".into()]);
        let plan = planner.create_plan("build a timer", "").await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.cursor(), 0);
        let prompt = &llm.prompts().await[0];
        assert!(prompt.contains("subTasks"));
        assert!(prompt.contains("Use only these operation names in requiredTools: create_gameobject"));
    }

    #[tokio::test]
    async fn test_malformed_plan_falls_back() {
        for bad in ["", "{\"subTasks\": [", "{\"subTasks\": []}"] {
            let planner = TaskPlanner::new(Arc::new(ScriptedLlmClient::new([bad])));
            let plan = planner.create_plan("build a timer", "").await.unwrap();
            assert_eq!(plan.len(), 1);
            assert_eq!(plan.steps()[0].description, "build a timer");
        }
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let planner = TaskPlanner::new(Arc::new(ScriptedLlmClient::failing(LlmError::Request(
            "401 unauthorized".into(),
        ))));
        let err = planner.create_plan("build a timer", "").await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::Request(_))));
    }

    #[tokio::test]
    async fn test_revise_falls_back_to_pending() {
        let planner = TaskPlanner::new(Arc::new(ScriptedLlmClient::new(["I cannot help"])));
        let mut plan = Plan::new(
            "g",
            vec![Step::simple("one"), Step::simple("two"), Step::simple("three")],
        );
        plan.current_step_mut().unwrap().mark_completed("✅ done");
        plan.advance();
        let revised = planner.revise_plan(&plan, "script failed").await.unwrap();
        assert_eq!(revised.cursor(), 0);
        let names: Vec<_> = revised.steps().iter().map(|s| s.description.as_str()).collect();
        assert_eq!(names, vec!["two", "three"]);
        assert_eq!(revised.history.len(), 1);

        let mut finished = Plan::new("g", vec![Step::simple("one")]);
        finished.advance();
        let revised = planner.revise_plan(&finished, "script failed").await.unwrap();
        assert_eq!(revised.steps()[0].description, "Resolve: script failed");
    }
}
