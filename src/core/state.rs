//! 工作流状态机
//!
//! 固定转移表 + 硬性迭代上限：无论模型或工具如何表现，编排都不会无限循环。
//! 每次被接受的转移（包括被强制改写的 Failed）都追加一条不可变记录，并把计数器加一。
//! 状态变化通知观察者 (old, new)，这是编排层向外界报告进度的唯一出口。

use serde::Serialize;

/// 工作流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WorkflowState {
    Idle,
    Planning,
    Executing,
    Validating,
    Healing,
    Replanning,
    Complete,
    Failed,
}

impl WorkflowState {
    /// 转移表（不含任意状态都可去的 Failed / Idle）
    fn successors(self) -> &'static [WorkflowState] {
        use WorkflowState::*;
        match self {
            Idle => &[Planning],
            Planning => &[Executing],
            Executing => &[Validating, Healing, Complete],
            Validating => &[Executing, Healing, Complete],
            Healing => &[Executing, Replanning],
            Replanning => &[Executing],
            Complete | Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Complete | WorkflowState::Failed)
    }

    /// 终态只能回到 Idle；其余状态可去转移表中的后继、Failed 或 Idle
    pub fn can_transition_to(self, to: WorkflowState) -> bool {
        if to == WorkflowState::Idle {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        to == WorkflowState::Failed || self.successors().contains(&to)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 一条转移记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    /// 接受本次转移后的计数
    pub iteration: usize,
    pub reason: String,
    pub timestamp: i64,
    /// 因迭代上限被改写为 Failed
    pub forced: bool,
}

/// 只读快照（用于最终报告）
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub iteration: usize,
    pub max_iterations: usize,
    pub history: Vec<TransitionRecord>,
}

/// 状态变化观察者
pub type StateObserver = Box<dyn Fn(WorkflowState, WorkflowState) + Send + Sync>;

/// 状态机：单一所有者，通过 &mut self 修改，不需要内部锁
pub struct WorkflowStateMachine {
    state: WorkflowState,
    iteration: usize,
    max_iterations: usize,
    history: Vec<TransitionRecord>,
    observers: Vec<StateObserver>,
}

impl WorkflowStateMachine {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            state: WorkflowState::Idle,
            iteration: 0,
            max_iterations: max_iterations.max(1),
            history: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// 最近一次转移的原因（Failed 时即失败说明）
    pub fn last_reason(&self) -> Option<&str> {
        self.history.last().map(|r| r.reason.as_str())
    }

    pub fn add_observer(&mut self, observer: impl Fn(WorkflowState, WorkflowState) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// 请求转移。
    ///
    /// - 不在转移表内：拒绝，状态不变，返回 false
    /// - 目标为 Idle：等同 reset
    /// - 接受后计数将达到上限：改写为 Failed（计数恰好落在上限），返回 false
    /// - 否则接受并返回 true
    pub fn transition(&mut self, to: WorkflowState, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let from = self.state;

        if !from.can_transition_to(to) {
            tracing::warn!(%from, %to, %reason, "transition rejected");
            return false;
        }

        if to == WorkflowState::Idle {
            self.reset();
            return true;
        }

        if to != WorkflowState::Failed && self.iteration + 1 >= self.max_iterations {
            let forced_reason = format!(
                "Iteration ceiling reached ({}/{}) while requesting {} -> {}: {}",
                self.iteration + 1,
                self.max_iterations,
                from,
                to,
                reason
            );
            tracing::warn!(%from, requested = %to, max = self.max_iterations, "iteration ceiling hit, forcing Failed");
            self.apply(WorkflowState::Failed, forced_reason, true);
            return false;
        }

        self.apply(to, reason, false);
        true
    }

    fn apply(&mut self, to: WorkflowState, reason: String, forced: bool) {
        let from = self.state;
        self.iteration += 1;
        self.state = to;
        tracing::info!(%from, %to, iteration = self.iteration, %reason, "workflow transition");
        self.history.push(TransitionRecord {
            from,
            to,
            iteration: self.iteration,
            reason,
            timestamp: chrono::Utc::now().timestamp_millis(),
            forced,
        });
        self.notify(from, to);
    }

    fn notify(&self, old: WorkflowState, new: WorkflowState) {
        for observer in &self.observers {
            observer(old, new);
        }
    }

    /// 清空状态、计数与历史（幂等）
    pub fn reset(&mut self) {
        let old = self.state;
        self.state = WorkflowState::Idle;
        self.iteration = 0;
        self.history.clear();
        if old != WorkflowState::Idle {
            tracing::debug!(from = %old, "workflow reset");
            self.notify(old, WorkflowState::Idle);
        }
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state: self.state,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            history: self.history.clone(),
        }
    }
}

impl std::fmt::Debug for WorkflowStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStateMachine")
            .field("state", &self.state)
            .field("iteration", &self.iteration)
            .field("max_iterations", &self.max_iterations)
            .field("history", &self.history.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use WorkflowState::*;

    const ALL: [WorkflowState; 8] = [
        Idle, Planning, Executing, Validating, Healing, Replanning, Complete, Failed,
    ];

    #[test]
    fn test_happy_path() {
        let mut sm = WorkflowStateMachine::new(50);
        assert!(sm.transition(Planning, "goal received"));
        assert!(sm.transition(Executing, "plan ready"));
        assert!(sm.transition(Validating, "step done"));
        assert!(sm.transition(Complete, "all steps done"));
        assert_eq!(sm.state(), Complete);
        assert_eq!(sm.iteration(), 4);
        assert_eq!(sm.history().len(), 4);
        assert_eq!(sm.history()[1].from, Planning);
        assert_eq!(sm.history()[1].iteration, 2);
    }

    #[test]
    fn test_rejects_outside_table() {
        let mut sm = WorkflowStateMachine::new(50);
        assert!(!sm.transition(Executing, "skip planning"));
        assert_eq!(sm.state(), Idle);
        assert_eq!(sm.iteration(), 0);
        assert!(sm.history().is_empty());

        sm.transition(Planning, "go");
        sm.transition(Failed, "provider down");
        assert!(!sm.transition(Planning, "again"));
        assert!(!sm.transition(Failed, "again"));
        assert_eq!(sm.iteration(), 2);
    }

    #[test]
    fn test_any_state_can_fail() {
        for from in [Planning, Executing, Validating, Healing, Replanning] {
            assert!(from.can_transition_to(Failed));
            assert!(from.can_transition_to(Idle));
        }
        assert!(Complete.can_transition_to(Idle));
        assert!(!Complete.can_transition_to(Failed));
    }

    #[test]
    fn test_ceiling_forces_failed() {
        let mut sm = WorkflowStateMachine::new(4);
        assert!(sm.transition(Planning, "1"));
        assert!(sm.transition(Executing, "2"));
        assert!(sm.transition(Healing, "3"));
        // 第 4 次将触及上限
        assert!(!sm.transition(Executing, "4"));
        assert_eq!(sm.state(), Failed);
        assert_eq!(sm.iteration(), 4);
        let last = sm.history().last().unwrap();
        assert!(last.forced);
        assert!(last.reason.contains("Iteration ceiling"));
        assert!(!sm.transition(Executing, "5"));
        assert_eq!(sm.iteration(), 4);
    }

    #[test]
    fn test_counter_never_exceeds_ceiling() {
        // 对所有长度为 6 的请求序列（8^6）穷举
        let max = 5;
        let mut seq = [0usize; 6];
        for n in 0..ALL.len().pow(6) {
            let mut k = n;
            for slot in seq.iter_mut() {
                *slot = k % ALL.len();
                k /= ALL.len();
            }
            let mut sm = WorkflowStateMachine::new(max);
            for idx in seq {
                sm.transition(ALL[idx], "req");
                assert!(sm.iteration() <= max);
                if sm.iteration() == max {
                    assert_eq!(sm.state(), Failed);
                }
            }
        }
    }

    #[test]
    fn test_reset_idempotent() {
        let mut sm = WorkflowStateMachine::new(10);
        sm.transition(Planning, "go");
        sm.transition(Executing, "go");
        sm.reset();
        let once = (sm.state(), sm.iteration(), sm.history().len());
        sm.reset();
        assert_eq!((sm.state(), sm.iteration(), sm.history().len()), once);
        assert_eq!(once, (Idle, 0, 0));
    }

    #[test]
    fn test_idle_transition_is_reset_and_observers_fire() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sm = WorkflowStateMachine::new(10);
        let sink = Arc::clone(&seen);
        sm.add_observer(move |old, new| sink.lock().unwrap().push((old, new)));

        sm.transition(Planning, "go");
        sm.transition(Failed, "boom");
        assert!(sm.transition(Idle, "user reset"));
        assert_eq!(sm.iteration(), 0);
        assert!(sm.history().is_empty());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Idle, Planning), (Planning, Failed), (Failed, Idle)]
        );
    }
}
