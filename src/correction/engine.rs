//! 自我纠错引擎
//!
//! 包装单次命名操作调用：执行 → 判定 → 失败则分类 → （非最后一次时）尝试修复 → 重试，
//! 最多 max_retries 次。修复只是尽力而为的提示，无论成败都进入下一次尝试。
//! 全部失败时原样返回最后一次的原始输出，调用方看到的永远是真实的失败文本。
//! 每次调用都生成一条可审计的 CorrectionSession，调用返回后即可丢弃。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::CorrectionSection;
use crate::correction::{
    classify, ErrorAnalysis, FixResult, FixStrategyResolver, OutcomePolicy, ToolOutcome,
};
use crate::tools::{ToolParams, ToolSurface};

/// 单次尝试记录
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionAttempt {
    /// 从 1 开始
    pub attempt: usize,
    /// 本次调用的原始输出
    pub output: String,
    pub outcome: ToolOutcome,
    /// 失败时的分类
    pub analysis: Option<ErrorAnalysis>,
    /// 失败且非最后一次时的修复结果
    pub fix: Option<FixResult>,
    pub success: bool,
    pub timestamp: i64,
}

/// 一次受保护调用的完整审计记录
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionSession {
    pub operation: String,
    pub params: ToolParams,
    pub attempts: Vec<CorrectionAttempt>,
    pub max_attempts: usize,
    pub success: bool,
}

impl CorrectionSession {
    fn new(operation: &str, params: &ToolParams, max_attempts: usize) -> Self {
        Self {
            operation: operation.to_string(),
            params: params.clone(),
            attempts: Vec::new(),
            max_attempts,
            success: false,
        }
    }

    /// 最后一次调用的原始输出
    pub fn final_output(&self) -> &str {
        self.attempts.last().map(|a| a.output.as_str()).unwrap_or("")
    }

    pub fn fixes_applied(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.fix.as_ref().map(|f| f.success).unwrap_or(false))
            .count()
    }

    /// 人类可读的摘要（失败时说明尝试次数与最后的分类）
    pub fn summary(&self) -> String {
        if self.success {
            return format!(
                "'{}' succeeded after {} attempt(s), {} fix(es) applied",
                self.operation,
                self.attempts.len(),
                self.fixes_applied()
            );
        }
        let last_category = self
            .attempts
            .iter()
            .rev()
            .find_map(|a| a.analysis.as_ref())
            .map(|a| format!("{:?}", a.category))
            .unwrap_or_else(|| "Unknown".to_string());
        format!(
            "'{}' failed after {} attempt(s), last error category {}",
            self.operation,
            self.attempts.len(),
            last_category
        )
    }
}

/// 累计统计
#[derive(Debug, Default)]
pub struct CorrectionStats {
    sessions: AtomicU64,
    successes: AtomicU64,
    fixes_applied: AtomicU64,
}

impl CorrectionStats {
    /// (sessions, successes, fixes_applied)
    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.sessions.load(Ordering::Relaxed),
            self.successes.load(Ordering::Relaxed),
            self.fixes_applied.load(Ordering::Relaxed),
        )
    }
}

/// 自我纠错引擎：持有工具面、修复解析器与重试上限
pub struct SelfCorrectionEngine {
    surface: Arc<dyn ToolSurface>,
    resolver: FixStrategyResolver,
    max_retries: usize,
    policy: OutcomePolicy,
    stats: CorrectionStats,
}

impl SelfCorrectionEngine {
    pub fn new(surface: Arc<dyn ToolSurface>, config: &CorrectionSection) -> Self {
        Self {
            resolver: FixStrategyResolver::new(Arc::clone(&surface), config.fix_operations.clone()),
            surface,
            max_retries: config.max_retries.max(1),
            policy: OutcomePolicy {
                fail_open: config.fail_open,
            },
            stats: CorrectionStats::default(),
        }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn policy(&self) -> OutcomePolicy {
        self.policy
    }

    pub fn stats(&self) -> &CorrectionStats {
        &self.stats
    }

    /// 执行并纠错，只返回最终的原始输出
    pub async fn execute_with_correction(&self, operation: &str, params: &ToolParams) -> String {
        let session = self.run(operation, params).await;
        session.final_output().to_string()
    }

    /// 执行并纠错，返回完整会话记录
    pub async fn run(&self, operation: &str, params: &ToolParams) -> CorrectionSession {
        let mut session = CorrectionSession::new(operation, params, self.max_retries);

        for attempt in 1..=self.max_retries {
            let output = self.surface.invoke(operation, params).await;
            let outcome = ToolOutcome::detect(&output);

            if outcome.is_success(self.policy.fail_open) {
                tracing::debug!(operation, attempt, "operation succeeded");
                session.attempts.push(CorrectionAttempt {
                    attempt,
                    output,
                    outcome,
                    analysis: None,
                    fix: None,
                    success: true,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
                session.success = true;
                break;
            }

            let analysis = classify(&output);
            tracing::info!(
                operation,
                attempt,
                max = self.max_retries,
                category = ?analysis.category,
                confidence = analysis.confidence,
                "operation failed, classified"
            );

            let fix = if attempt < self.max_retries {
                Some(self.resolver.resolve(&analysis, operation, params).await)
            } else {
                None
            };

            session.attempts.push(CorrectionAttempt {
                attempt,
                output,
                outcome,
                analysis: Some(analysis),
                fix,
                success: false,
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }

        self.stats.sessions.fetch_add(1, Ordering::Relaxed);
        self.stats
            .fixes_applied
            .fetch_add(session.fixes_applied() as u64, Ordering::Relaxed);
        if session.success {
            self.stats.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::warn!(summary = %session.summary(), "self-correction exhausted");
        }
        session
    }

    /// 按操作名做事后校验（比通用标记判定更强的证据）；未知操作回退到通用判定
    pub async fn validate(&self, operation: &str, params: &ToolParams, result: &str) -> bool {
        let generic = self.policy.is_success(result);
        if !generic {
            return false;
        }
        let ops = self.resolver.operations();
        let get = |k: &str| params.get(k).map(String::as_str).filter(|v| !v.is_empty());

        if operation == ops.create_gameobject {
            let Some(name) = get("name") else {
                return generic;
            };
            let out = self
                .surface
                .invoke(&ops.find_gameobject, &single("name", name))
                .await;
            return ToolOutcome::detect(&out) == ToolOutcome::Success;
        }
        if operation == ops.add_component {
            let (Some(target), Some(component)) = (
                get("target").or_else(|| get("gameobject")),
                get("component"),
            ) else {
                return generic;
            };
            let out = self
                .surface
                .invoke(&ops.get_components, &single("target", target))
                .await;
            return ToolOutcome::detect(&out) == ToolOutcome::Success
                && out
                    .rsplit_once(": ")
                    .map(|(_, list)| list.split(',').any(|c| c.trim() == component))
                    .unwrap_or(false);
        }
        generic
    }
}

fn single(key: &str, value: &str) -> ToolParams {
    let mut p = ToolParams::new();
    p.insert(key.to_string(), value.to_string());
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::ErrorCategory;
    use crate::tools::{params, SceneTools, Tool, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysFails {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for AlwaysFails {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn invoke(&self, _params: &ToolParams) -> String {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            format!("❌ Operation failed (call {n})")
        }
    }

    fn scene_engine(config: &CorrectionSection) -> (SelfCorrectionEngine, SceneTools) {
        let scene = SceneTools::new();
        let mut registry = ToolRegistry::new();
        registry.register_group(&scene);
        (SelfCorrectionEngine::new(Arc::new(registry), config), scene)
    }

    #[tokio::test]
    async fn test_always_failing_returns_last_raw_output() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(AlwaysFails {
            calls: Arc::clone(&calls),
        });
        let engine = SelfCorrectionEngine::new(Arc::new(registry), &CorrectionSection::default());

        let session = engine.run("flaky", &ToolParams::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.attempts.len(), 3);
        assert!(!session.success);
        assert_eq!(session.final_output(), "❌ Operation failed (call 3)");
        assert!(session.attempts[..2].iter().all(|a| a.fix.is_some()));
        assert!(session.attempts[2].fix.is_none());
        assert_eq!(
            session.attempts[0].analysis.as_ref().unwrap().category,
            ErrorCategory::Runtime
        );

        let out = engine.execute_with_correction("flaky", &ToolParams::new()).await;
        assert_eq!(out, "❌ Operation failed (call 6)");
        assert_eq!(engine.stats().get().0, 2);
    }

    #[tokio::test]
    async fn test_fix_then_retry_succeeds() {
        let (engine, _) = scene_engine(&CorrectionSection::default());
        engine
            .execute_with_correction("create_gameobject", &params(&[("name", "Player")]))
            .await;

        let session = engine
            .run(
                "require_component",
                &params(&[("target", "Player"), ("component", "Rigidbody")]),
            )
            .await;
        assert!(session.success);
        assert_eq!(session.attempts.len(), 2);
        let first = &session.attempts[0];
        assert_eq!(
            first.analysis.as_ref().unwrap().category,
            ErrorCategory::ComponentNotFound
        );
        assert!(first.fix.as_ref().unwrap().success);
        assert_eq!(session.fixes_applied(), 1);
        assert!(session.summary().contains("1 fix(es) applied"));
    }

    #[tokio::test]
    async fn test_first_try_success_records_single_attempt() {
        let (engine, _) = scene_engine(&CorrectionSection::default());
        let session = engine
            .run("create_gameobject", &params(&[("name", "Timer")]))
            .await;
        assert!(session.success);
        assert_eq!(session.attempts.len(), 1);
        assert!(session.attempts[0].analysis.is_none());
    }

    #[tokio::test]
    async fn test_validate_checks_scene_state() {
        let (engine, _) = scene_engine(&CorrectionSection::default());
        let p = params(&[("name", "Timer")]);
        // 结果文本声称成功，但场景中并不存在
        assert!(!engine.validate("create_gameobject", &p, "✅ Created GameObject 'Timer'").await);
        let out = engine.execute_with_correction("create_gameobject", &p).await;
        assert!(engine.validate("create_gameobject", &p, &out).await);

        let c = params(&[("target", "Timer"), ("component", "AudioSource")]);
        let out = engine.execute_with_correction("add_component", &c).await;
        assert!(engine.validate("add_component", &c, &out).await);
        assert!(engine.validate("echo", &ToolParams::new(), "fine").await);
        assert!(!engine.validate("echo", &ToolParams::new(), "❌ nope").await);
    }

    #[tokio::test]
    async fn test_validate_component_on_name_with_colons() {
        let (engine, _) = scene_engine(&CorrectionSection::default());
        for target in ["Enemy:Boss", "UI: Panel"] {
            engine
                .execute_with_correction("create_gameobject", &params(&[("name", target)]))
                .await;
            let c = params(&[("target", target), ("component", "Rigidbody")]);
            let out = engine.execute_with_correction("add_component", &c).await;
            assert!(engine.validate("add_component", &c, &out).await, "{target}");

            let absent = params(&[("target", target), ("component", "AudioSource")]);
            assert!(!engine.validate("add_component", &absent, &out).await, "{target}");
        }
    }
}
