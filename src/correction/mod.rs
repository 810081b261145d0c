//! 自我纠错层：结果判定、错误分类、修复策略、带重试的纠错引擎

pub mod classifier;
pub mod engine;
pub mod outcome;
pub mod strategy;

pub use classifier::{classify, extract_context, ErrorAnalysis, ErrorCategory};
pub use engine::{CorrectionAttempt, CorrectionSession, CorrectionStats, SelfCorrectionEngine};
pub use outcome::{contains_error_markers, OutcomePolicy, ToolOutcome};
pub use strategy::{FixResult, FixStrategyResolver};
