//! 工具结果判定：把带标记的文本立即转为类型化结果
//!
//! 工具面只返回文本；核心在边界处调用 detect 一次，之后只处理 ToolOutcome，不再重复解析文本。

use serde::Serialize;

use crate::tools::{FAILURE_MARKER, SUCCESS_MARKER};

/// 负面标记（除 ❌ 外）
const NEGATIVE_MARKERS: &[&str] = &[FAILURE_MARKER, "⚠️", "[error]", "[fail]"];

/// 失败关键词（小写匹配）
const FAILURE_KEYWORDS: &[&str] = &[
    "error",
    "failed",
    "failure",
    "exception",
    "not found",
    "does not exist",
    "cannot",
    "can't",
    "could not",
    "unable to",
    "invalid",
    "denied",
];

/// 工具结果的类型化判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    /// 出现正面标记
    Success,
    /// 出现负面标记或失败关键词
    Failure,
    /// 无任何证据
    Unknown,
}

impl ToolOutcome {
    /// 判定顺序：正面标记 → 负面标记 / 失败关键词 → Unknown
    pub fn detect(text: &str) -> Self {
        if text.contains(SUCCESS_MARKER) {
            return ToolOutcome::Success;
        }
        if contains_error_markers(text) {
            return ToolOutcome::Failure;
        }
        ToolOutcome::Unknown
    }

    /// fail_open 为 true 时 Unknown 视为成功
    pub fn is_success(self, fail_open: bool) -> bool {
        match self {
            ToolOutcome::Success => true,
            ToolOutcome::Failure => false,
            ToolOutcome::Unknown => fail_open,
        }
    }
}

/// 文本是否含负面标记或失败关键词（续行判定与结果判定共用）
pub fn contains_error_markers(text: &str) -> bool {
    let lower = text.to_lowercase();
    NEGATIVE_MARKERS.iter().any(|m| lower.contains(m))
        || FAILURE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// 结果判定策略：是否对无证据的结果放行
#[derive(Debug, Clone, Copy)]
pub struct OutcomePolicy {
    pub fail_open: bool,
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        Self { fail_open: true }
    }
}

impl OutcomePolicy {
    pub fn is_success(&self, text: &str) -> bool {
        ToolOutcome::detect(text).is_success(self.fail_open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers() {
        assert_eq!(ToolOutcome::detect("✅ Created GameObject 'A'"), ToolOutcome::Success);
        assert_eq!(ToolOutcome::detect("❌ GameObject 'A' not found"), ToolOutcome::Failure);
        assert_eq!(ToolOutcome::detect("NullReferenceException at line 3"), ToolOutcome::Failure);
        assert_eq!(ToolOutcome::detect("done"), ToolOutcome::Unknown);
        assert_eq!(ToolOutcome::detect(""), ToolOutcome::Unknown);
    }

    #[test]
    fn test_positive_marker_wins() {
        assert_eq!(
            ToolOutcome::detect("✅ Build finished with 0 errors"),
            ToolOutcome::Success
        );
    }

    #[test]
    fn test_fail_open_policy() {
        assert!(OutcomePolicy::default().is_success("ok"));
        assert!(!OutcomePolicy { fail_open: false }.is_success("ok"));
        assert!(!OutcomePolicy::default().is_success("Operation failed"));
    }
}
