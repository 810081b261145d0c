//! 错误分类器
//!
//! 纯函数：把工具返回的失败文本映射到封闭的错误类别，附带根因、候选修复（最可能的在前）、
//! 固定置信度（策略常量，不做计算）与从文本中抽取的上下文（行号、文件、对象名、组件名等）。
//! 分派顺序即优先级，第一个命中的规则生效；所有关键词匹配均不区分大小写。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Compilation,
    MissingReference,
    NullReference,
    TypeMismatch,
    InvalidParameter,
    PermissionDenied,
    GameObjectNotFound,
    ComponentNotFound,
    ScriptNotFound,
    ResourceNotFound,
    Runtime,
    Unknown,
}

impl ErrorCategory {
    /// 重试无法改变结果的类别：需要人工介入
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorCategory::PermissionDenied | ErrorCategory::Compilation)
    }
}

/// 分类结果（产生后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    pub root_cause: String,
    pub suggested_fixes: Vec<String>,
    /// 1..=10
    pub confidence: u8,
    pub context: BTreeMap<String, String>,
}

impl ErrorAnalysis {
    fn new(category: ErrorCategory, confidence: u8, root_cause: impl Into<String>, fixes: &[&str]) -> Self {
        Self {
            category,
            root_cause: root_cause.into(),
            suggested_fixes: fixes.iter().map(|f| f.to_string()).collect(),
            confidence: confidence.clamp(1, 10),
            context: BTreeMap::new(),
        }
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

const COMPILER_MARKERS: &[&str] = &[
    "error cs",
    "compilation",
    "compile error",
    "compiler error",
    "syntax error",
    "; expected",
    "unexpected symbol",
];
const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "does not exist",
    "could not find",
    "couldn't find",
    "no such",
];
const COMPONENT_KEYWORDS: &[&str] = &["component"];
const SCRIPT_KEYWORDS: &[&str] = &["script", ".cs", "monobehaviour"];
const GAMEOBJECT_KEYWORDS: &[&str] = &["gameobject", "game object", "entity"];
const MISSING_REFERENCE_MARKERS: &[&str] = &[
    "missingreference",
    "missing reference",
    "unassignedreference",
    "has been destroyed",
];
const NULL_REFERENCE_MARKERS: &[&str] = &[
    "nullreference",
    "null reference",
    "object reference not set",
    "is null",
];
const TYPE_MARKERS: &[&str] = &[
    "type mismatch",
    "cannot convert",
    "invalid cast",
    "invalidcast",
    "cannot cast",
    "unable to cast",
    "cast exception",
    "expected type",
    "wrong type",
];
const PERMISSION_MARKERS: &[&str] = &[
    "permission",
    "access denied",
    "unauthorized",
    "read-only",
    "readonly",
];
const INVALID_PARAMETER_MARKERS: &[&str] = &["invalid", "parameter", "argument"];
const RUNTIME_MARKERS: &[&str] = &["exception", "error", "failed", "failure"];

fn any_of(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// 分类入口：先按类别分派，再独立抽取上下文
pub fn classify(error_text: &str) -> ErrorAnalysis {
    let lower = error_text.to_lowercase();
    let context = extract_context(error_text);
    let mut analysis = dispatch(&lower, &context);
    analysis.context = context;
    analysis
}

fn dispatch(lower: &str, ctx: &BTreeMap<String, String>) -> ErrorAnalysis {
    let named = |key: &str, fallback: &str| -> String {
        ctx.get(key).cloned().unwrap_or_else(|| fallback.to_string())
    };

    if any_of(lower, COMPILER_MARKERS) {
        return if lower.contains("; expected") || lower.contains("cs1002") {
            ErrorAnalysis::new(
                ErrorCategory::Compilation,
                10,
                "Missing semicolon at the end of a statement",
                &[
                    "Add the missing ';' at the reported line",
                    "Recompile after the edit",
                ],
            )
        } else if lower.contains("does not exist in the current context") || lower.contains("cs0103") {
            ErrorAnalysis::new(
                ErrorCategory::Compilation,
                9,
                "Identifier is not declared in the current scope",
                &[
                    "Declare the identifier or fix its spelling",
                    "Add the missing using directive",
                ],
            )
        } else {
            ErrorAnalysis::new(
                ErrorCategory::Compilation,
                8,
                "Source code failed to compile",
                &[
                    "Inspect the compiler diagnostic at the reported file and line",
                    "Revert the most recent script edit",
                ],
            )
        };
    }

    if any_of(lower, NOT_FOUND_MARKERS) {
        if any_of(lower, COMPONENT_KEYWORDS) {
            let component = named("component", "the component");
            return ErrorAnalysis::new(
                ErrorCategory::ComponentNotFound,
                9,
                format!("Component '{component}' is not attached to the target object"),
                &[
                    "Add the missing component to the target GameObject",
                    "Check the component type name",
                ],
            );
        }
        if any_of(lower, SCRIPT_KEYWORDS) {
            let script = named("script", "the script");
            return ErrorAnalysis::new(
                ErrorCategory::ScriptNotFound,
                8,
                format!("Script '{script}' does not exist in the project"),
                &[
                    "Create the script asset",
                    "Check the script file name matches its class name",
                ],
            );
        }
        if any_of(lower, GAMEOBJECT_KEYWORDS) {
            let entity = named("entity", "the GameObject");
            return ErrorAnalysis::new(
                ErrorCategory::GameObjectNotFound,
                9,
                format!("GameObject '{entity}' does not exist in the scene"),
                &[
                    "Create the GameObject with the expected name",
                    "Check the GameObject name for typos",
                    "List scene objects to find the correct name",
                ],
            );
        }
        return ErrorAnalysis::new(
            ErrorCategory::ResourceNotFound,
            6,
            "A referenced resource could not be located",
            &[
                "Verify the resource path",
                "Create or import the missing resource",
            ],
        );
    }

    if any_of(lower, MISSING_REFERENCE_MARKERS) {
        return ErrorAnalysis::new(
            ErrorCategory::MissingReference,
            8,
            "A serialized reference points to a destroyed or unassigned object",
            &[
                "Reassign the reference in the inspector",
                "Guard the access against destroyed objects",
            ],
        );
    }

    if any_of(lower, NULL_REFERENCE_MARKERS) {
        return ErrorAnalysis::new(
            ErrorCategory::NullReference,
            8,
            "An object was used before it was assigned",
            &[
                "Initialise the reference before use",
                "Add a null check at the reported line",
            ],
        );
    }

    if any_of(lower, TYPE_MARKERS) {
        return ErrorAnalysis::new(
            ErrorCategory::TypeMismatch,
            7,
            "A value does not match the expected type",
            &[
                "Convert the value to the expected type",
                "Check the parameter format",
            ],
        );
    }

    if any_of(lower, PERMISSION_MARKERS) {
        return ErrorAnalysis::new(
            ErrorCategory::PermissionDenied,
            7,
            "The operation is not permitted on the target",
            &["Ask the user to grant access or unlock the target"],
        );
    }

    if any_of(lower, INVALID_PARAMETER_MARKERS) {
        let parameter = named("parameter", "a parameter");
        return ErrorAnalysis::new(
            ErrorCategory::InvalidParameter,
            7,
            format!("Invalid value for {parameter}"),
            &[
                "Provide every required parameter",
                "Check parameter names against the operation description",
            ],
        );
    }

    if any_of(lower, RUNTIME_MARKERS) {
        return ErrorAnalysis::new(
            ErrorCategory::Runtime,
            5,
            "The operation failed at runtime",
            &["Retry the operation", "Inspect the full error output"],
        );
    }

    ErrorAnalysis::new(
        ErrorCategory::Unknown,
        3,
        "Unrecognised failure",
        &["Retry the operation", "Ask the user for guidance"],
    )
}

struct ContextPatterns {
    line: Regex,
    line_paren: Regex,
    file: Regex,
    entity: Regex,
    component: Regex,
    script: Regex,
    parameter: Regex,
}

static PATTERNS: OnceLock<ContextPatterns> = OnceLock::new();

fn patterns() -> &'static ContextPatterns {
    PATTERNS.get_or_init(|| ContextPatterns {
        line: Regex::new(r"(?i)\bline\s*[:#]?\s*(\d+)").unwrap(),
        line_paren: Regex::new(r"\.\w+\((\d+),\s*\d+\)").unwrap(),
        file: Regex::new(r"([\w\-./\\]+\.(?:cs|js|shader|prefab|unity|mat|asset|json))\b").unwrap(),
        entity: Regex::new(r#"(?i)(?:gameobject|game object|entity)\s*['"]([^'"]+)['"]"#).unwrap(),
        component: Regex::new(r#"(?i)component\s*['"]([^'"]+)['"]"#).unwrap(),
        script: Regex::new(r#"(?i)script\s*['"]([^'"]+?)(?:\.cs)?['"]"#).unwrap(),
        parameter: Regex::new(r#"(?i)(?:parameter|argument)\s*['"]([^'"]+)['"]"#).unwrap(),
    })
}

/// 独立抽取上下文字段；某个正则未命中只是不写该键
pub fn extract_context(text: &str) -> BTreeMap<String, String> {
    let p = patterns();
    let mut ctx = BTreeMap::new();
    let capture = |re: &Regex| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());

    if let Some(line) = capture(&p.line).or_else(|| capture(&p.line_paren)) {
        ctx.insert("line".to_string(), line);
    }
    if let Some(file) = capture(&p.file) {
        ctx.insert("file".to_string(), file);
    }
    if let Some(entity) = capture(&p.entity) {
        ctx.insert("entity".to_string(), entity);
    }
    if let Some(component) = capture(&p.component) {
        ctx.insert("component".to_string(), component);
    }
    if let Some(script) = capture(&p.script) {
        ctx.insert("script".to_string(), script);
    }
    if let Some(parameter) = capture(&p.parameter) {
        ctx.insert("parameter".to_string(), parameter);
    }
    ctx
}
