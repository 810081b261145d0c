//! 修复策略解析器
//!
//! 按错误类别分派到唯一的处理器：能修的（缺 GameObject / 缺组件 / 缺脚本）对工具面执行一次
//! 纠正动作并返回应用的变更；修不了的返回人类可读的指引且不做任何变更。
//! 处理器内部错误一律转为失败结果，解析器本身从不向调用方报错：修不了只意味着继续用原参数重试。

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::FixOperationsSection;
use crate::correction::{ErrorAnalysis, ErrorCategory, OutcomePolicy};
use crate::tools::{ToolParams, ToolSurface};

/// 一次修复尝试的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixResult {
    pub success: bool,
    pub description: String,
    pub applied_changes: Vec<String>,
    /// 失败细节（工具输出或内部错误信息）
    pub detail: Option<String>,
}

impl FixResult {
    fn applied(description: impl Into<String>, change: impl Into<String>) -> Self {
        Self {
            success: true,
            description: description.into(),
            applied_changes: vec![change.into()],
            detail: None,
        }
    }

    fn guidance(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
            applied_changes: Vec::new(),
            detail: None,
        }
    }

    fn failed(description: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
            applied_changes: Vec::new(),
            detail: Some(detail.into()),
        }
    }
}

/// 处理器内部错误（不会离开本模块）
#[derive(Error, Debug)]
enum FixError {
    #[error("cannot determine {0} from the error text or the original parameters")]
    MissingContext(&'static str),

    #[error("corrective operation '{operation}' failed: {output}")]
    OperationFailed { operation: String, output: String },
}

/// 修复策略解析器：持有工具面与修复用的操作名
pub struct FixStrategyResolver {
    surface: Arc<dyn ToolSurface>,
    operations: FixOperationsSection,
    policy: OutcomePolicy,
}

impl FixStrategyResolver {
    pub fn new(surface: Arc<dyn ToolSurface>, operations: FixOperationsSection) -> Self {
        Self {
            surface,
            operations,
            // 修复动作自身的结果按严格策略判定
            policy: OutcomePolicy { fail_open: false },
        }
    }

    pub fn operations(&self) -> &FixOperationsSection {
        &self.operations
    }

    /// 按类别分派；任何处理器错误都转为失败结果
    pub async fn resolve(
        &self,
        analysis: &ErrorAnalysis,
        operation: &str,
        params: &ToolParams,
    ) -> FixResult {
        let handled = match analysis.category {
            ErrorCategory::GameObjectNotFound => self.create_missing_gameobject(analysis, params).await,
            ErrorCategory::ComponentNotFound => self.add_missing_component(analysis, params).await,
            ErrorCategory::ScriptNotFound => self.create_missing_script(analysis, params).await,
            ErrorCategory::Compilation => Ok(compilation_guidance(analysis)),
            ErrorCategory::InvalidParameter => Ok(FixResult::guidance(format!(
                "Check the parameters passed to '{operation}': {}",
                describe_params(params)
            ))),
            ErrorCategory::NullReference | ErrorCategory::MissingReference => Ok(FixResult::guidance(
                "Assign the missing reference before retrying; it cannot be created automatically",
            )),
            ErrorCategory::PermissionDenied => Ok(FixResult::guidance(
                "The target is protected; ask the user to grant access",
            )),
            ErrorCategory::TypeMismatch
            | ErrorCategory::ResourceNotFound
            | ErrorCategory::Runtime
            | ErrorCategory::Unknown => Ok(FixResult::guidance(format!(
                "No automatic fix for {:?}; retrying with the original parameters",
                analysis.category
            ))),
        };

        match handled {
            Ok(result) => {
                tracing::debug!(
                    category = ?analysis.category,
                    success = result.success,
                    "fix strategy resolved"
                );
                result
            }
            Err(e) => {
                tracing::debug!(category = ?analysis.category, error = %e, "fix strategy failed");
                FixResult::failed(format!("Automatic fix for {:?} failed", analysis.category), e.to_string())
            }
        }
    }

    async fn apply(&self, operation: &str, params: ToolParams) -> Result<String, FixError> {
        let output = self.surface.invoke(operation, &params).await;
        if self.policy.is_success(&output) {
            Ok(output)
        } else {
            Err(FixError::OperationFailed {
                operation: operation.to_string(),
                output,
            })
        }
    }

    async fn create_missing_gameobject(
        &self,
        analysis: &ErrorAnalysis,
        params: &ToolParams,
    ) -> Result<FixResult, FixError> {
        let name = lookup(analysis, "entity", params, &["target", "gameobject", "name"])
            .ok_or(FixError::MissingContext("the GameObject name"))?;
        let op = &self.operations.create_gameobject;
        self.apply(op, single("name", &name)).await?;
        Ok(FixResult::applied(
            format!("Created missing GameObject '{name}'"),
            format!("{op}(name={name})"),
        ))
    }

    async fn add_missing_component(
        &self,
        analysis: &ErrorAnalysis,
        params: &ToolParams,
    ) -> Result<FixResult, FixError> {
        let component = lookup(analysis, "component", params, &["component"])
            .ok_or(FixError::MissingContext("the component type"))?;
        let target = lookup(analysis, "entity", params, &["target", "gameobject", "name"])
            .ok_or(FixError::MissingContext("the target GameObject"))?;
        let op = &self.operations.add_component;
        let mut fix_params = single("target", &target);
        fix_params.insert("component".to_string(), component.clone());
        self.apply(op, fix_params).await?;
        Ok(FixResult::applied(
            format!("Added missing component '{component}' to '{target}'"),
            format!("{op}(target={target}, component={component})"),
        ))
    }

    async fn create_missing_script(
        &self,
        analysis: &ErrorAnalysis,
        params: &ToolParams,
    ) -> Result<FixResult, FixError> {
        let script = lookup(analysis, "script", params, &["script"])
            .ok_or(FixError::MissingContext("the script name"))?;
        let op = &self.operations.create_script;
        self.apply(op, single("name", &script)).await?;
        Ok(FixResult::applied(
            format!("Created missing script '{script}'"),
            format!("{op}(name={script})"),
        ))
    }
}

/// 先取分类上下文，再回退到原始参数
fn lookup(analysis: &ErrorAnalysis, ctx_key: &str, params: &ToolParams, param_keys: &[&str]) -> Option<String> {
    analysis
        .context_value(ctx_key)
        .map(str::to_string)
        .or_else(|| param_keys.iter().find_map(|k| params.get(*k).cloned()))
        .filter(|v| !v.trim().is_empty())
}

fn single(key: &str, value: &str) -> ToolParams {
    let mut p = ToolParams::new();
    p.insert(key.to_string(), value.to_string());
    p
}

fn describe_params(params: &ToolParams) -> String {
    if params.is_empty() {
        return "(none)".to_string();
    }
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn compilation_guidance(analysis: &ErrorAnalysis) -> FixResult {
    let location = match (analysis.context_value("file"), analysis.context_value("line")) {
        (Some(f), Some(l)) => format!(" in {f} at line {l}"),
        (Some(f), None) => format!(" in {f}"),
        (None, Some(l)) => format!(" at line {l}"),
        (None, None) => String::new(),
    };
    let first = analysis
        .suggested_fixes
        .first()
        .map(String::as_str)
        .unwrap_or("Fix the compiler error");
    FixResult::guidance(format!("{first}{location}"))
}
