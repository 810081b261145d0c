//! 计划响应解析
//!
//! 模型输出形如 `{"subTasks":[{"description","requiredTools","suggestedParameters"}]}`，
//! 但常夹在散文或代码块中。先看 ```json 代码块，再按出现顺序尝试每个配平的 `{...}` 片段，
//! 取第一个含 subTasks 的合法 JSON 对象。任何解析失败都只得到空列表，由调用方兜底。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::planning::Step;

static FENCED_BLOCK: OnceLock<Regex> = OnceLock::new();

fn fenced_block() -> &'static Regex {
    FENCED_BLOCK.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").unwrap())
}

/// 只在含 subTasks 的片段上尝试 JSON 解析，且最多尝试这么多个
const MAX_BALANCED_CANDIDATES: usize = 32;

/// 计划线格式
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanWire {
    #[serde(rename = "subTasks")]
    pub sub_tasks: Vec<SubTaskWire>,
}

/// 单个子任务；显式 null 与缺省同样处理
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubTaskWire {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "requiredTools", default)]
    pub required_tools: Option<Vec<String>>,
    /// 非字符串值会被转成字符串
    #[serde(rename = "suggestedParameters", default)]
    pub suggested_parameters: Option<BTreeMap<String, serde_json::Value>>,
}

impl From<SubTaskWire> for Step {
    fn from(w: SubTaskWire) -> Self {
        let params = w
            .suggested_parameters
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect();
        let description = w.description.unwrap_or_default();
        Step::new(description.trim(), w.required_tools.unwrap_or_default(), params)
    }
}

/// 注入提示词的 JSON Schema
pub fn plan_schema() -> String {
    let schema = schemars::schema_for!(PlanWire);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 从任意文本中解析步骤；描述为空或结构不合法的条目被逐个丢弃
pub fn parse_plan_steps(text: &str) -> Vec<Step> {
    let Some(items) = extract_sub_tasks(text) else {
        return Vec::new();
    };
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<SubTaskWire>(item) {
            Ok(task) => Some(task),
            Err(e) => {
                tracing::debug!(index = i, error = %e, "skipping malformed sub task");
                None
            }
        })
        .filter(|t| t.description.as_deref().map(|d| !d.trim().is_empty()).unwrap_or(false))
        .map(Step::from)
        .collect()
}

/// 第一个含 subTasks 数组的 JSON 对象中的条目；配平片段只在代码块都不合格时才扫描
fn extract_sub_tasks(text: &str) -> Option<Vec<serde_json::Value>> {
    let fenced = fenced_block()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()));
    let balanced = std::iter::once_with(|| balanced_objects(text))
        .flatten()
        .take(MAX_BALANCED_CANDIDATES);

    fenced.chain(balanced).find_map(|candidate| {
        let mut value: serde_json::Value = serde_json::from_str(candidate.trim()).ok()?;
        match value.get_mut("subTasks")?.take() {
            serde_json::Value::Array(items) => Some(items),
            _ => None,
        }
    })
}

/// 含 subTasks 的配平 `{...}` 片段，按起始位置排序
///
/// 单趟扫描：用栈记录未闭合的 `{`；只在对象内部跟踪字符串字面量，正文里的引号不影响配对。
/// 是否含 subTasks 用关键字位置二分判断，不再逐片段搜索。
fn balanced_objects(text: &str) -> Vec<&str> {
    let keys: Vec<usize> = text.match_indices("subTasks").map(|(i, _)| i).collect();
    if keys.is_empty() {
        return Vec::new();
    }

    let mut open: Vec<usize> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(offset),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, offset + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }

    spans.retain(|&(start, end)| {
        let first = keys.partition_point(|&k| k < start);
        keys.get(first).map(|&k| k < end).unwrap_or(false)
    });
    spans.sort_unstable_by_key(|&(start, _)| start);
    spans.into_iter().map(|(start, end)| &text[start..end]).collect()
}
