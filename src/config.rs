//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONDUCTOR__*` 覆盖（双下划线表示嵌套，
//! 如 `CONDUCTOR__CORRECTION__MAX_RETRIES=5`）。每个段都有完整默认值，缺省字段不报错。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub workflow: WorkflowSection,
    pub correction: CorrectionSection,
    pub continuation: ContinuationSection,
    pub react: ReactSection,
    pub stream: StreamSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "conductor".to_string(),
        }
    }
}

/// [llm] 段：双层模型（规划层高质量、执行层快速便宜）共用一个端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    /// 规划层模型；为空表示不配置规划层
    pub planner_model: Option<String>,
    /// 执行层模型；为空表示不配置执行层
    pub executor_model: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            planner_model: Some("gpt-4o".to_string()),
            executor_model: Some("gpt-4o-mini".to_string()),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// 单步执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// 执行层直接给出文本，其中的动作信封经纠错引擎分派
    Direct,
    /// 每个步骤跑一条 ReAct 轨迹
    React,
}

/// [workflow] 段：状态机与编排上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 状态机迭代上限（粗粒度超时）
    pub max_iterations: usize,
    /// 单步校验失败后原地重试次数
    pub max_step_retries: usize,
    /// 重新规划次数上限
    pub max_replans: usize,
    pub step_mode: StepMode,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_step_retries: 1,
            max_replans: 2,
            step_mode: StepMode::Direct,
        }
    }
}

/// 修复策略使用的操作名（与工具面的命名约定对应）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FixOperationsSection {
    pub create_gameobject: String,
    pub find_gameobject: String,
    pub add_component: String,
    pub get_components: String,
    pub create_script: String,
}

impl Default for FixOperationsSection {
    fn default() -> Self {
        Self {
            create_gameobject: "create_gameobject".to_string(),
            find_gameobject: "find_gameobject".to_string(),
            add_component: "add_component".to_string(),
            get_components: "get_components".to_string(),
            create_script: "create_script".to_string(),
        }
    }
}

/// [correction] 段：自我纠错（细粒度超时）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrectionSection {
    pub max_retries: usize,
    /// 无成功/失败标记的结果是否视为成功
    pub fail_open: bool,
    pub fix_operations: FixOperationsSection,
}

impl Default for CorrectionSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            fail_open: true,
            fix_operations: FixOperationsSection::default(),
        }
    }
}

/// [continuation] 段：自动续行冷却
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContinuationSection {
    pub cooldown_ms: u64,
}

impl Default for ContinuationSection {
    fn default() -> Self {
        Self { cooldown_ms: 2000 }
    }
}

impl ContinuationSection {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// [react] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactSection {
    /// Thought 上下文中保留的最近步骤数
    pub history_window: usize,
    /// 覆盖复杂度估算给出的步数上限
    pub max_steps: Option<usize>,
    /// 动作是否经纠错引擎执行
    pub use_correction: bool,
}

impl Default for ReactSection {
    fn default() -> Self {
        Self {
            history_window: 3,
            max_steps: None,
            use_correction: true,
        }
    }
}

/// [stream] 段：UI 批量刷新
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub flush_interval_ms: u64,
    pub flush_threshold_chars: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
            flush_threshold_chars: 80,
        }
    }
}

impl StreamSection {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CONDUCTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 则追加该文件（可覆盖前面的键）；文件不存在即报错
/// 3. 最后叠加环境变量 CONDUCTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONDUCTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
