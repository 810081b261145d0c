//! Conductor - 智能体编排核心
//!
//! 入口：初始化日志，按配置组装编排器，对命令行给出的目标运行工作流并打印报告。
//! 未设置 API Key 时使用脚本化的离线演示模型。
//!
//! 用法：conductor [--config <path>] <goal...>

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use conductor::config::{load_config, AppConfig};
use conductor::core::{OrchestratorBuilder, RunStatus};
use conductor::llm::ScriptedLlmClient;
use conductor::stream::{StreamSink, ToolCallEnvelope};
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_GOAL: &str = "Create a Player object with a Rigidbody";

/// 流式输出直接写到标准输出
struct StdoutSink;

impl StreamSink for StdoutSink {
    fn on_update(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn on_tool_call(&self, call: &ToolCallEnvelope) {
        println!("\n  -> {}", call.operation);
    }

    fn on_complete(&self, _full_text: &str) {
        println!();
    }

    fn on_error(&self, message: &str) {
        eprintln!("\n[stream error] {}", message);
    }
}

/// 离线演示脚本：单一模型承担规划、执行与校验
fn demo_llm() -> ScriptedLlmClient {
    let plan = r#"```json
{"subTasks": [
  {"description": "Create the Player object", "requiredTools": ["create_gameobject"], "suggestedParameters": {"name": "Player"}},
  {"description": "Add a Rigidbody to the Player", "requiredTools": ["add_component"], "suggestedParameters": {"target": "Player", "component": "Rigidbody"}}
]}
```"#;
    ScriptedLlmClient::new([
        plan,
        "Creating the player first.\n[ACTION: create_gameobject]\nname: Player\n[/ACTION]",
        "SUCCESS: the Player object exists",
        "Adding physics.\n[ACTION: add_component]\ntarget: Player\ncomponent: Rigidbody\n[/ACTION]",
        "SUCCESS: Rigidbody attached",
    ])
    .with_name("demo")
}

fn parse_args() -> (Option<PathBuf>, String) {
    let mut config_path = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().map(PathBuf::from),
            _ => words.push(arg),
        }
    }
    let goal = if words.is_empty() {
        DEFAULT_GOAL.to_string()
    } else {
        words.join(" ")
    };
    (config_path, goal)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    conductor::observability::init();

    let (config_path, goal) = parse_args();
    let cfg = match &config_path {
        Some(path) => load_config(Some(path.clone()))
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => load_config(None).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }),
    };

    let offline = std::env::var(&cfg.llm.api_key_env).is_err();
    let mut builder = OrchestratorBuilder::new(cfg).with_sink(Arc::new(StdoutSink));
    if offline {
        tracing::info!("no API key found, running the offline demo script");
        builder = builder.with_llm(Arc::new(demo_llm()));
    }
    let mut orchestrator = builder.build();

    let supervisor_token = orchestrator.supervisor().cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            supervisor_token.cancel();
        }
    });

    let mut report = orchestrator.run_goal(&goal, "").await;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while report.status == RunStatus::AwaitingInput {
        println!("\n{}\nContinue? [y/N] ", report.message);
        let answer = stdin.next_line().await.context("Failed to read stdin")?;
        if !matches!(answer.as_deref().map(str::trim), Some("y" | "Y" | "yes")) {
            break;
        }
        report = orchestrator.resume().await.context("Resume failed")?;
    }

    println!("\n{}", report.summary());
    if report.status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
