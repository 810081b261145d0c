//! Conductor - 智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 工作流状态机、续行闸门、会话监管与主控循环
//! - **correction**: 错误分类、修复策略与自我纠错引擎
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）
//! - **observability**: 日志初始化
//! - **planning**: 计划模型、计划解析、任务规划与双层执行
//! - **react**: 动作信封、复杂度估算与 ReAct 主循环
//! - **stream**: 流式片段的缓冲、节流与分派
//! - **tools**: 工具面、注册表、执行器与内存场景

pub mod config;
pub mod core;
pub mod correction;
pub mod llm;
pub mod observability;
pub mod planning;
pub mod react;
pub mod stream;
pub mod tools;

pub use crate::core::{create_orchestrator, Orchestrator, OrchestratorBuilder, RunStatus, WorkflowReport};
