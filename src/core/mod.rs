//! 核心编排层：错误、工作流状态机、续行闸门、会话监管、构建器与主控循环

pub mod builder;
pub mod continuation;
pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use continuation::{claims_completion, ContinuationGate};
pub use error::AgentError;
pub use orchestrator::{create_orchestrator, ActionResult, Orchestrator, RunStatus, StepObservation, WorkflowReport};
pub use session_supervisor::SessionSupervisor;
pub use state::{TransitionRecord, WorkflowSnapshot, WorkflowState, WorkflowStateMachine};
