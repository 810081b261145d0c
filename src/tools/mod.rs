//! 工具层：工具面抽象、注册表、带超时的执行器与内置工具

pub mod echo;
pub mod executor;
pub mod registry;
pub mod scene;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{
    params, Tool, ToolGroup, ToolParams, ToolRegistry, ToolSurface, FAILURE_MARKER, SUCCESS_MARKER,
};
pub use scene::{SceneGraph, SceneTools};
