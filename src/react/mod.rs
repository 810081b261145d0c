//! ReAct 层：动作信封、复杂度估算、轨迹、主循环与过程事件

pub mod action;
pub mod complexity;
pub mod events;
pub mod loop_;
pub mod trajectory;

pub use action::{parse_action, parse_actions, ActionEnvelope};
pub use complexity::{estimate, Complexity, ComplexityEstimate};
pub use events::ReactEvent;
pub use loop_::ReactAgent;
pub use trajectory::{ReactStepRecord, Trajectory};
