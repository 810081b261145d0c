//! 规划层：计划模型、计划解析、任务规划器与双层执行器

pub mod dual_tier;
pub mod parser;
pub mod plan;
pub mod task_planner;

pub use dual_tier::{DualTierExecutor, StepStatus, StepValidation};
pub use parser::{parse_plan_steps, plan_schema};
pub use plan::{Plan, Step};
pub use task_planner::TaskPlanner;
