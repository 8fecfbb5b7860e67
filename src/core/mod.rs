//! 核心编排层：错误分类、任务规划、Supervisor、回复合成、调度与会话监管

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod session_supervisor;
pub mod synthesis;
pub mod task_scheduler;

pub use builder::{Scribe, ScribeBuilder};
pub use error::{
    AgentError, ChatError, PlanningError, RetrievalError, StoreError, TaskTransitionError,
};
pub use orchestrator::{AgentScope, ChatRequest, Supervisor, SupervisorSettings};
pub use planner::{order_plan, KeywordPlanner, LlmPlanner, Planner, PlanningInput};
pub use session_supervisor::{SessionSupervisor, Turn, TurnGuard};
pub use task_scheduler::{KeyedLocks, TaskScheduler};
