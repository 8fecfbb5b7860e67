//! 对话：会话、消息与任务记录

pub mod model;
pub mod session_store;

pub use model::{
    ChatMessage, ChatResponse, ChatRole, ChatSession, TaskPriority, TaskReport, TaskStatus,
    TaskTarget, TodoTask,
};
pub use session_store::{ChatSessionStore, MessageLog};
