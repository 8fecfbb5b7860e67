//! 错误分类：存储 / Agent / 规划 / 检索 / 对话轮次
//!
//! 任务级失败（AgentError）只作为数据记录在 TodoTask 上；其余错误向调用方传播，核心层不做重试。

use thiserror::Error;

/// Section Store / Chat Session Store / 持久化底座的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("position {position} out of range for {len} sections")]
    OutOfRange { position: usize, len: usize },

    #[error("validation failed: {0}")]
    Validation(String),

    /// 同一文档上已有重排在进行；调用方应整体重试
    #[error("document {document_id} is being modified concurrently, retry the operation")]
    ConcurrentModification { document_id: String },

    #[error("storage unavailable: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// 单个 Agent 执行失败（AgentExecutionError 及其变体），由 Supervisor 按任务捕获
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent execution failed: {0}")]
    Execution(String),

    #[error("invalid task for {agent}: {reason}")]
    InvalidTask { agent: String, reason: String },

    #[error("agent timed out after {0}s")]
    Timeout(u64),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AgentError {
    pub fn invalid(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            agent: agent.into(),
            reason: reason.into(),
        }
    }
}

/// 整条消息无法分解为任务计划：唯一会中止整个对话轮次的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("plan references unknown agent: {0}")]
    UnknownAgent(String),

    #[error("target section {section_id} does not belong to document {document_id}")]
    TargetNotInDocument {
        section_id: String,
        document_id: String,
    },

    #[error("planner generation failed: {0}")]
    Generation(String),
}

/// 检索协作方不可用（无结果不是错误）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

/// TodoTask 非法状态迁移
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal task transition {from} -> {to}")]
pub struct TaskTransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

/// send_message 向调用方暴露的错误
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// 在执行阶段开始前被取消：计划被丢弃，无任何副作用
    #[error("chat turn cancelled before execution")]
    Cancelled,
}
