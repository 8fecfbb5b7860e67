//! 对话领域模型：ChatSession / ChatMessage / TodoTask / ChatResponse

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentKind, AgentOutput, Parameters};
use crate::core::{StoreError, TaskTransitionError};
use crate::paper::model::{new_id, Reference};

/// 对话会话（一个文档可有多个）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub document_id: String,
    pub title: String,
    /// 恒等于已持久化消息数
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(document_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("chat"),
            document_id: document_id.into(),
            title: title.into(),
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for ChatRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(StoreError::Validation(format!("unknown chat role: {other}"))),
        }
    }
}

/// 对话消息，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    /// 仅当本轮恰好一个 Agent 执行了任务时才有值
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub todo_tasks: Vec<TodoTask>,
    #[serde(default)]
    pub references: Vec<Reference>,
    /// 助手消息附带的后续建议
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: new_id("msg"),
            session_id: session_id.into(),
            role: ChatRole::User,
            content: content.into(),
            agent_name: None,
            todo_tasks: Vec::new(),
            references: Vec::new(),
            suggestions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        session_id: impl Into<String>,
        content: impl Into<String>,
        agent_name: Option<String>,
        todo_tasks: Vec<TodoTask>,
        references: Vec<Reference>,
    ) -> Self {
        Self {
            id: new_id("msg"),
            session_id: session_id.into(),
            role: ChatRole::Assistant,
            content: content.into(),
            agent_name,
            todo_tasks,
            references,
            suggestions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

/// 任务优先级；排序时 High 在前
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// 1 = high, 2 = medium, 3 = low
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务作用的章节
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TaskTarget {
    /// 作用于整个文档（或不涉及具体章节）
    #[default]
    Document,
    Section(String),
    /// 同一计划中某个 Outline 任务新建的章节
    CreatedBy(String),
}

/// 计划中的一个任务；状态只能 pending -> in_progress -> completed | failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoTask {
    pub id: String,
    pub description: String,
    pub agent_name: AgentKind,
    pub task_type: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default)]
    pub target: TaskTarget,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub result: Option<AgentOutput>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TodoTask {
    pub fn new(
        agent_name: AgentKind,
        task_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("task"),
            description: description.into(),
            agent_name,
            task_type: task_type.into(),
            priority: TaskPriority::Medium,
            status: TaskStatus::Pending,
            target: TaskTarget::Document,
            parameters: Parameters::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn illegal(&self, to: TaskStatus) -> TaskTransitionError {
        TaskTransitionError {
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }

    pub fn start(&mut self) -> Result<(), TaskTransitionError> {
        if self.status != TaskStatus::Pending {
            return Err(self.illegal(TaskStatus::InProgress));
        }
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, output: AgentOutput) -> Result<(), TaskTransitionError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.illegal(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.result = Some(output);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// 失败时保留已有的部分结果
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        partial: Option<AgentOutput>,
    ) -> Result<(), TaskTransitionError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.illegal(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.error = Some(reason.into());
        if partial.is_some() {
            self.result = partial;
        }
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// 未执行即放弃（取消时）：经 in_progress 再进入 failed
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), TaskTransitionError> {
        self.start()?;
        self.fail(reason, None)
    }
}

/// 单个任务的执行报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub agent_name: AgentKind,
    pub status: TaskStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// send_message 的返回
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// 已持久化的助手消息
    pub message: ChatMessage,
    pub todo_tasks: Vec<TodoTask>,
    /// task_id -> 执行报告
    pub task_results: BTreeMap<String, TaskReport>,
    pub references: Vec<Reference>,
    pub suggestions: Vec<String>,
    /// 本轮完成即为 true，与单个任务成败无关
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentOutput, ValidationReport};

    fn report() -> AgentOutput {
        AgentOutput::Validation(ValidationReport::default())
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = TodoTask::new(AgentKind::LogicValidator, "validate_logic_flow", "check");
        assert!(task.complete(report()).is_err());
        task.start().unwrap();
        assert!(task.start().is_err());
        task.complete(report()).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.fail("late", None).is_err());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_fail_keeps_partial_result() {
        let mut task = TodoTask::new(AgentKind::Writer, "generate_draft", "draft");
        task.start().unwrap();
        task.fail("section vanished", Some(report())).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result.is_some());
        assert_eq!(task.error.as_deref(), Some("section vanished"));
    }

    #[test]
    fn test_abort_from_pending() {
        let mut task = TodoTask::new(AgentKind::Summary, "generate_summary", "sum");
        task.abort("cancelled").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.abort("again").is_err());
    }

    #[test]
    fn test_priority_order() {
        let mut p = vec![TaskPriority::Low, TaskPriority::High, TaskPriority::Medium];
        p.sort();
        assert_eq!(p, vec![TaskPriority::High, TaskPriority::Medium, TaskPriority::Low]);
        assert_eq!(TaskPriority::High.ordinal(), 1);
        assert_eq!("LOW".parse::<TaskPriority>().unwrap(), TaskPriority::Low);
    }

    #[test]
    fn test_task_serializes_agent_in_snake_case() {
        let task = TodoTask::new(AgentKind::LogicValidator, "validate_logic_flow", "check");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["agent_name"], "logic_validator");
        assert_eq!(json["status"], "pending");
    }
}
