//! Agent 输入输出类型
//!
//! Agent 只产出结构化结果，不直接写 Section Store；结果由 Supervisor 负责落库。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::paper::model::{Document, MoveAction, OutlineEntry, Reference, Section};
use crate::retrieval::Passage;

/// 任务参数（自由键值）
pub type Parameters = serde_json::Map<String, Value>;

/// Agent 种类；序列化为 snake_case 名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Outline,
    Summary,
    Writer,
    LogicValidator,
    Reference,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Outline,
        AgentKind::Summary,
        AgentKind::Writer,
        AgentKind::LogicValidator,
        AgentKind::Reference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Summary => "summary",
            Self::Writer => "writer",
            Self::LogicValidator => "logic_validator",
            Self::Reference => "reference",
        }
    }

    /// 回复文本中使用的名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Outline => "Outline agent",
            Self::Summary => "Summary agent",
            Self::Writer => "Writer agent",
            Self::LogicValidator => "Logic validator",
            Self::Reference => "Reference agent",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    /// 接受 snake_case 名称，也接受 "LogicValidator" / "logic-validator" 之类的写法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        let normalized = normalized.strip_suffix("agent").unwrap_or(&normalized);
        match normalized {
            "outline" => Ok(Self::Outline),
            "summary" => Ok(Self::Summary),
            "writer" => Ok(Self::Writer),
            "logicvalidator" | "validator" => Ok(Self::LogicValidator),
            "reference" | "references" => Ok(Self::Reference),
            _ => Err(s.to_string()),
        }
    }
}

/// 发给单个 Agent 的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub agent: AgentKind,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl AgentTask {
    pub fn new(agent: AgentKind, task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent,
            task_type: task_type.into(),
            description: description.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// 非空字符串参数
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// 非负整数参数（也接受数字字符串）
    pub fn param_usize(&self, key: &str) -> Option<usize> {
        match self.parameters.get(key)? {
            Value::Number(n) => n.as_u64().map(|v| v as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Agent 执行时可见的上下文：文档、大纲快照、目标章节与检索片段
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    /// 触发任务的用户消息
    pub request: String,
    pub document: Option<Document>,
    pub outline: Vec<OutlineEntry>,
    pub target: Option<Section>,
    pub passages: Vec<Passage>,
}

impl AgentContext {
    pub fn target_id(&self) -> Option<String> {
        self.target.as_ref().map(|s| s.id.clone())
    }

    pub fn document_title(&self) -> &str {
        self.document.as_ref().map_or("Untitled", |d| d.title.as_str())
    }

    /// 「路径 标题」逐行列出大纲
    pub fn outline_text(&self) -> String {
        self.outline
            .iter()
            .map(|e| {
                if e.summary.is_empty() {
                    format!("{} {}", e.hierarchy_path, e.title)
                } else {
                    format!("{} {} - {}", e.hierarchy_path, e.title, e.summary)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 大纲修改操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OutlineOp {
    Create {
        title: String,
        #[serde(default)]
        position: Option<usize>,
        #[serde(default)]
        level: Option<u8>,
    },
    Move {
        section_id: String,
        action: MoveAction,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutlineProposal {
    pub operations: Vec<OutlineOp>,
    #[serde(default)]
    pub issues: Vec<StructureIssue>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDraft {
    pub section_id: Option<String>,
    pub summary: String,
    pub character_count: usize,
    pub target_length: usize,
    pub within_range: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterDraft {
    /// 有值时内容写回该章节
    pub section_id: Option<String>,
    pub task_type: String,
    pub content: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuePriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingSection,
    OrderIssue,
    EmptySection,
    DuplicateTitle,
    LogicalGap,
}

/// 结构 / 逻辑问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureIssue {
    pub issue_type: IssueType,
    pub priority: IssuePriority,
    #[serde(default)]
    pub location: Option<String>,
    pub title: String,
    pub description: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<StructureIssue>,
    /// 0.0 ~ 1.0
    pub score: f32,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceList {
    pub query: String,
    /// 有值时引用挂到该章节
    pub section_id: Option<String>,
    pub citations: Vec<Reference>,
}

/// Agent 结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutput {
    Outline(OutlineProposal),
    Summary(SummaryDraft),
    Writer(WriterDraft),
    Validation(ValidationReport),
    References(ReferenceList),
}

impl AgentOutput {
    /// 一行摘要，用于回复文本
    pub fn headline(&self) -> String {
        match self {
            Self::Outline(p) if p.operations.is_empty() && p.issues.is_empty() => {
                if p.note.is_empty() {
                    "no outline changes".to_string()
                } else {
                    p.note.clone()
                }
            }
            Self::Outline(p) if p.operations.is_empty() => {
                format!("found {} structural issue(s)", p.issues.len())
            }
            Self::Outline(p) => {
                let created = p
                    .operations
                    .iter()
                    .filter(|op| matches!(op, OutlineOp::Create { .. }))
                    .count();
                let moved = p.operations.len() - created;
                match (created, moved) {
                    (c, 0) => format!("created {c} section(s)"),
                    (0, m) => format!("moved {m} section(s)"),
                    (c, m) => format!("created {c} and moved {m} section(s)"),
                }
            }
            Self::Summary(s) => format!("summary of {} characters", s.character_count),
            Self::Writer(w) => format!("{} words written", w.word_count),
            Self::Validation(v) => format!(
                "{} issue(s) found, logic score {:.2}",
                v.issues.len(),
                v.score
            ),
            Self::References(r) => format!("{} reference(s) found", r.citations.len()),
        }
    }
}
