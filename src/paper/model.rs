//! 论文领域模型：Document / Section / HistoryEntry / Reference
//!
//! position 与 hierarchy_path 由 Section Store 统一分配，不可由调用方直接设置。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::StoreError;

pub type DocumentId = String;
pub type SectionId = String;

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4())
}

/// 文档状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
    Published,
}

/// 章节状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    #[default]
    Draft,
    Writing,
    Review,
    Completed,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(StoreError::Validation(format!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

str_enum!(DocumentStatus {
    Draft => "draft",
    InProgress => "in_progress",
    Completed => "completed",
    Published => "published",
});

str_enum!(SectionStatus {
    Draft => "draft",
    Writing => "writing",
    Review => "review",
    Completed => "completed",
});

/// 论文（文档聚合根）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub description: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(title: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("doc"),
            title: title.into(),
            description,
            status: DocumentStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 文档列表项：文档本身加章节统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    #[serde(flatten)]
    pub document: Document,
    pub section_count: usize,
    pub total_words: usize,
}

impl DocumentSummary {
    pub fn from_sections(document: Document, sections: &[Section]) -> Self {
        Self {
            document,
            section_count: sections.len(),
            total_words: sections.iter().map(|s| s.word_count).sum(),
        }
    }
}

/// 文档字段更新（None 表示不修改）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<DocumentStatus>,
}

/// 章节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub document_id: DocumentId,
    /// 0 起始、文档内连续且唯一
    pub position: usize,
    /// 嵌套层级，1 为顶层
    pub level: u8,
    /// 由有序列表推导（如 "2.1"），每次插入/删除/重排后重算
    pub hierarchy_path: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub word_count: usize,
    pub status: SectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Section {
    pub(crate) fn new(document_id: &str, title: String, content: String, level: u8) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("sec"),
            document_id: document_id.to_string(),
            position: 0,
            level: level.max(1),
            hierarchy_path: String::new(),
            word_count: word_count(&content),
            title,
            content,
            summary: String::new(),
            status: SectionStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// 大纲视图（不含正文）
    pub fn outline_entry(&self) -> OutlineEntry {
        OutlineEntry {
            id: self.id.clone(),
            position: self.position,
            hierarchy_path: self.hierarchy_path.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            word_count: self.word_count,
            status: self.status,
        }
    }
}

/// 词数：按空白切分的 token 数
pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

/// 大纲条目：供 Agent 上下文与 UI 列表使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub id: SectionId,
    pub position: usize,
    pub hierarchy_path: String,
    pub title: String,
    pub summary: String,
    pub word_count: usize,
    pub status: SectionStatus,
}

/// 创建章节请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSection {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    /// 省略时追加到末尾；指定时 >= position 的章节整体后移
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub level: Option<u8>,
}

impl NewSection {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }
}

/// 章节字段更新（None 表示不修改）；position / hierarchy_path 不在此列
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub status: Option<SectionStatus>,
    pub level: Option<u8>,
}

impl SectionUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Default::default()
        }
    }
}

/// 移动动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MoveAction {
    Up,
    Down,
    Top,
    Bottom,
    ToPosition { new_position: usize },
}

impl MoveAction {
    /// 由 (action, new_position?) 解析；to_position 必须携带 new_position
    pub fn parse(action: &str, new_position: Option<usize>) -> Result<Self, StoreError> {
        match action {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "top" => Ok(Self::Top),
            "bottom" => Ok(Self::Bottom),
            "to_position" => new_position
                .map(|p| Self::ToPosition { new_position: p })
                .ok_or_else(|| {
                    StoreError::Validation("to_position requires new_position".to_string())
                }),
            other => Err(StoreError::Validation(format!("unknown move action: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::ToPosition { .. } => "to_position",
        }
    }
}

/// 历史快照：记录的是修改「之前」的状态，只追加不修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub section_id: SectionId,
    /// 1 起始，按写入顺序递增
    pub version: u32,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub word_count: usize,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn snapshot(section: &Section, version: u32) -> Self {
        Self {
            id: new_id("hist"),
            section_id: section.id.clone(),
            version,
            title: section.title.clone(),
            content: section.content.clone(),
            summary: section.summary.clone(),
            word_count: section.word_count,
            created_at: Utc::now(),
        }
    }
}

/// 引用：引文字符串 + 可选的结构化书目信息；挂在聊天消息或章节上
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub citation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,
}

impl Reference {
    pub fn citation(citation: impl Into<String>) -> Self {
        Self {
            citation: citation.into(),
            title: None,
            source: None,
            section_id: None,
            relevance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_splits_on_whitespace() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  one\ttwo\nthree  "), 3);
    }

    #[test]
    fn test_move_action_parse() {
        assert_eq!(MoveAction::parse("top", None).unwrap(), MoveAction::Top);
        assert_eq!(
            MoveAction::parse("to_position", Some(2)).unwrap(),
            MoveAction::ToPosition { new_position: 2 }
        );
        assert!(matches!(
            MoveAction::parse("to_position", None),
            Err(StoreError::Validation(_))
        ));
        assert!(MoveAction::parse("sideways", None).is_err());
    }

    #[test]
    fn test_status_round_trip_names() {
        assert_eq!("in_progress".parse::<DocumentStatus>().unwrap(), DocumentStatus::InProgress);
        assert_eq!(SectionStatus::Review.as_str(), "review");
        assert!("archived".parse::<SectionStatus>().is_err());
    }
}
