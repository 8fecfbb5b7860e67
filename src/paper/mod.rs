//! 论文：文档、章节、大纲顺序与修订历史

pub mod history;
pub mod model;
pub mod outline;
pub mod section_store;

pub use history::{HistoryLog, HistoryRecorder};
pub use model::{
    Document, DocumentStatus, DocumentSummary, DocumentUpdate, HistoryEntry, MoveAction,
    NewSection, OutlineEntry, Reference, Section, SectionStatus, SectionUpdate,
};
pub use section_store::SectionStore;
