//! Section Store：文档与章节的权威存储
//!
//! 写入策略：
//! - 结构性修改（创建 / 删除 / 移动 / 改层级）持有文档锁，读取完整列表、重排后整体提交；
//!   文档锁在 lock_timeout 内拿不到即返回 ConcurrentModification。
//! - 内容修改持有章节锁，先写历史快照再覆盖内容，同一章节的并发写入按到达顺序串行。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::core::task_scheduler::KeyedLocks;
use crate::core::StoreError;
use crate::paper::history::{HistoryLog, HistoryRecorder};
use crate::paper::model::{
    word_count, Document, DocumentSummary, DocumentUpdate, MoveAction, NewSection, OutlineEntry,
    Reference, Section, SectionUpdate,
};
use crate::paper::outline::{relocate, renumber, resolve_target};
use crate::storage::SharedRepository;

const MAX_TITLE_CHARS: usize = 300;
const MAX_LEVEL: u8 = 6;

fn validate_title(title: &str) -> Result<String, StoreError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(StoreError::Validation(format!(
            "title must be 1..={MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

fn validate_level(level: u8) -> Result<u8, StoreError> {
    if !(1..=MAX_LEVEL).contains(&level) {
        return Err(StoreError::Validation(format!(
            "level must be within 1..={MAX_LEVEL}, got {level}"
        )));
    }
    Ok(level)
}

/// 章节存储
pub struct SectionStore {
    repo: SharedRepository,
    history: HistoryRecorder,
    document_locks: KeyedLocks,
    section_locks: KeyedLocks,
    lock_timeout: Duration,
}

impl SectionStore {
    pub fn new(repo: SharedRepository, history: HistoryRecorder, lock_timeout: Duration) -> Self {
        Self {
            repo,
            history,
            document_locks: KeyedLocks::new(),
            section_locks: KeyedLocks::new(),
            lock_timeout,
        }
    }

    pub fn history_recorder(&self) -> &HistoryRecorder {
        &self.history
    }

    /// 获取文档的独占锁；在 lock_timeout 内拿不到则 ConcurrentModification
    ///
    /// 持有期间该文档的所有结构性修改都会失败或等待。
    pub async fn lock_document(&self, document_id: &str) -> Result<OwnedMutexGuard<()>, StoreError> {
        self.document_locks
            .lock_within(document_id, self.lock_timeout)
            .await
            .ok_or_else(|| StoreError::ConcurrentModification {
                document_id: document_id.to_string(),
            })
    }

    // ---------- 文档 ----------

    pub async fn create_document(
        &self,
        title: &str,
        description: Option<String>,
    ) -> Result<Document, StoreError> {
        let document = Document::new(validate_title(title)?, description);
        self.repo.insert_document(&document).await?;
        info!(document_id = %document.id, title = %document.title, "document created");
        Ok(document)
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Document, StoreError> {
        self.repo
            .get_document(document_id)
            .await?
            .ok_or_else(|| StoreError::not_found("document", document_id))
    }

    /// 最近修改的在前
    pub async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        self.repo.list_documents().await
    }

    /// 同 list_documents，附带章节数与总字数
    pub async fn list_document_summaries(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let documents = self.repo.list_documents().await?;
        let mut summaries = Vec::with_capacity(documents.len());
        for document in documents {
            let sections = self.repo.list_sections(&document.id).await?;
            summaries.push(DocumentSummary::from_sections(document, &sections));
        }
        Ok(summaries)
    }

    pub async fn update_document(
        &self,
        document_id: &str,
        update: DocumentUpdate,
    ) -> Result<Document, StoreError> {
        let mut document = self.get_document(document_id).await?;
        if let Some(title) = update.title {
            document.title = validate_title(&title)?;
        }
        if let Some(description) = update.description {
            document.description = Some(description);
        }
        if let Some(status) = update.status {
            document.status = status;
        }
        document.updated_at = Utc::now();
        self.repo.save_document(&document).await?;
        Ok(document)
    }

    /// 删除文档及其全部章节、历史、会话
    pub async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let _guard = self.lock_document(document_id).await?;
        let sections = self.repo.list_sections(document_id).await?;
        if !self.repo.delete_document(document_id).await? {
            return Err(StoreError::not_found("document", document_id));
        }
        for section in &sections {
            self.section_locks.forget(&section.id);
        }
        info!(document_id = %document_id, sections = sections.len(), "document deleted");
        Ok(())
    }

    // ---------- 章节 ----------

    /// 创建章节；position 省略时追加到末尾，指定时其后的章节整体后移
    pub async fn create(&self, document_id: &str, new: NewSection) -> Result<Section, StoreError> {
        let title = validate_title(&new.title)?;
        let level = validate_level(new.level.unwrap_or(1))?;

        let _guard = self.lock_document(document_id).await?;
        self.get_document(document_id).await?;
        let mut sections = self.repo.list_sections(document_id).await?;

        let position = new.position.unwrap_or(sections.len());
        if position > sections.len() {
            return Err(StoreError::OutOfRange {
                position,
                len: sections.len(),
            });
        }

        let section = Section::new(document_id, title, new.content.unwrap_or_default(), level);
        let section_id = section.id.clone();
        sections.insert(position, section);
        renumber(&mut sections);
        self.repo.commit_outline(document_id, &sections, &[]).await?;

        info!(document_id = %document_id, section_id = %section_id, position, "section created");
        Ok(sections.swap_remove(position))
    }

    pub async fn get(&self, section_id: &str) -> Result<Section, StoreError> {
        self.repo
            .get_section(section_id)
            .await?
            .ok_or_else(|| StoreError::not_found("section", section_id))
    }

    /// 按 position 升序
    pub async fn list(&self, document_id: &str) -> Result<Vec<Section>, StoreError> {
        self.get_document(document_id).await?;
        self.repo.list_sections(document_id).await
    }

    pub async fn outline(&self, document_id: &str) -> Result<Vec<OutlineEntry>, StoreError> {
        Ok(self
            .list(document_id)
            .await?
            .iter()
            .map(Section::outline_entry)
            .collect())
    }

    /// 更新章节；content 或 summary 实际变化时先记录修改前的快照
    pub async fn update(&self, section_id: &str, update: SectionUpdate) -> Result<Section, StoreError> {
        let _section_guard = self.section_locks.lock(section_id).await;
        let previous = self.get(section_id).await?;

        let mut next = previous.clone();
        if let Some(title) = &update.title {
            next.title = validate_title(title)?;
        }
        if let Some(content) = update.content {
            next.word_count = word_count(&content);
            next.content = content;
        }
        if let Some(summary) = update.summary {
            next.summary = summary;
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        let level_changed = match update.level {
            Some(level) => {
                next.level = validate_level(level)?;
                next.level != previous.level
            }
            None => false,
        };

        let text_changed = next.content != previous.content || next.summary != previous.summary;
        if !text_changed && !level_changed && next.title == previous.title && next.status == previous.status
        {
            return Ok(previous);
        }

        // 改层级要重排整个文档，先拿文档锁再写任何东西
        let _document_guard = if level_changed {
            Some(self.lock_document(&previous.document_id).await?)
        } else {
            None
        };

        if text_changed {
            self.history.record(&previous).await?;
        }

        next.updated_at = Utc::now();
        self.repo.save_section(&next).await?;

        if level_changed {
            let mut sections = self.repo.list_sections(&previous.document_id).await?;
            if let Some(stored) = sections.iter_mut().find(|s| s.id == section_id) {
                stored.level = next.level;
            }
            renumber(&mut sections);
            self.repo
                .commit_outline(&previous.document_id, &sections, &[])
                .await?;
        }

        debug!(section_id = %section_id, text_changed, level_changed, "section updated");
        self.get(section_id).await
    }

    /// 删除章节，返回剩余章节（已重新编号）
    pub async fn delete(&self, section_id: &str) -> Result<Vec<Section>, StoreError> {
        let section = self.get(section_id).await?;
        let _section_guard = self.section_locks.lock(section_id).await;
        let _guard = self.lock_document(&section.document_id).await?;

        let mut sections = self.repo.list_sections(&section.document_id).await?;
        let idx = sections
            .iter()
            .position(|s| s.id == section_id)
            .ok_or_else(|| StoreError::not_found("section", section_id))?;
        sections.remove(idx);
        renumber(&mut sections);
        self.repo
            .commit_outline(&section.document_id, &sections, &[section_id.to_string()])
            .await?;
        self.section_locks.forget(section_id);

        info!(document_id = %section.document_id, section_id = %section_id, "section deleted");
        Ok(sections)
    }

    /// 移动章节，返回文档的完整新顺序
    ///
    /// up / down 在边界处为空操作（不写入）；to_position 越界为 OutOfRange。
    pub async fn move_section(
        &self,
        section_id: &str,
        action: MoveAction,
    ) -> Result<Vec<Section>, StoreError> {
        let section = self.get(section_id).await?;
        let document_id = section.document_id;
        let _guard = self.lock_document(&document_id).await?;

        let mut sections = self.repo.list_sections(&document_id).await?;
        let current = sections
            .iter()
            .position(|s| s.id == section_id)
            .ok_or_else(|| StoreError::not_found("section", section_id))?;
        let target = resolve_target(sections.len(), current, action)?;
        if target == current {
            debug!(section_id = %section_id, action = action.name(), "move is a no-op");
            return Ok(sections);
        }

        relocate(&mut sections, current, target);
        renumber(&mut sections);
        self.repo.commit_outline(&document_id, &sections, &[]).await?;

        info!(
            document_id = %document_id,
            section_id = %section_id,
            action = action.name(),
            from = current,
            to = target,
            "section moved"
        );
        Ok(sections)
    }

    /// 章节历史（最早的在前）
    pub async fn history(&self, section_id: &str) -> Result<HistoryLog, StoreError> {
        self.get(section_id).await?;
        Ok(self.history.list(section_id))
    }

    /// 为章节追加引用
    pub async fn add_references(
        &self,
        section_id: &str,
        references: &[Reference],
    ) -> Result<(), StoreError> {
        if references.is_empty() {
            return Ok(());
        }
        let _section_guard = self.section_locks.lock(section_id).await;
        self.get(section_id).await?;
        let tagged: Vec<Reference> = references
            .iter()
            .cloned()
            .map(|mut r| {
                r.section_id = Some(section_id.to_string());
                r
            })
            .collect();
        self.repo
            .append_section_references(section_id, &tagged)
            .await
    }

    pub async fn list_references(&self, section_id: &str) -> Result<Vec<Reference>, StoreError> {
        self.get(section_id).await?;
        self.repo.list_section_references(section_id).await
    }
}

/// 供测试与组装使用的便捷构造
impl SectionStore {
    pub fn with_repository(repo: SharedRepository, page_size: usize, lock_timeout: Duration) -> Arc<Self> {
        let history = HistoryRecorder::new(repo.clone(), page_size);
        Arc::new(Self::new(repo, history, lock_timeout))
    }
}
