//! History Recorder：章节内容/摘要被覆盖前的快照
//!
//! 只追加；版本号按章节从 1 递增。调用方须持有该章节的写锁，
//! 以保证「读计数 -> 写入」之间没有并发记录。

use futures_util::stream::{BoxStream, TryStreamExt};
use tracing::debug;

use crate::core::StoreError;
use crate::paper::model::{HistoryEntry, Section};
use crate::storage::{paginate, SharedRepository};

/// 历史记录器
#[derive(Clone)]
pub struct HistoryRecorder {
    repo: SharedRepository,
    page_size: usize,
}

impl HistoryRecorder {
    pub fn new(repo: SharedRepository, page_size: usize) -> Self {
        Self {
            repo,
            page_size: page_size.max(1),
        }
    }

    /// 记录 previous（修改前的状态）
    pub async fn record(&self, previous: &Section) -> Result<HistoryEntry, StoreError> {
        let version = self.repo.history_count(&previous.id).await? as u32 + 1;
        let entry = HistoryEntry::snapshot(previous, version);
        self.repo.append_history(&entry).await?;
        debug!(section_id = %previous.id, version, "section snapshot recorded");
        Ok(entry)
    }

    pub fn list(&self, section_id: &str) -> HistoryLog {
        HistoryLog {
            repo: self.repo.clone(),
            section_id: section_id.to_string(),
            page_size: self.page_size,
        }
    }
}

/// 某章节历史的惰性视图：stream() 每次调用都从最早的版本重新读取
pub struct HistoryLog {
    repo: SharedRepository,
    section_id: String,
    page_size: usize,
}

impl HistoryLog {
    pub fn section_id(&self) -> &str {
        &self.section_id
    }

    /// 按 version 升序
    pub fn stream(&self) -> BoxStream<'static, Result<HistoryEntry, StoreError>> {
        let repo = self.repo.clone();
        let section_id = self.section_id.clone();
        paginate(self.page_size, move |offset, limit| {
            let repo = repo.clone();
            let section_id = section_id.clone();
            async move { repo.history_page(&section_id, offset, limit).await }
        })
    }

    pub async fn collect(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.stream().try_collect().await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.repo.history_count(&self.section_id).await
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// 最新一条快照
    pub async fn latest(&self) -> Result<Option<HistoryEntry>, StoreError> {
        let count = self.len().await?;
        if count == 0 {
            return Ok(None);
        }
        Ok(self
            .repo
            .history_page(&self.section_id, count - 1, 1)
            .await?
            .into_iter()
            .next())
    }
}
