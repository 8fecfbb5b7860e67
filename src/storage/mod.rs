//! 持久化底座：Document / Section / History / ChatSession / ChatMessage 聚合的存取接口
//!
//! 核心层只依赖 PaperRepository；提供内存实现与 SQLite 实现（需启用 `sqlite` feature）。
//! 每个方法都是单聚合事务；重试策略不在这一层。

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::chat::model::{ChatMessage, ChatSession};
use crate::core::StoreError;
use crate::paper::model::{Document, HistoryEntry, Reference, Section};

pub use memory::MemoryRepository;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepository;

/// 持久化接口
#[async_trait]
pub trait PaperRepository: Send + Sync {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// 按 updated_at 倒序
    async fn list_documents(&self) -> Result<Vec<Document>, StoreError>;

    async fn save_document(&self, document: &Document) -> Result<(), StoreError>;

    /// 级联删除章节、历史、章节引用、会话与消息；返回是否存在
    async fn delete_document(&self, id: &str) -> Result<bool, StoreError>;

    /// 按 position 升序
    async fn list_sections(&self, document_id: &str) -> Result<Vec<Section>, StoreError>;

    async fn get_section(&self, id: &str) -> Result<Option<Section>, StoreError>;

    /// 原子提交整份大纲
    ///
    /// `layout` 为文档新的完整有序列表：已存在的章节只写排序列（position / level / hierarchy_path），
    /// 新章节整行插入；`removed` 中的章节连同其历史与引用一起删除。
    async fn commit_outline(
        &self,
        document_id: &str,
        layout: &[Section],
        removed: &[String],
    ) -> Result<(), StoreError>;

    /// 只写内容列（title / content / summary / word_count / status / updated_at）
    async fn save_section(&self, section: &Section) -> Result<(), StoreError>;

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError>;

    /// 按 version 升序分页
    async fn history_page(
        &self,
        section_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError>;

    async fn history_count(&self, section_id: &str) -> Result<usize, StoreError>;

    async fn append_section_references(
        &self,
        section_id: &str,
        references: &[Reference],
    ) -> Result<(), StoreError>;

    async fn list_section_references(&self, section_id: &str) -> Result<Vec<Reference>, StoreError>;

    async fn insert_session(&self, session: &ChatSession) -> Result<(), StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError>;

    /// 连同消息一起删除；返回是否存在
    async fn delete_session(&self, id: &str) -> Result<bool, StoreError>;

    /// 按 updated_at 倒序
    async fn list_sessions(&self, document_id: &str) -> Result<Vec<ChatSession>, StoreError>;

    /// 追加消息并在同一事务内维护 message_count / updated_at，返回更新后的会话
    async fn append_message(&self, message: &ChatMessage) -> Result<ChatSession, StoreError>;

    /// 按追加顺序分页
    async fn messages_page(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn count_messages(&self, session_id: &str) -> Result<usize, StoreError>;
}

/// 将分页查询包装为惰性流：每次调用都从头开始，取到不足一页时结束
pub fn paginate<T, F, Fut>(page_size: usize, fetch: F) -> BoxStream<'static, Result<T, StoreError>>
where
    T: Send + 'static,
    F: Fn(usize, usize) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>, StoreError>> + Send + 'static,
{
    let page_size = page_size.max(1);
    stream::try_unfold(Some(0usize), move |state| {
        let next = state.map(|offset| (offset, fetch(offset, page_size)));
        async move {
            let Some((offset, page)) = next else {
                return Ok(None);
            };
            let page = page.await?;
            if page.is_empty() {
                return Ok(None);
            }
            let following = (page.len() >= page_size).then_some(offset + page.len());
            Ok(Some((page, following)))
        }
    })
    .map_ok(|page| stream::iter(page.into_iter().map(Ok::<T, StoreError>)))
    .try_flatten()
    .boxed()
}

pub type SharedRepository = Arc<dyn PaperRepository>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paginate_reads_all_pages_and_restarts() {
        let data: Arc<Vec<u32>> = Arc::new((0..7).collect());
        let make = |data: Arc<Vec<u32>>| {
            paginate(3, move |offset, limit| {
                let data = data.clone();
                async move { Ok(data.iter().skip(offset).take(limit).copied().collect()) }
            })
        };

        let first: Vec<u32> = make(data.clone()).try_collect().await.unwrap();
        let second: Vec<u32> = make(data.clone()).try_collect().await.unwrap();
        assert_eq!(first, (0..7).collect::<Vec<_>>());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_paginate_propagates_errors() {
        let items: Vec<Result<u32, StoreError>> = paginate(2, |_, _| async {
            Err::<Vec<u32>, _>(StoreError::Storage("down".into()))
        })
        .collect()
        .await;
        assert_eq!(items, vec![Err(StoreError::Storage("down".into()))]);
    }
}
