//! Chat Session Store：会话与消息的持久化门面
//!
//! message_count 由底座在追加消息的同一事务内维护；历史以可重入的分页流读取。

use futures_util::stream::{BoxStream, TryStreamExt};
use tracing::debug;

use crate::chat::model::{ChatMessage, ChatSession};
use crate::core::StoreError;
use crate::storage::{paginate, SharedRepository};

const MAX_TITLE_CHARS: usize = 200;

/// 会话存储
pub struct ChatSessionStore {
    repo: SharedRepository,
    page_size: usize,
}

impl ChatSessionStore {
    pub fn new(repo: SharedRepository, page_size: usize) -> Self {
        Self {
            repo,
            page_size: page_size.max(1),
        }
    }

    /// 为文档创建会话；文档不存在时 NotFound
    pub async fn create_session(
        &self,
        document_id: &str,
        title: &str,
    ) -> Result<ChatSession, StoreError> {
        let title = title.trim();
        if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
            return Err(StoreError::Validation(format!(
                "session title must be 1..={MAX_TITLE_CHARS} characters"
            )));
        }
        if self.repo.get_document(document_id).await?.is_none() {
            return Err(StoreError::not_found("document", document_id));
        }

        let session = ChatSession::new(document_id, title);
        self.repo.insert_session(&session).await?;
        debug!(session_id = %session.id, document_id = %document_id, "chat session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<ChatSession, StoreError> {
        self.repo
            .get_session(session_id)
            .await?
            .ok_or_else(|| StoreError::not_found("session", session_id))
    }

    /// 最近活跃的在前
    pub async fn list_sessions(&self, document_id: &str) -> Result<Vec<ChatSession>, StoreError> {
        self.repo.list_sessions(document_id).await
    }

    /// 删除会话及其全部消息；会话不存在时 NotFound
    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        if !self.repo.delete_session(session_id).await? {
            return Err(StoreError::not_found("session", session_id));
        }
        debug!(session_id = %session_id, "chat session deleted");
        Ok(())
    }

    /// 追加消息，返回 message_count 已更新的会话
    pub async fn append(&self, message: &ChatMessage) -> Result<ChatSession, StoreError> {
        self.repo.append_message(message).await
    }

    /// 会话历史（按追加顺序）；每次调用 stream() 都从头读取
    pub async fn get_history(&self, session_id: &str) -> Result<MessageLog, StoreError> {
        self.get_session(session_id).await?;
        Ok(MessageLog {
            repo: self.repo.clone(),
            session_id: session_id.to_string(),
            page_size: self.page_size,
        })
    }
}

/// 会话消息的惰性视图
pub struct MessageLog {
    repo: SharedRepository,
    session_id: String,
    page_size: usize,
}

impl MessageLog {
    pub fn stream(&self) -> BoxStream<'static, Result<ChatMessage, StoreError>> {
        let repo = self.repo.clone();
        let session_id = self.session_id.clone();
        paginate(self.page_size, move |offset, limit| {
            let repo = repo.clone();
            let session_id = session_id.clone();
            async move { repo.messages_page(&session_id, offset, limit).await }
        })
    }

    pub async fn collect(&self) -> Result<Vec<ChatMessage>, StoreError> {
        self.stream().try_collect().await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.repo.count_messages(&self.session_id).await
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}
