//! 内存实现：单把 RwLock 保护全部聚合，每个方法即一次原子事务
//!
//! 适用于测试与单进程演示；进程退出即丢失。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PaperRepository;
use crate::chat::model::{ChatMessage, ChatSession};
use crate::core::StoreError;
use crate::paper::model::{Document, HistoryEntry, Reference, Section};

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, Document>,
    /// document_id -> 按 position 排列的章节
    sections: HashMap<String, Vec<Section>>,
    /// section_id -> document_id
    section_index: HashMap<String, String>,
    history: HashMap<String, Vec<HistoryEntry>>,
    section_refs: HashMap<String, Vec<Reference>>,
    sessions: HashMap<String, ChatSession>,
    messages: HashMap<String, Vec<ChatMessage>>,
}

impl MemoryState {
    fn section_mut(&mut self, id: &str) -> Option<&mut Section> {
        let document_id = self.section_index.get(id)?;
        self.sections
            .get_mut(document_id)?
            .iter_mut()
            .find(|s| s.id == id)
    }

    fn drop_section_data(&mut self, id: &str) {
        self.section_index.remove(id);
        self.history.remove(id);
        self.section_refs.remove(id);
    }
}

/// 内存持久化
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaperRepository for MemoryRepository {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.documents.contains_key(&document.id) {
            return Err(StoreError::Validation(format!(
                "document {} already exists",
                document.id
            )));
        }
        state.documents.insert(document.id.clone(), document.clone());
        state.sections.entry(document.id.clone()).or_default();
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.state.read().await.documents.get(id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state.documents.values().cloned().collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.documents.get_mut(&document.id) {
            Some(existing) => {
                *existing = document.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("document", &document.id)),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.documents.remove(id).is_none() {
            return Ok(false);
        }
        for section in state.sections.remove(id).unwrap_or_default() {
            state.drop_section_data(&section.id);
        }
        let session_ids: Vec<String> = state
            .sessions
            .values()
            .filter(|s| s.document_id == id)
            .map(|s| s.id.clone())
            .collect();
        for session_id in session_ids {
            state.sessions.remove(&session_id);
            state.messages.remove(&session_id);
        }
        Ok(true)
    }

    async fn list_sections(&self, document_id: &str) -> Result<Vec<Section>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sections.get(document_id).cloned().unwrap_or_default())
    }

    async fn get_section(&self, id: &str) -> Result<Option<Section>, StoreError> {
        let state = self.state.read().await;
        let Some(document_id) = state.section_index.get(id) else {
            return Ok(None);
        };
        Ok(state
            .sections
            .get(document_id)
            .and_then(|list| list.iter().find(|s| s.id == id))
            .cloned())
    }

    async fn commit_outline(
        &self,
        document_id: &str,
        layout: &[Section],
        removed: &[String],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let current = state
            .sections
            .get(document_id)
            .ok_or_else(|| StoreError::not_found("document", document_id))?;

        let mut existing: HashMap<&str, &Section> =
            current.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut next = Vec::with_capacity(layout.len());
        for section in layout {
            let row = match existing.remove(section.id.as_str()) {
                Some(stored) => Section {
                    position: section.position,
                    level: section.level,
                    hierarchy_path: section.hierarchy_path.clone(),
                    ..stored.clone()
                },
                None => section.clone(),
            };
            next.push(row);
        }
        // 未出现在新布局中的旧章节必须显式列入 removed
        if let Some(orphan) = existing.keys().find(|id| !removed.iter().any(|r| r == *id)) {
            return Err(StoreError::Validation(format!(
                "outline commit does not cover section {orphan}"
            )));
        }

        for id in removed {
            state.drop_section_data(id);
        }
        for section in &next {
            state
                .section_index
                .insert(section.id.clone(), document_id.to_string());
        }
        state.sections.insert(document_id.to_string(), next);
        Ok(())
    }

    async fn save_section(&self, section: &Section) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .section_mut(&section.id)
            .ok_or_else(|| StoreError::not_found("section", &section.id))?;
        stored.title = section.title.clone();
        stored.content = section.content.clone();
        stored.summary = section.summary.clone();
        stored.word_count = section.word_count;
        stored.status = section.status;
        stored.updated_at = section.updated_at;
        Ok(())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.section_index.contains_key(&entry.section_id) {
            return Err(StoreError::not_found("section", &entry.section_id));
        }
        state
            .history
            .entry(entry.section_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn history_page(
        &self,
        section_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .history
            .get(section_id)
            .map(|entries| entries.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn history_count(&self, section_id: &str) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state.history.get(section_id).map_or(0, Vec::len))
    }

    async fn append_section_references(
        &self,
        section_id: &str,
        references: &[Reference],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.section_index.contains_key(section_id) {
            return Err(StoreError::not_found("section", section_id));
        }
        state
            .section_refs
            .entry(section_id.to_string())
            .or_default()
            .extend(references.iter().cloned());
        Ok(())
    }

    async fn list_section_references(&self, section_id: &str) -> Result<Vec<Reference>, StoreError> {
        let state = self.state.read().await;
        Ok(state.section_refs.get(section_id).cloned().unwrap_or_default())
    }

    async fn insert_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(&session.document_id) {
            return Err(StoreError::not_found("document", &session.document_id));
        }
        state.sessions.insert(session.id.clone(), session.clone());
        state.messages.entry(session.id.clone()).or_default();
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.messages.remove(id);
        Ok(state.sessions.remove(id).is_some())
    }

    async fn list_sessions(&self, document_id: &str) -> Result<Vec<ChatSession>, StoreError> {
        let state = self.state.read().await;
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<ChatSession, StoreError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&message.session_id) {
            return Err(StoreError::not_found("session", &message.session_id));
        }
        let messages = state.messages.entry(message.session_id.clone()).or_default();
        messages.push(message.clone());
        let count = messages.len();

        let session = state
            .sessions
            .get_mut(&message.session_id)
            .ok_or_else(|| StoreError::not_found("session", &message.session_id))?;
        session.message_count = count;
        session.updated_at = message.created_at;
        Ok(session.clone())
    }

    async fn messages_page(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(session_id)
            .map(|m| m.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn count_messages(&self, session_id: &str) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state.messages.get(session_id).map_or(0, Vec::len))
    }
}
