//! SQLite 持久化（sqlx，需启用 `sqlite` feature）
//!
//! 时间统一存 RFC3339 文本；TodoTask / Reference 列表以 JSON 文本存储。
//! 外键 ON DELETE CASCADE 负责文档、章节、会话的级联删除。

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::PaperRepository;
use crate::chat::model::{ChatMessage, ChatRole, ChatSession};
use crate::core::StoreError;
use crate::paper::model::{
    Document, DocumentStatus, HistoryEntry, Reference, Section, SectionStatus,
};

/// SQLite 持久化
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// 打开（必要时创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let options = SqliteConnectOptions::from_str(&db_url)?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.init_tables().await?;
        Ok(repo)
    }

    /// 从连接池创建（调用方负责已开启外键）
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let repo = Self { pool };
        repo.init_tables().await?;
        Ok(repo)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sections (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                level INTEGER NOT NULL,
                hierarchy_path TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (document_id, position),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS section_history (
                id TEXT PRIMARY KEY,
                section_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (section_id, version),
                FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS section_references (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                section_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                title TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                agent_name TEXT,
                todo_tasks TEXT NOT NULL,
                refs TEXT NOT NULL,
                suggestions TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sections_document ON sections(document_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(session_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Storage(e.to_string()))
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: DocumentStatus::from_str(&row.try_get::<String, _>("status")?)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn section_from_row(row: &SqliteRow) -> Result<Section, StoreError> {
    Ok(Section {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        position: row.try_get::<i64, _>("position")? as usize,
        level: row.try_get::<i64, _>("level")?.clamp(1, u8::MAX as i64) as u8,
        hierarchy_path: row.try_get("hierarchy_path")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        word_count: row.try_get::<i64, _>("word_count")? as usize,
        status: SectionStatus::from_str(&row.try_get::<String, _>("status")?)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<HistoryEntry, StoreError> {
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        section_id: row.try_get("section_id")?,
        version: row.try_get::<i64, _>("version")? as u32,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        word_count: row.try_get::<i64, _>("word_count")? as usize,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<ChatSession, StoreError> {
    Ok(ChatSession {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        title: row.try_get("title")?,
        message_count: row.try_get::<i64, _>("message_count")? as usize,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage, StoreError> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: ChatRole::from_str(&row.try_get::<String, _>("role")?)?,
        content: row.try_get("content")?,
        agent_name: row.try_get("agent_name")?,
        todo_tasks: from_json(&row.try_get::<String, _>("todo_tasks")?)?,
        references: from_json(&row.try_get::<String, _>("refs")?)?,
        suggestions: from_json(&row.try_get::<String, _>("suggestions")?)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

const SECTION_COLUMNS: &str = "id, document_id, position, level, hierarchy_path, title, content, \
     summary, word_count, status, created_at, updated_at";

#[async_trait]
impl PaperRepository for SqliteRepository {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO documents (id, title, description, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.description)
        .bind(document.status.as_str())
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET title = ?, description = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&document.title)
        .bind(&document.description)
        .bind(document.status.as_str())
        .bind(document.updated_at.to_rfc3339())
        .bind(&document.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("document", &document.id));
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_sections(&self, document_id: &str) -> Result<Vec<Section>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SECTION_COLUMNS} FROM sections WHERE document_id = ? ORDER BY position ASC"
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(section_from_row).collect()
    }

    async fn get_section(&self, id: &str) -> Result<Option<Section>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(section_from_row).transpose()
    }

    async fn commit_outline(
        &self,
        document_id: &str,
        layout: &[Section],
        removed: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for id in removed {
            sqlx::query("DELETE FROM sections WHERE id = ? AND document_id = ?")
                .bind(id)
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
        }

        // 先移到负数临时位置，避开 (document_id, position) 唯一约束的中间冲突
        for (idx, section) in layout.iter().enumerate() {
            sqlx::query("UPDATE sections SET position = ? WHERE id = ? AND document_id = ?")
                .bind(-(idx as i64) - 1)
                .bind(&section.id)
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
        }

        for section in layout {
            sqlx::query(&format!(
                "INSERT INTO sections ({SECTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    position = excluded.position,
                    level = excluded.level,
                    hierarchy_path = excluded.hierarchy_path"
            ))
            .bind(&section.id)
            .bind(document_id)
            .bind(section.position as i64)
            .bind(section.level as i64)
            .bind(&section.hierarchy_path)
            .bind(&section.title)
            .bind(&section.content)
            .bind(&section.summary)
            .bind(section.word_count as i64)
            .bind(section.status.as_str())
            .bind(section.created_at.to_rfc3339())
            .bind(section.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_section(&self, section: &Section) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sections SET title = ?, content = ?, summary = ?, word_count = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&section.title)
        .bind(&section.content)
        .bind(&section.summary)
        .bind(section.word_count as i64)
        .bind(section.status.as_str())
        .bind(section.updated_at.to_rfc3339())
        .bind(&section.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("section", &section.id));
        }
        Ok(())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO section_history (id, section_id, version, title, content, summary, word_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.section_id)
        .bind(entry.version as i64)
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.summary)
        .bind(entry.word_count as i64)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history_page(
        &self,
        section_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM section_history WHERE section_id = ? ORDER BY version ASC LIMIT ? OFFSET ?",
        )
        .bind(section_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }

    async fn history_count(&self, section_id: &str) -> Result<usize, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM section_history WHERE section_id = ?")
                .bind(section_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn append_section_references(
        &self,
        section_id: &str,
        references: &[Reference],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for reference in references {
            sqlx::query("INSERT INTO section_references (section_id, payload) VALUES (?, ?)")
                .bind(section_id)
                .bind(to_json(reference)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_section_references(&self, section_id: &str) -> Result<Vec<Reference>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM section_references WHERE section_id = ? ORDER BY seq ASC",
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| from_json(&row.try_get::<String, _>("payload")?))
            .collect()
    }

    async fn insert_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chat_sessions (id, document_id, title, message_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.document_id)
        .bind(&session.title)
        .bind(session.message_count as i64)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, document_id: &str) -> Result<Vec<ChatSession>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM chat_sessions WHERE document_id = ? ORDER BY updated_at DESC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<ChatSession, StoreError> {
        let mut tx = self.pool.begin().await?;
        let created_at = message.created_at.to_rfc3339();

        let updated = sqlx::query(
            "UPDATE chat_sessions SET message_count = message_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(&created_at)
        .bind(&message.session_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("session", &message.session_id));
        }

        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, agent_name, todo_tasks, refs, suggestions, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.agent_name)
        .bind(to_json(&message.todo_tasks)?)
        .bind(to_json(&message.references)?)
        .bind(to_json(&message.suggestions)?)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(&message.session_id)
            .fetch_one(&mut *tx)
            .await?;
        let session = session_from_row(&row)?;

        tx.commit().await?;
        Ok(session)
    }

    async fn messages_page(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE session_id = ? ORDER BY seq ASC LIMIT ? OFFSET ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn count_messages(&self, session_id: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
