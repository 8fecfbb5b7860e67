//! Retrieval Collaborator：按查询返回相关文本片段及来源
//!
//! 核心层只依赖 Retriever trait；内置 NoopRetriever（无语料）与 KeywordRetriever（内存关键词重叠）。
//! 无结果不是错误；后端不可用时返回 RetrievalError。

pub mod tokenizer;

use std::collections::{BTreeSet, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::RetrievalError;
use crate::paper::model::Reference;

/// 检索片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// 来源（文件名、URL 等）
    pub source: String,
    /// 相关度 0.0 ~ 1.0
    pub score: f32,
}

impl Passage {
    /// 作为回复引用：来源即引文
    pub fn to_reference(&self) -> Reference {
        Reference {
            citation: self.source.clone(),
            title: None,
            source: Some(self.source.clone()),
            section_id: None,
            relevance: Some(self.score),
        }
    }
}

/// 检索接口
#[async_trait]
pub trait Retriever: Send + Sync {
    /// tags 为 None 时不过滤；否则只返回带有任一 tag 的片段
    async fn search(
        &self,
        query: &str,
        tags: Option<&BTreeSet<String>>,
        limit: usize,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

/// 空实现：未配置语料时使用
#[derive(Debug, Clone, Default)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn search(
        &self,
        _query: &str,
        _tags: Option<&BTreeSet<String>>,
        _limit: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        Ok(Vec::new())
    }
}

struct IndexedPassage {
    text: String,
    source: String,
    tags: BTreeSet<String>,
    tokens: HashSet<String>,
}

/// 内存关键词检索：查询词覆盖率作为相关度
#[derive(Default)]
pub struct KeywordRetriever {
    passages: RwLock<Vec<IndexedPassage>>,
    /// 低于该分数的片段不返回
    min_score: f32,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self {
            passages: RwLock::new(Vec::new()),
            min_score: 0.1,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score.clamp(0.0, 1.0);
        self
    }

    /// 加入语料；空文本忽略
    pub fn add<I, S>(&self, text: &str, source: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let entry = IndexedPassage {
            tokens: tokenizer::tokenize_to_set(text),
            text: text.to_string(),
            source: source.to_string(),
            tags: tags.into_iter().map(Into::into).collect(),
        };
        let mut passages = self.passages.write().unwrap_or_else(|e| e.into_inner());
        passages.push(entry);
    }

    pub fn len(&self) -> usize {
        self.passages.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn search(
        &self,
        query: &str,
        tags: Option<&BTreeSet<String>>,
        limit: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        let query_tokens = tokenizer::tokenize_to_set(query);
        if query_tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let passages = self
            .passages
            .read()
            .map_err(|_| RetrievalError::Unavailable("corpus lock poisoned".to_string()))?;

        let mut hits: Vec<Passage> = passages
            .iter()
            .filter(|p| tags.map_or(true, |wanted| !p.tags.is_disjoint(wanted)))
            .filter_map(|p| {
                let score = tokenizer::coverage(&query_tokens, &p.tokens);
                (score >= self.min_score && score > 0.0).then(|| Passage {
                    text: p.text.clone(),
                    source: p.source.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
