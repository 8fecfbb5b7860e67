//! Reference：把检索到的片段整理为 IEEE 风格引文
//!
//! 不调用 LLM：片段由 Supervisor 在执行前按查询与 tags 检索好放进上下文，
//! 这里只负责去重、编号与格式化。来源中解析不出年份时使用当前年份。

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Datelike;
use regex::Regex;

use crate::agents::registry::Agent;
use crate::agents::types::{AgentContext, AgentKind, AgentOutput, AgentTask, ReferenceList};
use crate::core::AgentError;
use crate::paper::model::Reference;

const TASK_TYPES: &[&str] = &["search_references", "generate_citation"];

fn year_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^0-9])((?:19|20)[0-9]{2})(?:[^0-9]|$)").unwrap())
}

/// 从文件名推断标题："03_graph-neural_nets.pdf" -> "graph neural nets"
pub(crate) fn title_from_source(source: &str) -> String {
    let stem = source
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source);
    let stem = match stem.rfind('.') {
        Some(idx) if idx > 0 => &stem[..idx],
        _ => stem,
    };
    let spaced: String = stem
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    let trimmed = spaced.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ');
    let title = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        stem.to_string()
    } else {
        title
    }
}

pub(crate) fn year_from(text: &str) -> Option<i32> {
    year_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// "title," source, year.
pub(crate) fn ieee_citation(title: &str, source: &str, year: i32) -> String {
    format!("\"{title},\" {source}, {year}.")
}

/// 文献 Agent
#[derive(Debug, Default)]
pub struct ReferenceAgent;

impl ReferenceAgent {
    pub fn new() -> Self {
        Self
    }

    fn search(&self, task: &AgentTask, context: &AgentContext) -> Result<ReferenceList, AgentError> {
        let query = task
            .param_str("query")
            .unwrap_or(task.description.trim())
            .to_string();
        if query.is_empty() {
            return Err(AgentError::invalid(task.agent.as_str(), "search query is empty"));
        }
        let limit = task.param_usize("limit").unwrap_or(usize::MAX);
        let this_year = chrono::Utc::now().year();

        let mut seen = HashSet::new();
        let citations: Vec<Reference> = context
            .passages
            .iter()
            .filter(|p| seen.insert(p.source.clone()))
            .take(limit)
            .map(|p| {
                let title = title_from_source(&p.source);
                let year = year_from(&p.source).unwrap_or(this_year);
                Reference {
                    citation: ieee_citation(&title, &p.source, year),
                    title: Some(title),
                    source: Some(p.source.clone()),
                    section_id: context.target_id(),
                    relevance: Some(p.score),
                }
            })
            .collect();

        Ok(ReferenceList {
            query,
            section_id: context.target_id(),
            citations,
        })
    }

    fn cite(&self, task: &AgentTask, context: &AgentContext) -> Result<ReferenceList, AgentError> {
        let source = task.param_str("source");
        let title = task
            .param_str("title")
            .map(str::to_string)
            .or_else(|| source.map(title_from_source))
            .ok_or_else(|| {
                AgentError::invalid(task.agent.as_str(), "generate_citation needs a title or source")
            })?;
        let year = task
            .param_usize("year")
            .map(|y| y as i32)
            .or_else(|| source.and_then(year_from))
            .unwrap_or_else(|| chrono::Utc::now().year());
        let source_label = source.unwrap_or("unpublished");

        Ok(ReferenceList {
            query: title.clone(),
            section_id: context.target_id(),
            citations: vec![Reference {
                citation: ieee_citation(&title, source_label, year),
                title: Some(title),
                source: source.map(str::to_string),
                section_id: context.target_id(),
                relevance: None,
            }],
        })
    }
}

#[async_trait]
impl Agent for ReferenceAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Reference
    }

    fn description(&self) -> &str {
        "Finds supporting literature in the reference corpus and formats IEEE-style citations"
    }

    fn supported_task_types(&self) -> &[&'static str] {
        TASK_TYPES
    }

    async fn execute(
        &self,
        task: &AgentTask,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        let list = match task.task_type.as_str() {
            "search_references" => self.search(task, context)?,
            "generate_citation" => self.cite(task, context)?,
            other => {
                return Err(AgentError::invalid(
                    task.agent.as_str(),
                    format!("unsupported task type: {other}"),
                ))
            }
        };
        Ok(AgentOutput::References(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Passage;

    #[test]
    fn test_title_from_source() {
        assert_eq!(title_from_source("03_graph-neural_nets.pdf"), "graph neural nets");
        assert_eq!(title_from_source("papers/attention.pdf"), "attention");
        assert_eq!(title_from_source("README"), "README");
    }

    #[test]
    fn test_year_extraction() {
        assert_eq!(year_from("vaswani_2017.pdf"), Some(2017));
        assert_eq!(year_from("report_12345.pdf"), None);
    }

    #[tokio::test]
    async fn test_search_formats_and_dedups() {
        let passage = |source: &str, score: f32| Passage {
            text: "text".into(),
            source: source.into(),
            score,
        };
        let context = AgentContext {
            passages: vec![
                passage("vaswani_attention_2017.pdf", 0.9),
                passage("vaswani_attention_2017.pdf", 0.5),
                passage("gnn_survey.pdf", 0.4),
            ],
            ..Default::default()
        };
        let task = AgentTask::new(AgentKind::Reference, "search_references", "attention papers");
        let AgentOutput::References(list) = ReferenceAgent.execute(&task, &context).await.unwrap() else {
            panic!("expected references");
        };
        assert_eq!(list.citations.len(), 2);
        assert_eq!(
            list.citations[0].citation,
            "\"vaswani attention 2017,\" vaswani_attention_2017.pdf, 2017."
        );
    }

    #[tokio::test]
    async fn test_empty_corpus_is_not_an_error() {
        let task = AgentTask::new(AgentKind::Reference, "search_references", "anything");
        let AgentOutput::References(list) = ReferenceAgent
            .execute(&task, &AgentContext::default())
            .await
            .unwrap()
        else {
            panic!("expected references");
        };
        assert!(list.citations.is_empty());
    }
}
