//! Summary：为章节生成摘要
//!
//! 摘要长度以字符计；落在目标长度 ±25% 内视为达标（默认 200，即 150~250）。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::registry::Agent;
use crate::agents::types::{AgentContext, AgentKind, AgentOutput, AgentTask, SummaryDraft};
use crate::agents::generate;
use crate::core::AgentError;
use crate::llm::LlmClient;

const TASK_TYPES: &[&str] = &["generate_summary"];
const DEFAULT_TARGET_LENGTH: usize = 200;

pub(crate) fn within_range(char_count: usize, target: usize) -> bool {
    let low = target * 3 / 4;
    let high = target * 5 / 4;
    (low..=high).contains(&char_count)
}

/// 摘要 Agent
pub struct SummaryAgent {
    llm: Arc<dyn LlmClient>,
}

impl SummaryAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for SummaryAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Summary
    }

    fn description(&self) -> &str {
        "Writes a concise summary of a section (or of the whole outline when no section is targeted)"
    }

    fn supported_task_types(&self) -> &[&'static str] {
        TASK_TYPES
    }

    async fn execute(
        &self,
        task: &AgentTask,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        let target_length = task
            .param_usize("target_length")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_TARGET_LENGTH);

        // 显式内容 > 目标章节正文 > 整体大纲
        let (title, content) = match (task.param_str("content"), &context.target) {
            (Some(content), target) => (
                target.as_ref().map_or("Excerpt", |s| s.title.as_str()).to_string(),
                content.to_string(),
            ),
            (None, Some(section)) => (section.title.clone(), section.content.clone()),
            (None, None) => (context.document_title().to_string(), context.outline_text()),
        };
        if content.trim().is_empty() {
            return Err(AgentError::invalid(
                task.agent.as_str(),
                format!("\"{title}\" has no content to summarize"),
            ));
        }

        let system = format!(
            "You summarize sections of academic papers. Write a single paragraph of about \
             {target_length} characters that keeps the key claims and findings."
        );
        let prompt = format!("Section: {title}\n\n{content}\n\nInstructions: {}", task.description);
        let summary = generate(self.llm.as_ref(), &system, prompt).await?;
        let character_count = summary.chars().count();

        Ok(AgentOutput::Summary(SummaryDraft {
            section_id: context.target_id(),
            within_range: within_range(character_count, target_length),
            summary,
            character_count,
            target_length,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::paper::model::Section;

    #[test]
    fn test_within_range_bounds() {
        assert!(within_range(150, 200));
        assert!(within_range(250, 200));
        assert!(!within_range(149, 200));
        assert!(!within_range(251, 200));
    }

    #[tokio::test]
    async fn test_empty_section_is_invalid() {
        let agent = SummaryAgent::new(Arc::new(MockLlmClient));
        let context = AgentContext {
            target: Some(Section::new("doc_1", "Intro".into(), "   ".into(), 1)),
            ..Default::default()
        };
        let task = AgentTask::new(AgentKind::Summary, "generate_summary", "summarize");
        let err = agent.execute(&task, &context).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask { .. }));
    }

    #[tokio::test]
    async fn test_summary_is_tagged_with_target() {
        let agent = SummaryAgent::new(Arc::new(MockLlmClient));
        let section = Section::new("doc_1", "Intro".into(), "Deep models learn features.".into(), 1);
        let context = AgentContext {
            target: Some(section.clone()),
            ..Default::default()
        };
        let task = AgentTask::new(AgentKind::Summary, "generate_summary", "summarize");
        match agent.execute(&task, &context).await.unwrap() {
            AgentOutput::Summary(draft) => {
                assert_eq!(draft.section_id.as_deref(), Some(section.id.as_str()));
                assert_eq!(draft.target_length, 200);
                assert!(!draft.summary.is_empty());
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
