//! Writer：起草、润色章节正文，或生成独立段落
//!
//! - generate_draft：为目标章节起草正文（需要目标章节），结果写回该章节
//! - improve_style：润色目标章节正文或参数 content，有目标章节时写回
//! - generate_content：按请求生成独立文本，不写回

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::registry::Agent;
use crate::agents::types::{AgentContext, AgentKind, AgentOutput, AgentTask, WriterDraft};
use crate::agents::{generate, passages_block};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::paper::model::word_count;

const TASK_TYPES: &[&str] = &["generate_draft", "improve_style", "generate_content"];

const DRAFT_PROMPT: &str = "You are an expert academic writer. Draft the body of the requested \
section in a formal scholarly register. Use the reference material when relevant and cite it \
as [n]. Return only the section text.";

const STYLE_PROMPT: &str = "You are an academic copy editor. Improve clarity, concision and \
register of the given text without changing its meaning. Return only the revised text.";

const CONTENT_PROMPT: &str = "You are an expert academic writer. Write the requested passage in a \
formal scholarly register. Return only the text.";

/// 写作 Agent
pub struct WriterAgent {
    llm: Arc<dyn LlmClient>,
}

impl WriterAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn draft(&self, task: &AgentTask, context: &AgentContext) -> Result<WriterDraft, AgentError> {
        let section = context.target.as_ref().ok_or_else(|| {
            AgentError::invalid(task.agent.as_str(), "generate_draft needs a target section")
        })?;
        let requirements = task.param_str("requirements").unwrap_or(&task.description);
        let mut prompt = format!(
            "Paper: {}\nOutline:\n{}\n\nSection to draft: {} {}\nRequirements: {}",
            context.document_title(),
            context.outline_text(),
            section.hierarchy_path,
            section.title,
            requirements
        );
        if !section.content.trim().is_empty() {
            prompt.push_str(&format!("\n\nExisting notes:\n{}", section.content));
        }
        prompt.push_str(&passages_block(context));

        let content = generate(self.llm.as_ref(), DRAFT_PROMPT, prompt).await?;
        Ok(self.finish(task, Some(section.id.clone()), content))
    }

    async fn improve(&self, task: &AgentTask, context: &AgentContext) -> Result<WriterDraft, AgentError> {
        let (source, section_id) = match (task.param_str("content"), &context.target) {
            (Some(text), target) => (text.to_string(), target.as_ref().map(|s| s.id.clone())),
            (None, Some(section)) if !section.content.trim().is_empty() => {
                (section.content.clone(), Some(section.id.clone()))
            }
            _ => {
                return Err(AgentError::invalid(
                    task.agent.as_str(),
                    "improve_style needs text: a non-empty target section or a content parameter",
                ))
            }
        };
        let prompt = format!("Instructions: {}\n\nText:\n{}", task.description, source);
        let content = generate(self.llm.as_ref(), STYLE_PROMPT, prompt).await?;
        Ok(self.finish(task, section_id, content))
    }

    async fn compose(&self, task: &AgentTask, context: &AgentContext) -> Result<WriterDraft, AgentError> {
        let mut prompt = format!(
            "Paper: {}\nRequest: {}",
            context.document_title(),
            task.param_str("topic").unwrap_or(&task.description)
        );
        prompt.push_str(&passages_block(context));
        let content = generate(self.llm.as_ref(), CONTENT_PROMPT, prompt).await?;
        Ok(self.finish(task, None, content))
    }

    fn finish(&self, task: &AgentTask, section_id: Option<String>, content: String) -> WriterDraft {
        WriterDraft {
            section_id,
            task_type: task.task_type.clone(),
            word_count: word_count(&content),
            content,
        }
    }
}

#[async_trait]
impl Agent for WriterAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Writer
    }

    fn description(&self) -> &str {
        "Drafts section bodies, polishes existing text and writes standalone passages"
    }

    fn supported_task_types(&self) -> &[&'static str] {
        TASK_TYPES
    }

    async fn execute(
        &self,
        task: &AgentTask,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        let draft = match task.task_type.as_str() {
            "generate_draft" => self.draft(task, context).await?,
            "improve_style" => self.improve(task, context).await?,
            "generate_content" => self.compose(task, context).await?,
            other => {
                return Err(AgentError::invalid(
                    task.agent.as_str(),
                    format!("unsupported task type: {other}"),
                ))
            }
        };
        Ok(AgentOutput::Writer(draft))
    }
}
