//! Outline：章节的新增、移动与大纲结构检查
//!
//! 只产出操作提案（OutlineOp），由 Supervisor 通过 Section Store 按顺序落库。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::agents::logic_validator::check_empty_sections;
use crate::agents::registry::Agent;
use crate::agents::types::{
    AgentContext, AgentKind, AgentOutput, AgentTask, IssuePriority, IssueType, OutlineOp,
    OutlineProposal, StructureIssue,
};
use crate::agents::generate;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::paper::model::{MoveAction, OutlineEntry};

const TASK_TYPES: &[&str] = &[
    "create_section",
    "move_section",
    "propose_outline",
    "validate_structure",
];

const PROPOSE_PROMPT: &str = "You plan the structure of academic papers. Given the current \
outline, list the sections that are missing, one per line, numbered like \"3.\" for a top-level \
section or \"3.1\" for a subsection. List only new sections.";

fn heading_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*•]\s+|(\d+(?:\.\d+)*)[.)]?\s+)(.+?)\s*$").unwrap()
    })
}

/// 解析 LLM 列出的章节标题；层级由编号深度决定，无编号的条目按顶层处理
pub(crate) fn parse_headings(output: &str) -> Vec<(String, u8)> {
    output
        .lines()
        .filter_map(|line| {
            let caps = heading_pattern().captures(line)?;
            let level = caps
                .get(1)
                .map_or(1, |m| m.as_str().split('.').count().min(6) as u8);
            let title = caps.get(2)?.as_str().trim_matches(['"', '*', '#', ' ']);
            (!title.is_empty()).then(|| (title.to_string(), level))
        })
        .collect()
}

fn duplicate_titles(outline: &[OutlineEntry]) -> Vec<StructureIssue> {
    let mut seen: HashMap<String, &OutlineEntry> = HashMap::new();
    let mut issues = Vec::new();
    for entry in outline {
        let key = entry.title.trim().to_lowercase();
        if let Some(first) = seen.get(&key) {
            issues.push(StructureIssue {
                issue_type: IssueType::DuplicateTitle,
                priority: IssuePriority::Medium,
                location: Some(entry.id.clone()),
                title: "Duplicate section title".to_string(),
                description: format!(
                    "Sections {} and {} are both titled \"{}\"",
                    first.hierarchy_path, entry.hierarchy_path, entry.title
                ),
                recommendation: "Merge the sections or give them distinct titles".to_string(),
            });
        } else {
            seen.insert(key, entry);
        }
    }
    issues
}

/// 大纲 Agent
pub struct OutlineAgent {
    llm: Arc<dyn LlmClient>,
}

impl OutlineAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn create(&self, task: &AgentTask, context: &AgentContext) -> Result<OutlineProposal, AgentError> {
        let title = task
            .param_str("title")
            .ok_or_else(|| AgentError::invalid(task.agent.as_str(), "create_section needs a title"))?;
        let position = task.param_usize("position");
        if let Some(p) = position {
            if p > context.outline.len() {
                return Err(AgentError::invalid(
                    task.agent.as_str(),
                    format!("position {p} is past the end of a {}-section outline", context.outline.len()),
                ));
            }
        }
        let level = task.param_usize("level").map(|l| l.clamp(1, 6) as u8);

        Ok(OutlineProposal {
            operations: vec![OutlineOp::Create {
                title: title.to_string(),
                position,
                level,
            }],
            issues: Vec::new(),
            note: format!("add section \"{title}\""),
        })
    }

    fn relocate(&self, task: &AgentTask, context: &AgentContext) -> Result<OutlineProposal, AgentError> {
        let section_id = task
            .param_str("section_id")
            .map(str::to_string)
            .or_else(|| context.target_id())
            .ok_or_else(|| AgentError::invalid(task.agent.as_str(), "move_section needs a section"))?;
        let action_name = task
            .param_str("action")
            .ok_or_else(|| AgentError::invalid(task.agent.as_str(), "move_section needs an action"))?;
        let action = MoveAction::parse(action_name, task.param_usize("new_position"))
            .map_err(|e| AgentError::invalid(task.agent.as_str(), e.to_string()))?;

        Ok(OutlineProposal {
            operations: vec![OutlineOp::Move {
                section_id,
                action,
            }],
            issues: Vec::new(),
            note: format!("move section {}", action.name()),
        })
    }

    async fn propose(&self, task: &AgentTask, context: &AgentContext) -> Result<OutlineProposal, AgentError> {
        let prompt = format!(
            "Paper: {}\nCurrent outline:\n{}\n\nRequest: {}",
            context.document_title(),
            if context.outline.is_empty() {
                "(empty)".to_string()
            } else {
                context.outline_text()
            },
            task.description
        );
        let output = generate(self.llm.as_ref(), PROPOSE_PROMPT, prompt).await?;

        let mut existing: Vec<String> = context
            .outline
            .iter()
            .map(|e| e.title.trim().to_lowercase())
            .collect();
        let mut operations = Vec::new();
        for (title, level) in parse_headings(&output) {
            let key = title.to_lowercase();
            if existing.contains(&key) {
                continue;
            }
            existing.push(key);
            operations.push(OutlineOp::Create {
                title,
                position: None,
                level: Some(level),
            });
        }

        let note = if operations.is_empty() {
            "no new sections proposed".to_string()
        } else {
            format!("proposed {} new section(s)", operations.len())
        };
        Ok(OutlineProposal {
            operations,
            issues: Vec::new(),
            note,
        })
    }

    fn validate(&self, context: &AgentContext) -> OutlineProposal {
        let mut issues = duplicate_titles(&context.outline);
        issues.extend(check_empty_sections(&context.outline));
        let note = if issues.is_empty() {
            "outline structure looks consistent".to_string()
        } else {
            format!("{} structural issue(s)", issues.len())
        };
        OutlineProposal {
            operations: Vec::new(),
            issues,
            note,
        }
    }
}

#[async_trait]
impl Agent for OutlineAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Outline
    }

    fn description(&self) -> &str {
        "Adds and reorders sections, proposes missing sections and checks the outline structure"
    }

    fn supported_task_types(&self) -> &[&'static str] {
        TASK_TYPES
    }

    async fn execute(
        &self,
        task: &AgentTask,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        let proposal = match task.task_type.as_str() {
            "create_section" => self.create(task, context)?,
            "move_section" => self.relocate(task, context)?,
            "propose_outline" => self.propose(task, context).await?,
            "validate_structure" => self.validate(context),
            other => {
                return Err(AgentError::invalid(
                    task.agent.as_str(),
                    format!("unsupported task type: {other}"),
                ))
            }
        };
        Ok(AgentOutput::Outline(proposal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::paper::model::SectionStatus;

    fn agent() -> OutlineAgent {
        OutlineAgent::new(Arc::new(MockLlmClient))
    }

    fn entry(id: &str, path: &str, title: &str) -> OutlineEntry {
        OutlineEntry {
            id: id.into(),
            position: 0,
            hierarchy_path: path.into(),
            title: title.into(),
            summary: String::new(),
            word_count: 5,
            status: SectionStatus::Draft,
        }
    }

    #[test]
    fn test_parse_headings() {
        let parsed = parse_headings("Sure:\n3. Related Work\n3.1 Graph models\n- **Limitations**\n\nThanks");
        assert_eq!(
            parsed,
            vec![
                ("Related Work".to_string(), 1),
                ("Graph models".to_string(), 2),
                ("Limitations".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_move_requires_new_position_for_to_position() {
        let context = AgentContext {
            target: None,
            outline: vec![entry("sec_a", "1", "Intro")],
            ..Default::default()
        };
        let task = AgentTask::new(AgentKind::Outline, "move_section", "move")
            .with_param("section_id", "sec_a")
            .with_param("action", "to_position");
        let err = agent().execute(&task, &context).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask { .. }));
    }

    #[tokio::test]
    async fn test_create_proposal() {
        let task = AgentTask::new(AgentKind::Outline, "create_section", "add related work")
            .with_param("title", "Related Work")
            .with_param("position", 0);
        let AgentOutput::Outline(proposal) = agent()
            .execute(&task, &AgentContext::default())
            .await
            .unwrap()
        else {
            panic!("expected outline output");
        };
        assert_eq!(
            proposal.operations,
            vec![OutlineOp::Create {
                title: "Related Work".into(),
                position: Some(0),
                level: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_validate_flags_duplicates() {
        let context = AgentContext {
            outline: vec![entry("a", "1", "Method"), entry("b", "2", "method ")],
            ..Default::default()
        };
        let task = AgentTask::new(AgentKind::Outline, "validate_structure", "check");
        let AgentOutput::Outline(proposal) = agent().execute(&task, &context).await.unwrap() else {
            panic!("expected outline output");
        };
        assert!(proposal.operations.is_empty());
        assert_eq!(proposal.issues.len(), 1);
        assert_eq!(proposal.issues[0].issue_type, IssueType::DuplicateTitle);
    }
}
