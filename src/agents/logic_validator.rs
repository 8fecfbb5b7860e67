//! LogicValidator：论文整体的结构与逻辑检查（只读，不修改文档）
//!
//! 规则检查：必备章节（introduction / method / results / discussion）是否齐全、顺序是否合理、
//! 是否有空章节；再由 LLM 标出逻辑断层。LLM 失败时只记录告警，规则检查结果照常返回。
//! 评分 = 1.0 - 0.3·high - 0.2·medium - 0.1·low，下限 0。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::agents::registry::Agent;
use crate::agents::types::{
    AgentContext, AgentKind, AgentOutput, AgentTask, IssuePriority, IssueType, StructureIssue,
    ValidationReport,
};
use crate::agents::generate;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::paper::model::OutlineEntry;

const TASK_TYPES: &[&str] = &["validate_logic_flow"];
const MAX_FLAGGED: usize = 3;

const SYSTEM_PROMPT: &str = "You review the logical structure of academic papers. \
For each logical gap, contradiction or missing connection between sections, \
write one line starting with \"GAP:\" followed by a short explanation. \
If the structure is sound, answer \"OK\".";

/// 章节角色，按规范顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SectionRole {
    Introduction,
    Method,
    Results,
    Discussion,
    Conclusion,
}

impl SectionRole {
    const REQUIRED: [SectionRole; 4] = [
        SectionRole::Introduction,
        SectionRole::Method,
        SectionRole::Results,
        SectionRole::Discussion,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::Introduction => "introduction",
            Self::Method => "method",
            Self::Results => "results",
            Self::Discussion => "discussion",
            Self::Conclusion => "conclusion",
        }
    }

    /// 由标题推断角色（英文 / 日文关键词）
    fn classify(title: &str) -> Option<Self> {
        let t = title.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| t.contains(w));
        if has(&["introduction", "background", "序論", "はじめに", "背景"]) {
            Some(Self::Introduction)
        } else if has(&["method", "approach", "experiment", "方法", "手法", "実験"]) {
            Some(Self::Method)
        } else if has(&["result", "evaluation", "結果", "成果"]) {
            Some(Self::Results)
        } else if has(&["discussion", "考察", "議論"]) {
            Some(Self::Discussion)
        } else if has(&["conclusion", "summary", "結論", "まとめ"]) {
            Some(Self::Conclusion)
        } else {
            None
        }
    }
}

fn issue(
    issue_type: IssueType,
    priority: IssuePriority,
    location: Option<String>,
    title: &str,
    description: String,
    recommendation: String,
) -> StructureIssue {
    StructureIssue {
        issue_type,
        priority,
        location,
        title: title.to_string(),
        description,
        recommendation,
    }
}

/// 必备章节与顺序检查
pub(crate) fn check_basic_structure(outline: &[OutlineEntry]) -> Vec<StructureIssue> {
    let roles: Vec<SectionRole> = outline
        .iter()
        .filter_map(|e| SectionRole::classify(&e.title))
        .collect();

    let mut issues: Vec<StructureIssue> = SectionRole::REQUIRED
        .iter()
        .filter(|required| !roles.contains(required))
        .map(|missing| {
            issue(
                IssueType::MissingSection,
                IssuePriority::High,
                None,
                "Missing required section",
                format!("No {} section was found", missing.name()),
                format!("Add a {} section", missing.name()),
            )
        })
        .collect();

    if roles.windows(2).any(|w| w[0] > w[1]) {
        issues.push(issue(
            IssueType::OrderIssue,
            IssuePriority::Medium,
            None,
            "Section order",
            "Sections do not follow the usual introduction, method, results, discussion order"
                .to_string(),
            "Reorder sections as introduction, method, results, discussion, conclusion".to_string(),
        ));
    }
    issues
}

/// 没有正文也没有摘要的章节
pub(crate) fn check_empty_sections(outline: &[OutlineEntry]) -> Vec<StructureIssue> {
    outline
        .iter()
        .filter(|e| e.word_count == 0 && e.summary.trim().is_empty())
        .map(|e| {
            issue(
                IssueType::EmptySection,
                IssuePriority::Low,
                Some(e.id.clone()),
                "Empty section",
                format!("Section {} \"{}\" has no content yet", e.hierarchy_path, e.title),
                "Draft the section or remove it".to_string(),
            )
        })
        .collect()
}

pub(crate) fn validation_score(issues: &[StructureIssue]) -> f32 {
    let penalty: f32 = issues
        .iter()
        .map(|i| match i.priority {
            IssuePriority::High => 0.3,
            IssuePriority::Medium => 0.2,
            IssuePriority::Low => 0.1,
        })
        .sum();
    (1.0 - penalty).max(0.0)
}

fn recommendations(issues: &[StructureIssue]) -> Vec<String> {
    if issues.is_empty() {
        return vec!["No major structural problems were found.".to_string()];
    }
    let mut sorted: Vec<&StructureIssue> = issues.iter().collect();
    sorted.sort_by_key(|i| i.priority);
    let mut out: Vec<String> = Vec::new();
    for i in sorted {
        let line = format!("{}: {}", i.title, i.recommendation);
        if !out.contains(&line) {
            out.push(line);
        }
    }
    out.truncate(5);
    out
}

/// 解析 LLM 输出中的 "GAP:" 行
fn flagged_gaps(output: &str) -> Vec<StructureIssue> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
            line.strip_prefix("GAP:").map(str::trim)
        })
        .filter(|desc| !desc.is_empty())
        .take(MAX_FLAGGED)
        .map(|desc| {
            issue(
                IssueType::LogicalGap,
                IssuePriority::Medium,
                None,
                "Logical gap",
                desc.to_string(),
                "Strengthen the connection between the affected sections".to_string(),
            )
        })
        .collect()
}

/// 逻辑校验 Agent
pub struct LogicValidatorAgent {
    llm: Arc<dyn LlmClient>,
}

impl LogicValidatorAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for LogicValidatorAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::LogicValidator
    }

    fn description(&self) -> &str {
        "Checks the paper's overall logical flow and section structure without modifying it"
    }

    fn supported_task_types(&self) -> &[&'static str] {
        TASK_TYPES
    }

    async fn execute(
        &self,
        task: &AgentTask,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        if context.outline.is_empty() {
            return Err(AgentError::invalid(
                task.agent.as_str(),
                "document has no sections to validate",
            ));
        }

        let mut issues = check_basic_structure(&context.outline);
        issues.extend(check_empty_sections(&context.outline));

        let prompt = format!(
            "Paper: {}\n\nOutline with section summaries:\n{}\n\nReviewer request: {}",
            context.document_title(),
            context.outline_text(),
            task.description
        );
        match generate(self.llm.as_ref(), SYSTEM_PROMPT, prompt).await {
            Ok(output) => issues.extend(flagged_gaps(&output)),
            Err(e) => warn!(error = %e, "logic flow analysis unavailable, using rule checks only"),
        }

        let score = validation_score(&issues);
        Ok(AgentOutput::Validation(ValidationReport {
            recommendations: recommendations(&issues),
            issues,
            score,
        }))
    }
}
