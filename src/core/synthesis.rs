//! 回复合成：叙述任务结果、汇总引用、生成后续建议

use std::collections::HashSet;

use crate::agents::{AgentKind, AgentOutput};
use crate::chat::{TaskStatus, TodoTask};
use crate::paper::model::Reference;
use crate::retrieval::Passage;

/// 零任务且闲聊生成失败时的回复
pub const CONVERSATION_FALLBACK: &str =
    "I'm here to help with your paper. Ask me to add or reorder sections, draft or polish text, \
summarize a section, check the paper's logical structure, or find references.";

const DEFAULT_SUGGESTIONS: &[&str] = &[
    "Add a new section",
    "Improve an existing section",
    "Search for related literature",
    "Check the paper's structure",
];

/// 回复正文：完成数、每个完成任务的一行结果、失败任务及原因
pub fn narrate(tasks: &[TodoTask]) -> String {
    let completed: Vec<&TodoTask> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .collect();
    let failed: Vec<&TodoTask> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .collect();

    let mut lines = Vec::new();
    if !completed.is_empty() {
        lines.push(format!("Completed {} task(s).", completed.len()));
        for task in &completed {
            let headline = task
                .result
                .as_ref()
                .map(AgentOutput::headline)
                .unwrap_or_default();
            lines.push(format!(
                "- {}: {} ({})",
                task.agent_name.display_name(),
                task.description,
                headline
            ));
        }
    }
    if !failed.is_empty() {
        lines.push(format!("{} task(s) failed.", failed.len()));
        for task in &failed {
            lines.push(format!(
                "- {}: {} ({})",
                task.agent_name.display_name(),
                task.description,
                task.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    if lines.is_empty() {
        CONVERSATION_FALLBACK.to_string()
    } else {
        lines.join("\n")
    }
}

/// Reference 结果在前、检索片段在后，按引文去重
pub fn collect_references(tasks: &[TodoTask], passages: &[Passage]) -> Vec<Reference> {
    let from_agents = tasks.iter().filter_map(|t| match &t.result {
        Some(AgentOutput::References(list)) => Some(list.citations.iter().cloned()),
        _ => None,
    });
    let from_retrieval = passages.iter().map(Passage::to_reference);

    let mut seen = HashSet::new();
    from_agents
        .flatten()
        .chain(from_retrieval)
        .filter(|r| seen.insert(r.citation.clone()))
        .collect()
}

/// 后续建议：有失败先建议重试，再按完成的 Agent 给出下一步，没有则给默认项
pub fn suggestions(tasks: &[TodoTask], max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
        push_unique(&mut out, "Retry the failed tasks");
    }
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Completed) {
        let next = match task.agent_name {
            AgentKind::Outline => "Add content to the new section",
            AgentKind::Writer => "Check the logical structure of the new content",
            AgentKind::Summary => "Review the summary and refine the section",
            AgentKind::LogicValidator => "Address the highest-priority issues first",
            AgentKind::Reference => "Cite the references you found in the paper",
        };
        push_unique(&mut out, next);
    }
    if out.is_empty() {
        for s in DEFAULT_SUGGESTIONS {
            push_unique(&mut out, s);
        }
    }
    out.truncate(max);
    out
}

fn push_unique(out: &mut Vec<String>, s: &str) {
    if !out.iter().any(|o| o == s) {
        out.push(s.to_string());
    }
}

/// 计划中恰好只有一个 Agent 时返回它，否则 None（由 Supervisor 代表发言）
pub fn dominant_agent(tasks: &[TodoTask]) -> Option<AgentKind> {
    let first = tasks.first()?.agent_name;
    tasks
        .iter()
        .all(|t| t.agent_name == first)
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ReferenceList, ValidationReport};

    fn completed(agent: AgentKind, output: AgentOutput) -> TodoTask {
        let mut task = TodoTask::new(agent, "t", "do it");
        task.start().unwrap();
        task.complete(output).unwrap();
        task
    }

    fn failed(agent: AgentKind) -> TodoTask {
        let mut task = TodoTask::new(agent, "t", "do it");
        task.start().unwrap();
        task.fail("boom", None).unwrap();
        task
    }

    fn references(citations: &[&str]) -> AgentOutput {
        AgentOutput::References(ReferenceList {
            citations: citations.iter().map(|c| Reference::citation(*c)).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_narration_mentions_failures() {
        let tasks = vec![
            completed(AgentKind::LogicValidator, AgentOutput::Validation(ValidationReport::default())),
            failed(AgentKind::Writer),
        ];
        let text = narrate(&tasks);
        assert!(text.starts_with("Completed 1 task(s)."));
        assert!(text.contains("1 task(s) failed."));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_references_are_deduplicated() {
        let tasks = vec![completed(AgentKind::Reference, references(&["a.pdf", "b.pdf"]))];
        let passages = vec![Passage {
            text: "t".into(),
            source: "a.pdf".into(),
            score: 0.5,
        }];
        let refs = collect_references(&tasks, &passages);
        let citations: Vec<&str> = refs.iter().map(|r| r.citation.as_str()).collect();
        assert_eq!(citations, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_suggestions_capped_and_defaulted() {
        let tasks = vec![
            failed(AgentKind::Writer),
            completed(AgentKind::Reference, references(&[])),
        ];
        let s = suggestions(&tasks, 3);
        assert_eq!(s[0], "Retry the failed tasks");
        assert_eq!(s.len(), 2);
        assert_eq!(suggestions(&[], 3).len(), 3);
    }

    #[test]
    fn test_dominant_agent() {
        assert_eq!(dominant_agent(&[]), None);
        let one = vec![failed(AgentKind::Writer), failed(AgentKind::Writer)];
        assert_eq!(dominant_agent(&one), Some(AgentKind::Writer));
        let two = vec![failed(AgentKind::Writer), failed(AgentKind::Summary)];
        assert_eq!(dominant_agent(&two), None);
    }
}
