//! Agent 能力集：Outline / Summary / Writer / LogicValidator / Reference
//!
//! 每个 Agent 接收 (task, context)，返回结构化 AgentOutput 或 AgentError；
//! 生成部分统一走 LlmClient，具体文本质量不在这一层保证。

pub mod executor;
pub mod logic_validator;
pub mod outline;
pub mod reference;
pub mod registry;
pub mod summary;
pub mod types;
pub mod writer;

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};

pub use executor::{AgentExecutor, AgentRun};
pub use logic_validator::LogicValidatorAgent;
pub use outline::OutlineAgent;
pub use reference::ReferenceAgent;
pub use registry::{Agent, AgentInfo, AgentRegistry};
pub use summary::SummaryAgent;
pub use types::{
    AgentContext, AgentKind, AgentOutput, AgentTask, IssuePriority, IssueType, OutlineOp,
    OutlineProposal, Parameters, ReferenceList, StructureIssue, SummaryDraft, ValidationReport,
    WriterDraft,
};
pub use writer::WriterAgent;

/// 注册全部五个内置 Agent
pub fn default_registry(llm: Arc<dyn LlmClient>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(OutlineAgent::new(llm.clone()));
    registry.register(SummaryAgent::new(llm.clone()));
    registry.register(WriterAgent::new(llm.clone()));
    registry.register(LogicValidatorAgent::new(llm));
    registry.register(ReferenceAgent::new());
    registry
}

/// 单轮生成：system + user，返回去掉首尾空白的文本
pub(crate) async fn generate(
    llm: &dyn LlmClient,
    system: &str,
    user: String,
) -> Result<String, AgentError> {
    let text = llm
        .complete(&[Message::system(system), Message::user(user)])
        .await
        .map_err(|e| AgentError::Generation(e.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(AgentError::Generation("empty response".to_string()));
    }
    Ok(text.to_string())
}

/// 从 LLM 输出中截取 JSON：优先 ```json 代码块，否则取首个 '{' 到最后一个 '}'
pub(crate) fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map_or(rest, |end| &rest[..end]).trim());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 检索片段格式化为 prompt 中的参考资料段落
pub(crate) fn passages_block(context: &AgentContext) -> String {
    if context.passages.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = context
        .passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] ({}) {}", i + 1, p.source, p.text))
        .collect();
    format!("\n\nReference material:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(
            extract_json("here:\n```json\n{\"a\":1}\n```\nthanks"),
            Some("{\"a\":1}")
        );
        assert_eq!(extract_json("plan {\"a\":{\"b\":2}} end"), Some("{\"a\":{\"b\":2}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }
}
