//! 任务规划：把一条用户消息分解为有序 TodoTask 列表
//!
//! 规划是可替换的策略（Planner trait）。内置两种：
//! - KeywordPlanner：英文 / 日文关键词识别意图，确定性，不调用 LLM
//! - LlmPlanner：请 LLM 输出 JSON 计划；输出无法解析时按配置回退到关键词规划
//!
//! 零任务是合法结果（纯对话回复），不是错误。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agents::{extract_json, AgentKind, AgentRegistry, Parameters};
use crate::chat::{TaskPriority, TaskTarget, TodoTask};
use crate::core::PlanningError;
use crate::llm::{LlmClient, Message};
use crate::paper::model::{Document, OutlineEntry, Section};

/// 规划输入：消息与文档当前状态的快照
#[derive(Debug, Clone)]
pub struct PlanningInput {
    pub message: String,
    pub document: Document,
    pub outline: Vec<OutlineEntry>,
    /// 调用方指定的作用章节
    pub target: Option<Section>,
}

impl PlanningInput {
    fn target_id(&self) -> Option<String> {
        self.target.as_ref().map(|s| s.id.clone())
    }

    /// 按标题（忽略大小写）查找章节
    fn find_section(&self, title: &str) -> Option<&OutlineEntry> {
        let wanted = title.trim().to_lowercase();
        self.outline
            .iter()
            .find(|e| e.title.trim().to_lowercase() == wanted)
    }
}

/// 规划策略
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: &PlanningInput) -> Result<Vec<TodoTask>, PlanningError>;
}

// ---------------------------------------------------------------------------
// 关键词规划
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    CreateSection,
    Reorder,
    EditContent,
    Draft,
    Summarize,
    CheckStructure,
    FindReferences,
}

struct IntentRule {
    intent: Intent,
    english: Regex,
    japanese: &'static [&'static str],
}

fn word_rule(intent: Intent, words: &str, japanese: &'static [&'static str]) -> IntentRule {
    IntentRule {
        intent,
        english: Regex::new(&format!(r"\b(?:{words})\b")).unwrap(),
        japanese,
    }
}

fn intent_rules() -> &'static [IntentRule] {
    static RULES: OnceLock<Vec<IntentRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            word_rule(
                Intent::CreateSection,
                r"(?:add|create|insert|new)\s+(?:an?\s+|the\s+)?(?:\w+\s+)?(?:sub)?section",
                &["追加", "作成", "新しい", "新規"],
            ),
            word_rule(
                Intent::Reorder,
                r"move|reorder|rearrange",
                &["移動", "並べ替え", "並び替え", "順番"],
            ),
            word_rule(
                Intent::EditContent,
                r"edit|improve|rewrite|polish|revise|proofread",
                &["編集", "修正", "改善", "リライト", "推敲"],
            ),
            word_rule(
                Intent::Draft,
                r"draft|write|expand|elaborate",
                &["執筆", "書いて", "下書き", "草稿", "本文"],
            ),
            word_rule(
                Intent::Summarize,
                r"summari[sz]e|summary|abstract|tl;?dr",
                &["要約", "まとめて", "概要"],
            ),
            word_rule(
                Intent::CheckStructure,
                r"structure|logic|logical|flow|consistency|coherence|validate",
                &["構造", "流れ", "論理", "一貫性", "整合性"],
            ),
            word_rule(
                Intent::FindReferences,
                r"references?|citations?|cite|literature|bibliography",
                &["文献", "参考", "引用", "参照"],
            ),
        ]
    })
}

fn urgency_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:urgent|urgently|asap|immediately|right away)\b").unwrap())
}

const URGENT_JA: &[&str] = &["緊急", "至急", "急ぎ", "すぐに"];

fn quoted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|“([^”]+)”|「([^」]+)」|『([^』]+)』"#).unwrap())
}

fn position_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\bposition\s*#?\s*(\d+)\b|(\d+)\s*番目)").unwrap())
}

/// 消息中第一个引号内的文本（英文直引号、弯引号、「」『』）
pub(crate) fn quoted_title(message: &str) -> Option<String> {
    quoted_pattern().captures(message).and_then(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().trim().to_string())
            .find(|s| !s.is_empty())
    })
}

/// "position 2" / "2番目" 以 1 起计，返回 0 起始下标
pub(crate) fn requested_position(message: &str) -> Option<usize> {
    let caps = position_pattern().captures(message)?;
    let n: usize = caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()?;
    Some(n.saturating_sub(1))
}

fn move_action(lower: &str) -> (&'static str, Option<usize>) {
    if let Some(p) = requested_position(lower) {
        return ("to_position", Some(p));
    }
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(&["to the top", "to top", "first", "beginning", "先頭", "最初"]) {
        ("top", None)
    } else if has(&["to the bottom", "to bottom", "last", " end", "末尾", "最後"]) {
        ("bottom", None)
    } else if has(&["down", "later", "下へ", "後ろ"]) {
        ("down", None)
    } else {
        ("up", None)
    }
}

fn detect_intents(message: &str) -> Vec<Intent> {
    // 引号内多为标题，不参与意图识别
    let unquoted = quoted_pattern().replace_all(message, " ");
    let lower = unquoted.to_lowercase();
    intent_rules()
        .iter()
        .filter(|rule| {
            rule.english.is_match(&lower) || rule.japanese.iter().any(|w| lower.contains(w))
        })
        .map(|rule| rule.intent)
        .collect()
}

fn is_urgent(message: &str) -> bool {
    let lower = message.to_lowercase();
    urgency_pattern().is_match(&lower) || URGENT_JA.iter().any(|w| lower.contains(w))
}

/// 基于关键词的确定性规划
#[derive(Debug, Clone, Default)]
pub struct KeywordPlanner;

impl KeywordPlanner {
    pub fn new() -> Self {
        Self
    }

    /// 同步规划，供 LlmPlanner 回退时直接调用
    pub fn plan_message(&self, input: &PlanningInput) -> Vec<TodoTask> {
        let message = input.message.trim();
        let intents = detect_intents(message);
        if intents.is_empty() {
            return Vec::new();
        }
        let priority = if is_urgent(message) {
            TaskPriority::High
        } else {
            TaskPriority::Medium
        };
        let title = quoted_title(message);
        let current = input.target_id().map(TaskTarget::Section);

        let mut tasks = Vec::new();
        let mut created_by: Option<String> = None;

        for intent in intents {
            match intent {
                Intent::CreateSection => {
                    let title = title.clone().unwrap_or_else(|| "New Section".to_string());
                    let mut task = TodoTask::new(
                        AgentKind::Outline,
                        "create_section",
                        format!("Create section \"{title}\""),
                    );
                    task.parameters.insert("title".into(), Value::from(title));
                    if let Some(p) = requested_position(message) {
                        task.parameters.insert("position".into(), Value::from(p));
                    }
                    created_by = Some(task.id.clone());
                    tasks.push(task);
                }
                Intent::Reorder => {
                    let section_id = input
                        .target_id()
                        .or_else(|| {
                            title
                                .as_deref()
                                .and_then(|t| input.find_section(t))
                                .map(|e| e.id.clone())
                        });
                    let (action, new_position) = move_action(&message.to_lowercase());
                    let mut task = TodoTask::new(
                        AgentKind::Outline,
                        "move_section",
                        format!("Move section {action}"),
                    );
                    if let Some(id) = section_id {
                        task.parameters.insert("section_id".into(), Value::from(id.clone()));
                        task.target = TaskTarget::Section(id);
                    }
                    task.parameters.insert("action".into(), Value::from(action));
                    if let Some(p) = new_position {
                        task.parameters.insert("new_position".into(), Value::from(p));
                    }
                    tasks.push(task);
                }
                Intent::EditContent => {
                    let mut task =
                        TodoTask::new(AgentKind::Writer, "improve_style", "Improve the writing");
                    match &current {
                        Some(target) => task.target = target.clone(),
                        None => {
                            task.parameters
                                .insert("content".into(), Value::from(message.to_string()));
                        }
                    }
                    tasks.push(task);
                }
                Intent::Draft => {
                    let target = created_by
                        .clone()
                        .map(TaskTarget::CreatedBy)
                        .or_else(|| current.clone());
                    let mut task = match target {
                        Some(target) => {
                            let mut t = TodoTask::new(
                                AgentKind::Writer,
                                "generate_draft",
                                "Draft the section content",
                            );
                            t.target = target;
                            t
                        }
                        None => TodoTask::new(AgentKind::Writer, "generate_content", message),
                    };
                    task.parameters
                        .insert("requirements".into(), Value::from(message.to_string()));
                    tasks.push(task);
                }
                Intent::Summarize => {
                    let mut task = TodoTask::new(
                        AgentKind::Summary,
                        "generate_summary",
                        "Summarize the section",
                    );
                    task.target = created_by
                        .clone()
                        .map(TaskTarget::CreatedBy)
                        .or_else(|| current.clone())
                        .unwrap_or_default();
                    if task.target == TaskTarget::Document {
                        task.description = "Summarize the paper outline".to_string();
                    }
                    tasks.push(task);
                }
                Intent::CheckStructure => {
                    tasks.push(TodoTask::new(
                        AgentKind::LogicValidator,
                        "validate_logic_flow",
                        "Validate the logical structure",
                    ));
                }
                Intent::FindReferences => {
                    let mut task = TodoTask::new(
                        AgentKind::Reference,
                        "search_references",
                        "Search related literature",
                    );
                    task.parameters
                        .insert("query".into(), Value::from(message.to_string()));
                    if let Some(target) = &current {
                        task.target = target.clone();
                    }
                    tasks.push(task);
                }
            }
        }

        for task in &mut tasks {
            task.priority = priority;
        }
        tasks
    }
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn plan(&self, input: &PlanningInput) -> Result<Vec<TodoTask>, PlanningError> {
        if input.message.trim().is_empty() {
            return Err(PlanningError::EmptyMessage);
        }
        Ok(self.plan_message(input))
    }
}

// ---------------------------------------------------------------------------
// LLM 规划
// ---------------------------------------------------------------------------

/// LLM 返回的计划：{"tasks": [...]}
#[derive(Debug, Deserialize)]
struct LlmPlan {
    #[serde(default)]
    tasks: Vec<LlmPlanStep>,
}

#[derive(Debug, Deserialize)]
struct LlmPlanStep {
    agent: String,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    /// "current" / "created" / 章节 id
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    parameters: Parameters,
}

const PLANNER_PROMPT: &str = "You coordinate a team of agents that co-author a research paper. \
Break the user's message into an ordered list of tasks for the agents below. \
Reply with JSON only, in the form \
{\"tasks\": [{\"agent\": \"writer\", \"task_type\": \"generate_draft\", \"description\": \"...\", \
\"priority\": \"high|medium|low\", \"target\": \"current|created|<section id>\", \"parameters\": {}}]}. \
Use \"target\": \"current\" for the section the user is looking at and \"created\" for the section \
created by an earlier outline task in the same plan. \
Reply with {\"tasks\": []} when the message is plain conversation.";

/// 由 LLM 产出 JSON 计划的规划器
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    registry: AgentRegistry,
    fallback: Option<KeywordPlanner>,
}

impl LlmPlanner {
    /// fallback 为 true 时，生成失败或输出不可解析时回退到关键词规划
    pub fn new(llm: Arc<dyn LlmClient>, registry: AgentRegistry, fallback: bool) -> Self {
        Self {
            llm,
            registry,
            fallback: fallback.then(KeywordPlanner::new),
        }
    }

    fn prompt(&self, input: &PlanningInput) -> String {
        let outline = if input.outline.is_empty() {
            "(no sections yet)".to_string()
        } else {
            input
                .outline
                .iter()
                .map(|e| format!("{} {} [{}]", e.hierarchy_path, e.title, e.id))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let current = input.target.as_ref().map_or("none".to_string(), |s| {
            format!("{} {} [{}]", s.hierarchy_path, s.title, s.id)
        });
        format!(
            "Available agents:\n{}\n\nPaper: {}\nOutline:\n{}\nCurrent section: {}\n\nMessage:\n{}",
            self.registry.prompt_listing(),
            input.document.title,
            outline,
            current,
            input.message.trim()
        )
    }

    fn to_tasks(&self, plan: LlmPlan, input: &PlanningInput) -> Result<Vec<TodoTask>, PlanningError> {
        let mut tasks: Vec<TodoTask> = Vec::with_capacity(plan.tasks.len());
        let mut created_by: Option<String> = None;

        for step in plan.tasks {
            let agent: AgentKind = step
                .agent
                .parse()
                .map_err(PlanningError::UnknownAgent)?;
            let task_type = step.task_type.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| {
                self.registry
                    .get(agent)
                    .map_or("default", |a| a.default_task_type())
                    .to_string()
            });
            let description = step
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| format!("{} task", agent.display_name()));

            let mut task = TodoTask::new(agent, task_type, description);
            task.parameters = step.parameters;
            if let Some(p) = step.priority.and_then(|p| p.parse::<TaskPriority>().ok()) {
                task.priority = p;
            }
            task.target = match step.target.as_deref().map(str::trim) {
                Some("current") | Some("target") => input
                    .target_id()
                    .map(TaskTarget::Section)
                    .unwrap_or_default(),
                Some("created") | Some("new") => created_by
                    .clone()
                    .map(TaskTarget::CreatedBy)
                    .unwrap_or_default(),
                Some(id) if input.outline.iter().any(|e| e.id == id) => {
                    TaskTarget::Section(id.to_string())
                }
                _ if matches!(agent, AgentKind::Writer | AgentKind::Summary) => input
                    .target_id()
                    .map(TaskTarget::Section)
                    .unwrap_or_default(),
                _ => TaskTarget::Document,
            };
            if agent == AgentKind::Outline && task.task_type == "create_section" {
                created_by = Some(task.id.clone());
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    fn fall_back(&self, input: &PlanningInput, reason: String) -> Result<Vec<TodoTask>, PlanningError> {
        match &self.fallback {
            Some(keyword) => {
                debug!(reason = %reason, "LLM plan unusable, falling back to keyword planning");
                Ok(keyword.plan_message(input))
            }
            None => Err(PlanningError::Generation(reason)),
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, input: &PlanningInput) -> Result<Vec<TodoTask>, PlanningError> {
        if input.message.trim().is_empty() {
            return Err(PlanningError::EmptyMessage);
        }

        let output = match self
            .llm
            .complete(&[Message::system(PLANNER_PROMPT), Message::user(self.prompt(input))])
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "planner generation failed");
                return self.fall_back(input, e.to_string());
            }
        };

        let Some(json) = extract_json(&output) else {
            return self.fall_back(input, "planner output contained no JSON".to_string());
        };
        match serde_json::from_str::<LlmPlan>(json) {
            Ok(plan) => self.to_tasks(plan, input),
            Err(e) => self.fall_back(input, format!("invalid plan JSON: {e}")),
        }
    }
}

/// 执行顺序：按优先级稳定排序（同优先级保持计划顺序）
///
/// 目标为 CreatedBy 的任务排序键不早于其生产者，
/// 因此优先级更高的依赖任务仍排在创建章节的任务之后。
pub fn order_plan(tasks: Vec<TodoTask>) -> Vec<TodoTask> {
    let mut keys: HashMap<String, TaskPriority> = HashMap::with_capacity(tasks.len());
    let mut keyed: Vec<(TaskPriority, TodoTask)> = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut key = task.priority;
        if let TaskTarget::CreatedBy(producer) = &task.target {
            if let Some(producer_key) = keys.get(producer) {
                key = key.max(*producer_key);
            }
        }
        keys.insert(task.id.clone(), key);
        keyed.push((key, task));
    }
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, task)| task).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::default_registry;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::paper::model::SectionStatus;

    struct ScriptedLlm(String);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn entry(id: &str, title: &str) -> OutlineEntry {
        OutlineEntry {
            id: id.into(),
            position: 0,
            hierarchy_path: "1".into(),
            title: title.into(),
            summary: String::new(),
            word_count: 0,
            status: SectionStatus::Draft,
        }
    }

    fn input(message: &str) -> PlanningInput {
        PlanningInput {
            message: message.into(),
            document: Document::new("Graph Learning", None),
            outline: vec![entry("sec_intro", "Introduction"), entry("sec_method", "Method")],
            target: None,
        }
    }

    #[test]
    fn test_quoted_title_and_position() {
        assert_eq!(quoted_title("add a section \"Related Work\" please"), Some("Related Work".into()));
        assert_eq!(quoted_title("「関連研究」を追加"), Some("関連研究".into()));
        assert_eq!(quoted_title("no quotes"), None);
        assert_eq!(requested_position("put it at position 2"), Some(1));
        assert_eq!(requested_position("3番目に移動"), Some(2));
    }

    #[test]
    fn test_plain_chat_yields_no_tasks() {
        assert!(KeywordPlanner.plan_message(&input("hello, how are you?")).is_empty());
    }

    #[test]
    fn test_create_then_draft_is_chained() {
        let tasks = KeywordPlanner
            .plan_message(&input("Add a new section \"Related Work\" and draft it"));
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].agent_name, AgentKind::Outline);
        assert_eq!(tasks[0].parameters["title"], "Related Work");
        assert_eq!(tasks[1].task_type, "generate_draft");
        assert_eq!(tasks[1].target, TaskTarget::CreatedBy(tasks[0].id.clone()));
    }

    #[test]
    fn test_move_by_quoted_title() {
        let tasks = KeywordPlanner.plan_message(&input("move \"Method\" to the top"));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].parameters["section_id"], "sec_method");
        assert_eq!(tasks[0].parameters["action"], "top");
    }

    #[test]
    fn test_japanese_and_urgency() {
        let tasks = KeywordPlanner.plan_message(&input("至急、論理構造をチェックして関連文献を探して"));
        let agents: Vec<AgentKind> = tasks.iter().map(|t| t.agent_name).collect();
        assert_eq!(agents, vec![AgentKind::LogicValidator, AgentKind::Reference]);
        assert!(tasks.iter().all(|t| t.priority == TaskPriority::High));
    }

    #[tokio::test]
    async fn test_empty_message_is_a_planning_error() {
        let err = KeywordPlanner.plan(&input("   ")).await.unwrap_err();
        assert_eq!(err, PlanningError::EmptyMessage);
    }

    #[tokio::test]
    async fn test_llm_plan_is_parsed() {
        let llm = Arc::new(ScriptedLlm(
            r#"```json
{"tasks": [
  {"agent": "outline", "task_type": "create_section", "parameters": {"title": "Limitations"}},
  {"agent": "WriterAgent", "target": "created", "priority": "high"},
  {"agent": "logic_validator"}
]}
```"#
                .into(),
        ));
        let planner = LlmPlanner::new(llm.clone(), default_registry(llm), false);
        let tasks = planner.plan(&input("extend the paper")).await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[1].task_type, "generate_draft");
        assert_eq!(tasks[1].priority, TaskPriority::High);
        assert_eq!(tasks[1].target, TaskTarget::CreatedBy(tasks[0].id.clone()));
        assert_eq!(tasks[2].task_type, "validate_logic_flow");
    }

    #[tokio::test]
    async fn test_llm_plan_unknown_agent() {
        let llm = Arc::new(ScriptedLlm(r#"{"tasks": [{"agent": "translator"}]}"#.into()));
        let planner = LlmPlanner::new(llm.clone(), default_registry(llm), true);
        let err = planner.plan(&input("translate it")).await.unwrap_err();
        assert_eq!(err, PlanningError::UnknownAgent("translator".into()));
    }

    #[tokio::test]
    async fn test_llm_plan_falls_back_to_keywords() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient);
        let with_fallback = LlmPlanner::new(llm.clone(), default_registry(llm.clone()), true);
        let tasks = with_fallback.plan(&input("summarize the paper")).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].agent_name, AgentKind::Summary);

        let strict = LlmPlanner::new(llm.clone(), default_registry(llm), false);
        assert!(matches!(
            strict.plan(&input("summarize the paper")).await,
            Err(PlanningError::Generation(_))
        ));
    }

    #[test]
    fn test_order_plan_keeps_dependents_after_producer() {
        let mut create = TodoTask::new(AgentKind::Outline, "create_section", "add Limitations");
        create.priority = TaskPriority::Medium;
        let mut draft = TodoTask::new(AgentKind::Writer, "generate_draft", "draft it");
        draft.priority = TaskPriority::High;
        draft.target = TaskTarget::CreatedBy(create.id.clone());
        let mut urgent = TodoTask::new(AgentKind::LogicValidator, "validate_logic_flow", "check");
        urgent.priority = TaskPriority::High;
        let mut later = TodoTask::new(AgentKind::Summary, "generate_summary", "summarize");
        later.priority = TaskPriority::Low;

        let ordered = order_plan(vec![later.clone(), create.clone(), draft.clone(), urgent.clone()]);
        let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![urgent.id.as_str(), create.id.as_str(), draft.id.as_str(), later.id.as_str()]);
        assert_eq!(ordered[2].priority, TaskPriority::High);
    }
}
