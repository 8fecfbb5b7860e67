//! Supervisor 集成测试：规划、逐任务执行、失败隔离、取消与超时

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scribe::agents::{
    Agent, AgentContext, AgentKind, AgentOutput, AgentTask, ValidationReport,
};
use scribe::chat::{ChatSession, TaskPriority, TaskStatus, TaskTarget, TodoTask};
use scribe::config::AppConfig;
use scribe::core::{AgentError, ChatError, Planner, PlanningError, PlanningInput};
use scribe::llm::MockLlmClient;
use scribe::paper::{NewSection, Section};
use scribe::retrieval::KeywordRetriever;
use scribe::{ChatRequest, Scribe, ScribeBuilder};
use tokio_util::sync::CancellationToken;

type PlanFn = dyn Fn(&PlanningInput) -> Vec<TodoTask> + Send + Sync;

/// 按固定脚本返回计划
struct ScriptedPlanner(Box<PlanFn>);

impl ScriptedPlanner {
    fn new(plan: impl Fn(&PlanningInput) -> Vec<TodoTask> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self(Box::new(plan)))
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, input: &PlanningInput) -> Result<Vec<TodoTask>, PlanningError> {
        if input.message.trim().is_empty() {
            return Err(PlanningError::EmptyMessage);
        }
        Ok((self.0)(input))
    }
}

/// 总是失败的 Summary
struct BrokenSummary;

#[async_trait]
impl Agent for BrokenSummary {
    fn kind(&self) -> AgentKind {
        AgentKind::Summary
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn supported_task_types(&self) -> &[&'static str] {
        &["generate_summary"]
    }

    async fn execute(&self, _task: &AgentTask, _context: &AgentContext) -> Result<AgentOutput, AgentError> {
        Err(AgentError::Execution("summary backend down".into()))
    }
}

/// 执行很慢的 LogicValidator
struct SlowValidator(Duration);

#[async_trait]
impl Agent for SlowValidator {
    fn kind(&self) -> AgentKind {
        AgentKind::LogicValidator
    }

    fn description(&self) -> &str {
        "sleeps before answering"
    }

    fn supported_task_types(&self) -> &[&'static str] {
        &["validate_logic_flow"]
    }

    async fn execute(&self, _task: &AgentTask, _context: &AgentContext) -> Result<AgentOutput, AgentError> {
        tokio::time::sleep(self.0).await;
        Ok(AgentOutput::Validation(ValidationReport::default()))
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.supervisor.use_llm_planner = false;
    config
}

fn builder(config: AppConfig) -> ScribeBuilder {
    ScribeBuilder::new(config).with_llm(Arc::new(MockLlmClient))
}

async fn seed(app: &Scribe) -> (ChatSession, Vec<Section>) {
    let doc = app.sections.create_document("Demo Paper", None).await.unwrap();
    let mut sections = Vec::new();
    for (title, content) in [
        ("Introduction", "Citation graphs are large."),
        ("Method", "We use attention."),
    ] {
        sections.push(
            app.sections
                .create(&doc.id, NewSection::titled(title).with_content(content))
                .await
                .unwrap(),
        );
    }
    let session = app.chats.create_session(&doc.id, "Review").await.unwrap();
    (session, sections)
}

fn validate() -> TodoTask {
    TodoTask::new(AgentKind::LogicValidator, "validate_logic_flow", "Check the logic")
}

fn summarize(target: &str) -> TodoTask {
    let mut task = TodoTask::new(AgentKind::Summary, "generate_summary", "Summarize");
    task.target = TaskTarget::Section(target.to_string());
    task
}

fn create_section(title: &str) -> TodoTask {
    let mut task = TodoTask::new(AgentKind::Outline, "create_section", format!("Add {title}"));
    task.parameters.insert("title".into(), title.into());
    task
}

fn find_references() -> TodoTask {
    let mut task = TodoTask::new(AgentKind::Reference, "search_references", "Find literature");
    task.parameters.insert("query".into(), "graph attention".into());
    task
}

#[tokio::test]
async fn test_failed_task_does_not_abort_turn() {
    let planner = ScriptedPlanner::new(|input| {
        let target = input.outline[0].id.clone();
        vec![validate(), summarize(&target), find_references()]
    });
    let app = builder(config())
        .with_planner(planner)
        .with_agent(Arc::new(BrokenSummary))
        .build()
        .await
        .unwrap();
    let (session, _) = seed(&app).await;

    let response = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "review everything"))
        .await
        .unwrap();

    assert!(response.success);
    let statuses: Vec<TaskStatus> = response.todo_tasks.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Completed]
    );
    assert!(response.todo_tasks[1]
        .error
        .as_deref()
        .unwrap()
        .contains("summary backend down"));
    assert_eq!(response.task_results.len(), 3);
    assert!(response.message.content.contains("1 task(s) failed."));
    assert_eq!(response.message.agent_name, None);
    assert_eq!(response.suggestions[0], "Retry the failed tasks");
    assert!(response.suggestions.len() <= 3);

    let history = app.chats.get_history(&session.id).await.unwrap();
    let messages = history.collect().await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].todo_tasks, response.todo_tasks);
    assert_eq!(messages[1].suggestions, response.suggestions);
    assert_eq!(app.chats.get_session(&session.id).await.unwrap().message_count, 2);
}

#[tokio::test]
async fn test_zero_tasks_still_replies() {
    let app = builder(config())
        .with_planner(ScriptedPlanner::new(|_| Vec::new()))
        .build()
        .await
        .unwrap();
    let (session, _) = seed(&app).await;

    let response = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "thanks, that helps"))
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.todo_tasks.is_empty());
    assert!(!response.message.content.trim().is_empty());
    assert_eq!(response.suggestions.len(), 3);
}

#[tokio::test]
async fn test_cancel_before_execution_has_no_side_effects() {
    let app = builder(config())
        .with_planner(ScriptedPlanner::new(|_| {
            let mut task = TodoTask::new(AgentKind::Outline, "create_section", "Add Limitations");
            task.parameters.insert("title".into(), "Limitations".into());
            vec![task]
        }))
        .build()
        .await
        .unwrap();
    let (session, sections) = seed(&app).await;

    let parent = CancellationToken::new();
    parent.cancel();
    let err = app
        .supervisor
        .send_message_with_cancel(ChatRequest::new(&session.id, "add a section"), Some(parent))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Cancelled));

    let history = app.chats.get_history(&session.id).await.unwrap();
    assert!(history.is_empty().await.unwrap());
    let stored = app.sections.list(&sections[0].document_id).await.unwrap();
    assert_eq!(stored, sections);
}

#[tokio::test]
async fn test_cancel_during_execution_fails_remaining_tasks() {
    let app = builder(config())
        .with_planner(ScriptedPlanner::new(|_| vec![validate(), find_references()]))
        .with_agent(Arc::new(SlowValidator(Duration::from_secs(10))))
        .build()
        .await
        .unwrap();
    let (session, _) = seed(&app).await;

    let supervisor = app.supervisor.clone();
    let session_id = session.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.cancel(&session_id).await
    });

    let response = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "check the paper"))
        .await
        .unwrap();
    assert!(response
        .todo_tasks
        .iter()
        .all(|t| t.status == TaskStatus::Failed && t.error.as_deref() == Some("cancelled")));
}

#[tokio::test]
async fn test_cancel_mid_turn_keeps_completed_mutations() {
    let app = builder(config())
        .with_planner(ScriptedPlanner::new(|_| {
            vec![create_section("Limitations"), validate(), find_references()]
        }))
        .with_agent(Arc::new(SlowValidator(Duration::from_secs(10))))
        .build()
        .await
        .unwrap();
    let (session, sections) = seed(&app).await;

    let supervisor = app.supervisor.clone();
    let session_id = session.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        supervisor.cancel(&session_id).await
    });

    let response = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "add a section and check the paper"))
        .await
        .unwrap();

    assert_eq!(response.todo_tasks.len(), 3);
    assert_eq!(response.todo_tasks[0].agent_name, AgentKind::Outline);
    assert_eq!(response.todo_tasks[0].status, TaskStatus::Completed);
    assert!(response.todo_tasks[1..]
        .iter()
        .all(|t| t.status == TaskStatus::Failed && t.error.as_deref() == Some("cancelled")));

    let stored = app.sections.list(&sections[0].document_id).await.unwrap();
    let titles: Vec<&str> = stored.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["Introduction", "Method", "Limitations"]);

    let messages = app.chats.get_history(&session.id).await.unwrap().collect().await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].todo_tasks, response.todo_tasks);
}

#[tokio::test]
async fn test_dropped_turn_is_deregistered() {
    let app = builder(config())
        .with_planner(ScriptedPlanner::new(|_| vec![validate()]))
        .with_agent(Arc::new(SlowValidator(Duration::from_secs(10))))
        .build()
        .await
        .unwrap();
    let (session, _) = seed(&app).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        app.supervisor
            .send_message(ChatRequest::new(&session.id, "check the logic")),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(!app.supervisor.cancel(&session.id).await);
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let app = builder(config()).build().await.unwrap();
    let (session, _) = seed(&app).await;

    let err = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "  \n "))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Planning(PlanningError::EmptyMessage)));
    let history = app.chats.get_history(&session.id).await.unwrap();
    assert!(history.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_created_section_is_drafted_in_same_turn() {
    let app = builder(config()).build().await.unwrap();
    let (session, sections) = seed(&app).await;

    let response = app
        .supervisor
        .send_message(ChatRequest::new(
            &session.id,
            "Add a new section \"Limitations\" and draft it",
        ))
        .await
        .unwrap();

    assert_eq!(response.todo_tasks.len(), 2);
    assert!(response
        .todo_tasks
        .iter()
        .all(|t| t.status == TaskStatus::Completed));

    let stored = app.sections.list(&sections[0].document_id).await.unwrap();
    assert_eq!(stored.len(), 3);
    let created = &stored[2];
    assert_eq!(created.title, "Limitations");
    assert_eq!(created.hierarchy_path, "3");
    assert!(!created.content.trim().is_empty());
    assert!(created.word_count > 0);
}

#[tokio::test]
async fn test_urgent_draft_waits_for_its_section() {
    let app = builder(config())
        .with_planner(ScriptedPlanner::new(|_| {
            let mut create = create_section("Limitations");
            create.priority = TaskPriority::Medium;
            let mut draft = TodoTask::new(AgentKind::Writer, "generate_draft", "Draft the new section");
            draft.priority = TaskPriority::High;
            draft.target = TaskTarget::CreatedBy(create.id.clone());
            vec![create, draft]
        }))
        .build()
        .await
        .unwrap();
    let (session, sections) = seed(&app).await;

    let response = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "add limitations and draft them"))
        .await
        .unwrap();

    let agents: Vec<AgentKind> = response.todo_tasks.iter().map(|t| t.agent_name).collect();
    assert_eq!(agents, vec![AgentKind::Outline, AgentKind::Writer]);
    assert!(response
        .todo_tasks
        .iter()
        .all(|t| t.status == TaskStatus::Completed));

    let stored = app.sections.list(&sections[0].document_id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2].title, "Limitations");
    assert!(!stored[2].content.trim().is_empty());
}

#[tokio::test]
async fn test_truncation_keeps_highest_priority_tasks() {
    let mut config = config();
    config.supervisor.max_tasks = 2;
    let app = builder(config)
        .with_planner(ScriptedPlanner::new(|_| {
            let mut low = find_references();
            low.priority = TaskPriority::Low;
            let mut urgent = validate();
            urgent.priority = TaskPriority::High;
            vec![low, find_references(), urgent]
        }))
        .build()
        .await
        .unwrap();
    let (session, _) = seed(&app).await;

    let response = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "review the paper"))
        .await
        .unwrap();

    let planned: Vec<(AgentKind, TaskPriority)> = response
        .todo_tasks
        .iter()
        .map(|t| (t.agent_name, t.priority))
        .collect();
    assert_eq!(
        planned,
        vec![
            (AgentKind::LogicValidator, TaskPriority::High),
            (AgentKind::Reference, TaskPriority::Medium),
        ]
    );
}

#[tokio::test]
async fn test_slow_agent_times_out() {
    let mut config = config();
    config.supervisor.agent_timeout_secs = 1;
    let app = builder(config)
        .with_planner(ScriptedPlanner::new(|_| vec![validate()]))
        .with_agent(Arc::new(SlowValidator(Duration::from_secs(5))))
        .build()
        .await
        .unwrap();
    let (session, _) = seed(&app).await;

    let response = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "check the logic"))
        .await
        .unwrap();
    let task = &response.todo_tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error.as_deref(),
        Some(AgentError::Timeout(1).to_string().as_str())
    );
    assert_eq!(response.message.agent_name.as_deref(), Some("logic_validator"));
}

#[tokio::test]
async fn test_target_from_another_document_is_rejected() {
    let app = builder(config()).build().await.unwrap();
    let (session, _) = seed(&app).await;
    let other = app.sections.create_document("Other Paper", None).await.unwrap();
    let foreign = app
        .sections
        .create(&other.id, NewSection::titled("Elsewhere"))
        .await
        .unwrap();

    let err = app
        .supervisor
        .send_message(ChatRequest::new(&session.id, "summarize this").with_target(&foreign.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChatError::Planning(PlanningError::TargetNotInDocument { .. })
    ));
}

#[tokio::test]
async fn test_references_attach_to_target_section() {
    let corpus = KeywordRetriever::new();
    corpus.add(
        "Graph attention networks weight neighbour features.",
        "velickovic_gat_2018.pdf",
        ["gnn"],
    );
    corpus.add("Protein folding with diffusion models.", "folding_2023.pdf", ["bio"]);
    let app = builder(config())
        .with_retriever(Arc::new(corpus))
        .build()
        .await
        .unwrap();
    let (session, sections) = seed(&app).await;

    let response = app
        .supervisor
        .send_message(
            ChatRequest::new(&session.id, "find references on graph attention")
                .with_target(&sections[1].id)
                .with_tags(["gnn"]),
        )
        .await
        .unwrap();

    assert_eq!(response.todo_tasks.len(), 1);
    assert_eq!(response.todo_tasks[0].agent_name, AgentKind::Reference);
    assert_eq!(response.todo_tasks[0].status, TaskStatus::Completed);
    assert_eq!(response.message.agent_name.as_deref(), Some("reference"));

    let attached = app.sections.list_references(&sections[1].id).await.unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].source.as_deref(), Some("velickovic_gat_2018.pdf"));
    assert_eq!(attached[0].section_id.as_deref(), Some(sections[1].id.as_str()));
    assert!(response
        .references
        .iter()
        .any(|r| r.citation == attached[0].citation));
    assert!(app.sections.list_references(&sections[0].id).await.unwrap().is_empty());
}
