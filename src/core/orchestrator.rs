//! Supervisor：一次对话轮次的主控流程
//!
//! 1. 规划：消息 -> 有序 TodoTask 列表（可为空）
//! 2. 取上下文：按任务检索片段（可按 tags 过滤），全部在任何修改之前完成
//! 3. 执行：按优先级顺序逐个执行，单任务失败只记录在任务上
//! 4. 落库：Outline / Summary / Writer / Reference 结果在任务完成时立即写入 Section Store
//! 5. 合成：叙述结果、汇总引用、生成建议，持久化助手消息
//!
//! 执行阶段开始前取消：丢弃计划，不产生任何副作用；执行中取消：已完成任务的修改保留，
//! 剩余任务标记为 failed("cancelled")。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{
    AgentContext, AgentExecutor, AgentInfo, AgentKind, AgentOutput, AgentTask, OutlineOp,
};
use crate::chat::{
    ChatMessage, ChatResponse, ChatSessionStore, TaskReport, TaskStatus, TaskTarget, TodoTask,
};
use crate::core::planner::{order_plan, Planner, PlanningInput};
use crate::core::session_supervisor::SessionSupervisor;
use crate::core::synthesis::{
    collect_references, dominant_agent, narrate, suggestions, CONVERSATION_FALLBACK,
};
use crate::core::{AgentError, ChatError, PlanningError, StoreError, TaskScheduler};
use crate::llm::{LlmClient, Message};
use crate::paper::model::{Document, NewSection, Section, SectionUpdate};
use crate::paper::SectionStore;
use crate::retrieval::{Passage, Retriever};

const CHAT_PROMPT: &str = "You are a research writing assistant helping the user co-author a \
paper. Answer conversationally and briefly. If the user seems to want changes to the paper, \
suggest what they could ask for.";

/// 一次对话请求
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    /// 作用章节；必须属于会话所在文档
    pub target_section_id: Option<String>,
    /// 检索过滤标签
    pub tags: Option<BTreeSet<String>>,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, section_id: impl Into<String>) -> Self {
        self.target_section_id = Some(section_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

/// 直接调用单个 Agent 时的作用范围
#[derive(Debug, Clone, Default)]
pub struct AgentScope {
    pub document_id: Option<String>,
    pub section_id: Option<String>,
    pub tags: Option<BTreeSet<String>>,
}

/// Supervisor 的运行参数
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub retrieval_limit: usize,
    pub max_tasks: usize,
    pub max_suggestions: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            retrieval_limit: 5,
            max_tasks: 8,
            max_suggestions: 3,
        }
    }
}

/// 任务编排器
pub struct Supervisor {
    sections: Arc<SectionStore>,
    chats: Arc<ChatSessionStore>,
    executor: AgentExecutor,
    planner: Arc<dyn Planner>,
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn LlmClient>,
    scheduler: TaskScheduler,
    sessions: SessionSupervisor,
    settings: SupervisorSettings,
}

/// 规划完成、尚未执行的轮次
struct PreparedTurn {
    document: Document,
    tasks: Vec<TodoTask>,
    passages: HashMap<String, Vec<Passage>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sections: Arc<SectionStore>,
        chats: Arc<ChatSessionStore>,
        executor: AgentExecutor,
        planner: Arc<dyn Planner>,
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn LlmClient>,
        scheduler: TaskScheduler,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            sections,
            chats,
            executor,
            planner,
            retriever,
            llm,
            scheduler,
            sessions: SessionSupervisor::new(),
            settings,
        }
    }

    pub fn sections(&self) -> &Arc<SectionStore> {
        &self.sections
    }

    pub fn chats(&self) -> &Arc<ChatSessionStore> {
        &self.chats
    }

    /// Agent 目录
    pub fn agents(&self) -> Vec<AgentInfo> {
        self.executor.registry().catalogue()
    }

    /// 取消会话上进行中的轮次
    pub async fn cancel(&self, session_id: &str) -> bool {
        let cancelled = self.sessions.cancel(session_id);
        if cancelled {
            info!(session_id, "chat turn cancellation requested");
        }
        cancelled
    }

    pub async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        self.send_message_with_cancel(request, None).await
    }

    /// 同 send_message；parent 取消（如客户端断开）时本轮随之取消
    pub async fn send_message_with_cancel(
        &self,
        request: ChatRequest,
        parent: Option<CancellationToken>,
    ) -> Result<ChatResponse, ChatError> {
        let turn = self
            .sessions
            .guard_turn(&request.session_id, parent.as_ref());
        let result = self.run_turn(&request, turn.token()).await;
        drop(turn);
        result
    }

    async fn run_turn(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            prepared = self.prepare(request) => Some(prepared),
        };
        let PreparedTurn {
            document,
            mut tasks,
            passages,
        } = match prepared {
            Some(prepared) if !cancel.is_cancelled() => prepared?,
            _ => {
                info!(session_id = %request.session_id, "chat turn cancelled before execution, plan discarded");
                return Err(ChatError::Cancelled);
            }
        };

        self.chats
            .append(&ChatMessage::user(&request.session_id, request.message.trim()))
            .await?;

        let mut task_results = BTreeMap::new();
        let mut created: HashMap<String, String> = HashMap::new();
        for task in tasks.iter_mut() {
            let report = self
                .run_task(task, request, &document, &passages, &mut created, cancel)
                .await;
            task_results.insert(task.id.clone(), report);
        }

        let content = if tasks.is_empty() {
            self.converse(request, &document).await
        } else {
            narrate(&tasks)
        };
        let all_passages: Vec<Passage> = tasks
            .iter()
            .filter_map(|t| passages.get(&t.id))
            .flatten()
            .cloned()
            .collect();
        let references = collect_references(&tasks, &all_passages);
        let suggestions = suggestions(&tasks, self.settings.max_suggestions);

        let message = ChatMessage::assistant(
            &request.session_id,
            content,
            dominant_agent(&tasks).map(|k| k.as_str().to_string()),
            tasks.clone(),
            references.clone(),
        )
        .with_suggestions(suggestions.clone());
        self.chats.append(&message).await?;

        let failed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        info!(
            session_id = %request.session_id,
            tasks = tasks.len(),
            failed,
            references = references.len(),
            "chat turn finished"
        );

        Ok(ChatResponse {
            message,
            todo_tasks: tasks,
            task_results,
            references,
            suggestions,
            success: true,
        })
    }

    /// 步骤 1、2：校验请求、规划、检索；无任何写入
    async fn prepare(&self, request: &ChatRequest) -> Result<PreparedTurn, ChatError> {
        if request.message.trim().is_empty() {
            return Err(PlanningError::EmptyMessage.into());
        }
        let session = self.chats.get_session(&request.session_id).await?;
        let document = self.sections.get_document(&session.document_id).await?;
        let target = match &request.target_section_id {
            Some(id) => {
                let section = self.sections.get(id).await?;
                if section.document_id != document.id {
                    return Err(PlanningError::TargetNotInDocument {
                        section_id: id.clone(),
                        document_id: document.id.clone(),
                    }
                    .into());
                }
                Some(section)
            }
            None => None,
        };
        let outline = self.sections.outline(&document.id).await?;

        let input = PlanningInput {
            message: request.message.trim().to_string(),
            document: document.clone(),
            outline,
            target,
        };
        let mut tasks = order_plan(self.planner.plan(&input).await?);
        if tasks.len() > self.settings.max_tasks {
            warn!(
                planned = tasks.len(),
                max = self.settings.max_tasks,
                "plan truncated"
            );
            tasks.truncate(self.settings.max_tasks);
        }
        info!(session_id = %request.session_id, tasks = tasks.len(), "plan ready");

        let mut passages = HashMap::new();
        for task in &tasks {
            if let Some(query) = retrieval_query(task) {
                let limit = task
                    .parameters
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .map_or(self.settings.retrieval_limit, |l| l as usize);
                let found = self
                    .retriever
                    .search(&query, request.tags.as_ref(), limit)
                    .await?;
                debug!(task_id = %task.id, passages = found.len(), "context retrieved");
                passages.insert(task.id.clone(), found);
            }
        }

        Ok(PreparedTurn {
            document,
            tasks,
            passages,
        })
    }

    /// 步骤 3、4：执行单个任务并立即落库；失败只记录在任务上
    #[allow(clippy::too_many_arguments)]
    async fn run_task(
        &self,
        task: &mut TodoTask,
        request: &ChatRequest,
        document: &Document,
        passages: &HashMap<String, Vec<Passage>>,
        created: &mut HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> TaskReport {
        if cancel.is_cancelled() {
            abort(task, "cancelled");
            return report(task, 0);
        }
        if let Err(e) = task.start() {
            warn!(task_id = %task.id, error = %e, "task could not be started");
            return report(task, 0);
        }
        info!(task_id = %task.id, agent = %task.agent_name, task_type = %task.task_type, "task started");

        let target = match self.resolve_target(&task.target, created).await {
            Ok(target) => target,
            Err(reason) => {
                finish_failed(task, reason, None);
                return report(task, 0);
            }
        };
        let context = AgentContext {
            request: request.message.trim().to_string(),
            document: Some(document.clone()),
            outline: match self.sections.outline(&document.id).await {
                Ok(outline) => outline,
                Err(e) => {
                    finish_failed(task, e.to_string(), None);
                    return report(task, 0);
                }
            },
            target,
            passages: passages.get(&task.id).cloned().unwrap_or_default(),
        };
        let agent_task = AgentTask {
            agent: task.agent_name,
            task_type: task.task_type.clone(),
            description: task.description.clone(),
            parameters: task.parameters.clone(),
        };

        let run = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            run = async {
                let _permit = self.scheduler.acquire_agent().await;
                self.executor.execute(&agent_task, &context).await
            } => Some(run),
        };
        let Some(run) = run else {
            finish_failed(task, AgentError::Cancelled.to_string(), None);
            info!(task_id = %task.id, "task cancelled");
            return report(task, 0);
        };

        match run.output {
            Ok(output) => match self.apply(&document.id, &output).await {
                Ok(new_sections) => {
                    if let Some(first) = new_sections.into_iter().next() {
                        created.insert(task.id.clone(), first);
                    }
                    if let Err(e) = task.complete(output) {
                        warn!(task_id = %task.id, error = %e, "task completion rejected");
                    }
                    info!(task_id = %task.id, duration_ms = run.duration_ms, "task completed");
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "applying agent result failed");
                    finish_failed(task, e.to_string(), Some(output));
                }
            },
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "task failed");
                finish_failed(task, e.to_string(), None);
            }
        }
        report(task, run.duration_ms)
    }

    async fn resolve_target(
        &self,
        target: &TaskTarget,
        created: &HashMap<String, String>,
    ) -> Result<Option<Section>, String> {
        // 章节可能已被前面的任务改写，始终重新读取
        let section_id = match target {
            TaskTarget::Document => return Ok(None),
            TaskTarget::Section(id) => id.clone(),
            TaskTarget::CreatedBy(task_id) => created
                .get(task_id)
                .cloned()
                .ok_or_else(|| format!("task {task_id} did not create a section"))?,
        };
        self.sections
            .get(&section_id)
            .await
            .map(Some)
            .map_err(|e| e.to_string())
    }

    /// 把 Agent 结果写入 Section Store；返回新建的章节 id
    async fn apply(&self, document_id: &str, output: &AgentOutput) -> Result<Vec<String>, StoreError> {
        let mut created = Vec::new();
        match output {
            AgentOutput::Outline(proposal) => {
                for op in &proposal.operations {
                    match op {
                        OutlineOp::Create {
                            title,
                            position,
                            level,
                        } => {
                            let section = self
                                .sections
                                .create(
                                    document_id,
                                    NewSection {
                                        title: title.clone(),
                                        content: None,
                                        position: *position,
                                        level: *level,
                                    },
                                )
                                .await?;
                            created.push(section.id);
                        }
                        OutlineOp::Move { section_id, action } => {
                            self.sections.move_section(section_id, *action).await?;
                        }
                    }
                }
            }
            AgentOutput::Summary(draft) => {
                if let Some(id) = &draft.section_id {
                    self.sections
                        .update(id, SectionUpdate::summary(draft.summary.clone()))
                        .await?;
                }
            }
            AgentOutput::Writer(draft) => {
                if let Some(id) = &draft.section_id {
                    self.sections
                        .update(id, SectionUpdate::content(draft.content.clone()))
                        .await?;
                }
            }
            AgentOutput::References(list) => {
                if let Some(id) = list.section_id.as_deref().filter(|_| !list.citations.is_empty()) {
                    self.sections.add_references(id, &list.citations).await?;
                }
            }
            AgentOutput::Validation(_) => {}
        }
        Ok(created)
    }

    /// 零任务时的对话回复；生成失败时用固定文案
    async fn converse(&self, request: &ChatRequest, document: &Document) -> String {
        let prompt = format!("Paper: {}\n\n{}", document.title, request.message.trim());
        match self
            .llm
            .complete(&[Message::system(CHAT_PROMPT), Message::user(prompt)])
            .await
        {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => CONVERSATION_FALLBACK.to_string(),
            Err(e) => {
                warn!(error = %e, "conversational reply failed");
                CONVERSATION_FALLBACK.to_string()
            }
        }
    }

    /// 直接调用单个 Agent（绕过规划，不落库），返回原始结果
    pub async fn execute_agent(
        &self,
        task: AgentTask,
        scope: AgentScope,
    ) -> Result<AgentOutput, AgentError> {
        let target = match &scope.section_id {
            Some(id) => Some(self.sections.get(id).await?),
            None => None,
        };
        let document_id = scope
            .document_id
            .clone()
            .or_else(|| target.as_ref().map(|s| s.document_id.clone()));
        let (document, outline) = match &document_id {
            Some(id) => (
                Some(self.sections.get_document(id).await?),
                self.sections.outline(id).await?,
            ),
            None => (None, Vec::new()),
        };

        let passages = match agent_task_query(&task) {
            Some(query) => self
                .retriever
                .search(
                    &query,
                    scope.tags.as_ref(),
                    task.param_usize("limit").unwrap_or(self.settings.retrieval_limit),
                )
                .await
                .map_err(|e| AgentError::Execution(e.to_string()))?,
            None => Vec::new(),
        };

        let context = AgentContext {
            request: task.description.clone(),
            document,
            outline,
            target,
            passages,
        };
        let _permit = self.scheduler.acquire_agent().await;
        self.executor.execute(&task, &context).await.output
    }
}

/// 需要检索上下文的任务及其查询
fn retrieval_query(task: &TodoTask) -> Option<String> {
    needs_retrieval(task.agent_name, &task.task_type).then(|| {
        task.parameters
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&task.description)
            .to_string()
    })
}

fn agent_task_query(task: &AgentTask) -> Option<String> {
    needs_retrieval(task.agent, &task.task_type).then(|| {
        task.param_str("query")
            .unwrap_or(&task.description)
            .to_string()
    })
}

fn needs_retrieval(agent: AgentKind, task_type: &str) -> bool {
    match agent {
        AgentKind::Reference => task_type == "search_references",
        AgentKind::Writer => task_type != "improve_style",
        _ => false,
    }
}

fn abort(task: &mut TodoTask, reason: &str) {
    if let Err(e) = task.abort(reason) {
        warn!(task_id = %task.id, error = %e, "task abort rejected");
    }
}

fn finish_failed(task: &mut TodoTask, reason: String, partial: Option<AgentOutput>) {
    if let Err(e) = task.fail(reason, partial) {
        warn!(task_id = %task.id, error = %e, "task failure rejected");
    }
}

fn report(task: &TodoTask, duration_ms: u64) -> TaskReport {
    TaskReport {
        agent_name: task.agent_name,
        status: task.status,
        duration_ms,
        error: task.error.clone(),
    }
}
