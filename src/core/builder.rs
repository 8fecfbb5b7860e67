//! Scribe 构建器：按配置组装存储、Section Store、对话存储、Agent 与 Supervisor
//!
//! 各组件都可以替换（测试注入脚本化规划器、失败的 Agent、带语料的检索器等），
//! 未替换的按配置创建。

use std::sync::Arc;

use tracing::info;

use crate::agents::{default_registry, Agent, AgentExecutor, AgentRegistry};
use crate::chat::ChatSessionStore;
use crate::config::AppConfig;
use crate::core::orchestrator::{Supervisor, SupervisorSettings};
use crate::core::planner::{KeywordPlanner, LlmPlanner, Planner};
use crate::core::{StoreError, TaskScheduler};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::paper::SectionStore;
use crate::retrieval::{NoopRetriever, Retriever};
use crate::storage::{MemoryRepository, SharedRepository};

/// 组装完成的系统
pub struct Scribe {
    pub config: AppConfig,
    pub sections: Arc<SectionStore>,
    pub chats: Arc<ChatSessionStore>,
    pub supervisor: Arc<Supervisor>,
}

/// 构建器
pub struct ScribeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    repository: Option<SharedRepository>,
    retriever: Option<Arc<dyn Retriever>>,
    planner: Option<Arc<dyn Planner>>,
    extra_agents: Vec<Arc<dyn Agent>>,
}

impl ScribeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            repository: None,
            retriever: None,
            planner: None,
            extra_agents: Vec::new(),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_repository(mut self, repository: SharedRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// 覆盖同种类的内置 Agent
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.extra_agents.push(agent);
        self
    }

    pub async fn build(self) -> Result<Scribe, StoreError> {
        let config = self.config;
        let llm = self.llm.unwrap_or_else(|| create_llm_from_config(&config));
        let repository = match self.repository {
            Some(repo) => repo,
            None => open_repository(&config).await?,
        };

        let sections = SectionStore::with_repository(
            repository.clone(),
            config.store.page_size,
            config.store.lock_timeout(),
        );
        let chats = Arc::new(ChatSessionStore::new(repository, config.store.page_size));

        let mut registry: AgentRegistry = default_registry(llm.clone());
        for agent in self.extra_agents {
            registry.register_arc(agent);
        }

        let planner: Arc<dyn Planner> = match self.planner {
            Some(planner) => planner,
            None if config.supervisor.use_llm_planner => Arc::new(LlmPlanner::new(
                llm.clone(),
                registry.clone(),
                config.supervisor.planner_fallback,
            )),
            None => Arc::new(KeywordPlanner::new()),
        };
        let retriever = self
            .retriever
            .unwrap_or_else(|| Arc::new(NoopRetriever));

        let executor = AgentExecutor::new(registry, config.supervisor.agent_timeout());
        let settings = SupervisorSettings {
            retrieval_limit: config.supervisor.retrieval_limit,
            max_tasks: config.supervisor.max_tasks.max(1),
            max_suggestions: config.supervisor.max_suggestions,
        };
        let supervisor = Arc::new(Supervisor::new(
            sections.clone(),
            chats.clone(),
            executor,
            planner,
            retriever,
            llm,
            TaskScheduler::new(config.supervisor.max_parallel_agents.max(1)),
            settings,
        ));

        info!(
            app = ?config.app.name,
            backend = %config.store.backend,
            agents = supervisor.agents().len(),
            "scribe ready"
        );
        Ok(Scribe {
            config,
            sections,
            chats,
            supervisor,
        })
    }
}

async fn open_repository(config: &AppConfig) -> Result<SharedRepository, StoreError> {
    match config.store.backend.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryRepository::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let repo = crate::storage::SqliteRepository::open(&config.store.sqlite_path).await?;
            Ok(Arc::new(repo))
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => {
            tracing::warn!("sqlite backend requested but the `sqlite` feature is disabled, using memory");
            Ok(Arc::new(MemoryRepository::new()))
        }
        other => Err(StoreError::Validation(format!("unknown store backend: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_build_with_defaults() {
        let scribe = ScribeBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .build()
            .await
            .unwrap();
        assert_eq!(scribe.supervisor.agents().len(), 5);
        let doc = scribe.sections.create_document("Paper", None).await.unwrap();
        assert!(scribe.sections.list(&doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_backend_is_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = "postgres".into();
        let result = ScribeBuilder::new(config)
            .with_llm(Arc::new(MockLlmClient))
            .build()
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }
}
