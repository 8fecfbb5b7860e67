//! Agent 注册表
//!
//! 所有 Agent 实现 Agent trait（kind / description / supported_task_types / execute），
//! 由 AgentRegistry 按种类注册与查找；AgentExecutor 在调用时加超时并输出审计日志。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::agents::types::{AgentContext, AgentKind, AgentOutput, AgentTask};
use crate::core::AgentError;

/// Agent trait
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// 能力描述（供规划 prompt 与目录使用）
    fn description(&self) -> &str;

    fn supported_task_types(&self) -> &[&'static str];

    /// 任务未指定 task_type 时使用
    fn default_task_type(&self) -> &'static str {
        self.supported_task_types().first().copied().unwrap_or("default")
    }

    async fn execute(&self, task: &AgentTask, context: &AgentContext)
        -> Result<AgentOutput, AgentError>;
}

/// 目录条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub name: AgentKind,
    pub description: String,
    pub task_types: Vec<String>,
}

/// Agent 注册表：按种类存储 Arc<dyn Agent>
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同种类重复注册时后者覆盖前者
    pub fn register(&mut self, agent: impl Agent + 'static) {
        self.agents.insert(agent.kind(), Arc::new(agent));
    }

    pub fn register_arc(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.agents.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<AgentKind> {
        self.agents.keys().copied().collect()
    }

    pub fn catalogue(&self) -> Vec<AgentInfo> {
        self.agents
            .values()
            .map(|agent| AgentInfo {
                name: agent.kind(),
                description: agent.description().to_string(),
                task_types: agent
                    .supported_task_types()
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
            })
            .collect()
    }

    /// 规划 prompt 中的 Available agents 段落
    pub fn prompt_listing(&self) -> String {
        self.catalogue()
            .iter()
            .map(|info| {
                format!(
                    "- {}: {} (task types: {})",
                    info.name,
                    info.description,
                    info.task_types.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
