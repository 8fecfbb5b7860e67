//! Agent 执行器
//!
//! 持有 AgentRegistry 与单任务超时：校验 task_type，在超时内调用 agent.execute，
//! 超时转为 AgentError::Timeout；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::agents::registry::AgentRegistry;
use crate::agents::types::{AgentContext, AgentOutput, AgentTask};
use crate::core::AgentError;

/// 一次 Agent 调用的结果与耗时
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub output: Result<AgentOutput, AgentError>,
    pub duration_ms: u64,
}

/// Agent 执行器
#[derive(Clone)]
pub struct AgentExecutor {
    registry: AgentRegistry,
    timeout: Duration,
}

impl AgentExecutor {
    pub fn new(registry: AgentRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn execute(&self, task: &AgentTask, context: &AgentContext) -> AgentRun {
        let start = Instant::now();
        let output = self.run(task, context).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &output {
            Ok(_) => "ok",
            Err(AgentError::Timeout(_)) => "timeout",
            Err(AgentError::InvalidTask { .. }) => "invalid",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "agent_audit",
            "agent": task.agent.as_str(),
            "task_type": task.task_type,
            "ok": output.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "target": context.target_id(),
            "params_preview": params_preview(task),
        });
        tracing::info!(audit = %audit.to_string(), "agent");

        AgentRun {
            output,
            duration_ms,
        }
    }

    async fn run(&self, task: &AgentTask, context: &AgentContext) -> Result<AgentOutput, AgentError> {
        let agent = self
            .registry
            .get(task.agent)
            .ok_or_else(|| AgentError::UnknownAgent(task.agent.to_string()))?;

        if !agent
            .supported_task_types()
            .contains(&task.task_type.as_str())
        {
            return Err(AgentError::invalid(
                task.agent.as_str(),
                format!("unsupported task type: {}", task.task_type),
            ));
        }

        timeout(self.timeout, agent.execute(task, context))
            .await
            .map_err(|_| AgentError::Timeout(self.timeout.as_secs()))?
    }
}

fn params_preview(task: &AgentTask) -> String {
    let s = serde_json::Value::Object(task.parameters.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
