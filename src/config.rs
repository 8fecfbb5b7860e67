//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCRIBE__*` 覆盖（双下划线表示嵌套，如 `SCRIBE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub supervisor: SupervisorSection,
    pub store: StoreSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / mock；缺少对应 API Key 时退回 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [supervisor] 段：任务规划与执行
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    /// 同时进行的 Agent 生成上限（跨会话共享）
    pub max_parallel_agents: usize,
    /// 单个任务超时（秒），超时即失败，不重试
    pub agent_timeout_secs: u64,
    /// 每个任务检索的片段数
    pub retrieval_limit: usize,
    /// 计划最多保留的任务数
    pub max_tasks: usize,
    pub max_suggestions: usize,
    pub use_llm_planner: bool,
    /// LLM 规划失败时是否回退到关键词规划
    pub planner_fallback: bool,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            max_parallel_agents: 3,
            agent_timeout_secs: 30,
            retrieval_limit: 5,
            max_tasks: 8,
            max_suggestions: 3,
            use_llm_planner: true,
            planner_fallback: true,
        }
    }
}

impl SupervisorSection {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs.max(1))
    }
}

/// [store] 段：持久化后端与锁
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// memory / sqlite（后者需启用 `sqlite` feature）
    pub backend: String,
    pub sqlite_path: PathBuf,
    /// 等待文档锁的最长时间，超过即 ConcurrentModification
    pub lock_timeout_ms: u64,
    /// 历史与消息分页大小
    pub page_size: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: PathBuf::from("scribe.db"),
            lock_timeout_ms: 500,
            page_size: 50,
        }
    }
}

impl StoreSection {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// 从 config 目录加载配置，环境变量 SCRIBE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCRIBE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCRIBE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
