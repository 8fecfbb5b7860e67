//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::AppConfig;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use traits::{LlmClient, LlmError};

/// 按配置创建 LLM 客户端
///
/// provider 为 openai / deepseek 时需要对应的 API Key 环境变量，缺失则退回 Mock。
pub fn create_llm_from_config(config: &AppConfig) -> Arc<dyn LlmClient> {
    let timeout = Duration::from_secs(config.llm.timeouts.request.max(1));
    match config.llm.provider.as_str() {
        "openai" => match std::env::var("OPENAI_API_KEY") {
            Ok(key) => Arc::new(OpenAiClient::new(
                config.llm.base_url.as_deref(),
                &config.llm.model,
                &key,
                timeout,
            )),
            Err(_) => {
                warn!("OPENAI_API_KEY not set, falling back to mock LLM");
                Arc::new(MockLlmClient)
            }
        },
        "deepseek" => match std::env::var("DEEPSEEK_API_KEY") {
            Ok(key) => {
                let model = (!config.llm.model.is_empty()).then_some(config.llm.model.as_str());
                Arc::new(OpenAiClient::deepseek(model, &key, timeout))
            }
            Err(_) => {
                warn!("DEEPSEEK_API_KEY not set, falling back to mock LLM");
                Arc::new(MockLlmClient)
            }
        },
        "mock" => Arc::new(MockLlmClient),
        other => {
            warn!(provider = %other, "unknown llm provider, using mock");
            Arc::new(MockLlmClient)
        }
    }
}
