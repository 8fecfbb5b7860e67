//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 取最后一条 User 消息的首行回显，输出确定；不产出 JSON，因此规划器会回退到关键词规划。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

const ECHO_CHARS: usize = 120;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default, Clone)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let first_line = last_user.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let echoed: String = first_line.trim().chars().take(ECHO_CHARS).collect();
        Ok(format!("Mock response: {echoed}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_last_user_line() {
        let out = MockLlmClient
            .complete(&[
                Message::system("You are a writer."),
                Message::user("first"),
                Message::user("\nDraft the introduction\nmore context"),
            ])
            .await
            .unwrap();
        assert_eq!(out, "Mock response: Draft the introduction");
    }
}
