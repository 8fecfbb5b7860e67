//! Scribe - Rust 论文协作系统
//!
//! 模块划分：
//! - **agents**: Agent 能力集（Outline / Summary / Writer / LogicValidator / Reference）、注册表与执行器
//! - **chat**: 对话会话、消息与任务记录，Chat Session Store
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、任务规划、Supervisor、回复合成、调度与会话监管
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **paper**: 文档、章节、大纲排序与修订历史，Section Store
//! - **retrieval**: 检索协作方接口与关键词检索
//! - **storage**: 持久化底座（内存 / SQLite）

pub mod agents;
pub mod chat;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod paper;
pub mod retrieval;
pub mod storage;

pub use crate::core::{ChatRequest, Scribe, ScribeBuilder, Supervisor};
