//! 对话 Agent 抽象
//!
//! 中继只依赖 `ChatAgent` 与 `TokenObserver` 两个窄接口，
//! 具体的 LLM 调用由实现方负责。

pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, LlmProvider};

pub use openai::OpenAiChatAgent;

/// 生成过程中每产生一个片段就回调一次
pub trait TokenObserver: Send + Sync {
    fn on_token(&self, token: &str);
}

/// 交给 Agent 执行的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    /// Agent 扮演的角色
    pub role: String,
    /// Agent 目标
    pub goal: String,
    /// 背景设定
    pub backstory: String,
    /// 任务描述（包含用户输入与上下文）
    pub description: String,
    /// 期望的输出形式
    pub expected_output: String,
}

/// Agent 错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Chat agent is unavailable: {0}")]
    Unavailable(String),

    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM stream error: {0}")]
    Stream(String),

    #[error("Generation timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Generation task aborted: {0}")]
    Aborted(String),
}

/// 对话 Agent
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// 后端名称，仅用于日志
    fn name(&self) -> &str;

    /// 执行任务，生成过程中通过 observer 逐片段回调，返回完整文本
    async fn run(&self, task: AgentTask, observer: &dyn TokenObserver)
        -> Result<String, AgentError>;
}

/// 初始化失败时使用的占位 Agent，每次调用都返回 `Unavailable`
#[derive(Debug, Clone)]
pub struct UnavailableAgent {
    reason: String,
}

impl UnavailableAgent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatAgent for UnavailableAgent {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn run(
        &self,
        _task: AgentTask,
        _observer: &dyn TokenObserver,
    ) -> Result<String, AgentError> {
        Err(AgentError::Unavailable(self.reason.clone()))
    }
}

/// 根据配置创建 Agent
///
/// 初始化失败不会导致进程退出，而是返回 `UnavailableAgent`，
/// 由每个请求各自报告错误。
pub fn build_agent(cfg: &Config) -> Arc<dyn ChatAgent> {
    match try_build_agent(cfg) {
        Ok(agent) => {
            info!(
                "LLM 后端已就绪: provider={}, model={}",
                cfg.llm_provider.as_str(),
                cfg.llm_model
            );
            agent
        }
        Err(reason) => {
            warn!("LLM 后端初始化失败，对话请求将返回错误: {}", reason);
            Arc::new(UnavailableAgent::new(reason))
        }
    }
}

fn try_build_agent(cfg: &Config) -> Result<Arc<dyn ChatAgent>, String> {
    let api_key = cfg
        .llm_api_key
        .clone()
        .ok_or_else(|| format!("no API key configured for provider {}", cfg.llm_provider.as_str()))?;
    let api_base = cfg
        .llm_api_base
        .clone()
        .ok_or_else(|| format!("no API base configured for provider {}", cfg.llm_provider.as_str()))?;

    let agent = match cfg.llm_provider {
        LlmProvider::Azure => OpenAiChatAgent::azure(
            &api_base,
            api_key,
            &cfg.llm_model,
            &cfg.llm_api_version,
            cfg.llm_temperature,
        ),
        LlmProvider::OpenAi => {
            OpenAiChatAgent::openai(&api_base, api_key, &cfg.llm_model, cfg.llm_temperature)
        }
    }
    .map_err(|e| format!("failed to build HTTP client: {}", e))?;

    Ok(Arc::new(agent))
}
