//! 配置管理
//!
//! 加载顺序：默认值 -> 可选的 TOML 配置文件 -> 环境变量

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// LLM 服务提供方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Azure,
    OpenAi,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::OpenAi => "openai",
        }
    }

    /// 未显式配置 API Key 时回退读取的环境变量
    fn api_key_env(&self) -> &'static str {
        match self {
            Self::Azure => "AZURE_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// 连接建立后推送的欢迎语
    pub greeting: String,
    pub llm_provider: LlmProvider,
    /// 模型名（Azure 下为部署名）
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_api_base: Option<String>,
    pub llm_api_version: String,
    pub llm_temperature: f32,
    /// 单次生成超时（秒），0 表示不限制
    pub agent_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            greeting: "Connected! Tell me about your idea.".to_string(),
            llm_provider: LlmProvider::Azure,
            llm_model: "gpt-4o-mini".to_string(),
            llm_api_key: None,
            llm_api_base: None,
            llm_api_version: "2024-06-01".to_string(),
            llm_temperature: 0.7,
            agent_timeout_secs: 120,
            ping_interval_secs: 25,
            ping_timeout_secs: 20,
        }
    }
}

impl Config {
    /// 从配置文件和环境变量加载配置
    pub fn from_env() -> common::Result<Self> {
        let file = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "relay.toml".to_string());
        Self::load(
            Some(&file),
            Environment::default().try_parsing(true),
            |name| std::env::var(name).ok(),
        )
    }

    /// 按给定来源加载配置，`lookup` 用于读取回退用的环境变量
    pub fn load(
        file: Option<&str>,
        env: Environment,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> common::Result<Self> {
        let mut builder = Self::defaults_builder(&lookup).map_err(config_error)?;

        if let Some(path) = file {
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(false));
        }

        let mut cfg: Self = builder
            .add_source(env)
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(config_error)?;

        cfg.apply_fallbacks(&lookup);
        cfg.validate()?;
        Ok(cfg)
    }

    fn defaults_builder(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        let d = Self::default();
        let api_version = lookup("AZURE_API_VERSION").unwrap_or(d.llm_api_version);

        config::Config::builder()
            .set_default("server_host", d.server_host)?
            .set_default("server_port", i64::from(d.server_port))?
            .set_default("log_level", d.log_level)?
            .set_default("log_format", d.log_format.as_str())?
            .set_default("greeting", d.greeting)?
            .set_default("llm_provider", d.llm_provider.as_str())?
            .set_default("llm_model", d.llm_model)?
            .set_default("llm_api_version", api_version)?
            .set_default("llm_temperature", f64::from(d.llm_temperature))?
            .set_default("agent_timeout_secs", d.agent_timeout_secs as i64)?
            .set_default("ping_interval_secs", d.ping_interval_secs as i64)?
            .set_default("ping_timeout_secs", d.ping_timeout_secs as i64)
    }

    fn apply_fallbacks(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if self.llm_api_key.as_deref().map_or(true, str::is_empty) {
            self.llm_api_key = lookup(self.llm_provider.api_key_env()).filter(|k| !k.is_empty());
        }

        if self.llm_api_base.as_deref().map_or(true, str::is_empty) {
            self.llm_api_base = match self.llm_provider {
                LlmProvider::Azure => lookup("AZURE_API_BASE").filter(|b| !b.is_empty()),
                LlmProvider::OpenAi => Some("https://api.openai.com".to_string()),
            };
        }
    }

    fn validate(&self) -> common::Result<()> {
        if self.ping_interval_secs == 0 {
            return Err(common::Error::Config(
                "ping_interval_secs 必须大于 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(common::Error::Config(format!(
                "llm_temperature 超出范围: {}",
                self.llm_temperature
            )));
        }
        Ok(())
    }

    /// 生成超时，未启用时返回 None
    pub fn agent_timeout(&self) -> Option<Duration> {
        (self.agent_timeout_secs > 0).then(|| Duration::from_secs(self.agent_timeout_secs))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// 超过该时长未收到任何客户端帧即断开
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs + self.ping_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn config_error(err: config::ConfigError) -> common::Error {
    common::Error::Config(err.to_string())
}
