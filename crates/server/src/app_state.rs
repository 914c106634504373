//! 应用全局状态

use std::sync::Arc;

use crate::agent::ChatAgent;
use crate::config::Config;
use crate::relay::StreamingRelay;
use crate::ws::SessionRegistry;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 运行配置
    pub config: Arc<Config>,
    /// 会话注册表
    pub sessions: SessionRegistry,
    /// 流式中继
    pub relay: StreamingRelay,
}

impl AppState {
    pub fn new(config: Config, agent: Arc<dyn ChatAgent>) -> Self {
        let sessions = SessionRegistry::new();
        let relay = StreamingRelay::new(sessions.clone(), agent, config.agent_timeout());

        Self {
            config: Arc::new(config),
            sessions,
            relay,
        }
    }

    /// 获取配置
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 获取会话注册表
    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    /// 获取流式中继
    pub fn relay(&self) -> StreamingRelay {
        self.relay.clone()
    }
}
