//! 会话注册表
//!
//! 记录所有活跃的对话会话：session_id -> Session

use chrono::{DateTime, Utc};
use common::{ServerMessage, StreamEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// 会话信息
#[derive(Debug)]
pub struct Session {
    /// 会话 ID
    pub session_id: String,

    /// 客户端地址
    pub peer_addr: SocketAddr,

    /// 连接时间
    pub connected_at: DateTime<Utc>,

    /// 发送消息的通道
    sender: mpsc::UnboundedSender<ServerMessage>,

    /// 最后一次收到客户端帧的时间
    last_seen: RwLock<Instant>,
}

impl Session {
    /// 向该会话推送消息，通道已关闭时返回 false
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    /// 该会话的事件出口
    pub fn sink(&self) -> EventSink {
        EventSink {
            session_id: self.session_id.clone(),
            sender: Some(self.sender.clone()),
        }
    }

    /// 更新最后活跃时间
    pub async fn touch(&self) {
        let mut last_seen = self.last_seen.write().await;
        *last_seen = Instant::now();
    }

    /// 距离上次活跃的时长
    pub async fn idle_for(&self) -> Duration {
        let last_seen = self.last_seen.read().await;
        last_seen.elapsed()
    }
}

/// 单个会话的事件出口
///
/// 会话不存在或连接已关闭时，事件会被直接丢弃。
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: String,
    sender: Option<mpsc::UnboundedSender<ServerMessage>>,
}

impl EventSink {
    /// 不指向任何会话的出口
    pub fn detached(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            sender: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 推送事件，未送达时返回 false
    pub fn emit(&self, event: StreamEvent) -> bool {
        let delivered = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(event.into()).is_ok());

        if !delivered {
            debug!("会话 {} 已断开，事件被丢弃", self.session_id);
        }
        delivered
    }
}

/// 会话注册表
#[derive(Clone, Default)]
pub struct SessionRegistry {
    /// 所有会话的映射：session_id -> Session
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    /// 创建新的会话注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新会话
    pub async fn register(
        &self,
        session_id: String,
        peer_addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Arc<Session> {
        let session = Arc::new(Session {
            session_id: session_id.clone(),
            peer_addr,
            connected_at: Utc::now(),
            sender,
            last_seen: RwLock::new(Instant::now()),
        });

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.clone(), session.clone());

        info!("会话已注册: {} ({})", session_id, peer_addr);
        session
    }

    /// 注销会话，会话不存在时什么也不做
    pub async fn unregister(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(session_id).is_some();
        if removed {
            info!("会话已注销: {}", session_id);
        }
        removed
    }

    /// 获取会话
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    /// 获取会话数量
    pub async fn count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// 获取会话的事件出口
    pub async fn sink(&self, session_id: &str) -> EventSink {
        match self.get(session_id).await {
            Some(session) => session.sink(),
            None => EventSink::detached(session_id),
        }
    }

    /// 向指定会话推送消息
    pub async fn send(&self, session_id: &str, message: ServerMessage) -> bool {
        match self.get(session_id).await {
            Some(session) => session.send(message),
            None => false,
        }
    }
}
