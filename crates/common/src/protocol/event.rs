//! 服务端推送消息定义

use serde::{Deserialize, Serialize};

/// 一次请求产生的流式事件
///
/// 每个请求的事件序列都以且仅以一个 `Done` 结束。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// 生成的文本片段
    Token(String),
    /// 错误信息
    Error(String),
    /// 请求结束标记
    Done,
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token(text.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// 推送给客户端的消息（线上格式）
///
/// `{"token": ".."}` / `{"error": ".."}` / `{"done": true}` / `{"pong": ts}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Token { token: String },
    Error { error: String },
    Done { done: bool },
    Pong { pong: i64 },
}

impl ServerMessage {
    /// 心跳响应
    pub fn pong() -> Self {
        Self::Pong {
            pong: crate::utils::unix_timestamp(),
        }
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 从 JSON 字符串反序列化
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 还原为流式事件，心跳响应返回 None
    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            Self::Token { token } => Some(StreamEvent::Token(token)),
            Self::Error { error } => Some(StreamEvent::Error(error)),
            Self::Done { .. } => Some(StreamEvent::Done),
            Self::Pong { .. } => None,
        }
    }
}

impl From<StreamEvent> for ServerMessage {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Token(token) => Self::Token { token },
            StreamEvent::Error(error) => Self::Error { error },
            StreamEvent::Done => Self::Done { done: true },
        }
    }
}
