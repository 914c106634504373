//! 协议错误定义

use thiserror::Error;

/// 消息无法解析时返回给客户端的固定提示
pub const MALFORMED_PAYLOAD_MESSAGE: &str = "Invalid message format. Expected JSON.";

/// 协议错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 消息不是可解析的结构化数据，内部字段只用于服务端日志
    #[error("Invalid message format. Expected JSON.")]
    MalformedPayload(String),
}

impl ProtocolError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload(reason.into())
    }

    /// 解析失败的具体原因（不含消息内容）
    pub fn reason(&self) -> &str {
        match self {
            Self::MalformedPayload(reason) => reason,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}
