//! 流式对话中继 - 公共库
//!
//! 提供 Server 与客户端共享的消息协议、错误处理、工具函数等

pub mod errors;
pub mod protocol;
pub mod utils;

// 重新导出常用类型
pub use errors::{Error, Result};
pub use protocol::{
    is_ping, ChatRequest, ConversationTurn, InboundPayload, ProtocolError, ServerMessage,
    StreamEvent, MALFORMED_PAYLOAD_MESSAGE,
};
