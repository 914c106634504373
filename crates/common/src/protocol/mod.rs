//! 对话会话协议
//!
//! 定义客户端发来的对话请求与服务端推送的流式事件

pub mod error;
pub mod event;
pub mod request;

pub use error::{ProtocolError, MALFORMED_PAYLOAD_MESSAGE};
pub use event::{ServerMessage, StreamEvent};
pub use request::{is_ping, ChatRequest, ConversationTurn, InboundPayload};
