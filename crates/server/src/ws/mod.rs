//! WebSocket 模块
//!
//! 管理与浏览器客户端的对话会话连接

pub mod chat_handler;
pub mod session_registry;

pub use chat_handler::handle_chat_websocket;
pub use session_registry::{EventSink, Session, SessionRegistry};
