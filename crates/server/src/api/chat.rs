//! 旧版对话接口
//!
//! 仅为兼容旧客户端保留，实际对话请走 WebSocket。

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct LegacyChatResponse {
    pub message: &'static str,
}

/// 提示调用方改用 WebSocket，请求体被忽略
pub async fn legacy_chat() -> Json<LegacyChatResponse> {
    Json(LegacyChatResponse {
        message: "Please use WebSocket endpoint for streaming responses",
    })
}
