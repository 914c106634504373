//! 流式对话中继 - Server
//!
//! 将浏览器发来的对话消息转交给 LLM Agent，并通过 WebSocket 实时推送生成结果

pub mod agent;
pub mod api;
pub mod app_state;
pub mod config;
pub mod relay;
pub mod ws;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app_state::AppState;

/// 构建应用路由
pub fn app(state: AppState) -> Router {
    // 设置CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws::handle_chat_websocket))
        .route("/ws/chat", get(ws::handle_chat_websocket))
        .nest("/api", api::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> &'static str {
    "Idea Chat Relay Server v1"
}

async fn health_handler() -> &'static str {
    "OK"
}
