//! HTTP 接口

pub mod chat;
pub mod status;

use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;

/// 所有 API 路由（统一入口）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status::get_status))
        .route("/chat", post(chat::legacy_chat))
}
