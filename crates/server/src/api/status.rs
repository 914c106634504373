//! 服务状态接口

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app_state::AppState;

/// 服务状态
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub active_connections: usize,
}

/// 获取服务状态
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        active_connections: state.sessions().count().await,
    })
}
