//! 对话 WebSocket 连接处理器
//!
//! 处理客户端连接、心跳与对话消息

use axum::extract::ws::{Message as AxumWsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use common::utils::generate_id;
use common::{is_ping, InboundPayload, ServerMessage, StreamEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::Session;
use crate::app_state::AppState;

/// WebSocket 升级处理器
pub async fn handle_chat_websocket(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_chat_connection(socket, peer_addr, state))
}

/// 处理一个对话会话
async fn handle_chat_connection(socket: WebSocket, peer_addr: SocketAddr, state: AppState) {
    let session_id = generate_id();
    info!("客户端已连接: session={}, peer={}", session_id, peer_addr);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // 创建消息发送通道
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 注册到会话表
    let session = state
        .sessions()
        .register(session_id.clone(), peer_addr, tx)
        .await;

    // 欢迎语也是一次完整的事件序列
    session.send(StreamEvent::token(state.config().greeting.clone()).into());
    session.send(StreamEvent::Done.into());

    // 创建消息发送任务，同时负责服务端心跳
    let ping_interval = state.config().ping_interval();
    let idle_timeout = state.config().idle_timeout();
    let keepalive_session = session.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = send_server_message(&mut ws_sender, &msg).await {
                        error!("发送消息失败: {}", e);
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let idle = keepalive_session.idle_for().await;
                    if idle > idle_timeout {
                        warn!(
                            "会话 {} 心跳超时 ({:?} 未收到数据)，关闭连接",
                            keepalive_session.session_id, idle
                        );
                        break;
                    }
                    if let Err(e) = ws_sender.send(AxumWsMessage::Ping(Vec::new())).await {
                        error!("发送心跳失败: {}", e);
                        break;
                    }
                }
            }
        }

        let _ = ws_sender.close().await;
        debug!("消息发送任务结束");
    });

    // 创建消息接收任务
    let recv_session = session.clone();
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    recv_session.touch().await;
                    if !handle_incoming_message(msg, &recv_session, &recv_state).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("接收消息错误: {}", e);
                    break;
                }
            }
        }
        debug!("消息接收任务结束");
    });

    // 等待任一任务完成
    tokio::select! {
        _ = &mut send_task => {
            debug!("发送任务已结束");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("接收任务已结束");
            send_task.abort();
        }
    }

    // 清理：从会话表中注销（进行中的生成任务不会被取消）
    state.sessions().unregister(&session_id).await;
    info!("客户端已断开: session={}", session_id);
}

/// 处理收到的消息，返回 false 表示连接应当关闭
async fn handle_incoming_message(
    ws_msg: AxumWsMessage,
    session: &Arc<Session>,
    state: &AppState,
) -> bool {
    let payload = match ws_msg {
        AxumWsMessage::Text(text) => {
            debug!("会话 {} 收到文本消息: {} bytes", session.session_id, text.len());
            InboundPayload::Text(text)
        }
        AxumWsMessage::Binary(data) => {
            debug!("会话 {} 收到二进制消息: {} bytes", session.session_id, data.len());
            InboundPayload::Binary(data)
        }
        AxumWsMessage::Close(_) => {
            debug!("会话 {} 请求关闭连接", session.session_id);
            return false;
        }
        // Ping 由协议层自动回复，Pong 只用于刷新活跃时间
        AxumWsMessage::Ping(_) | AxumWsMessage::Pong(_) => return true,
    };

    // 只解析一次，心跳与对话请求共用结果
    let parsed = payload.parse();
    if parsed.as_ref().is_ok_and(is_ping) {
        session.send(ServerMessage::pong());
        return true;
    }

    // 生成在后台任务中进行，这里不等待
    let _ = state.relay().dispatch(&session.session_id, parsed).await;
    true
}

/// 发送消息
async fn send_server_message(
    sender: &mut SplitSink<WebSocket, AxumWsMessage>,
    msg: &ServerMessage,
) -> Result<(), String> {
    let json = msg
        .to_json()
        .map_err(|e| format!("序列化消息失败: {}", e))?;

    sender
        .send(AxumWsMessage::Text(json))
        .await
        .map_err(|e| format!("发送 WebSocket 消息失败: {}", e))?;

    Ok(())
}
