//! 流式对话中继 - Server
//!
//! 服务主程序，提供对话 WebSocket 与状态查询接口

use relay_server::agent::build_agent;
use relay_server::app_state::AppState;
use relay_server::config::{Config, LogFormat};
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 加载配置
    let cfg = Config::from_env()?;

    // 初始化日志
    init_tracing(&cfg);

    info!("🚀 启动对话中继服务...");
    info!("✅ 配置加载成功");

    // 初始化 LLM 后端
    let agent = build_agent(&cfg);

    // 创建应用状态
    let bind_address = cfg.bind_address();
    let app_state = AppState::new(cfg, agent);

    // 构建应用路由
    let app = relay_server::app(app_state);

    // 启动服务器
    let addr: SocketAddr = bind_address.parse()?;
    info!("🎯 服务器监听在 http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// 初始化日志，RUST_LOG 优先于配置中的 log_level
fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level));

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(filter);

    match cfg.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
