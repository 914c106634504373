//! 流式中继
//!
//! 每条对话消息启动一个独立任务调用 Agent，并把生成的片段实时推送回
//! 发起请求的会话。无论成功、失败还是超时，每个请求都以且仅以一个
//! `Done` 事件结束。

pub mod prompt;

use common::{
    ChatRequest, InboundPayload, ProtocolError, StreamEvent, MALFORMED_PAYLOAD_MESSAGE,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentError, AgentTask, ChatAgent, TokenObserver};
use crate::ws::{EventSink, SessionRegistry};

pub use prompt::{build_task_description, conversation_task, format_conversation_history};

/// 一次请求的处理结果
#[derive(Debug)]
pub enum RequestOutcome {
    /// 消息无法解析，已同步推送 Error + Done
    Rejected,
    /// 已派发到后台任务
    Dispatched(JoinHandle<()>),
}

impl RequestOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// 等待后台任务结束
    pub async fn finished(self) {
        if let Self::Dispatched(handle) = self {
            if let Err(e) = handle.await {
                error!("中继任务异常退出: {}", e);
            }
        }
    }
}

/// 流式中继
#[derive(Clone)]
pub struct StreamingRelay {
    sessions: SessionRegistry,
    agent: Arc<dyn ChatAgent>,
    timeout: Option<Duration>,
}

impl StreamingRelay {
    pub fn new(
        sessions: SessionRegistry,
        agent: Arc<dyn ChatAgent>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            sessions,
            agent,
            timeout,
        }
    }

    /// 处理一条对话消息
    pub async fn handle_message(&self, session_id: &str, payload: InboundPayload) -> RequestOutcome {
        self.dispatch(session_id, payload.parse()).await
    }

    /// 处理已解析为 JSON 的消息
    pub async fn dispatch(
        &self,
        session_id: &str,
        parsed: Result<Value, ProtocolError>,
    ) -> RequestOutcome {
        let sink = self.sessions.sink(session_id).await;

        let request = match parsed.and_then(ChatRequest::from_value) {
            Ok(request) => request,
            Err(e) => {
                warn!("会话 {} 消息格式错误: {}", session_id, e.reason());
                sink.emit(StreamEvent::error(MALFORMED_PAYLOAD_MESSAGE));
                sink.emit(StreamEvent::Done);
                return RequestOutcome::Rejected;
            }
        };

        debug!(
            "会话 {} 收到对话请求: 输入 {} 字符, 历史 {} 轮",
            session_id,
            request.user_input.len(),
            request.conversation_history.len()
        );

        let task = prompt::conversation_task(&request);
        let handle = tokio::spawn(run_request(
            self.agent.clone(),
            task,
            sink,
            self.timeout,
        ));
        RequestOutcome::Dispatched(handle)
    }
}

/// 把 Agent 的片段回调转发为 Token 事件
///
/// 检查关闭标记与推送在同一把锁内完成，`close` 返回后不会再有 Token 发出。
struct TokenForwarder {
    sink: EventSink,
    tokens: AtomicUsize,
    closed: Mutex<bool>,
}

impl TokenForwarder {
    fn new(sink: EventSink) -> Self {
        Self {
            sink,
            tokens: AtomicUsize::new(0),
            closed: Mutex::new(false),
        }
    }

    /// 之后到达的片段全部丢弃
    fn close(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        *closed = true;
    }

    fn count(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }
}

impl TokenObserver for TokenForwarder {
    fn on_token(&self, token: &str) {
        let closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *closed {
            return;
        }
        self.tokens.fetch_add(1, Ordering::SeqCst);
        self.sink.emit(StreamEvent::token(token));
    }
}

/// 后台执行一次请求
///
/// Agent 调用放在单独的任务里，panic 与超时都在这里收口。
async fn run_request(
    agent: Arc<dyn ChatAgent>,
    task: AgentTask,
    sink: EventSink,
    timeout: Option<Duration>,
) {
    let forwarder = Arc::new(TokenForwarder::new(sink.clone()));
    let session_id = sink.session_id().to_string();

    let mut job = {
        let forwarder = forwarder.clone();
        tokio::spawn(async move { agent.run(task, forwarder.as_ref()).await })
    };

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut job).await {
            Ok(joined) => joined,
            Err(_) => {
                job.abort();
                Ok(Err(AgentError::Timeout(limit)))
            }
        },
        None => (&mut job).await,
    };

    let result = joined.unwrap_or_else(|e| Err(AgentError::Aborted(e.to_string())));

    // 超时后 Agent 可能仍在其他线程上运行，先关闭再推送结束事件
    forwarder.close();

    match result {
        Ok(output) => {
            info!(
                "会话 {} 生成完成: {} 个片段, {} 字符",
                session_id,
                forwarder.count(),
                output.len()
            );
        }
        Err(e) => {
            error!("会话 {} 生成失败: {:?}", session_id, e);
            sink.emit(StreamEvent::error(e.to_string()));
        }
    }

    sink.emit(StreamEvent::Done);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::UnavailableAgent;
    use async_trait::async_trait;
    use common::ServerMessage;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// 按脚本输出片段的 Agent
    #[derive(Default)]
    struct ScriptedAgent {
        tokens: Vec<&'static str>,
        fail_with: Option<&'static str>,
        delay: Option<Duration>,
        panic: bool,
        calls: AtomicUsize,
        last_task: Mutex<Option<AgentTask>>,
    }

    #[async_trait]
    impl ChatAgent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(
            &self,
            task: AgentTask,
            observer: &dyn TokenObserver,
        ) -> Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_task.lock().unwrap() = Some(task);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            for token in &self.tokens {
                observer.on_token(token);
            }
            if self.panic {
                panic!("agent exploded");
            }
            match self.fail_with {
                Some(message) => Err(AgentError::Stream(message.to_string())),
                None => Ok(self.tokens.concat()),
            }
        }
    }

    async fn setup(
        agent: Arc<dyn ChatAgent>,
        timeout: Option<Duration>,
    ) -> (StreamingRelay, mpsc::UnboundedReceiver<ServerMessage>) {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .register("s1".into(), "127.0.0.1:40000".parse().unwrap(), tx)
            .await;
        (StreamingRelay::new(registry, agent, timeout), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(message) = rx.try_recv() {
            events.extend(message.into_event());
        }
        events
    }

    fn done_count(events: &[StreamEvent]) -> usize {
        events.iter().filter(|e| e.is_done()).count()
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let agent = Arc::new(ScriptedAgent::default());
        let (relay, mut rx) = setup(agent.clone(), None).await;

        let outcome = relay.handle_message("s1", "not json".into()).await;
        assert!(outcome.is_rejected());

        assert_eq!(
            drain(&mut rx),
            vec![
                StreamEvent::error("Invalid message format. Expected JSON."),
                StreamEvent::Done
            ]
        );
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tokens_then_single_done() {
        let agent = Arc::new(ScriptedAgent {
            tokens: vec!["Hel", "lo", "!"],
            ..Default::default()
        });
        let (relay, mut rx) = setup(agent.clone(), None).await;

        relay
            .handle_message("s1", r#"{"user_input":"Hi"}"#.into())
            .await
            .finished()
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                StreamEvent::token("Hel"),
                StreamEvent::token("lo"),
                StreamEvent::token("!"),
                StreamEvent::Done
            ]
        );
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_built_from_request() {
        let agent = Arc::new(ScriptedAgent {
            tokens: vec!["ok"],
            ..Default::default()
        });
        let (relay, _rx) = setup(agent.clone(), None).await;

        let payload = json!({
            "user_input": "Pricing?",
            "title_context": "Smart socks",
            "conversation_history": [{"role": "user", "content": "Hello"}]
        });
        relay.handle_message("s1", payload.into()).await.finished().await;

        let task = agent.last_task.lock().unwrap().clone().unwrap();
        assert!(task.description.contains("The user has sent: \"Pricing?\""));
        assert!(task.description.contains("Title Context: Smart socks"));
        assert!(task.description.contains("User: Hello"));
    }

    #[tokio::test]
    async fn test_generation_failure_emits_error_and_done() {
        let agent = Arc::new(ScriptedAgent {
            tokens: vec!["partial"],
            fail_with: Some("upstream closed"),
            ..Default::default()
        });
        let (relay, mut rx) = setup(agent, None).await;

        relay
            .handle_message("s1", r#"{"user_input":"Hi"}"#.into())
            .await
            .finished()
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                StreamEvent::token("partial"),
                StreamEvent::error("LLM stream error: upstream closed"),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_unavailable_agent() {
        let (relay, mut rx) = setup(Arc::new(UnavailableAgent::new("no API key")), None).await;

        relay
            .handle_message("s1", r#"{"user_input":"Hi"}"#.into())
            .await
            .finished()
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                StreamEvent::error("Chat agent is unavailable: no API key"),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_agent_still_finishes() {
        let agent = Arc::new(ScriptedAgent {
            panic: true,
            ..Default::default()
        });
        let (relay, mut rx) = setup(agent, None).await;

        relay
            .handle_message("s1", r#"{"user_input":"Hi"}"#.into())
            .await
            .finished()
            .await;

        let events = drain(&mut rx);
        assert_eq!(done_count(&events), 1);
        assert!(matches!(events[0], StreamEvent::Error(_)));
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_timeout_emits_error_and_done() {
        let agent = Arc::new(ScriptedAgent {
            tokens: vec!["too late"],
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let (relay, mut rx) = setup(agent, Some(Duration::from_millis(50))).await;

        relay
            .handle_message("s1", r#"{"user_input":"Hi"}"#.into())
            .await
            .finished()
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                StreamEvent::error("Generation timed out after 0.05 seconds"),
                StreamEvent::Done
            ]
        );
    }

    /// 不让出执行权、持续输出片段的 Agent，超时中止对它无效
    struct BusyAgent {
        busy_for: Duration,
    }

    #[async_trait]
    impl ChatAgent for BusyAgent {
        fn name(&self) -> &str {
            "busy"
        }

        async fn run(
            &self,
            _task: AgentTask,
            observer: &dyn TokenObserver,
        ) -> Result<String, AgentError> {
            let started = std::time::Instant::now();
            while started.elapsed() < self.busy_for {
                observer.on_token("x");
                std::thread::sleep(Duration::from_micros(50));
            }
            Ok(String::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_token_after_done_on_timeout() {
        let agent = Arc::new(BusyAgent {
            busy_for: Duration::from_millis(150),
        });
        let (relay, mut rx) = setup(agent, Some(Duration::from_millis(20))).await;

        for _ in 0..10 {
            relay
                .handle_message("s1", r#"{"user_input":"Hi"}"#.into())
                .await
                .finished()
                .await;
            // 等待仍在运行的 Agent 自行结束
            tokio::time::sleep(Duration::from_millis(200)).await;

            let events = drain(&mut rx);
            assert_eq!(done_count(&events), 1);
            assert_eq!(events.last(), Some(&StreamEvent::Done));
            assert_eq!(
                events[events.len() - 2],
                StreamEvent::error("Generation timed out after 0.02 seconds")
            );
        }
    }

    #[tokio::test]
    async fn test_dispatch_parsed_value() {
        let agent = Arc::new(ScriptedAgent {
            tokens: vec!["ok"],
            ..Default::default()
        });
        let (relay, mut rx) = setup(agent.clone(), None).await;

        relay
            .dispatch("s1", Ok(json!({"user_input": "Hi"})))
            .await
            .finished()
            .await;
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::token("ok"), StreamEvent::Done]
        );

        let outcome = relay.dispatch("s1", Ok(json!([1, 2]))).await;
        assert!(outcome.is_rejected());
        assert_eq!(
            drain(&mut rx),
            vec![
                StreamEvent::error("Invalid message format. Expected JSON."),
                StreamEvent::Done
            ]
        );
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_valid_payload_ends_with_one_done() {
        let agent = Arc::new(ScriptedAgent {
            tokens: vec!["a", "b"],
            ..Default::default()
        });
        let (relay, mut rx) = setup(agent, None).await;

        let payloads = [
            r#"{}"#,
            r#"{"user_input":""}"#,
            r#"{"user_input":"Hi","conversation_history":[]}"#,
            r#""{\"user_input\":\"wrapped\"}""#,
        ];
        for payload in payloads {
            relay.handle_message("s1", payload.into()).await.finished().await;
            let events = drain(&mut rx);
            assert_eq!(done_count(&events), 1, "{payload}");
            assert_eq!(events.last(), Some(&StreamEvent::Done), "{payload}");
        }
    }

    #[tokio::test]
    async fn test_missing_session_does_not_panic() {
        let agent = Arc::new(ScriptedAgent {
            tokens: vec!["x"],
            ..Default::default()
        });
        let (relay, mut rx) = setup(agent.clone(), None).await;

        relay
            .handle_message("gone", r#"{"user_input":"Hi"}"#.into())
            .await
            .finished()
            .await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }
}
