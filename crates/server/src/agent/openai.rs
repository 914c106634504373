//! OpenAI 兼容的流式对话后端
//!
//! 同时支持 OpenAI（`Authorization: Bearer`）与 Azure OpenAI（`api-key` 头、
//! 按部署名路由）。响应以 SSE 形式返回，逐个 `data:` 行解析增量内容。

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{AgentError, AgentTask, ChatAgent, TokenObserver};

/// 错误响应体最多保留的字符数
const MAX_ERROR_BODY_CHARS: usize = 500;

/// 鉴权方式
#[derive(Debug, Clone)]
enum AuthHeader {
    /// `Authorization: Bearer <key>`
    Bearer(String),
    /// `api-key: <key>`（Azure）
    ApiKey(String),
}

/// OpenAI 兼容的对话 Agent
pub struct OpenAiChatAgent {
    name: &'static str,
    endpoint: String,
    model: String,
    temperature: f32,
    auth: AuthHeader,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct CompletionMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

/// 一条 `data:` 记录的解析结果
#[derive(Debug, PartialEq, Eq)]
enum StreamData {
    /// 增量文本（可能为空）
    Delta(Option<String>),
    /// `[DONE]`
    Finished,
}

impl OpenAiChatAgent {
    fn new(
        name: &'static str,
        endpoint: String,
        model: &str,
        temperature: f32,
        auth: AuthHeader,
    ) -> Result<Self, reqwest::Error> {
        // 总超时由中继控制，这里只限制建连时间
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            name,
            endpoint,
            model: model.to_string(),
            temperature,
            auth,
            client,
        })
    }

    /// OpenAI 官方或兼容端点
    pub fn openai(
        api_base: &str,
        api_key: String,
        model: &str,
        temperature: f32,
    ) -> Result<Self, reqwest::Error> {
        let endpoint = format!("{}/v1/chat/completions", api_base.trim_end_matches('/'));
        Self::new("openai", endpoint, model, temperature, AuthHeader::Bearer(api_key))
    }

    /// Azure OpenAI，`deployment` 为部署名
    pub fn azure(
        api_base: &str,
        api_key: String,
        deployment: &str,
        api_version: &str,
        temperature: f32,
    ) -> Result<Self, reqwest::Error> {
        let endpoint = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            api_base.trim_end_matches('/'),
            deployment,
            api_version
        );
        Self::new("azure", endpoint, deployment, temperature, AuthHeader::ApiKey(api_key))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_messages(task: &AgentTask) -> Vec<CompletionMessage> {
        vec![
            CompletionMessage {
                role: "system",
                content: format!(
                    "You are {}. {}\nYour personal goal is: {}",
                    task.role, task.backstory, task.goal
                ),
            },
            CompletionMessage {
                role: "user",
                content: format!(
                    "{}\n\nThis is the expected criteria for your final answer: {}",
                    task.description, task.expected_output
                ),
            },
        ]
    }
}

#[async_trait]
impl ChatAgent for OpenAiChatAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(
        &self,
        task: AgentTask,
        observer: &dyn TokenObserver,
    ) -> Result<String, AgentError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: Self::build_messages(&task),
            temperature: self.temperature,
            stream: true,
        };

        let request = self.client.post(&self.endpoint).json(&body);
        let request = match &self.auth {
            AuthHeader::Bearer(key) => request.bearer_auth(key),
            AuthHeader::ApiKey(key) => request.header("api-key", key),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseLineDecoder::default();
        let mut output = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                match parse_stream_data(&data)? {
                    StreamData::Delta(Some(token)) if !token.is_empty() => {
                        observer.on_token(&token);
                        output.push_str(&token);
                    }
                    StreamData::Delta(_) => {}
                    StreamData::Finished => {
                        debug!("LLM 流结束: {} 字符", output.len());
                        return Ok(output);
                    }
                }
            }
        }

        // 部分兼容端点不发送 [DONE]
        Ok(output)
    }
}

/// 按行切分 SSE 字节流，输出每条 `data:` 的内容
#[derive(Debug, Default)]
struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
        out
    }
}

fn parse_stream_data(data: &str) -> Result<StreamData, AgentError> {
    if data == "[DONE]" {
        return Ok(StreamData::Finished);
    }

    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| AgentError::Stream(format!("invalid chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(AgentError::Stream(error.message));
    }

    // Azure 首个分片的 choices 为空（内容过滤结果）
    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content);
    Ok(StreamData::Delta(delta))
}
