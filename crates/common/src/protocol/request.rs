//! 客户端请求定义与解析

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::ProtocolError;

/// 历史对话中的一轮
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// 角色（user / assistant ...）
    #[serde(default = "default_role", deserialize_with = "role_or_unknown")]
    pub role: String,

    /// 内容
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// 一次对话请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// 用户输入
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_input: String,

    /// 标题上下文
    #[serde(default, deserialize_with = "lenient_string")]
    pub title_context: String,

    /// 摘要上下文
    #[serde(default, deserialize_with = "lenient_string")]
    pub abstract_context: String,

    /// 历史对话（按时间顺序）
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_history: Vec<ConversationTurn>,
}

fn default_role() -> String {
    "unknown".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 字符串字段按文本读取，数字、布尔等标量转成其 JSON 文本，null 视为缺省
fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        other => Ok(Some(other.to_string())),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(deserializer)?.unwrap_or_default())
}

fn role_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(deserializer)?.unwrap_or_else(default_role))
}

/// 是否为客户端心跳 `{"type": "ping"}`
pub fn is_ping(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("ping")
}

/// 客户端发来的原始消息
///
/// 可能是已经解析好的结构化数据，也可能是需要再解析一次的字符串。
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    /// 文本帧
    Text(String),
    /// 二进制帧（UTF-8 JSON）
    Binary(Vec<u8>),
    /// 已解析的结构化数据
    Structured(Value),
}

impl InboundPayload {
    /// 解析为 JSON 值，字符串形式的 JSON 只再展开一层
    pub fn parse(self) -> Result<Value, ProtocolError> {
        let value = match self {
            Self::Text(text) => serde_json::from_str::<Value>(&text)?,
            Self::Binary(data) => serde_json::from_slice::<Value>(&data)?,
            Self::Structured(value) => value,
        };

        match value {
            Value::String(inner) => Ok(serde_json::from_str::<Value>(&inner)?),
            other => Ok(other),
        }
    }

    /// 解析为对话请求
    pub fn decode(self) -> Result<ChatRequest, ProtocolError> {
        self.parse().and_then(ChatRequest::from_value)
    }
}

impl ChatRequest {
    /// 从已解析的 JSON 值构造，要求是对象
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::malformed("payload is not a JSON object"));
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl From<String> for InboundPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for InboundPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for InboundPayload {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}
