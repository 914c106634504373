//! 任务描述构造

use common::utils::capitalize;
use common::{ChatRequest, ConversationTurn};

use crate::agent::AgentTask;

/// 没有历史对话时的占位文本
pub const NO_HISTORY_PLACEHOLDER: &str = "No previous conversation.";

const AGENT_ROLE: &str = "Conversation Guide";
const AGENT_GOAL: &str = "Engage users in friendly conversation about business ideas";
const AGENT_BACKSTORY: &str = "You help develop startup ideas with natural, concise responses.";
const EXPECTED_OUTPUT: &str = "A natural, conversational response";

/// 将历史对话格式化为一段文本
///
/// 每轮渲染为 `<Role>: <content>`，轮次之间以空行分隔。
pub fn format_conversation_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return NO_HISTORY_PLACEHOLDER.to_string();
    }

    history
        .iter()
        .map(|turn| format!("{}: {}", capitalize(&turn.role), turn.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 构造任务描述
pub fn build_task_description(request: &ChatRequest) -> String {
    let history = format_conversation_history(&request.conversation_history);

    format!(
        "The user has sent: \"{user_input}\"\n\
         \n\
         Title Context: {title}\n\
         Abstract Context: {abstract_context}\n\
         \n\
         Previous conversation:\n\
         {history}\n\
         \n\
         Respond in a friendly, conversational manner that:\n\
         1. Acknowledges their input naturally\n\
         2. References the current title/topic if relevant\n\
         3. Provides helpful insight or asks a follow-up question\n\
         \n\
         Your response should be conversational, warm, and avoid generic chatbot phrases like \"How can I assist you\".",
        user_input = request.user_input,
        title = request.title_context,
        abstract_context = request.abstract_context,
        history = history,
    )
}

/// 为一次对话请求构造 Agent 任务
pub fn conversation_task(request: &ChatRequest) -> AgentTask {
    AgentTask {
        role: AGENT_ROLE.to_string(),
        goal: AGENT_GOAL.to_string(),
        backstory: AGENT_BACKSTORY.to_string(),
        description: build_task_description(request),
        expected_output: EXPECTED_OUTPUT.to_string(),
    }
}
