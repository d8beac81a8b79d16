//! Prompt construction for the ReAct loop.
//!
//! A model request is:
//! 1. a system message carrying the persona,
//! 2. the surviving dialogue of the thread, minus the current question,
//! 3. one user message with the ReAct template rendered for the question,
//!    the tool list and the scratchpad of this episode.

use stockwise_core::message::{Message, MessageId};
use stockwise_core::tool::ToolRegistry;

/// Where the model must stop so it never invents an observation.
pub const STOP_SEQUENCE: &str = "\nObservation";

/// Default persona: a value-investing analyst.
pub const DEFAULT_SYSTEM_PROMPT: &str = "당신은 '가치 투자'를 지향하는 20년 경력의 주식 투자 전문가입니다.
- 지침 1: 분석 요청을 받으면 'get_current_date'로 오늘 날짜를 먼저 확인하세요.
- 지침 2: 특정 종목 주가는 검색 도구를 이용해 검색하세요.
- 제약: 모든 답변 끝에는 \"본 분석은 참고용이며, 투자 결정의 책임은 본인에게 있습니다.\"를 포함하세요.";

/// `name: description`, one tool per line.
pub fn render_tools(registry: &ToolRegistry) -> String {
    registry
        .descriptions()
        .into_iter()
        .map(|(name, description)| format!("{name}: {description}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the ReAct template.
pub fn render_react_prompt(registry: &ToolRegistry, input: &str, scratchpad: &str) -> String {
    let tools = render_tools(registry);
    let tool_names = registry.names().join(", ");
    format!(
        "Answer the following questions as best you can. You have access to the following tools:

{tools}

Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question

Begin!

Question: {input}
Thought:{scratchpad}"
    )
}

/// Assemble the full message list for one model call.
///
/// `question` is the id of the current user message in `history`, if it is
/// still there; it is left out of the dialogue because the template
/// already carries it.
pub fn build_messages(
    system_prompt: &str,
    history: &[Message],
    question: Option<&MessageId>,
    rendered: String,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(
        history
            .iter()
            .filter(|m| Some(&m.id) != question)
            .cloned(),
    );
    messages.push(Message::user(rendered));
    messages
}
