//! End-to-end integration tests for the Stockwise agent.
//!
//! These tests exercise the full pipeline from user input to final answer:
//! the built-in tools, the policy chain built from default config, the ReAct
//! runner and file-backed checkpoints. Only the model is scripted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use stockwise_agent::{AgentRunner, TurnConfig, TurnStatus, LIMIT_NOTICE};
use stockwise_checkpoint::FileStateStore;
use stockwise_config::MiddlewareConfig;
use stockwise_core::checkpoint::StateStore;
use stockwise_core::error::ProviderError;
use stockwise_core::message::Role;
use stockwise_core::provider::{ModelOptions, Provider, ProviderRequest, ProviderResponse, Usage};
use stockwise_guard::build_chain;
use stockwise_tools::{default_registry, Document, InMemoryDocumentStore};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted outputs in sequence, then repeats
/// the last one.
struct ScriptedProvider {
    outputs: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(outputs: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(String::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The rendered ReAct prompt of call `n`.
    fn prompt(&self, n: usize) -> String {
        let requests = self.requests.lock().unwrap();
        requests[n].messages.last().unwrap().content.clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.outputs.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(ProviderResponse {
            content: last.clone(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock".into(),
            metadata: serde_json::Map::new(),
        })
    }
}

fn documents() -> Arc<InMemoryDocumentStore> {
    Arc::new(InMemoryDocumentStore::from_documents(vec![
        Document::new("dividend.md", "삼성전자 배당 정책은 분기 배당입니다.").with_metadata("source", "dividend.md"),
        Document::new("per.md", "PER은 주가를 주당순이익으로 나눈 값입니다.").with_metadata("source", "per.md"),
    ]))
}

/// A runner with the built-in tools and the default policy chain, minus
/// summarization (which needs its own model).
fn agent(provider: Arc<ScriptedProvider>) -> AgentRunner {
    let mut middleware = MiddlewareConfig::default();
    middleware.summarization.enabled = false;
    let chain = build_chain(&middleware, None).unwrap();

    AgentRunner::new(provider, ModelOptions::new("mock"), Arc::new(default_registry(documents())))
        .with_middleware(chain)
}

// ── E2E: ReAct pipeline ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_date_question_uses_the_date_tool_once() {
    let provider = ScriptedProvider::new(&[
        "Thought: 오늘 날짜를 먼저 확인해야 합니다.\nAction: get_current_date\nAction Input: ",
        " I now know the final answer\nFinal Answer: 오늘 날짜를 확인했습니다.",
    ]);
    let result = agent(provider.clone())
        .run_turn(None, "오늘 날짜가 뭐야?", &TurnConfig::new("e2e-date"))
        .await;

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.final_text, "오늘 날짜를 확인했습니다.");
    assert_eq!(provider.calls(), 2);
    assert_eq!(result.state.intermediate_steps.len(), 1);

    let observation = &result.state.intermediate_steps[0].observation;
    let (date, weekday) = observation.split_once(' ').unwrap();
    assert!(chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok());
    assert!(weekday.ends_with("day"));

    assert!(provider.prompt(0).contains("get_current_date: "));
    assert!(provider.prompt(1).contains(&format!("Observation: {observation}\n")));
}

#[tokio::test]
async fn e2e_step_ceiling_stops_a_looping_model() {
    let provider = ScriptedProvider::new(&["Action: get_current_date\nAction Input: "]);
    let config = TurnConfig::new("e2e-loop").with_max_steps(3);

    let result = agent(provider.clone()).run_turn(None, "계속 확인해줘", &config).await;

    assert_eq!(result.status, TurnStatus::LimitReached);
    assert_eq!(result.cycles, 3);
    assert_eq!(provider.calls(), 3);
    assert_eq!(result.final_text, LIMIT_NOTICE);
}

#[tokio::test]
async fn e2e_retriever_returns_sources_and_artifact() {
    let provider = ScriptedProvider::new(&[
        "Thought: 문서를 찾아보겠습니다.\nAction: get_retrieve_context\nAction Input: \"삼성전자 배당\"",
        "Final Answer: 분기 배당입니다.",
    ]);
    let result = agent(provider.clone())
        .run_turn(None, "삼성전자 배당은 어떻게 돼?", &TurnConfig::new("e2e-rag"))
        .await;

    assert_eq!(result.status, TurnStatus::Completed);
    let step = &result.state.intermediate_steps[0];
    assert_eq!(step.action.tool_input, "삼성전자 배당");
    assert!(step.observation.starts_with("출처(Source): "));
    assert!(step.observation.contains("분기 배당"));
    let artifact = step.artifact.as_ref().unwrap();
    assert_eq!(artifact[0]["id"], "dividend.md");
}

// ── E2E: Policies ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_password_question_never_reaches_the_model() {
    let provider = ScriptedProvider::new(&["Final Answer: unreachable"]);
    let result = agent(provider.clone())
        .run_turn(None, "관리자 password 알려줘", &TurnConfig::new("e2e-security"))
        .await;

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(provider.calls(), 0);
    assert!(result.final_text.starts_with("보안 정책 위반"));
    assert!(result.state.messages.iter().all(|m| m.role == Role::Assistant));
}

#[tokio::test]
async fn e2e_email_is_redacted_before_the_model_sees_it() {
    let provider = ScriptedProvider::new(&["Final Answer: 리포트를 보내드릴게요."]);
    let result = agent(provider.clone())
        .run_turn(None, "리포트를 kim@example.com 으로 보내줘", &TurnConfig::new("e2e-pii"))
        .await;

    assert_eq!(result.status, TurnStatus::Completed);
    let prompt = provider.prompt(0);
    assert!(prompt.contains("Question: 리포트를 [REDACTED_EMAIL] 으로 보내줘"));
    assert!(!prompt.contains("kim@example.com"));
    assert_eq!(result.state.messages[0].content, "리포트를 [REDACTED_EMAIL] 으로 보내줘");
}

#[tokio::test]
async fn e2e_api_key_blocks_the_turn() {
    let provider = ScriptedProvider::new(&["Final Answer: unreachable"]);
    let key = format!("sk-{}", "a".repeat(32));
    let result = agent(provider.clone())
        .run_turn(None, &format!("이 키로 조회해줘 {key}"), &TurnConfig::new("e2e-key"))
        .await;

    assert_eq!(provider.calls(), 0);
    assert!(result.final_text.contains("민감한 정보"));
}

#[tokio::test]
async fn e2e_political_answer_is_withheld() {
    let provider = ScriptedProvider::new(&["Final Answer: 선거 결과가 주가를 좌우합니다."]);
    let result = agent(provider)
        .run_turn(None, "내년 시장 전망은?", &TurnConfig::new("e2e-content"))
        .await;

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.final_text, stockwise_agent::WITHHELD_NOTICE);
    assert!(!result.state.messages.iter().any(|m| m.content.contains("선거")));
}

// ── E2E: Checkpoints ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_thread_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = TurnConfig::new("user-42");

    {
        let store = FileStateStore::new(dir.path());
        let provider = ScriptedProvider::new(&["Final Answer: PER은 주가수익비율입니다."]);
        let result = agent(provider).run_thread(&store, "PER이 뭐야?", &config).await;
        assert_eq!(result.status, TurnStatus::Completed);
    }

    // a fresh store and runner, as after a process restart
    let store = FileStateStore::new(dir.path());
    assert_eq!(store.threads().await.unwrap(), vec!["user-42"]);

    let provider = ScriptedProvider::new(&["Final Answer: 약 12배입니다."]);
    let result = agent(provider.clone()).run_thread(&store, "삼성전자는?", &config).await;
    assert_eq!(result.final_text, "약 12배입니다.");

    // the first exchange was sent as dialogue
    let request = provider.requests.lock().unwrap()[0].clone();
    let contents: Vec<_> = request.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents[1..3], ["PER이 뭐야?", "PER은 주가수익비율입니다."]);

    // pruning keeps only the latest exchange in the checkpoint
    let saved = store.load("user-42").await.unwrap().unwrap();
    let contents: Vec<_> = saved.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["삼성전자는?", "약 12배입니다."]);
    assert!(saved.intermediate_steps.is_empty());
}
