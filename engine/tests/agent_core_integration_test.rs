//! End-to-end tests for the turn pipeline
//!
//! The generation model, embedder and web search are scripted in-process so
//! each test controls exactly which tool is picked and how it behaves.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sage_engine::agent::{AgentCore, AnswerSynthesizer, TurnState};
use sage_engine::classifier::IntentClassifier;
use sage_engine::config::Config;
use sage_engine::embedding::{self, EmbeddingError, EmbeddingProvider};
use sage_engine::index::{InMemoryIndex, Metadata, VectorIndex};
use sage_engine::llm::router::CallPolicy;
use sage_engine::llm::{LLMError, LLMProvider, LLMRouter, Message};
use sage_engine::memory::SessionStore;
use sage_engine::retrieval::RetrievalEngine;
use sage_engine::search::{self, SearchError, SearchProvider, WebResult};
use sage_engine::tools::ToolDispatcher;
use sdk::{ChatRequest, EngineError, OriginKind, RelevanceLabel, SageErrorExt, ToolKind};

/// Answers classification prompts with a fixed label and everything else
/// with a fixed answer (or a failure when `answer` is `None`)
struct ScriptedModel {
    label: String,
    answer: Option<String>,
    classify_delay: Option<Duration>,
    slow_answer: Option<(&'static str, Duration)>,
    classify_calls: Arc<AtomicUsize>,
    answer_calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Vec<Message>>>,
}

#[async_trait]
impl LLMProvider for ScriptedModel {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, messages: &[Message]) -> sage_engine::llm::Result<String> {
        let is_classification = messages
            .first()
            .map(|m| m.content.starts_with("You are a query router"))
            .unwrap_or(false);

        if is_classification {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.classify_delay {
                tokio::time::sleep(delay).await;
            }
            return Ok(self.label.clone());
        }

        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = messages.to_vec();

        let question = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        if let Some((marker, delay)) = self.slow_answer {
            if question.contains(marker) {
                tokio::time::sleep(delay).await;
            }
        }
        self.answer
            .clone()
            .ok_or_else(|| LLMError::ProviderUnavailable("scripted outage".to_string()))
    }
}

struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn name(&self) -> &str {
        "fixed"
    }

    fn model(&self) -> &str {
        "fixed"
    }

    async fn embed(&self, _text: &str) -> embedding::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    fn name(&self) -> &str {
        "broken"
    }

    fn model(&self) -> &str {
        "broken"
    }

    async fn embed(&self, _text: &str) -> embedding::Result<Vec<f32>> {
        Err(EmbeddingError::Unavailable("connection refused".to_string()))
    }
}

/// Never answers within any reasonable deadline
struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    fn name(&self) -> &str {
        "stalled"
    }

    fn model(&self) -> &str {
        "stalled"
    }

    async fn embed(&self, _text: &str) -> embedding::Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(vec![1.0, 0.0])
    }
}

/// Returns `results` regardless of the requested cap, after `delay`
struct ScriptedSearch {
    results: Option<Vec<WebResult>>,
    delay: Option<Duration>,
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> search::Result<Vec<WebResult>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.results
            .clone()
            .ok_or_else(|| SearchError::Unavailable("HTTP 500".to_string()))
    }
}

fn web_result(n: usize) -> WebResult {
    WebResult {
        title: format!("Result {}", n),
        url: format!("https://news{}.example.com", n),
        snippet: format!("Story number {}.", n),
    }
}

struct Harness {
    agent: AgentCore,
    sessions: SessionStore,
    classify_calls: Arc<AtomicUsize>,
    answer_calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Vec<Message>>>,
}

struct HarnessBuilder {
    label: String,
    answer: Option<String>,
    classify_delay: Option<Duration>,
    slow_answer: Option<(&'static str, Duration)>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    search: Option<Arc<dyn SearchProvider>>,
    window_turns: usize,
}

impl HarnessBuilder {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            answer: Some("Here is the answer.".to_string()),
            classify_delay: None,
            slow_answer: None,
            embedder: Arc::new(FixedEmbedder),
            index: Arc::new(InMemoryIndex::new()),
            search: None,
            window_turns: 10,
        }
    }

    fn answer(mut self, answer: Option<&str>) -> Self {
        self.answer = answer.map(str::to_string);
        self
    }

    fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = embedder;
        self
    }

    fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = index;
        self
    }

    fn classify_delay(mut self, delay: Duration) -> Self {
        self.classify_delay = Some(delay);
        self
    }

    fn slow_answer(mut self, marker: &'static str, delay: Duration) -> Self {
        self.slow_answer = Some((marker, delay));
        self
    }

    fn search(mut self, results: Option<Vec<WebResult>>) -> Self {
        self.search = Some(Arc::new(ScriptedSearch {
            results,
            delay: None,
        }));
        self
    }

    fn stalled_search(mut self) -> Self {
        self.search = Some(Arc::new(ScriptedSearch {
            results: Some(vec![web_result(1)]),
            delay: Some(Duration::from_secs(600)),
        }));
        self
    }

    fn window(mut self, window_turns: usize) -> Self {
        self.window_turns = window_turns;
        self
    }

    fn build(self) -> Harness {
        let config = Config::default_config();
        let classify_calls = Arc::new(AtomicUsize::new(0));
        let answer_calls = Arc::new(AtomicUsize::new(0));
        let last_request = Arc::new(Mutex::new(Vec::new()));

        let model = ScriptedModel {
            label: self.label,
            answer: self.answer,
            classify_delay: self.classify_delay,
            slow_answer: self.slow_answer,
            classify_calls: Arc::clone(&classify_calls),
            answer_calls: Arc::clone(&answer_calls),
            last_request: Arc::clone(&last_request),
        };
        let router = Arc::new(LLMRouter::new(
            vec![Box::new(model)],
            Arc::new(config.llm.clone()),
        ));

        let retrieval = Arc::new(RetrievalEngine::new(
            self.embedder,
            self.index,
            &config.retrieval,
            &config.timeouts,
        ));
        let dispatcher = ToolDispatcher::new(retrieval, self.search, Duration::from_secs(5), 3);
        let classifier = IntentClassifier::new(Arc::clone(&router), Duration::from_secs(5));
        let synthesizer = AnswerSynthesizer::new(
            Arc::clone(&router),
            CallPolicy {
                timeout: Duration::from_secs(5),
                max_retries: 1,
                backoff: Duration::from_millis(1),
            },
        );

        Harness {
            agent: AgentCore::new(router, classifier, dispatcher, synthesizer),
            sessions: SessionStore::new(self.window_turns),
            classify_calls,
            answer_calls,
            last_request,
        }
    }
}

fn chunk_meta(source: &str, page: u32, text: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("source".to_string(), json!(source));
    meta.insert("page".to_string(), json!(page));
    meta.insert("chunk_index".to_string(), json!(0));
    meta.insert("text".to_string(), json!(text));
    meta
}

#[tokio::test]
async fn test_arithmetic_goes_to_calculator_without_classification() {
    let h = HarnessBuilder::new("general")
        .answer(Some("Multiplying 12 by 8 gives 96."))
        .build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("What is 12 * 8?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::Calculator);
    assert!(result.answer.contains("96"));
    assert!(result.sources.is_none());
    assert!(result.web_sources.is_none());
    assert_eq!(result.state, TurnState::Returned);
    assert_eq!(h.classify_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.sessions.len("s1").await, 1);

    let response = result.to_response();
    assert!(!response.used_rag);
    assert_eq!(response.documents_searched, 0);
}

#[tokio::test]
async fn test_calculator_value_survives_generation_failure() {
    let h = HarnessBuilder::new("general").answer(None).build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("15% of 200", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::Calculator);
    assert!(result.answer.contains("30"));
    assert_eq!(result.state, TurnState::Returned);
}

#[tokio::test]
async fn test_calculator_error_is_answered_deterministically() {
    let h = HarnessBuilder::new("general").build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("What is 5 / 0?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::Calculator);
    assert!(result.answer.contains("Division by zero"));
    assert_eq!(h.answer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.sessions.len("s1").await, 1);
}

#[tokio::test]
async fn test_documents_with_matching_chunks() {
    let index = Arc::new(InMemoryIndex::new());
    index
        .upsert(
            "r-1",
            vec![1.0, 0.0],
            chunk_meta("report.pdf", 2, "Revenue in 2022 was $4M."),
        )
        .await
        .unwrap();
    index
        .upsert(
            "r-2",
            vec![0.6, 0.8],
            chunk_meta("plan.docx", 0, "Targets for 2023 were set in January."),
        )
        .await
        .unwrap();
    index
        .upsert("r-3", vec![0.0, 1.0], chunk_meta("menu.txt", 0, "Lunch options."))
        .await
        .unwrap();

    let h = HarnessBuilder::new("documents")
        .index(index)
        .answer(Some("Revenue was $4M [Source 1]."))
        .build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("What was revenue in 2022?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::Documents);
    let sources = result.sources.clone().unwrap();
    // orthogonal chunk scores 0 and is below the threshold
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].id, 1);
    assert_eq!(sources[1].id, 2);
    assert_eq!(sources[0].kind, OriginKind::Document);
    assert_eq!(sources[0].source.as_deref(), Some("report.pdf"));
    assert_eq!(sources[0].page, Some(3));
    assert_eq!(sources[0].relevance_label, Some(RelevanceLabel::High));
    assert_eq!(sources[1].relevance_label, Some(RelevanceLabel::Medium));
    assert!(result.web_sources.is_none());

    let response = result.to_response();
    assert!(response.used_rag);
    assert_eq!(response.documents_searched, 2);

    let request = h.last_request.lock().unwrap().clone();
    assert!(request[0].content.contains("[Source 1: report.pdf, Page 3]"));
    assert!(request[0].content.contains("Revenue in 2022 was $4M."));
}

#[tokio::test]
async fn test_documents_with_no_chunks_falls_back_to_general() {
    let h = HarnessBuilder::new("documents").build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("What does my lease say?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert!(result.sources.is_none());
    assert!(result.degraded.is_none());
    assert_eq!(result.state, TurnState::Returned);

    let request = h.last_request.lock().unwrap().clone();
    assert!(request[0].content.contains("do not cite"));
}

#[tokio::test]
async fn test_retrieval_failure_degrades() {
    let h = HarnessBuilder::new("documents")
        .embedder(Arc::new(BrokenEmbedder))
        .build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Summarize my notes", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert_eq!(
        result.degraded.as_deref(),
        Some(EngineError::RetrievalFailure(String::new()).user_hint())
    );
    assert_eq!(result.answer, "Here is the answer.");
}

#[tokio::test]
async fn test_web_search_with_results() {
    let h = HarnessBuilder::new("web_search")
        .search(Some(vec![
            WebResult {
                title: "Weather today".to_string(),
                url: "https://weather.example.com".to_string(),
                snippet: "Sunny, 24C.".to_string(),
            },
            WebResult {
                title: "Forecast".to_string(),
                url: "https://forecast.example.com".to_string(),
                snippet: "Rain tomorrow.".to_string(),
            },
        ]))
        .answer(Some("It is sunny [Web Source 1]."))
        .build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("What's the weather today?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::WebSearch);
    assert!(result.sources.is_none());
    let web = result.web_sources.unwrap();
    assert_eq!(web.len(), 2);
    assert_eq!(web[0].id, 1);
    assert_eq!(web[0].kind, OriginKind::Web);
    assert_eq!(web[0].url.as_deref(), Some("https://weather.example.com"));
    assert!(web[0].relevance_label.is_none());

    let request = h.last_request.lock().unwrap().clone();
    assert!(request[0].content.contains("[Web Source 1]: Weather today"));
}

#[tokio::test]
async fn test_web_search_failure_degrades() {
    let h = HarnessBuilder::new("web_search").search(None).build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Latest news on the election?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert!(result.web_sources.is_none());
    assert_eq!(
        result.degraded.as_deref(),
        Some(EngineError::SearchFailure(String::new()).user_hint())
    );
    assert_eq!(result.state, TurnState::Returned);
}

#[tokio::test]
async fn test_web_search_disabled_degrades() {
    // no search provider configured
    let h = HarnessBuilder::new("web_search").build();
    assert!(!h.agent.available_tools().contains(&ToolKind::WebSearch));

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Bitcoin price right now?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert!(result.degraded.is_some());
}

#[tokio::test]
async fn test_unknown_label_falls_back_to_general() {
    let h = HarnessBuilder::new("astrology").build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Tell me a joke", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert!(result.degraded.is_none());
    assert_eq!(h.classify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generation_failure_leaves_memory_untouched() {
    let h = HarnessBuilder::new("general").answer(None).build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Explain photosynthesis", "s1"))
        .await;

    assert_eq!(result.state, TurnState::Errored);
    assert_eq!(
        result.answer,
        EngineError::GenerationFailure(String::new()).user_hint()
    );
    assert!(result.sources.is_none());
    assert!(result.web_sources.is_none());
    assert_eq!(h.sessions.len("s1").await, 0);
    assert_eq!(h.sessions.session_count().await, 0);
    // first pass plus one retry
    assert_eq!(h.answer_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let h = HarnessBuilder::new("general").build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("   ", "s1"))
        .await;

    assert_eq!(result.state, TurnState::Errored);
    assert_eq!(result.answer, EngineError::EmptyMessage.user_hint());
    assert_eq!(h.classify_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.sessions.session_count().await, 0);
}

#[tokio::test]
async fn test_history_is_sent_and_bounded() {
    let h = HarnessBuilder::new("general").window(2).build();

    for question in ["first question", "second question", "third question"] {
        h.agent
            .process_turn(&h.sessions, &ChatRequest::new(question, "s1"))
            .await;
    }
    assert_eq!(h.sessions.len("s1").await, 2);

    h.agent
        .process_turn(&h.sessions, &ChatRequest::new("fourth question", "s1"))
        .await;

    // system + two remembered turns + the new message
    let request = h.last_request.lock().unwrap().clone();
    assert_eq!(request.len(), 6);
    assert_eq!(request[1].content, "second question");
    assert_eq!(request[5].content, "fourth question");
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let h = HarnessBuilder::new("general").build();

    h.agent
        .process_turn(&h.sessions, &ChatRequest::new("hello", "alice"))
        .await;
    h.agent
        .process_turn(&h.sessions, &ChatRequest::new("hello", "bob"))
        .await;
    assert_eq!(h.sessions.clear("alice").await, 1);

    assert_eq!(h.sessions.len("alice").await, 0);
    assert_eq!(h.sessions.len("bob").await, 1);
}

#[tokio::test]
async fn test_concurrent_turns_on_one_session() {
    let h = HarnessBuilder::new("general").build();

    let first = ChatRequest::new("question one", "shared");
    let second = ChatRequest::new("question two", "shared");
    let (a, b) = tokio::join!(
        h.agent.process_turn(&h.sessions, &first),
        h.agent.process_turn(&h.sessions, &second),
    );

    assert_eq!(a.state, TurnState::Returned);
    assert_eq!(b.state, TurnState::Returned);
    assert_eq!(h.sessions.len("shared").await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_turns_are_memorized_in_completion_order() {
    let h = HarnessBuilder::new("general")
        .slow_answer("slow question", Duration::from_secs(2))
        .build();

    let slow = ChatRequest::new("slow question", "shared");
    let fast = ChatRequest::new("fast question", "shared");
    let (a, b) = tokio::join!(
        h.agent.process_turn(&h.sessions, &slow),
        h.agent.process_turn(&h.sessions, &fast),
    );
    assert_eq!(a.state, TurnState::Returned);
    assert_eq!(b.state, TurnState::Returned);

    let memory = h.sessions.snapshot("shared").await;
    let order: Vec<&str> = memory.turns().map(|t| t.user.text.as_str()).collect();
    assert_eq!(order, vec!["fast question", "slow question"]);
}

#[tokio::test(start_paused = true)]
async fn test_retrieval_timeout_degrades() {
    let h = HarnessBuilder::new("documents")
        .embedder(Arc::new(StalledEmbedder))
        .build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("What is in my contract?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert!(result.sources.is_none());
    assert_eq!(
        result.degraded.as_deref(),
        Some(EngineError::RetrievalFailure(String::new()).user_hint())
    );
    assert_eq!(result.state, TurnState::Returned);
}

#[tokio::test(start_paused = true)]
async fn test_web_search_timeout_degrades() {
    let h = HarnessBuilder::new("web_search").stalled_search().build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Who won the match last night?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert!(result.web_sources.is_none());
    assert_eq!(
        result.degraded.as_deref(),
        Some(EngineError::SearchFailure(String::new()).user_hint())
    );
    assert_eq!(h.sessions.len("s1").await, 1);
}

#[tokio::test]
async fn test_web_results_are_capped() {
    let h = HarnessBuilder::new("web_search")
        .search(Some((1..=5).map(web_result).collect()))
        .build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Top headlines today?", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::WebSearch);
    let web = result.web_sources.unwrap();
    assert_eq!(web.len(), 3);
    let ids: Vec<usize> = web.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let request = h.last_request.lock().unwrap().clone();
    assert!(request[0].content.contains("[Web Source 3]: Result 3"));
    assert!(!request[0].content.contains("Result 4"));
}

#[tokio::test(start_paused = true)]
async fn test_classification_timeout_falls_back_to_general() {
    let h = HarnessBuilder::new("documents")
        .classify_delay(Duration::from_secs(60))
        .build();

    let result = h
        .agent
        .process_turn(&h.sessions, &ChatRequest::new("Tell me about my notes", "s1"))
        .await;

    assert_eq!(result.tool_used, ToolKind::General);
    assert!(result.degraded.is_none());
    assert_eq!(result.answer, "Here is the answer.");
    assert_eq!(h.classify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.state, TurnState::Returned);
}
