//! Agent Core
//!
//! Runs one chat turn through the pipeline:
//!
//! 1. Snapshot the session's memory
//! 2. Classify the message into exactly one tool
//! 3. Dispatch the tool (documents, web search, calculator or none)
//! 4. Synthesize the answer from the evidence and memory
//! 5. Append the completed turn to memory
//!
//! Every step that talks to an external service has its own deadline, and
//! every failure still produces a well-formed [`ChatTurnResult`].

use sdk::errors::{EngineError, SageErrorExt};
use sdk::{ChatRequest, ChatResponse, Citation, ToolKind};
use std::sync::Arc;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use super::synthesizer::AnswerSynthesizer;
use crate::classifier::IntentClassifier;
use crate::config::Config;
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::CallPolicy;
use crate::llm::{LLMProvider, LLMRouter};
use crate::memory::{SessionStore, Turn};
use crate::retrieval::RetrievalEngine;
use crate::secrets::{SecretCache, OPENAI_API_KEY};
use crate::tools::{ToolDispatcher, ToolPayload};
use crate::{embedding, index, search};

/// Per-turn lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    Classified,
    Dispatched,
    Retrieved,
    Searched,
    Computed,
    Skipped,
    Synthesized,
    Memorized,
    Returned,
    Errored,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Returned | TurnState::Errored)
    }
}

fn advance(state: &mut TurnState, next: TurnState) {
    debug!("Turn state {:?} -> {:?}", state, next);
    *state = next;
}

/// Outcome of one turn
#[derive(Debug, Clone)]
pub struct ChatTurnResult {
    pub answer: String,
    pub tool_used: ToolKind,

    /// Document citations; set only when `tool_used` is `Documents`
    pub sources: Option<Vec<Citation>>,

    /// Web citations; set only when `tool_used` is `WebSearch`
    pub web_sources: Option<Vec<Citation>>,

    pub degraded: Option<String>,

    /// Terminal state the turn ended in
    pub state: TurnState,
}

impl ChatTurnResult {
    pub fn to_response(&self) -> ChatResponse {
        ChatResponse {
            answer: self.answer.clone(),
            tool_used: self.tool_used,
            sources: self.sources.clone(),
            web_sources: self.web_sources.clone(),
            used_rag: self.tool_used == ToolKind::Documents,
            documents_searched: self.sources.as_ref().map(Vec::len).unwrap_or(0),
            degraded: self.degraded.clone(),
        }
    }
}

/// The turn pipeline
pub struct AgentCore {
    classifier: IntentClassifier,
    dispatcher: ToolDispatcher,
    synthesizer: AnswerSynthesizer,
    router: Arc<LLMRouter>,
}

impl AgentCore {
    pub fn new(
        router: Arc<LLMRouter>,
        classifier: IntentClassifier,
        dispatcher: ToolDispatcher,
        synthesizer: AnswerSynthesizer,
    ) -> Self {
        Self {
            classifier,
            dispatcher,
            synthesizer,
            router,
        }
    }

    /// Wire every collaborator from configuration
    ///
    /// Ollama is always registered. OpenAI is registered when it is the
    /// default provider or an API key is available.
    pub fn from_config(config: &Config, secrets: Arc<SecretCache>) -> Result<Self, EngineError> {
        let mut providers: Vec<Box<dyn LLMProvider>> = vec![Box::new(OllamaProvider::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
        ))];

        if config.llm.default_provider == "openai" || secrets.has_secret(OPENAI_API_KEY) {
            providers.push(Box::new(OpenAIProvider::new(
                config.llm.openai.clone(),
                Arc::clone(&secrets),
            )));
        }

        let router = Arc::new(LLMRouter::new(providers, Arc::new(config.llm.clone())));

        let embedder = embedding::from_config(&config.embedding, Arc::clone(&secrets));
        let vector_index = index::from_config(&config.index, Arc::clone(&secrets))
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let retrieval = Arc::new(RetrievalEngine::new(
            embedder,
            vector_index,
            &config.retrieval,
            &config.timeouts,
        ));

        let dispatcher = ToolDispatcher::new(
            retrieval,
            search::from_config(&config.search, secrets),
            config.timeouts.search(),
            config.search.max_results,
        );

        let classifier = IntentClassifier::new(Arc::clone(&router), config.timeouts.classification());
        let synthesizer = AnswerSynthesizer::new(
            Arc::clone(&router),
            CallPolicy::with_retry(config.timeouts.generation(), &config.retry),
        );

        Ok(Self::new(router, classifier, dispatcher, synthesizer))
    }

    pub fn router(&self) -> &Arc<LLMRouter> {
        &self.router
    }

    pub fn available_tools(&self) -> Vec<ToolKind> {
        self.dispatcher.available_tools()
    }

    /// Process one chat turn against `sessions`
    pub async fn process_turn(&self, sessions: &SessionStore, request: &ChatRequest) -> ChatTurnResult {
        let span = tracing::info_span!(
            "turn",
            turn_id = %Uuid::new_v4(),
            session = %request.session_id
        );
        self.run_turn(sessions, request).instrument(span).await
    }

    async fn run_turn(&self, sessions: &SessionStore, request: &ChatRequest) -> ChatTurnResult {
        let mut state = TurnState::Received;
        let message = request.message.trim();

        if message.is_empty() {
            advance(&mut state, TurnState::Errored);
            return ChatTurnResult {
                answer: EngineError::EmptyMessage.user_hint().to_string(),
                tool_used: ToolKind::General,
                sources: None,
                web_sources: None,
                degraded: None,
                state,
            };
        }

        let memory = sessions.snapshot(&request.session_id).await;

        let classification = self
            .classifier
            .classify(message, &memory.context_summary())
            .await;
        info!(
            "Selected tool '{}' ({:?})",
            classification.tool, classification.method
        );
        advance(&mut state, TurnState::Classified);

        advance(&mut state, TurnState::Dispatched);
        let result = self.dispatcher.execute(classification.tool, message).await;
        advance(
            &mut state,
            match result.payload {
                ToolPayload::Documents { .. } => TurnState::Retrieved,
                ToolPayload::Web { .. } => TurnState::Searched,
                ToolPayload::Calculation(_) | ToolPayload::CalculatorError(_) => TurnState::Computed,
                ToolPayload::None => TurnState::Skipped,
            },
        );

        let answer = match self.synthesizer.synthesize(message, &result, &memory).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Answer synthesis failed: {}", e);
                advance(&mut state, TurnState::Errored);
                return ChatTurnResult {
                    answer: e.user_hint().to_string(),
                    tool_used: result.kind,
                    sources: None,
                    web_sources: None,
                    degraded: result.degraded,
                    state,
                };
            }
        };
        advance(&mut state, TurnState::Synthesized);

        sessions
            .append(&request.session_id, Turn::new(message, answer.clone()))
            .await;
        advance(&mut state, TurnState::Memorized);

        let (sources, web_sources) = match result.kind {
            ToolKind::Documents => (Some(result.citations), None),
            ToolKind::WebSearch => (None, Some(result.citations)),
            ToolKind::Calculator | ToolKind::General => (None, None),
        };

        advance(&mut state, TurnState::Returned);
        ChatTurnResult {
            answer,
            tool_used: result.kind,
            sources,
            web_sources,
            degraded: result.degraded,
            state,
        }
    }
}
