//! Intent Classifier
//!
//! Picks one tool per turn. Arithmetic-looking input goes to the calculator
//! without consulting the model. Everything else gets a single constrained
//! classification call; an unusable label or a timeout means `general`.

use sdk::errors::EngineError;
use sdk::ToolKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::llm::router::CallPolicy;
use crate::llm::{LLMRouter, Message};
use crate::tools::calculator;

const CLASSIFIER_PROMPT: &str = "You are a query router. Decide which single tool should answer the user's latest question.

Tools:
- documents: questions about the user's personal or uploaded documents, files, notes or reports
- web_search: current events, recent news, live prices, weather, or anything that needs up-to-date information
- calculator: arithmetic and math calculations
- general: general knowledge, explanations, opinions, greetings and conversation

Reply with exactly one word: documents, web_search, calculator or general.";

/// How a classification was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationMethod {
    /// Deterministic arithmetic check
    Pattern,

    /// The model returned a valid label
    Model,

    /// The model failed or answered outside the label set
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub tool: ToolKind,
    pub method: ClassificationMethod,
}

pub struct IntentClassifier {
    router: Arc<LLMRouter>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(router: Arc<LLMRouter>, timeout: Duration) -> Self {
        Self { router, timeout }
    }

    pub async fn classify(&self, message: &str, memory_summary: &str) -> Classification {
        if calculator::looks_like_arithmetic(message) {
            debug!("Arithmetic pattern matched");
            return Classification {
                tool: ToolKind::Calculator,
                method: ClassificationMethod::Pattern,
            };
        }

        let messages = build_messages(message, memory_summary);
        match self
            .router
            .call(&messages, CallPolicy::once(self.timeout))
            .await
        {
            Ok((reply, _)) => match parse_label(&reply) {
                Some(tool) => Classification {
                    tool,
                    method: ClassificationMethod::Model,
                },
                None => fallback(EngineError::ClassificationFailure(format!(
                    "unknown label {:?}",
                    reply.trim()
                ))),
            },
            Err(e) => fallback(EngineError::ClassificationFailure(e.to_string())),
        }
    }
}

fn fallback(error: EngineError) -> Classification {
    warn!("{}, answering as general", error);
    Classification {
        tool: ToolKind::General,
        method: ClassificationMethod::Fallback,
    }
}

fn build_messages(message: &str, memory_summary: &str) -> Vec<Message> {
    let mut user = String::new();
    if !memory_summary.is_empty() {
        user.push_str("Recent conversation:\n");
        user.push_str(memory_summary);
        user.push_str("\n\n");
    }
    user.push_str("Question: ");
    user.push_str(message);

    vec![Message::system(CLASSIFIER_PROMPT), Message::user(user)]
}

/// Read a tool label out of a model reply
///
/// Tolerates case, surrounding whitespace, quotes, backticks and trailing
/// punctuation; the label itself must match exactly.
pub fn parse_label(reply: &str) -> Option<ToolKind> {
    let cleaned = reply
        .trim_matches(|c: char| c.is_whitespace() || "\"'`.!,".contains(c))
        .to_ascii_lowercase();

    ToolKind::from_label(&cleaned)
}
