//! Answer Synthesizer
//!
//! Builds the generation request for a turn (tool-specific system prompt,
//! evidence, recent history, user message) and turns the model's reply into
//! the final answer. Memory is not touched here; the turn pipeline appends
//! only after this returns `Ok`.

use sdk::errors::{EngineError, SageErrorExt};
use std::sync::Arc;

use crate::llm::router::CallPolicy;
use crate::llm::{LLMRouter, Message};
use crate::memory::ConversationMemory;
use crate::tools::{Calculation, CalculatorError, ToolPayload, ToolResult};

const DOCUMENTS_PROMPT: &str = "You are a helpful assistant that answers questions using the user's documents.
Use only the numbered sources provided below. Cite them inline as [Source N], for example [Source 1].
If the sources do not contain the answer, say so plainly instead of guessing.
Never cite a source number that is not listed.";

const WEB_PROMPT: &str = "You are a helpful assistant that answers questions using fresh web search results.
Use only the numbered results provided below. Cite them inline as [Web Source N] and include the URL of each result you rely on.
If the results do not answer the question, say so.
Never cite a result that is not listed.";

const CALCULATOR_PROMPT: &str = "You are a helpful assistant explaining a calculation.
The result below was computed exactly. State it clearly and explain the steps briefly.
Do not recompute it and do not change the value.";

const GENERAL_PROMPT: &str = "You are a helpful, friendly assistant. Answer conversationally from general knowledge.
No documents or web results were consulted for this question, so do not cite any sources.";

pub struct AnswerSynthesizer {
    router: Arc<LLMRouter>,
    policy: CallPolicy,
}

impl AnswerSynthesizer {
    pub fn new(router: Arc<LLMRouter>, policy: CallPolicy) -> Self {
        Self { router, policy }
    }

    /// Produce the answer for one turn
    ///
    /// Calculator turns always succeed: a rejected expression is answered
    /// without a model call, and a computed value survives a failed
    /// generation. Other turns return `GenerationFailure` once the router
    /// has exhausted its retries.
    pub async fn synthesize(
        &self,
        message: &str,
        result: &ToolResult,
        memory: &ConversationMemory,
    ) -> Result<String, EngineError> {
        match &result.payload {
            ToolPayload::CalculatorError(err) => Ok(calculator_error_answer(err)),
            ToolPayload::Calculation(calc) => {
                let messages = build_messages(message, result, memory);
                match self.router.call(&messages, self.policy).await {
                    Ok((text, _)) => Ok(ensure_value_present(text.trim(), calc)),
                    Err(e) => {
                        tracing::warn!("Generation failed for calculator turn, using computed result: {}", e);
                        Ok(calc.summary())
                    }
                }
            }
            _ => {
                let messages = build_messages(message, result, memory);
                let (text, provider) = self
                    .router
                    .call(&messages, self.policy)
                    .await
                    .map_err(|e| EngineError::GenerationFailure(e.to_string()))?;

                let text = text.trim();
                if text.is_empty() {
                    return Err(EngineError::GenerationFailure(format!(
                        "{} returned an empty answer",
                        provider
                    )));
                }
                Ok(text.to_string())
            }
        }
    }
}

/// System prompt for the tool that produced the evidence
pub fn system_prompt(payload: &ToolPayload) -> &'static str {
    match payload {
        ToolPayload::Documents { .. } => DOCUMENTS_PROMPT,
        ToolPayload::Web { .. } => WEB_PROMPT,
        ToolPayload::Calculation(_) | ToolPayload::CalculatorError(_) => CALCULATOR_PROMPT,
        ToolPayload::None => GENERAL_PROMPT,
    }
}

fn build_messages(message: &str, result: &ToolResult, memory: &ConversationMemory) -> Vec<Message> {
    let mut system = system_prompt(&result.payload).to_string();

    match &result.payload {
        ToolPayload::Documents { context, .. } => {
            system.push_str("\n\nSources:\n");
            system.push_str(context);
        }
        ToolPayload::Web { context, .. } => {
            system.push_str("\n\nWeb results:\n");
            system.push_str(context);
        }
        ToolPayload::Calculation(calc) => {
            system.push_str("\n\nResult: ");
            system.push_str(&calc.summary());
        }
        _ => {}
    }

    let mut messages = Vec::with_capacity(memory.len() * 2 + 2);
    messages.push(Message::system(system));
    messages.extend(memory.as_messages());
    messages.push(Message::user(message));
    messages
}

fn ensure_value_present(text: &str, calc: &Calculation) -> String {
    if text.is_empty() {
        calc.summary()
    } else if text.contains(&calc.display) {
        text.to_string()
    } else {
        format!("{}\n\n{}", calc.summary(), text)
    }
}

fn calculator_error_answer(err: &CalculatorError) -> String {
    let hint = EngineError::CalculatorParse(err.to_string());
    format!("I couldn't calculate that: {}. {}.", err, hint.user_hint())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Turn;
    use crate::tools::calculator;
    use sdk::ToolKind;

    fn calc_result(input: &str) -> ToolResult {
        ToolResult {
            kind: ToolKind::Calculator,
            payload: ToolPayload::Calculation(calculator::evaluate(input).unwrap()),
            citations: Vec::new(),
            degraded: None,
        }
    }

    #[test]
    fn test_value_is_prefixed_when_missing() {
        let calc = calculator::evaluate("12 * 8").unwrap();
        assert_eq!(
            ensure_value_present("Multiply the numbers.", &calc),
            "12 * 8 = 96\n\nMultiply the numbers."
        );
        assert_eq!(ensure_value_present("It is 96.", &calc), "It is 96.");
        assert_eq!(ensure_value_present("", &calc), "12 * 8 = 96");
    }

    #[test]
    fn test_calculator_error_answer_is_deterministic() {
        let answer = calculator_error_answer(&CalculatorError::DivisionByZero);
        assert!(answer.starts_with("I couldn't calculate that: Division by zero."));
        assert_eq!(answer, calculator_error_answer(&CalculatorError::DivisionByZero));
    }

    #[test]
    fn test_messages_include_evidence_and_history() {
        let mut memory = ConversationMemory::new(5);
        memory.push(Turn::new("earlier question", "earlier answer"));

        let messages = build_messages("What is 12 * 8?", &calc_result("12 * 8"), &memory);
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("Result: 12 * 8 = 96"));
        assert_eq!(messages[1].content, "earlier question");
        assert_eq!(messages[3].content, "What is 12 * 8?");
    }

    #[test]
    fn test_general_prompt_forbids_citations() {
        let messages = build_messages("hi", &ToolResult::general(), &ConversationMemory::new(1));
        assert!(messages[0].content.contains("do not cite"));
    }
}
