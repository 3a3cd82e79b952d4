pub mod calculator;

pub use calculator::{Calculation, CalculatorError};

use sdk::errors::{EngineError, SageErrorExt};
use sdk::{Citation, ToolKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::citations;
use crate::retrieval::{RetrievalEngine, RetrievedChunk};
use crate::search::{SearchError, SearchProvider, WebResult};

/// Evidence produced by one tool run
#[derive(Debug, Clone)]
pub enum ToolPayload {
    /// Ranked, de-duplicated chunks plus the rendered evidence block
    Documents {
        chunks: Vec<RetrievedChunk>,
        context: String,
    },

    /// Capped web results plus the rendered evidence block
    Web {
        results: Vec<WebResult>,
        context: String,
    },

    /// A successfully evaluated expression
    Calculation(Calculation),

    /// The expression was rejected; answered without a model call
    CalculatorError(CalculatorError),

    /// No external evidence
    None,
}

/// Normalized outcome of [`ToolDispatcher::execute`]
///
/// `kind` is the tool that actually produced the evidence, which is `General`
/// whenever the requested tool fell back.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub kind: ToolKind,
    pub payload: ToolPayload,
    pub citations: Vec<Citation>,

    /// User-facing note set when a failing tool forced the fallback
    pub degraded: Option<String>,
}

impl ToolResult {
    /// Plain answer with no evidence
    pub fn general() -> Self {
        Self {
            kind: ToolKind::General,
            payload: ToolPayload::None,
            citations: Vec::new(),
            degraded: None,
        }
    }

    /// Fallback to a plain answer after a tool failure
    pub fn degraded(error: &EngineError) -> Self {
        Self {
            degraded: Some(error.user_hint().to_string()),
            ..Self::general()
        }
    }
}

/// Executes the selected tool and normalizes its output
///
/// The tool set is closed: documents, web search, calculator and general.
pub struct ToolDispatcher {
    retrieval: Arc<RetrievalEngine>,
    search: Option<Arc<dyn SearchProvider>>,
    search_timeout: Duration,
    max_web_results: usize,
}

impl ToolDispatcher {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        search: Option<Arc<dyn SearchProvider>>,
        search_timeout: Duration,
        max_web_results: usize,
    ) -> Self {
        Self {
            retrieval,
            search,
            search_timeout,
            max_web_results,
        }
    }

    /// Names of the tools this dispatcher can run
    pub fn available_tools(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|kind| *kind != ToolKind::WebSearch || self.search.is_some())
            .collect()
    }

    /// Run `tool` for `message`
    ///
    /// Never fails: tool errors become a `General` result, with a degraded
    /// note when an external collaborator was at fault.
    pub async fn execute(&self, tool: ToolKind, message: &str) -> ToolResult {
        debug!("Dispatching tool '{}'", tool);

        match tool {
            ToolKind::Documents => self.run_documents(message).await,
            ToolKind::WebSearch => self.run_web_search(message).await,
            ToolKind::Calculator => run_calculator(message),
            ToolKind::General => ToolResult::general(),
        }
    }

    async fn run_documents(&self, message: &str) -> ToolResult {
        match self.retrieval.retrieve(message).await {
            Ok(chunks) => {
                let chunks = citations::dedupe_chunks(chunks);
                if chunks.is_empty() {
                    info!("No chunks above threshold, falling back to general");
                    return ToolResult::general();
                }
                ToolResult {
                    kind: ToolKind::Documents,
                    citations: citations::document_citations(&chunks),
                    payload: ToolPayload::Documents {
                        context: citations::render_document_context(&chunks),
                        chunks,
                    },
                    degraded: None,
                }
            }
            Err(e) => {
                warn!("Document retrieval failed: {}", e);
                ToolResult::degraded(&EngineError::from(e))
            }
        }
    }

    async fn run_web_search(&self, message: &str) -> ToolResult {
        let outcome = match &self.search {
            Some(provider) => tokio::time::timeout(
                self.search_timeout,
                provider.search(message, self.max_web_results),
            )
            .await
            .unwrap_or(Err(SearchError::Timeout)),
            None => Err(SearchError::Disabled),
        };

        match outcome {
            Ok(mut results) => {
                results.truncate(self.max_web_results);
                if results.is_empty() {
                    info!("Web search returned no results, falling back to general");
                    return ToolResult::general();
                }
                ToolResult {
                    kind: ToolKind::WebSearch,
                    citations: citations::web_citations(&results),
                    payload: ToolPayload::Web {
                        context: citations::render_web_context(&results),
                        results,
                    },
                    degraded: None,
                }
            }
            Err(e) => {
                warn!("Web search failed: {}", e);
                ToolResult::degraded(&EngineError::from(e))
            }
        }
    }
}

fn run_calculator(message: &str) -> ToolResult {
    let payload = match calculator::evaluate(message) {
        Ok(calculation) => {
            debug!("Computed {}", calculation.summary());
            ToolPayload::Calculation(calculation)
        }
        Err(e) => {
            info!("Calculator rejected expression: {}", e);
            ToolPayload::CalculatorError(e)
        }
    };

    ToolResult {
        kind: ToolKind::Calculator,
        payload,
        citations: Vec::new(),
        degraded: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculator_result() {
        let result = run_calculator("What is 12 * 8?");
        assert_eq!(result.kind, ToolKind::Calculator);
        match result.payload {
            ToolPayload::Calculation(calc) => assert_eq!(calc.display, "96"),
            other => panic!("unexpected payload: {:?}", other),
        }
        assert!(result.citations.is_empty());
    }

    #[test]
    fn test_calculator_error_keeps_tool() {
        let result = run_calculator("2 + os.system('ls')");
        assert_eq!(result.kind, ToolKind::Calculator);
        assert!(matches!(result.payload, ToolPayload::CalculatorError(_)));
        assert!(result.degraded.is_none());
    }

    #[test]
    fn test_degraded_result_uses_hint() {
        let result = ToolResult::degraded(&EngineError::SearchFailure("boom".to_string()));
        assert_eq!(result.kind, ToolKind::General);
        let note = result.degraded.unwrap();
        assert!(note.contains("Web search"));
        assert!(!note.contains("boom"));
    }
}
