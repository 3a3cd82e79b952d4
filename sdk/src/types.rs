//! Chat boundary types
//!
//! Request and response shapes exchanged between transports and the engine,
//! plus the citation records attached to answers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session id used when a request does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

/// Tool selected for a single chat turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Retrieval over the user's indexed documents
    Documents,

    /// Live web search
    WebSearch,

    /// Arithmetic evaluation
    Calculator,

    /// Direct model answer with no external evidence
    General,
}

impl ToolKind {
    /// Every tool, in classifier label order
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Documents,
        ToolKind::WebSearch,
        ToolKind::Calculator,
        ToolKind::General,
    ];

    /// The wire label for this tool
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Documents => "documents",
            ToolKind::WebSearch => "web_search",
            ToolKind::Calculator => "calculator",
            ToolKind::General => "general",
        }
    }

    /// Parse an exact wire label
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == label)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relevance label attached to document citations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLabel {
    High,
    Medium,
    Low,
}

impl fmt::Display for RelevanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelevanceLabel::High => write!(f, "High"),
            RelevanceLabel::Medium => write!(f, "Medium"),
            RelevanceLabel::Low => write!(f, "Low"),
        }
    }
}

/// Where a citation's evidence came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Document,
    Web,
}

/// A structured reference to evidence attached to an answer
///
/// Document citations carry `source`/`page`/`chunk_index`/`relevance_score`
/// and a relevance label. Web citations carry `title`/`url` and no label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// Identifier, unique within one response
    pub id: usize,

    /// Evidence origin
    pub kind: OriginKind,

    /// Relevance label (documents only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_label: Option<RelevanceLabel>,

    /// Truncated evidence text
    pub snippet: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Chat turn request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's message
    pub message: String,

    /// Session the turn belongs to
    #[serde(alias = "sessionId", default = "default_session_id")]
    pub session_id: String,
}

impl ChatRequest {
    /// Create a new chat request
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
        }
    }
}

/// Chat turn response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub tool_used: ToolKind,
    pub sources: Option<Vec<Citation>>,
    pub web_sources: Option<Vec<Citation>>,
    pub used_rag: bool,
    pub documents_searched: usize,

    /// Set when a tool failed and the turn fell back to a plain answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// Clear-history request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearHistoryRequest {
    #[serde(alias = "sessionId", default = "default_session_id")]
    pub session_id: String,
}

/// Clear-history response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearHistoryResponse {
    pub status: String,
    pub session_id: String,
}

impl ClearHistoryResponse {
    /// Successful clear of the given session
    pub fn cleared(session_id: impl Into<String>) -> Self {
        Self {
            status: "cleared".to_string(),
            session_id: session_id.into(),
        }
    }
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_kind_labels() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_label(kind.as_str()), Some(kind));
        }
        assert_eq!(ToolKind::from_label("Documents"), None);
        assert_eq!(ToolKind::from_label("search"), None);
    }

    #[test]
    fn test_tool_kind_serialization() {
        let json = serde_json::to_string(&ToolKind::WebSearch).unwrap();
        assert_eq!(json, r#""web_search""#);
    }

    #[test]
    fn test_chat_request_accepts_camel_case_session() {
        let req: ChatRequest =
            serde_json::from_value(json!({"message": "hi", "sessionId": "abc"})).unwrap();
        assert_eq!(req.session_id, "abc");

        let req: ChatRequest = serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert_eq!(req.session_id, DEFAULT_SESSION_ID);
    }

    #[test]
    fn test_web_citation_omits_document_fields() {
        let citation = Citation {
            id: 1,
            kind: OriginKind::Web,
            relevance_label: None,
            snippet: "Rust 1.80 released...".to_string(),
            source: None,
            page: None,
            chunk_index: None,
            relevance_score: None,
            title: Some("Rust Blog".to_string()),
            url: Some("https://blog.rust-lang.org".to_string()),
        };

        let value = serde_json::to_value(&citation).unwrap();
        assert_eq!(value["kind"], "web");
        assert!(value.get("relevance_label").is_none());
        assert!(value.get("page").is_none());
        assert_eq!(value["url"], "https://blog.rust-lang.org");
    }

    #[test]
    fn test_chat_response_null_sources() {
        let response = ChatResponse {
            answer: "Hello".to_string(),
            tool_used: ToolKind::General,
            sources: None,
            web_sources: None,
            used_rag: false,
            documents_searched: 0,
            degraded: None,
        };

        let value = serde_json::to_value(&response).unwrap();
        assert!(value["sources"].is_null());
        assert!(value["web_sources"].is_null());
        assert!(value.get("degraded").is_none());
    }
}
