//! Sage SDK
//!
//! Shared library providing the boundary types and error vocabulary used by
//! the Sage engine and its transports (CLI, HTTP API).

/// Error types and handling
pub mod errors;

/// Chat request/response and citation types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, SageErrorExt};
pub use types::{
    ChatRequest, ChatResponse, Citation, ClearHistoryRequest, ClearHistoryResponse, OriginKind,
    RelevanceLabel, ToolKind,
};
