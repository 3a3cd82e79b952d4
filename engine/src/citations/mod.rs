//! Citation Builder
//!
//! Turns retrieved chunks and web results into the [`Citation`] records
//! attached to a response, and renders the numbered evidence block the
//! synthesizer hands to the model. Citation numbers in the evidence block
//! match citation ids, so `[Source 2]` in an answer refers to citation 2.

use sdk::{Citation, OriginKind, RelevanceLabel};

use crate::retrieval::RetrievedChunk;
use crate::search::WebResult;

/// Score at or above which a document citation is labelled High
pub const HIGH_THRESHOLD: f64 = 0.75;

/// Score at or above which a document citation is labelled Medium
pub const MEDIUM_THRESHOLD: f64 = 0.5;

/// Maximum snippet length in characters, before the ellipsis
pub const SNIPPET_MAX_CHARS: usize = 150;

/// Leading characters compared when de-duplicating chunks
pub const DEDUPE_PREFIX_CHARS: usize = 200;

/// Web result content is capped at this many characters in the evidence block
pub const WEB_CONTENT_MAX_CHARS: usize = 300;

const ELLIPSIS: &str = "...";

/// Deterministic relevance label for a similarity score
pub fn label_for_score(score: f64) -> RelevanceLabel {
    if score >= HIGH_THRESHOLD {
        RelevanceLabel::High
    } else if score >= MEDIUM_THRESHOLD {
        RelevanceLabel::Medium
    } else {
        RelevanceLabel::Low
    }
}

/// Collapse whitespace and cut at a word boundary, appending `...` when cut
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let cut = collapsed
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(collapsed.len());
    let head = &collapsed[..cut];

    // back up to the last space unless the first word alone is too long
    let head = match head.rfind(' ') {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };

    format!("{}{}", head.trim_end(), ELLIPSIS)
}

fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Drop chunks whose leading text repeats an earlier chunk's
pub fn dedupe_chunks(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen = std::collections::HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(prefix(&chunk.text, DEDUPE_PREFIX_CHARS).to_string()))
        .collect()
}

/// Per-response citation numbering
///
/// The counter starts at zero for every response and is incremented before
/// use, so ids run `1..=n`.
#[derive(Debug, Default)]
pub struct CitationBuilder {
    counter: usize,
}

impl CitationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> usize {
        self.counter += 1;
        self.counter
    }

    pub fn document(&mut self, chunk: &RetrievedChunk) -> Citation {
        Citation {
            id: self.next_id(),
            kind: OriginKind::Document,
            relevance_label: Some(label_for_score(chunk.score)),
            snippet: truncate_snippet(&chunk.text, SNIPPET_MAX_CHARS),
            source: Some(chunk.source.clone()),
            page: Some(chunk.page),
            chunk_index: Some(chunk.chunk_index),
            relevance_score: Some((chunk.score * 1000.0).round() / 1000.0),
            title: None,
            url: None,
        }
    }

    pub fn web(&mut self, result: &WebResult) -> Citation {
        Citation {
            id: self.next_id(),
            kind: OriginKind::Web,
            relevance_label: None,
            snippet: truncate_snippet(&result.snippet, SNIPPET_MAX_CHARS),
            source: None,
            page: None,
            chunk_index: None,
            relevance_score: None,
            title: Some(result.title.clone()),
            url: Some(result.url.clone()),
        }
    }
}

/// Citations for one response's document evidence
pub fn document_citations(chunks: &[RetrievedChunk]) -> Vec<Citation> {
    let mut builder = CitationBuilder::new();
    chunks.iter().map(|chunk| builder.document(chunk)).collect()
}

/// Citations for one response's web evidence
pub fn web_citations(results: &[WebResult]) -> Vec<Citation> {
    let mut builder = CitationBuilder::new();
    results.iter().map(|result| builder.web(result)).collect()
}

/// Evidence block for document chunks
///
/// ```text
/// [Source 1: handbook.pdf, Page 4]
/// chunk text
///
/// ---
///
/// [Source 2: ...]
/// ```
pub fn render_document_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[Source {}: {}, Page {}]\n{}",
                i + 1,
                chunk.source,
                chunk.page,
                chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Evidence block for web results
pub fn render_web_context(results: &[WebResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let content = prefix(result.snippet.trim(), WEB_CONTENT_MAX_CHARS);
            format!(
                "[Web Source {}]: {}\nURL: {}\nContent: {}",
                i + 1,
                result.title,
                result.url,
                content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
