//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, retrieval hits and answers
//! that flow from the corpus loader through the index to the synthesizer.

use serde::Serialize;

/// Canonical text document produced by the loader from one corpus record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Deterministic id derived from `source_id`.
    pub id: String,
    /// `<relative path>#<record index>` within the corpus directory.
    pub source_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub text: String,
}

impl Document {
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            id: self.id.clone(),
            source_id: self.source_id.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            char_count: self.text.chars().count(),
        }
    }
}

/// Document metadata kept inside an index snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMeta {
    pub id: String,
    pub source_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub char_count: usize,
}

impl DocumentMeta {
    /// Short human label: the title when present, otherwise the source id.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_id)
    }
}

/// A contiguous span of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// `<document_id>:<chunk_index>`.
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Offset of the first character within the document, in chars.
    pub start: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk matched by a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub document: DocumentMeta,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Ranked hits for one query against one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub snapshot_version: u64,
    /// Sorted by descending score, ties broken by chunk id.
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A passage cited in an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    /// 1-based position in the context given to the generator.
    pub rank: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub score: f32,
    pub excerpt: String,
}

impl Source {
    pub fn from_hit(rank: usize, hit: &ScoredChunk, excerpt_chars: usize) -> Self {
        Self {
            rank,
            chunk_id: hit.chunk.id.clone(),
            document_id: hit.chunk.document_id.clone(),
            source_id: hit.document.source_id.clone(),
            url: hit.document.url.clone(),
            title: hit.document.title.clone(),
            score: hit.score,
            excerpt: excerpt(&hit.chunk.text, excerpt_chars),
        }
    }
}

/// Synthesized answer plus the passages that were placed in its context.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
}

/// Result of `ask`: a full answer, or retrieved passages only when the
/// generator failed and degraded mode is on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AskResponse {
    Answered(Answer),
    Degraded { sources: Vec<Source>, reason: String },
}

impl AskResponse {
    pub fn sources(&self) -> &[Source] {
        match self {
            AskResponse::Answered(answer) => &answer.sources,
            AskResponse::Degraded { sources, .. } => sources,
        }
    }

    pub fn answer_text(&self) -> Option<&str> {
        match self {
            AskResponse::Answered(answer) => Some(&answer.text),
            AskResponse::Degraded { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, AskResponse::Degraded { .. })
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.char_indices();
    match chars.nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_text_untouched() {
        assert_eq!(excerpt("Paris", 200), "Paris");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
        assert_eq!(excerpt("abcd", 4), "abcd");
    }

    #[test]
    fn test_label_prefers_title() {
        let mut meta = DocumentMeta {
            id: "d1".to_string(),
            source_id: "a.json#0".to_string(),
            url: None,
            title: Some("Eiffel".to_string()),
            char_count: 10,
        };
        assert_eq!(meta.label(), "Eiffel");
        meta.title = None;
        assert_eq!(meta.label(), "a.json#0");
    }
}
