//! Overlapping, boundary-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `max_chars` characters.
//! Consecutive chunks share exactly `overlap_chars` characters, so a
//! document can be rebuilt from its chunks with [`reassemble`].
//!
//! Each window ends at the latest paragraph break (`\n\n`) it can reach,
//! falling back to a line break, then whitespace, and finally a raw
//! character cut for long unbroken text. Lengths are counted in chars, never
//! bytes, so multi-byte text is never split inside a character.
//!
//! Chunk ids are `<document_id>:<index>` and each chunk carries a SHA-256
//! hash of its text, so identical input always yields identical chunks.

use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::models::{Chunk, Document};

/// Chunking parameters, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, ConfigError> {
        if max_chars == 0 {
            return Err(ConfigError::new("chunk size must be > 0"));
        }
        if overlap_chars >= max_chars {
            return Err(ConfigError::new(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap_chars, max_chars
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        chunk_text(&doc.id, &doc.text, self.max_chars, self.overlap_chars)
    }

    pub fn chunk_all(&self, docs: &[Document]) -> Vec<Chunk> {
        docs.iter().flat_map(|d| self.chunk(d)).collect()
    }
}

/// Split text into overlapping chunks with contiguous indices starting at 0.
///
/// Callers must ensure `overlap_chars < max_chars` (see [`Chunker::new`]).
/// Empty text yields no chunks.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    // offsets[i] is the byte offset of char i; offsets[n] == text.len()
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = offsets.len() - 1;

    let mut chunks = Vec::new();
    if n == 0 {
        return chunks;
    }

    let mut start = 0usize;
    loop {
        if n - start <= max_chars {
            chunks.push(make_chunk(
                document_id,
                chunks.len() as i64,
                start,
                &text[offsets[start]..],
            ));
            break;
        }

        // The window must end past the overlap so the next start advances.
        let lo = start + overlap_chars + 1;
        let hi = start + max_chars;
        let end = find_split(text, &offsets, lo, hi).unwrap_or(hi);

        chunks.push(make_chunk(
            document_id,
            chunks.len() as i64,
            start,
            &text[offsets[start]..offsets[end]],
        ));
        start = end - overlap_chars;
    }

    chunks
}

/// Latest char position in `[lo, hi]` that follows a paragraph break, else a
/// line break, else whitespace.
fn find_split(text: &str, offsets: &[usize], lo: usize, hi: usize) -> Option<usize> {
    let candidates = || (lo..=hi).rev();

    candidates()
        .find(|&e| text[..offsets[e]].ends_with("\n\n"))
        .or_else(|| candidates().find(|&e| text[..offsets[e]].ends_with('\n')))
        .or_else(|| {
            candidates().find(|&e| {
                text[..offsets[e]]
                    .chars()
                    .next_back()
                    .is_some_and(char::is_whitespace)
            })
        })
}

/// Rebuild the original text from one document's chunks, in index order.
pub fn reassemble(chunks: &[Chunk], overlap_chars: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap_chars));
        }
    }
    out
}

fn make_chunk(document_id: &str, index: i64, start: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        start,
        text: text.to_string(),
        hash,
    }
}
