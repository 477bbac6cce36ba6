//! Query → ranked chunks.
//!
//! The retriever embeds the query with the configured embedder and runs a
//! similarity query against the live snapshot. It holds its own
//! `Arc<Snapshot>` for the whole call, so a concurrent rebuild never mixes
//! two snapshots into one result.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::{CapabilityError, RetrievalError};
use crate::index::Index;
use crate::models::RetrievalResult;

pub struct Retriever {
    index: Arc<Index>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    deadline: Duration,
}

impl Retriever {
    pub fn new(
        index: Arc<Index>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
            deadline,
        }
    }

    /// Return up to `k` chunks most similar to `query`, best first.
    ///
    /// `k` defaults to `retrieval.default_k` and is clamped to
    /// `[1, retrieval.max_k]`.
    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<RetrievalResult, RetrievalError> {
        let snapshot = self.index.snapshot().ok_or(RetrievalError::NoIndex)?;

        let configured = self.embedder.identity();
        if snapshot.embedder != configured {
            return Err(RetrievalError::EmbedderMismatch {
                indexed: snapshot.embedder.to_string(),
                configured: configured.to_string(),
            });
        }

        let query = query.trim();
        if query.is_empty() {
            return Ok(RetrievalResult {
                query: String::new(),
                snapshot_version: snapshot.version,
                hits: Vec::new(),
            });
        }

        let k = self.config.effective_k(k);
        let vector = tokio::time::timeout(self.deadline, embed_query(self.embedder.as_ref(), query))
            .await
            .map_err(|_| {
                RetrievalError::Embedding(CapabilityError::timeout(
                    self.embedder.provider(),
                    self.deadline.as_secs(),
                ))
            })?
            .map_err(RetrievalError::Embedding)?;

        let mut hits = snapshot.query(&vector, k)?;
        if let Some(floor) = self.config.min_score {
            hits.retain(|h| h.score >= floor);
        }

        tracing::debug!(
            k,
            hits = hits.len(),
            version = snapshot.version,
            "retrieved passages"
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            snapshot_version: snapshot.version,
            hits,
        })
    }
}
