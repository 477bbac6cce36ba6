//! Pipeline orchestration.
//!
//! [`Pipeline`] wires loader → chunker → index → retriever → synthesizer
//! and exposes the outer operations: [`ingest`](Pipeline::ingest),
//! [`ask`](Pipeline::ask), [`status`](Pipeline::status) and
//! [`reset`](Pipeline::reset). It is `Send + Sync`; share it behind an
//! `Arc` to serve concurrent queries while an ingest runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder, EmbedderIdentity};
use crate::error::{Error, IndexError, IngestionError, Result};
use crate::generation::{create_generator, Generator};
use crate::index::{BuildOptions, Index, IndexState};
use crate::loader::CorpusLoader;
use crate::models::AskResponse;
use crate::retrieve::Retriever;
use crate::synthesize::Synthesizer;

/// Outcome of a successful ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Every corpus file and record was indexed.
    Indexed,
    /// The index was rebuilt but some inputs were skipped.
    IndexedWithWarnings,
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub document_count: usize,
    pub chunk_count: usize,
    pub snapshot_version: u64,
    pub files_scanned: usize,
    #[serde(serialize_with = "display_all")]
    pub warnings: Vec<IngestionError>,
}

/// What an ingest would do, without embedding or writing anything.
#[derive(Debug, Serialize)]
pub struct IngestPreview {
    pub corpus: PathBuf,
    pub files_scanned: usize,
    pub document_count: usize,
    pub chunk_count: usize,
    #[serde(serialize_with = "display_all")]
    pub warnings: Vec<IngestionError>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub index_state: IndexState,
    pub snapshot_version: Option<u64>,
    pub document_count: usize,
    pub chunk_count: usize,
    /// Embedder that built the live snapshot.
    pub embedder: Option<EmbedderIdentity>,
    /// Embedder the pipeline is configured with.
    pub configured_embedder: EmbedderIdentity,
    pub embedder_matches: bool,
    pub built_at: Option<DateTime<Utc>>,
    pub index_path: PathBuf,
}

/// Per-call overrides for [`Pipeline::ask_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AskOptions {
    pub k: Option<usize>,
    /// Overrides `synthesis.degrade_on_failure`.
    pub allow_degraded: Option<bool>,
}

pub struct Pipeline {
    config: Config,
    index: Arc<Index>,
    embedder: Arc<dyn Embedder>,
    loader: CorpusLoader,
    chunker: Chunker,
    retriever: Retriever,
    synthesizer: Synthesizer,
}

impl Pipeline {
    /// Create the configured capabilities and open the index.
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::with_capabilities(config, embedder, generator).await
    }

    /// Open the index with caller-supplied capabilities.
    pub async fn with_capabilities(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let loader = CorpusLoader::new(&config.corpus)?;
        let chunker = Chunker::new(config.chunking.max_chars, config.chunking.overlap_chars)?;
        let index = Arc::new(Index::open(&config.index.path, config.index.keep_snapshots).await?);

        if let Some(snapshot) = index.snapshot() {
            let configured = embedder.identity();
            if snapshot.embedder != configured {
                tracing::warn!(
                    indexed = %snapshot.embedder,
                    configured = %configured,
                    "index was built with a different embedder; re-ingest before asking"
                );
            }
        }

        let retriever = Retriever::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            config.retrieval.clone(),
            Duration::from_secs(config.embedding.deadline_secs),
        );
        let synthesizer = Synthesizer::new(
            generator,
            config.synthesis.clone(),
            Duration::from_secs(config.generation.deadline_secs),
        );

        Ok(Self {
            config,
            index,
            embedder,
            loader,
            chunker,
            retriever,
            synthesizer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    fn corpus_root<'a>(&'a self, corpus: Option<&'a Path>) -> &'a Path {
        corpus.unwrap_or(&self.config.corpus.root)
    }

    /// Load, chunk and index the corpus, replacing the live snapshot.
    ///
    /// `corpus` defaults to `corpus.root`. Fails with [`Error::NoCorpus`]
    /// when no valid document loads; the previous snapshot stays live on
    /// every failure.
    pub async fn ingest(&self, corpus: Option<&Path>) -> Result<IngestReport> {
        let root = self.corpus_root(corpus);
        tracing::info!(corpus = %root.display(), "ingest started");

        let (loader, chunker, dir) = (self.loader.clone(), self.chunker, root.to_path_buf());
        let (loaded, chunks) = tokio::task::spawn_blocking(move || {
            let loaded = loader.load(&dir);
            let chunks = chunker.chunk_all(&loaded.documents);
            (loaded, chunks)
        })
        .await
        .map_err(|e| Error::Task(format!("loading corpus: {}", e)))?;

        if loaded.documents.is_empty() {
            return Err(Error::NoCorpus {
                path: root.to_path_buf(),
            });
        }
        let options = BuildOptions {
            batch_size: self.config.embedding.batch_size,
            batch_timeout: Duration::from_secs(self.config.embedding.deadline_secs),
        };
        let timeout_secs = self.config.index.build_timeout_secs;

        let build = self
            .index
            .build(&loaded.documents, chunks, self.embedder.as_ref(), options);
        let snapshot = tokio::time::timeout(Duration::from_secs(timeout_secs), build)
            .await
            .map_err(|_| IndexError::Timeout(timeout_secs))??;

        let status = if loaded.warnings.is_empty() {
            IngestStatus::Indexed
        } else {
            IngestStatus::IndexedWithWarnings
        };

        Ok(IngestReport {
            status,
            document_count: snapshot.document_count(),
            chunk_count: snapshot.chunk_count(),
            snapshot_version: snapshot.version,
            files_scanned: loaded.files_scanned,
            warnings: loaded.warnings,
        })
    }

    /// Dry run: load and chunk the corpus, report counts, touch nothing.
    pub fn preview(&self, corpus: Option<&Path>) -> IngestPreview {
        let root = self.corpus_root(corpus);
        let loaded = self.loader.load(root);
        let chunk_count = loaded
            .documents
            .iter()
            .map(|d| self.chunker.chunk(d).len())
            .sum();

        IngestPreview {
            corpus: root.to_path_buf(),
            files_scanned: loaded.files_scanned,
            document_count: loaded.documents.len(),
            chunk_count,
            warnings: loaded.warnings,
        }
    }

    pub async fn ask(&self, query: &str, k: Option<usize>) -> Result<AskResponse> {
        self.ask_with(
            query,
            AskOptions {
                k,
                allow_degraded: None,
            },
        )
        .await
    }

    /// Retrieve passages for `query` and synthesize a cited answer.
    ///
    /// When generation fails and degraded mode is on, the retrieved
    /// passages are returned as [`AskResponse::Degraded`].
    pub async fn ask_with(&self, query: &str, options: AskOptions) -> Result<AskResponse> {
        let retrieved = self.retriever.search(query, options.k).await?;

        match self.synthesizer.answer(query, &retrieved).await {
            Ok(answer) => Ok(AskResponse::Answered(answer)),
            Err(e) => {
                let degrade = options
                    .allow_degraded
                    .unwrap_or(self.config.synthesis.degrade_on_failure);
                if !degrade {
                    return Err(e.into());
                }
                tracing::warn!("answer synthesis failed, returning passages only: {}", e);
                Ok(AskResponse::Degraded {
                    sources: self.synthesizer.sources(&retrieved.hits),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn status(&self) -> StatusReport {
        let snapshot = self.index.snapshot();
        let configured = self.embedder.identity();

        StatusReport {
            index_state: self.index.state(),
            snapshot_version: snapshot.as_ref().map(|s| s.version),
            document_count: snapshot.as_ref().map_or(0, |s| s.document_count()),
            chunk_count: snapshot.as_ref().map_or(0, |s| s.chunk_count()),
            embedder_matches: snapshot
                .as_ref()
                .map_or(true, |s| s.embedder == configured),
            embedder: snapshot.as_ref().map(|s| s.embedder.clone()),
            configured_embedder: configured,
            built_at: snapshot.as_ref().map(|s| s.built_at),
            index_path: self.index.root().to_path_buf(),
        }
    }

    /// Delete every snapshot; the index becomes empty.
    pub fn reset(&self) -> Result<()> {
        self.index.reset()?;
        Ok(())
    }
}

fn display_all<S: serde::Serializer>(
    errors: &[IngestionError],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}
