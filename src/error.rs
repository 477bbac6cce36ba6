//! Error taxonomy for the ingestion and question-answering pipeline.
//!
//! Per-record loader failures ([`IngestionError`]) are recoverable and only
//! ever surface as warnings inside an ingest report. Everything else
//! propagates to the caller as a typed [`Error`], which can be mapped to a
//! user-facing category with [`Error::user_status`].

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by an external capability (embedding or generation).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// Worth retrying: rate limits, 5xx responses, dropped connections.
    #[error("{provider}: transient failure: {message}")]
    Transient { provider: String, message: String },

    /// Retrying will not help: bad request, auth failure, malformed output,
    /// or a disabled provider.
    #[error("{provider}: {message}")]
    Fatal { provider: String, message: String },

    /// The call did not finish within its deadline.
    #[error("{provider}: timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },
}

impl CapabilityError {
    pub fn transient(provider: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn fatal(provider: &str, message: impl Into<String>) -> Self {
        Self::Fatal {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(provider: &str, secs: u64) -> Self {
        Self::Timeout {
            provider: provider.to_string(),
            secs,
        }
    }

    /// Whether a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// A corpus file or record that was skipped during loading.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestionError {
    #[error("{path}: unreadable: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("{path}: malformed JSON: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("{path}:{line}: malformed JSON line: {message}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{path}: record {index} has no usable text")]
    EmptyRecord { path: PathBuf, index: usize },
}

/// Failure while building, loading or querying the index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("nothing to index: the chunk list is empty")]
    EmptyBuild,

    #[error("a rebuild of this index is already in progress")]
    RebuildInProgress,

    #[error("embedding failed during build: {0}")]
    Embedding(CapabilityError),

    #[error("embedder returned {got} vectors for {expected} chunks")]
    VectorCount { expected: usize, got: usize },

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index build timed out after {0}s")]
    Timeout(u64),

    #[error("snapshot storage failed: {0}")]
    Storage(String),
}

impl IndexError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}

/// Failure while turning a query into ranked chunks.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("no index has been built yet; ingest a corpus first")]
    NoIndex,

    #[error("index was built with embedder {indexed} but {configured} is configured; re-ingest to rebuild")]
    EmbedderMismatch { indexed: String, configured: String },

    #[error("query embedding failed: {0}")]
    Embedding(CapabilityError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Failure while generating the narrative answer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("generation failed: {0}")]
    Generation(CapabilityError),

    #[error("generator returned an empty answer")]
    EmptyOutput,
}

/// Invalid or incomplete configuration, detected at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Caller-facing category for an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    NotFound,
    Unavailable,
    Conflict,
    Invalid,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
        }
    }
}

/// Top-level pipeline error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no data found in corpus {}", path.display())]
    NoCorpus { path: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    IndexBuild(#[from] IndexError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// A blocking task panicked or was cancelled by runtime shutdown.
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn user_status(&self) -> UserStatus {
        match self {
            Error::NoCorpus { .. } | Error::Retrieval(RetrievalError::NoIndex) => {
                UserStatus::NotFound
            }
            Error::Config(_) | Error::Retrieval(RetrievalError::EmbedderMismatch { .. }) => {
                UserStatus::Invalid
            }
            Error::IndexBuild(IndexError::RebuildInProgress)
            | Error::Retrieval(RetrievalError::Index(IndexError::RebuildInProgress)) => {
                UserStatus::Conflict
            }
            Error::IndexBuild(_) | Error::Retrieval(_) | Error::Synthesis(_) | Error::Task(_) => {
                UserStatus::Unavailable
            }
        }
    }

    /// True when the error means "there is nothing indexed to answer from".
    pub fn is_no_data(&self) -> bool {
        self.user_status() == UserStatus::NotFound
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
