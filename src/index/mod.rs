//! Versioned vector index with atomic snapshot swap.
//!
//! The index directory holds one SQLite database per snapshot and a
//! `CURRENT` pointer file naming the live one:
//!
//! ```text
//! <index.path>/
//!   CURRENT                       # "v000007"
//!   snapshots/v000007/index.sqlite
//!   staging/<uuid>/               # in-flight build, removed on failure
//!   LOCK                          # held by the running build or reset
//! ```
//!
//! # Build
//!
//! [`Index::build`] embeds every chunk, writes a complete snapshot into a
//! fresh staging directory, renames it into `snapshots/`, replaces
//! `CURRENT` (write temp + rename) and only then swaps the in-memory
//! pointer. Readers clone an `Arc<Snapshot>` and keep using it for the
//! whole query, so they see either the old snapshot or the new one.
//!
//! Only one build or reset runs per index directory at a time. Both hold
//! an exclusive lock on `<index.path>/LOCK` for their whole duration, so a
//! second one, from this process or another, is rejected with
//! [`IndexError::RebuildInProgress`]. A build that fails, times out or is
//! dropped mid-way removes its staging directory and leaves the previous
//! snapshot live.

mod snapshot;

pub use snapshot::{Entry, Snapshot};

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use fs4::fs_std::FileExt;
use serde::Serialize;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{CapabilityError, IndexError};
use crate::models::{Chunk, Document, ScoredChunk};

const CURRENT_FILE: &str = "CURRENT";
const SNAPSHOTS_DIR: &str = "snapshots";
const STAGING_DIR: &str = "staging";
const LOCK_FILE: &str = "LOCK";

/// Lifecycle state of an [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Empty,
    Building,
    Ready,
    Rebuilding,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexState::Empty => "empty",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Rebuilding => "rebuilding",
        };
        f.write_str(s)
    }
}

/// Embedding batch settings for [`Index::build`].
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub batch_size: usize,
    /// Deadline for each embedding batch.
    pub batch_timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            batch_timeout: Duration::from_secs(120),
        }
    }
}

pub struct Index {
    root: PathBuf,
    keep_snapshots: usize,
    current: RwLock<Option<Arc<Snapshot>>>,
    building: AtomicBool,
}

impl Index {
    /// Open the index rooted at `root`, loading the snapshot named by
    /// `CURRENT` if there is one.
    ///
    /// Leftover staging directories are removed, unless a build holds the
    /// index lock; its staging directory is then left alone. A `CURRENT`
    /// file that names a missing or inconsistent snapshot is an error.
    pub async fn open(root: &Path, keep_snapshots: usize) -> Result<Self, IndexError> {
        if root.join(STAGING_DIR).exists() {
            let root = root.to_path_buf();
            blocking(move || remove_leftover_staging(&root)).await?;
        }

        let current = match read_current(root).map_err(IndexError::storage)? {
            Some(version) => {
                let dir = root.join(SNAPSHOTS_DIR).join(Snapshot::dir_name(version));
                let snap = snapshot::read(&dir).await.map_err(IndexError::storage)?;
                if snap.version != version {
                    return Err(IndexError::Storage(format!(
                        "CURRENT names v{} but the snapshot records v{}",
                        version, snap.version
                    )));
                }
                tracing::info!(
                    version,
                    chunks = snap.chunk_count(),
                    embedder = %snap.embedder,
                    "loaded index snapshot"
                );
                Some(Arc::new(snap))
            }
            None => None,
        };

        Ok(Self {
            root: root.to_path_buf(),
            keep_snapshots: keep_snapshots.max(1),
            current: RwLock::new(current),
            building: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The live snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> IndexState {
        let building = self.building.load(Ordering::Acquire);
        match (building, self.snapshot().is_some()) {
            (false, false) => IndexState::Empty,
            (true, false) => IndexState::Building,
            (false, true) => IndexState::Ready,
            (true, true) => IndexState::Rebuilding,
        }
    }

    /// Embed `chunks` and publish them as a new snapshot.
    pub async fn build(
        &self,
        documents: &[Document],
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        options: BuildOptions,
    ) -> Result<Arc<Snapshot>, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyBuild);
        }
        let mut guard = BuildGuard::acquire(&self.building, &self.root)?;

        let identity = embedder.identity();
        tracing::info!(
            chunks = chunks.len(),
            embedder = %identity,
            "building index snapshot"
        );

        let vectors = embed_all(&chunks, embedder, options).await?;

        let documents: HashMap<_, _> = documents
            .iter()
            .map(|d| (d.id.clone(), d.meta()))
            .collect();
        let mut entries: Vec<Entry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Entry { chunk, vector })
            .collect();
        entries.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));

        let live = self.snapshot().map(|s| s.version).unwrap_or(0);
        let root = self.root.clone();
        let version = blocking(move || latest_version(&root)).await?.max(live) + 1;
        let snap = Snapshot {
            version,
            embedder: identity,
            built_at: chrono::Utc::now(),
            documents,
            entries,
        };
        snap.check_consistency().map_err(IndexError::storage)?;

        let staging = self
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        guard.staging = Some(staging.clone());
        {
            let staging = staging.clone();
            blocking(move || {
                std::fs::create_dir_all(&staging)
                    .with_context(|| format!("creating {}", staging.display()))
            })
            .await?;
        }
        snapshot::write(&staging, &snap)
            .await
            .map_err(IndexError::storage)?;

        // Inline: a cancelled build must not separate the rename from the
        // pointer update.
        self.publish(&staging, version)
            .map_err(IndexError::storage)?;
        guard.staging = None;

        let snap = Arc::new(snap);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snap));
        tracing::info!(
            version,
            documents = snap.document_count(),
            chunks = snap.chunk_count(),
            "index snapshot is live"
        );

        let (root, keep) = (self.root.clone(), self.keep_snapshots);
        if let Err(e) = blocking(move || prune(&root, keep, version)).await {
            tracing::warn!("failed to prune old snapshots: {}", e);
        }

        Ok(snap)
    }

    /// Delete every snapshot and the `CURRENT` pointer.
    pub fn reset(&self) -> Result<(), IndexError> {
        let _guard = BuildGuard::acquire(&self.building, &self.root)?;

        let current = self.root.join(CURRENT_FILE);
        if current.exists() {
            std::fs::remove_file(&current)
                .with_context(|| format!("removing {}", current.display()))
                .map_err(IndexError::storage)?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;

        for dir in [SNAPSHOTS_DIR, STAGING_DIR] {
            let path = self.root.join(dir);
            if path.exists() {
                std::fs::remove_dir_all(&path)
                    .with_context(|| format!("removing {}", path.display()))
                    .map_err(IndexError::storage)?;
            }
        }

        tracing::info!(path = %self.root.display(), "index reset");
        Ok(())
    }

    /// Move a finished staging directory into place and point `CURRENT`
    /// at it.
    fn publish(&self, staging: &Path, version: u64) -> anyhow::Result<()> {
        let snapshots = self.root.join(SNAPSHOTS_DIR);
        std::fs::create_dir_all(&snapshots)?;
        let target = snapshots.join(Snapshot::dir_name(version));
        std::fs::rename(staging, &target)
            .with_context(|| format!("moving snapshot into {}", target.display()))?;

        let tmp = self.root.join(format!("{}.tmp", CURRENT_FILE));
        std::fs::write(&tmp, format!("{}\n", Snapshot::dir_name(version)))
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, self.root.join(CURRENT_FILE)).context("replacing CURRENT")?;
        Ok(())
    }
}

impl Snapshot {
    /// Top `k` chunks by cosine similarity to `vector`, best first.
    ///
    /// Ties are broken by chunk id so results are deterministic.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if vector.len() != self.embedder.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.embedder.dims,
                got: vector.len(),
            });
        }

        let mut scored: Vec<(f32, &Entry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(vector, &e.vector), e))
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.chunk.id.cmp(&b.1.chunk.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .filter_map(|(score, entry)| {
                let document = self.documents.get(&entry.chunk.document_id)?;
                Some(ScoredChunk {
                    chunk: entry.chunk.clone(),
                    document: document.clone(),
                    score,
                })
            })
            .collect())
    }
}

async fn embed_all(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    options: BuildOptions,
) -> Result<Vec<Vec<f32>>, IndexError> {
    let dims = embedder.dims();
    let mut vectors = Vec::with_capacity(chunks.len());

    for (batch_no, batch) in chunks.chunks(options.batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = tokio::time::timeout(options.batch_timeout, embedder.embed(&texts))
            .await
            .map_err(|_| {
                IndexError::Embedding(CapabilityError::timeout(
                    embedder.provider(),
                    options.batch_timeout.as_secs(),
                ))
            })?
            .map_err(IndexError::Embedding)?;

        if embedded.len() != batch.len() {
            return Err(IndexError::VectorCount {
                expected: batch.len(),
                got: embedded.len(),
            });
        }
        if let Some(bad) = embedded.iter().find(|v| v.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                got: bad.len(),
            });
        }

        tracing::debug!(batch = batch_no, size = batch.len(), "embedded batch");
        vectors.extend(embedded);
    }

    Ok(vectors)
}

fn read_current(root: &Path) -> anyhow::Result<Option<u64>> {
    let path = root.join(CURRENT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let name = content.trim();
    let version = Snapshot::parse_dir_name(name)
        .with_context(|| format!("CURRENT holds an invalid snapshot name: {:?}", name))?;
    Ok(Some(version))
}

fn snapshot_versions(root: &Path) -> anyhow::Result<Vec<u64>> {
    let dir = root.join(SNAPSHOTS_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut versions = Vec::new();
    for entry in std::fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(v) = entry.file_name().to_str().and_then(Snapshot::parse_dir_name) {
            versions.push(v);
        }
    }
    Ok(versions)
}

/// Highest published version on disk, 0 when there is none.
fn latest_version(root: &Path) -> anyhow::Result<u64> {
    Ok(snapshot_versions(root)?.into_iter().max().unwrap_or(0))
}

/// Keep the live snapshot and the newest others up to `keep`.
fn prune(root: &Path, keep: usize, live: u64) -> anyhow::Result<()> {
    let mut versions = snapshot_versions(root)?;
    versions.sort_unstable_by(|a, b| b.cmp(a));

    let mut kept = 1;
    for version in versions {
        if version == live {
            continue;
        }
        if kept < keep {
            kept += 1;
            continue;
        }
        let dir = root.join(SNAPSHOTS_DIR).join(Snapshot::dir_name(version));
        std::fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
        tracing::debug!(version, "pruned old snapshot");
    }
    Ok(())
}

/// Remove `staging/` if no build holds the index lock.
fn remove_leftover_staging(root: &Path) -> anyhow::Result<()> {
    let staging = root.join(STAGING_DIR);
    match DirLock::try_acquire(root)? {
        Some(lock) => {
            if staging.exists() {
                tracing::info!(path = %staging.display(), "removing leftover staging builds");
                std::fs::remove_dir_all(&staging)
                    .with_context(|| format!("removing {}", staging.display()))?;
            }
            drop(lock);
        }
        None => {
            tracing::debug!(path = %staging.display(), "index is being rebuilt; staging left in place");
        }
    }
    Ok(())
}

/// Run blocking filesystem work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, IndexError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IndexError::Storage(format!("filesystem task failed: {}", e)))?
        .map_err(IndexError::storage)
}

/// Exclusive advisory lock on `<root>/LOCK`.
///
/// Released when the file handle closes, including when the holding
/// process dies.
struct DirLock {
    _file: File,
}

impl DirLock {
    /// `Ok(None)` when someone else holds the lock.
    fn try_acquire(root: &Path) -> anyhow::Result<Option<Self>> {
        std::fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("locking {}", path.display())),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    // ERROR_LOCK_VIOLATION
    err.kind() == io::ErrorKind::WouldBlock || (cfg!(windows) && err.raw_os_error() == Some(33))
}

/// Holds the in-flight flag and the directory lock for one build or reset.
///
/// Dropping it, on success, error or cancellation, removes any staging
/// directory still registered, then releases the lock and clears the flag.
struct BuildGuard<'a> {
    flag: &'a AtomicBool,
    lock: Option<DirLock>,
    staging: Option<PathBuf>,
}

impl<'a> BuildGuard<'a> {
    fn acquire(flag: &'a AtomicBool, root: &Path) -> Result<Self, IndexError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IndexError::RebuildInProgress)?;
        let mut guard = Self {
            flag,
            lock: None,
            staging: None,
        };
        match DirLock::try_acquire(root) {
            Ok(Some(lock)) => guard.lock = Some(lock),
            Ok(None) => return Err(IndexError::RebuildInProgress),
            Err(e) => return Err(IndexError::storage(e)),
        }
        Ok(guard)
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if let Some(dir) = self.staging.take() {
            if dir.exists() {
                tracing::warn!(path = %dir.display(), "discarding unfinished index build");
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    tracing::warn!(path = %dir.display(), "failed to remove staging build: {}", e);
                }
            }
        }
        self.lock.take();
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::embedding::HashingEmbedder;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_id: format!("{}.json#0", id),
            url: None,
            title: None,
            text: text.to_string(),
        }
    }

    fn corpus(texts: &[&str]) -> (Vec<Document>, Vec<Chunk>) {
        let docs: Vec<Document> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| doc(&format!("d{}", i), t))
            .collect();
        let chunks = Chunker::new(1000, 100).unwrap().chunk_all(&docs);
        (docs, chunks)
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn provider(&self) -> &str {
            "failing"
        }
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            384
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
            Err(CapabilityError::transient("failing", "service unavailable"))
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn provider(&self) -> &str {
            "short"
        }
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn provider(&self) -> &str {
            "slow"
        }
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn staging_is_empty(root: &Path) -> bool {
        let dir = root.join(STAGING_DIR);
        !dir.exists() || std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_open_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        assert_eq!(index.state(), IndexState::Empty);
        assert!(index.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_empty_build_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let err = index
            .build(&[], Vec::new(), &HashingEmbedder::default(), BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::EmptyBuild));
        assert!(!tmp.path().join(CURRENT_FILE).exists());
        assert_eq!(index.state(), IndexState::Empty);
    }

    #[tokio::test]
    async fn test_build_publishes_and_reopens() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["The Eiffel Tower is in Paris."]);

        let snap = index
            .build(&docs, chunks, &HashingEmbedder::default(), BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(index.state(), IndexState::Ready);

        let pointer = std::fs::read_to_string(tmp.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(pointer.trim(), "v000001");
        assert!(staging_is_empty(tmp.path()));

        let reopened = Index::open(tmp.path(), 2).await.unwrap();
        let loaded = reopened.snapshot().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.chunk_count(), 1);
        assert_eq!(loaded.entries[0].vector, snap.entries[0].vector);
    }

    #[tokio::test]
    async fn test_query_orders_and_bounds() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let embedder = HashingEmbedder::default();
        let (docs, chunks) = corpus(&[
            "The Eiffel Tower is in Paris.",
            "Paris is the capital of France.",
            "Photosynthesis happens in leaves.",
        ]);
        let snap = index
            .build(&docs, chunks, &embedder, BuildOptions::default())
            .await
            .unwrap();

        let q = embedder.embed_text("Eiffel Tower Paris");
        for k in 1..=5 {
            let hits = snap.query(&q, k).unwrap();
            assert!(hits.len() <= k);
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        }
        let hits = snap.query(&q, 3).unwrap();
        assert_eq!(hits[0].chunk.document_id, "d0");

        let err = snap.query(&[1.0, 0.0], 3).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 384, got: 2 }));
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_snapshot() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["first corpus"]);
        index
            .build(&docs, chunks, &HashingEmbedder::default(), BuildOptions::default())
            .await
            .unwrap();

        let (docs, chunks) = corpus(&["second corpus"]);
        let err = index
            .build(&docs, chunks.clone(), &FailingEmbedder, BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));

        let err = index
            .build(&docs, chunks, &ShortEmbedder, BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 4, got: 2 }));

        assert_eq!(index.state(), IndexState::Ready);
        let snap = index.snapshot().unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.entries[0].chunk.text, "first corpus");
        assert!(staging_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_concurrent_build_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["alpha", "beta"]);

        let (first, second) = tokio::join!(
            index.build(&docs, chunks.clone(), &SlowEmbedder, BuildOptions::default()),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                assert_eq!(index.state(), IndexState::Building);
                let busy = index.reset().unwrap_err();
                assert!(matches!(busy, IndexError::RebuildInProgress));
                index
                    .build(&docs, chunks.clone(), &SlowEmbedder, BuildOptions::default())
                    .await
            }
        );

        assert!(first.is_ok());
        assert!(matches!(second.unwrap_err(), IndexError::RebuildInProgress));
        assert_eq!(index.state(), IndexState::Ready);
    }

    #[tokio::test]
    async fn test_batch_timeout_is_an_embedding_error() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["alpha"]);
        let options = BuildOptions {
            batch_size: 8,
            batch_timeout: Duration::from_millis(20),
        };

        let err = index
            .build(&docs, chunks, &SlowEmbedder, options)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::Embedding(CapabilityError::Timeout { .. })
        ));
        assert_eq!(index.state(), IndexState::Empty);
    }

    #[tokio::test]
    async fn test_cancelled_build_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["alpha"]);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            index.build(&docs, chunks, &SlowEmbedder, BuildOptions::default()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(index.state(), IndexState::Empty);
        assert!(staging_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_retention_and_versions() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let embedder = HashingEmbedder::default();

        for round in 0..4 {
            let text = format!("round {}", round);
            let (docs, chunks) = corpus(&[text.as_str()]);
            index
                .build(&docs, chunks, &embedder, BuildOptions::default())
                .await
                .unwrap();
        }

        let mut versions = snapshot_versions(tmp.path()).unwrap();
        versions.sort_unstable();
        assert_eq!(versions, vec![3, 4]);
        assert_eq!(index.snapshot().unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_reset_empties_index() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["alpha"]);
        index
            .build(&docs, chunks, &HashingEmbedder::default(), BuildOptions::default())
            .await
            .unwrap();

        index.reset().unwrap();
        assert_eq!(index.state(), IndexState::Empty);
        assert!(!tmp.path().join(CURRENT_FILE).exists());
        assert!(!tmp.path().join(SNAPSHOTS_DIR).exists());

        let reopened = Index::open(tmp.path(), 2).await.unwrap();
        assert_eq!(reopened.state(), IndexState::Empty);
    }

    #[tokio::test]
    async fn test_corrupt_current_pointer_fails_open() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CURRENT_FILE), "garbage").unwrap();
        assert!(matches!(
            Index::open(tmp.path(), 2).await,
            Err(IndexError::Storage(_))
        ));

        std::fs::write(tmp.path().join(CURRENT_FILE), "v000009").unwrap();
        assert!(Index::open(tmp.path(), 2).await.is_err());
    }

    #[tokio::test]
    async fn test_open_removes_leftover_staging() {
        let tmp = TempDir::new().unwrap();
        let leftover = tmp.path().join(STAGING_DIR).join("abandoned");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("index.sqlite"), b"partial").unwrap();

        Index::open(tmp.path(), 2).await.unwrap();
        assert!(!tmp.path().join(STAGING_DIR).exists());
    }

    #[tokio::test]
    async fn test_second_handle_cannot_build_or_reset_during_build() {
        let tmp = TempDir::new().unwrap();
        let first = Index::open(tmp.path(), 2).await.unwrap();
        let second = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["alpha", "beta"]);

        let (a, b) = tokio::join!(
            first.build(&docs, chunks.clone(), &SlowEmbedder, BuildOptions::default()),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let busy = second.reset().unwrap_err();
                assert!(matches!(busy, IndexError::RebuildInProgress));
                second
                    .build(&docs, chunks.clone(), &SlowEmbedder, BuildOptions::default())
                    .await
            }
        );

        assert_eq!(a.unwrap().version, 1);
        assert!(matches!(b.unwrap_err(), IndexError::RebuildInProgress));
        assert_eq!(second.state(), IndexState::Empty);

        // The lock is released once the first build finishes.
        let snap = second
            .build(&docs, chunks, &SlowEmbedder, BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(snap.version, 2);
        assert_eq!(snapshot_versions(tmp.path()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_during_build_keeps_staging() {
        let tmp = TempDir::new().unwrap();
        let index = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["alpha"]);
        let in_flight = tmp.path().join(STAGING_DIR).join("in-flight");

        let (built, reopened) = tokio::join!(
            index.build(&docs, chunks, &SlowEmbedder, BuildOptions::default()),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::fs::create_dir_all(&in_flight).unwrap();
                let reader = Index::open(tmp.path(), 2).await;
                (reader.map(|r| r.state()), in_flight.exists())
            }
        );

        assert_eq!(built.unwrap().version, 1);
        let (state, staging_kept) = reopened;
        assert_eq!(state.unwrap(), IndexState::Empty);
        assert!(staging_kept);

        // With no build running, the next open clears it.
        Index::open(tmp.path(), 2).await.unwrap();
        assert!(!tmp.path().join(STAGING_DIR).exists());
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_build() {
        let tmp = TempDir::new().unwrap();
        let first = Index::open(tmp.path(), 2).await.unwrap();
        let second = Index::open(tmp.path(), 2).await.unwrap();
        let (docs, chunks) = corpus(&["alpha"]);

        assert!(first
            .build(&docs, chunks.clone(), &FailingEmbedder, BuildOptions::default())
            .await
            .is_err());
        second
            .build(&docs, chunks, &HashingEmbedder::default(), BuildOptions::default())
            .await
            .unwrap();
        second.reset().unwrap();
    }
}
