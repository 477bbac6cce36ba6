//! One immutable, versioned index snapshot and its SQLite persistence.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, EmbedderIdentity};
use crate::migrate;
use crate::models::{Chunk, DocumentMeta};

pub(crate) const DB_FILE: &str = "index.sqlite";

/// A chunk and its embedding vector.
#[derive(Debug, Clone)]
pub struct Entry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Fully built index content. Never mutated after construction.
#[derive(Debug)]
pub struct Snapshot {
    pub version: u64,
    pub embedder: EmbedderIdentity,
    pub built_at: DateTime<Utc>,
    pub documents: HashMap<String, DocumentMeta>,
    /// Sorted by chunk id.
    pub entries: Vec<Entry>,
}

impl Snapshot {
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    pub fn dir_name(version: u64) -> String {
        format!("v{:06}", version)
    }

    /// Parse a `vNNNNNN` directory name.
    pub fn parse_dir_name(name: &str) -> Option<u64> {
        let digits = name.strip_prefix('v')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Every chunk references a known document and has one vector of the
    /// recorded dimension.
    pub fn check_consistency(&self) -> Result<()> {
        for entry in &self.entries {
            if !self.documents.contains_key(&entry.chunk.document_id) {
                bail!(
                    "chunk {} references unknown document {}",
                    entry.chunk.id,
                    entry.chunk.document_id
                );
            }
            if entry.vector.len() != self.embedder.dims {
                bail!(
                    "chunk {} has a {}-dim vector, snapshot records {}",
                    entry.chunk.id,
                    entry.vector.len(),
                    self.embedder.dims
                );
            }
        }
        Ok(())
    }
}

/// Write `snapshot` into a new database inside `dir`.
pub(crate) async fn write(dir: &Path, snapshot: &Snapshot) -> Result<()> {
    let pool = db::connect(&dir.join(DB_FILE), true).await?;
    let result = write_tables(&pool, snapshot).await;
    pool.close().await;
    result
}

async fn write_tables(pool: &SqlitePool, snapshot: &Snapshot) -> Result<()> {
    migrate::run_migrations(pool)
        .await
        .context("creating snapshot schema")?;

    let mut tx = pool.begin().await?;

    let meta = [
        ("version", snapshot.version.to_string()),
        ("embedder_provider", snapshot.embedder.provider.clone()),
        ("embedder_model", snapshot.embedder.model.clone()),
        ("embedder_dims", snapshot.embedder.dims.to_string()),
        ("built_at", snapshot.built_at.to_rfc3339()),
    ];
    for (key, value) in meta {
        sqlx::query("INSERT INTO snapshot_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for doc in snapshot.documents.values() {
        sqlx::query(
            "INSERT INTO documents (id, source_id, url, title, char_count) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.source_id)
        .bind(&doc.url)
        .bind(&doc.title)
        .bind(doc.char_count as i64)
        .execute(&mut *tx)
        .await?;
    }

    for entry in &snapshot.entries {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, start_char, text, hash)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.start as i64)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunk_vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await.context("committing snapshot")?;
    Ok(())
}

fn non_negative(value: i64, column: &str) -> Result<usize> {
    usize::try_from(value).with_context(|| format!("negative {}: {}", column, value))
}

fn meta_field<'a>(meta: &'a HashMap<String, String>, key: &str) -> Result<&'a String> {
    meta.get(key)
        .with_context(|| format!("snapshot_meta is missing '{}'", key))
}

/// Load and verify the snapshot database inside `dir`.
pub(crate) async fn read(dir: &Path) -> Result<Snapshot> {
    let path = dir.join(DB_FILE);
    if !path.exists() {
        bail!("snapshot database {} is missing", path.display());
    }
    let pool = db::connect(&path, false).await?;
    let result = read_tables(&pool).await;
    pool.close().await;
    let snapshot = result.with_context(|| format!("reading {}", path.display()))?;
    snapshot
        .check_consistency()
        .with_context(|| format!("snapshot {} is inconsistent", path.display()))?;
    Ok(snapshot)
}

async fn read_tables(pool: &SqlitePool) -> Result<Snapshot> {
    let mut meta = HashMap::new();
    for row in sqlx::query("SELECT key, value FROM snapshot_meta")
        .fetch_all(pool)
        .await?
    {
        let key: String = row.try_get("key")?;
        let value: String = row.try_get("value")?;
        meta.insert(key, value);
    }

    let version: u64 = meta_field(&meta, "version")?.parse().context("bad version")?;
    let embedder = EmbedderIdentity {
        provider: meta_field(&meta, "embedder_provider")?.clone(),
        model: meta_field(&meta, "embedder_model")?.clone(),
        dims: meta_field(&meta, "embedder_dims")?.parse().context("bad embedder_dims")?,
    };
    let built_at = DateTime::parse_from_rfc3339(meta_field(&meta, "built_at")?)
        .context("bad built_at")?
        .with_timezone(&Utc);

    let mut documents = HashMap::new();
    for row in sqlx::query("SELECT id, source_id, url, title, char_count FROM documents")
        .fetch_all(pool)
        .await?
    {
        let doc = DocumentMeta {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            char_count: non_negative(row.try_get("char_count")?, "char_count")?,
        };
        documents.insert(doc.id.clone(), doc);
    }

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.document_id, c.chunk_index, c.start_char, c.text, c.hash,
               v.dims, v.embedding
        FROM chunks c
        LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
        ORDER BY c.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.try_get("id")?;
        let blob: Option<Vec<u8>> = row.try_get("embedding")?;
        let blob = blob.with_context(|| format!("chunk {} has no vector", id))?;
        let dims: i64 = row.try_get("dims")?;
        let vector = blob_to_vec(&blob);
        if vector.len() as i64 != dims {
            bail!("chunk {} vector is truncated", id);
        }
        entries.push(Entry {
            chunk: Chunk {
                document_id: row.try_get("document_id")?,
                chunk_index: row.try_get("chunk_index")?,
                start: non_negative(row.try_get("start_char")?, "start_char")?,
                text: row.try_get("text")?,
                hash: row.try_get("hash")?,
                id,
            },
            vector,
        });
    }

    Ok(Snapshot {
        version,
        embedder,
        built_at,
        documents,
        entries,
    })
}
