//! Corpus loader: JSON / JSON Lines records → [`Document`]s.
//!
//! Walks the corpus directory, selects files with include globs, and
//! resolves every parsed value into a [`CorpusRecord`] before normalizing
//! it into documents. A file may hold a single object, a list of objects,
//! or a bare scalar; each shape has one explicit normalization rule.
//!
//! Bad input never aborts a load. Unreadable files, malformed JSON and
//! empty records are skipped and reported as [`IngestionError`] warnings in
//! the returned [`LoadReport`].

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::error::{ConfigError, IngestionError};
use crate::models::Document;

const TITLE_FIELDS: &[&str] = &["title", "name", "heading"];
const URL_FIELDS: &[&str] = &["url", "source", "link"];
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**"];

/// One parsed corpus value, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum CorpusRecord {
    ListOfRecords(Vec<Value>),
    SingleRecord(Map<String, Value>),
    ScalarRecord(Value),
}

impl From<Value> for CorpusRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => CorpusRecord::ListOfRecords(items),
            Value::Object(map) => CorpusRecord::SingleRecord(map),
            other => CorpusRecord::ScalarRecord(other),
        }
    }
}

/// Text and metadata resolved from one record, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordText {
    pub text: String,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl CorpusRecord {
    /// Normalize into zero or more texts. `None` entries mark records that
    /// held no usable text; they keep their slot so record indices stay
    /// stable.
    pub fn normalize(self, content_fields: &[String]) -> Vec<Option<RecordText>> {
        match self {
            CorpusRecord::ListOfRecords(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => normalize_object(map, content_fields),
                    other => normalize_scalar(other),
                })
                .collect(),
            CorpusRecord::SingleRecord(map) => vec![normalize_object(map, content_fields)],
            CorpusRecord::ScalarRecord(value) => vec![normalize_scalar(value)],
        }
    }
}

fn normalize_object(map: Map<String, Value>, content_fields: &[String]) -> Option<RecordText> {
    let title = first_string(&map, TITLE_FIELDS);
    let url = first_string(&map, URL_FIELDS);

    let from_field = content_fields
        .iter()
        .filter_map(|field| map.get(field))
        .find_map(|value| match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

    let text = match from_field {
        Some(text) => text,
        None if map.is_empty() => return None,
        None => Value::Object(map).to_string(),
    };

    Some(RecordText { text, title, url })
}

fn normalize_scalar(value: Value) -> Option<RecordText> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s,
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(RecordText {
        text,
        title: None,
        url: None,
    })
}

fn first_string(map: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| map.get(*f))
        .find_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Documents plus everything that was skipped while loading them.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub warnings: Vec<IngestionError>,
    pub files_scanned: usize,
}

/// Reads a corpus directory into documents.
#[derive(Debug, Clone)]
pub struct CorpusLoader {
    include: GlobSet,
    exclude: GlobSet,
    content_fields: Vec<String>,
}

impl CorpusLoader {
    pub fn new(config: &CorpusConfig) -> Result<Self, ConfigError> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            content_fields: config.content_fields.clone(),
        })
    }

    /// Load every matching file under `root`, in sorted path order.
    ///
    /// A missing root is an empty corpus, not an error.
    pub fn load(&self, root: &Path) -> LoadReport {
        let mut report = LoadReport::default();
        if !root.exists() {
            tracing::info!(root = %root.display(), "corpus directory does not exist; nothing to load");
            return report;
        }

        let mut files: Vec<(PathBuf, String)> = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    warn(&mut report, IngestionError::Unreadable {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            files.push((path.to_path_buf(), rel_str));
        }

        files.sort_by(|a, b| a.1.cmp(&b.1));

        for (path, rel) in files {
            report.files_scanned += 1;
            self.load_file(&path, &rel, &mut report);
        }

        tracing::info!(
            files = report.files_scanned,
            documents = report.documents.len(),
            skipped = report.warnings.len(),
            "corpus loaded"
        );
        report
    }

    fn load_file(&self, path: &Path, rel: &str, report: &mut LoadReport) {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn(report, IngestionError::Unreadable {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let is_jsonl = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
            .unwrap_or(false);

        let values: Vec<Value> = if is_jsonl {
            let mut values = Vec::new();
            for (n, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(v) => values.push(v),
                    Err(e) => warn(report, IngestionError::MalformedLine {
                        path: path.to_path_buf(),
                        line: n + 1,
                        message: e.to_string(),
                    }),
                }
            }
            values
        } else {
            match serde_json::from_str::<Value>(&content) {
                Ok(v) => vec![v],
                Err(e) => {
                    warn(report, IngestionError::Malformed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                    return;
                }
            }
        };

        let mut index = 0usize;
        for value in values {
            for resolved in CorpusRecord::from(value).normalize(&self.content_fields) {
                match resolved {
                    Some(record) => report.documents.push(make_document(rel, index, record)),
                    None => warn(report, IngestionError::EmptyRecord {
                        path: path.to_path_buf(),
                        index,
                    }),
                }
                index += 1;
            }
        }
    }
}

fn warn(report: &mut LoadReport, err: IngestionError) {
    tracing::warn!("skipping corpus input: {}", err);
    report.warnings.push(err);
}

fn make_document(rel: &str, index: usize, record: RecordText) -> Document {
    let source_id = format!("{}#{}", rel, index);
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    Document {
        id: digest[..16].to_string(),
        source_id,
        url: record.url,
        title: record.title,
        text: record.text,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ConfigError::new(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ConfigError::new(format!("invalid glob set: {}", e)))
}
