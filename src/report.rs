//! Human-readable output for the `scholar` CLI.
//!
//! Each command prints a short plain-text summary to stdout; `--json`
//! output is produced by the caller with `serde_json` instead.

use std::path::Path;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::models::{AskResponse, Source};
use crate::pipeline::{IngestPreview, IngestReport, IngestStatus, StatusReport};

/// Shown when there is nothing indexed to answer from.
pub const NO_DATA_MESSAGE: &str =
    "No data found. Add JSON documents to the corpus directory and run `scholar ingest`.";

pub fn print_ingest(report: &IngestReport) {
    match report.status {
        IngestStatus::Indexed => println!("ingest complete"),
        IngestStatus::IndexedWithWarnings => println!("ingest complete (some inputs skipped)"),
    }
    println!("  files scanned:    {}", report.files_scanned);
    println!("  documents:        {}", report.document_count);
    println!("  chunks:           {}", report.chunk_count);
    println!("  snapshot:         v{:06}", report.snapshot_version);
    print_warnings(&report.warnings);
}

pub fn print_preview(preview: &IngestPreview) {
    println!("ingest {} (dry-run)", preview.corpus.display());
    println!("  files scanned:    {}", preview.files_scanned);
    println!("  documents:        {}", preview.document_count);
    println!("  estimated chunks: {}", preview.chunk_count);
    print_warnings(&preview.warnings);
}

fn print_warnings<E: std::fmt::Display>(warnings: &[E]) {
    if warnings.is_empty() {
        return;
    }
    println!("  skipped:          {}", warnings.len());
    for w in warnings {
        println!("    - {}", w);
    }
}

pub fn print_answer(response: &AskResponse) {
    match response {
        AskResponse::Answered(answer) => {
            println!("{}", answer.text);
        }
        AskResponse::Degraded { reason, .. } => {
            println!("Answer generation is unavailable ({}).", reason);
            println!("Most relevant passages:");
        }
    }

    let sources = response.sources();
    if !sources.is_empty() {
        println!();
        println!("Sources:");
        for s in sources {
            print_source(s);
        }
    }
}

fn print_source(source: &Source) {
    let label = source.title.as_deref().unwrap_or(&source.source_id);
    println!("  [{}] {} (score: {:.2})", source.rank, label, source.score);
    if let Some(url) = &source.url {
        println!("      {}", url);
    }
    println!("      {}", source.excerpt.replace('\n', " "));
}

pub fn print_status(status: &StatusReport) {
    println!("Scholar Index Status");
    println!("====================");
    println!();
    println!("  Index:       {}", status.index_path.display());
    println!("  Size:        {}", format_bytes(dir_size(&status.index_path)));
    println!("  State:       {}", status.index_state);

    match status.snapshot_version {
        Some(version) => println!("  Snapshot:    v{:06}", version),
        None => println!("  Snapshot:    none"),
    }
    if let Some(built_at) = status.built_at {
        println!("  Built:       {}", format_relative(built_at));
    }

    println!();
    println!("  Documents:   {}", status.document_count);
    println!("  Chunks:      {}", status.chunk_count);

    println!();
    match &status.embedder {
        Some(indexed) => println!("  Embedder:    {}", indexed),
        None => println!("  Embedder:    -"),
    }
    if !status.embedder_matches {
        println!(
            "  WARNING: configured embedder is {}; re-ingest before asking.",
            status.configured_embedder
        );
    }
    println!();
}

/// Total size of all files under `path`.
fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" for recent times, an absolute timestamp otherwise.
fn format_relative(at: DateTime<Utc>) -> String {
    let delta = (Utc::now() - at).num_seconds();

    if delta < 0 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_relative() {
        let now = Utc::now();
        assert_eq!(format_relative(now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(1)), "1 min ago");
        assert_eq!(format_relative(now - Duration::hours(3)), "3 hours ago");
        assert_eq!(format_relative(now - Duration::days(2)), "2 days ago");
    }

    #[test]
    fn test_dir_size_missing_is_zero() {
        assert_eq!(dir_size(Path::new("/nonexistent/index")), 0);
    }
}
