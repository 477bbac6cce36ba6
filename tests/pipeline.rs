//! End-to-end tests of the library pipeline with the offline hashing
//! embedder and in-process stub generators.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scholar_rag::config::Config;
use scholar_rag::embedding::{Embedder, HashingEmbedder};
use scholar_rag::error::{CapabilityError, Error, IndexError, RetrievalError, SynthesisError};
use scholar_rag::generation::{DisabledGenerator, Generator};
use scholar_rag::index::IndexState;
use scholar_rag::models::AskResponse;
use scholar_rag::pipeline::{AskOptions, IngestStatus, Pipeline};
use tempfile::TempDir;

/// Answers with the context it was given, so tests can see what was cited.
struct ContextEcho;

#[async_trait]
impl Generator for ContextEcho {
    fn provider(&self) -> &str {
        "echo"
    }
    fn model_name(&self) -> &str {
        "echo"
    }
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let context = prompt
            .split("Context:\n")
            .nth(1)
            .and_then(|rest| rest.split("\n\nQuestion:").next())
            .unwrap_or_default();
        Ok(format!("Based on [1]: {}", context))
    }
}

/// Hashing embedder that can be switched to fail on demand.
struct FlakyEmbedder {
    inner: HashingEmbedder,
    failing: AtomicBool,
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn provider(&self) -> &str {
        self.inner.provider()
    }
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CapabilityError::transient("hashing", "simulated outage"));
        }
        self.inner.embed(texts).await
    }
}

/// Hashing embedder that takes a while per batch.
struct SlowEmbedder(HashingEmbedder);

#[async_trait]
impl Embedder for SlowEmbedder {
    fn provider(&self) -> &str {
        self.0.provider()
    }
    fn model_name(&self) -> &str {
        self.0.model_name()
    }
    fn dims(&self) -> usize {
        self.0.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.0.embed(texts).await
    }
}

fn config_for(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.corpus.root = tmp.path().join("data");
    config.index.path = tmp.path().join("db");
    config
}

fn write_corpus(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (name, content) in files {
        fs::write(dir.join(name), content).unwrap();
    }
}

async fn pipeline_with(
    config: Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
) -> Pipeline {
    Pipeline::with_capabilities(config, embedder, generator)
        .await
        .unwrap()
}

async fn echo_pipeline(tmp: &TempDir) -> Pipeline {
    pipeline_with(
        config_for(tmp),
        Arc::new(HashingEmbedder::default()),
        Arc::new(ContextEcho),
    )
    .await
}

const LANDMARKS: &str = r#"[
  {"title": "Eiffel Tower", "content": "The Eiffel Tower is in Paris."},
  {"title": "Great Wall", "content": "The Great Wall of China stretches thousands of kilometres."},
  {"title": "Colosseum", "content": "The Colosseum is an ancient amphitheatre in Rome."},
  {"title": "Machu Picchu", "content": "Machu Picchu is an Inca citadel high in the Andes of Peru."},
  {"title": "Taj Mahal", "content": "The Taj Mahal is a white marble mausoleum in Agra, India."}
]"#;

#[tokio::test]
async fn test_eiffel_scenario() {
    let tmp = TempDir::new().unwrap();
    write_corpus(
        &tmp.path().join("data"),
        &[("eiffel.json", r#"{"content": "The Eiffel Tower is in Paris."}"#)],
    );
    let pipeline = echo_pipeline(&tmp).await;

    let report = pipeline.ingest(None).await.unwrap();
    assert_eq!(report.status, IngestStatus::Indexed);
    assert_eq!(report.document_count, 1);
    assert_eq!(report.chunk_count, 1);
    assert_eq!(report.snapshot_version, 1);

    let response = pipeline.ask("Where is the Eiffel Tower?", None).await.unwrap();
    let text = response.answer_text().unwrap();
    assert!(text.contains("Paris"), "answer: {}", text);
    let sources = response.sources();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].rank, 1);
    assert_eq!(sources[0].source_id, "eiffel.json#0");
    assert_eq!(sources[0].excerpt, "The Eiffel Tower is in Paris.");
}

#[tokio::test]
async fn test_ask_before_ingest_is_no_data() {
    let tmp = TempDir::new().unwrap();
    let pipeline = echo_pipeline(&tmp).await;

    let err = pipeline.ask("Where is the Eiffel Tower?", None).await.unwrap_err();
    assert!(matches!(err, Error::Retrieval(RetrievalError::NoIndex)));
    assert!(err.is_no_data());
    assert_eq!(pipeline.status().index_state, IndexState::Empty);
}

#[tokio::test]
async fn test_empty_corpus_is_no_corpus() {
    let tmp = TempDir::new().unwrap();
    write_corpus(
        &tmp.path().join("data"),
        &[("empty.json", "[]"), ("blank.json", r#"{"content": "   "}"#)],
    );
    let pipeline = echo_pipeline(&tmp).await;

    let err = pipeline.ingest(None).await.unwrap_err();
    assert!(matches!(err, Error::NoCorpus { .. }));
    assert!(err.is_no_data());
}

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let pipeline = echo_pipeline(&tmp).await;
    let retriever = pipeline.retriever();

    pipeline.ingest(None).await.unwrap();
    let first = retriever.search("ancient monuments in Rome", Some(5)).await.unwrap();

    let report = pipeline.ingest(None).await.unwrap();
    assert_eq!(report.snapshot_version, 2);
    let second = retriever.search("ancient monuments in Rome", Some(5)).await.unwrap();

    let ids = |r: &scholar_rag::models::RetrievalResult| {
        r.hits.iter().map(|h| h.chunk.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.snapshot_version, 1);
    assert_eq!(second.snapshot_version, 2);
}

#[tokio::test]
async fn test_top_k_bound_and_ordering() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let pipeline = echo_pipeline(&tmp).await;
    pipeline.ingest(None).await.unwrap();

    for k in 1..=7 {
        let result = pipeline
            .retriever()
            .search("Where is the Eiffel Tower?", Some(k))
            .await
            .unwrap();
        assert!(result.hits.len() <= k);
        assert_eq!(result.hits.len(), k.min(5));
        assert!(result.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    let top = pipeline
        .retriever()
        .search("Where is the Eiffel Tower?", Some(1))
        .await
        .unwrap();
    assert_eq!(top.hits[0].document.title.as_deref(), Some("Eiffel Tower"));
}

#[tokio::test]
async fn test_reingest_replaces_old_content() {
    let tmp = TempDir::new().unwrap();
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    write_corpus(
        &first,
        &[("a.json", r#"{"content": "Volcanoes erupt molten lava and ash."}"#)],
    );
    write_corpus(
        &second,
        &[("b.json", r#"{"content": "Penguins live in the southern hemisphere."}"#)],
    );
    let pipeline = echo_pipeline(&tmp).await;

    pipeline.ingest(Some(&first)).await.unwrap();
    pipeline.ingest(Some(&second)).await.unwrap();

    let result = pipeline
        .retriever()
        .search("volcanoes erupt lava", Some(5))
        .await
        .unwrap();
    assert!(result.hits.iter().all(|h| !h.chunk.text.contains("Volcanoes")));
    assert!(result.hits.iter().all(|h| h.score < 0.5));
}

#[tokio::test]
async fn test_failed_build_keeps_previous_snapshot() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let embedder = Arc::new(FlakyEmbedder {
        inner: HashingEmbedder::default(),
        failing: AtomicBool::new(false),
    });
    let pipeline = pipeline_with(config_for(&tmp), embedder.clone(), Arc::new(ContextEcho)).await;

    pipeline.ingest(None).await.unwrap();
    embedder.failing.store(true, Ordering::SeqCst);

    let err = pipeline.ingest(None).await.unwrap_err();
    assert!(matches!(err, Error::IndexBuild(IndexError::Embedding(_))));
    assert_eq!(err.user_status().as_str(), "unavailable");

    let status = pipeline.status();
    assert_eq!(status.index_state, IndexState::Ready);
    assert_eq!(status.snapshot_version, Some(1));

    // The old snapshot still answers, as long as queries can be embedded.
    embedder.failing.store(false, Ordering::SeqCst);
    let response = pipeline.ask("Where is the Eiffel Tower?", Some(1)).await.unwrap();
    assert!(response.answer_text().unwrap().contains("Paris"));
}

#[tokio::test]
async fn test_concurrent_ingest_is_rejected() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let pipeline = Arc::new(
        pipeline_with(
            config_for(&tmp),
            Arc::new(SlowEmbedder(HashingEmbedder::default())),
            Arc::new(ContextEcho),
        )
        .await,
    );

    let background = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.ingest(None).await.map(|r| r.snapshot_version) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = pipeline.ingest(None).await.unwrap_err();
    assert!(matches!(err, Error::IndexBuild(IndexError::RebuildInProgress)));
    assert_eq!(err.user_status().as_str(), "conflict");
    assert!(matches!(
        pipeline.reset().unwrap_err(),
        Error::IndexBuild(IndexError::RebuildInProgress)
    ));

    assert_eq!(background.await.unwrap().unwrap(), 1);
    assert_eq!(pipeline.status().index_state, IndexState::Ready);
}

#[tokio::test]
async fn test_build_timeout_keeps_index_empty() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let mut config = config_for(&tmp);
    config.index.build_timeout_secs = 0;
    let pipeline = pipeline_with(
        config,
        Arc::new(SlowEmbedder(HashingEmbedder::default())),
        Arc::new(ContextEcho),
    )
    .await;

    let err = pipeline.ingest(None).await.unwrap_err();
    assert!(matches!(err, Error::IndexBuild(IndexError::Timeout(0))));
    assert_eq!(pipeline.status().index_state, IndexState::Empty);
    assert!(!tmp.path().join("db").join("CURRENT").exists());
}

#[tokio::test]
async fn test_snapshot_survives_reopen_and_detects_embedder_change() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    {
        let pipeline = echo_pipeline(&tmp).await;
        pipeline.ingest(None).await.unwrap();
    }

    let reopened = echo_pipeline(&tmp).await;
    let status = reopened.status();
    assert_eq!(status.index_state, IndexState::Ready);
    assert_eq!(status.snapshot_version, Some(1));
    assert_eq!(status.document_count, 5);
    assert!(status.embedder_matches);
    let response = reopened.ask("Where is the Eiffel Tower?", Some(1)).await.unwrap();
    assert!(response.answer_text().unwrap().contains("Paris"));

    let changed = pipeline_with(
        config_for(&tmp),
        Arc::new(HashingEmbedder::new(128).unwrap()),
        Arc::new(ContextEcho),
    )
    .await;
    assert!(!changed.status().embedder_matches);
    let err = changed.ask("Where is the Eiffel Tower?", None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Retrieval(RetrievalError::EmbedderMismatch { .. })
    ));
    assert_eq!(err.user_status().as_str(), "invalid");
}

#[tokio::test]
async fn test_degraded_and_strict_answers() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let pipeline = pipeline_with(
        config_for(&tmp),
        Arc::new(HashingEmbedder::default()),
        Arc::new(DisabledGenerator),
    )
    .await;
    pipeline.ingest(None).await.unwrap();

    let response = pipeline.ask("Where is the Eiffel Tower?", Some(3)).await.unwrap();
    assert!(response.is_degraded());
    assert!(response.answer_text().is_none());
    assert_eq!(response.sources().len(), 3);
    assert_eq!(response.sources()[0].title.as_deref(), Some("Eiffel Tower"));
    match &response {
        AskResponse::Degraded { reason, .. } => assert!(reason.contains("disabled")),
        AskResponse::Answered(_) => unreachable!(),
    }

    let err = pipeline
        .ask_with(
            "Where is the Eiffel Tower?",
            AskOptions {
                k: Some(3),
                allow_degraded: Some(false),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Synthesis(SynthesisError::Generation(_))));
}

#[tokio::test]
async fn test_blank_question_gets_fixed_answer() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let pipeline = pipeline_with(
        config_for(&tmp),
        Arc::new(HashingEmbedder::default()),
        Arc::new(DisabledGenerator),
    )
    .await;
    pipeline.ingest(None).await.unwrap();

    // No hits means the generator is never called, so even a disabled
    // generator produces a normal answer.
    let response = pipeline.ask("   ", None).await.unwrap();
    assert!(!response.is_degraded());
    assert!(response.sources().is_empty());
    assert_eq!(
        response.answer_text(),
        Some(scholar_rag::synthesize::NO_RELEVANT_ANSWER)
    );
}

#[tokio::test]
async fn test_malformed_file_is_skipped_with_warning() {
    let tmp = TempDir::new().unwrap();
    write_corpus(
        &tmp.path().join("data"),
        &[
            ("a_good.json", r#"{"content": "The Eiffel Tower is in Paris."}"#),
            ("b_broken.json", r#"{"content": "unterminated"#),
            ("c_good.jsonl", "{\"text\": \"The Louvre is a museum in Paris.\"}\n"),
        ],
    );
    let pipeline = echo_pipeline(&tmp).await;

    let report = pipeline.ingest(None).await.unwrap();
    assert_eq!(report.status, IngestStatus::IndexedWithWarnings);
    assert_eq!(report.document_count, 2);
    assert_eq!(report.files_scanned, 3);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].to_string().contains("b_broken.json"));
}

#[tokio::test]
async fn test_long_document_chunks_and_preview() {
    let tmp = TempDir::new().unwrap();
    let paragraphs: Vec<String> = (0..40)
        .map(|i| format!("Paragraph {} describes landmark number {} in detail.", i, i))
        .collect();
    let record = serde_json::json!({ "title": "Long", "content": paragraphs.join("\n\n") });
    write_corpus(
        &tmp.path().join("data"),
        &[("long.json", record.to_string().as_str())],
    );
    let pipeline = echo_pipeline(&tmp).await;

    let preview = pipeline.preview(None);
    assert_eq!(preview.document_count, 1);
    assert!(preview.chunk_count > 1);
    assert!(!tmp.path().join("db").join("CURRENT").exists());

    let report = pipeline.ingest(None).await.unwrap();
    assert_eq!(report.chunk_count, preview.chunk_count);
}

#[tokio::test]
async fn test_reset_then_ask_is_no_data() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let pipeline = echo_pipeline(&tmp).await;
    pipeline.ingest(None).await.unwrap();

    pipeline.reset().unwrap();
    assert_eq!(pipeline.status().index_state, IndexState::Empty);
    let err = pipeline.ask("Eiffel", None).await.unwrap_err();
    assert!(err.is_no_data());

    let report = pipeline.ingest(None).await.unwrap();
    assert_eq!(report.snapshot_version, 1);
}

#[tokio::test]
async fn test_second_pipeline_on_same_index_is_rejected() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let slow = || -> Arc<dyn Embedder> { Arc::new(SlowEmbedder(HashingEmbedder::default())) };
    let writer = pipeline_with(config_for(&tmp), slow(), Arc::new(ContextEcho)).await;
    let other = pipeline_with(config_for(&tmp), slow(), Arc::new(ContextEcho)).await;

    let (first, second) = tokio::join!(writer.ingest(None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        other.ingest(None).await
    });

    assert_eq!(first.unwrap().snapshot_version, 1);
    let err = second.unwrap_err();
    assert!(matches!(err, Error::IndexBuild(IndexError::RebuildInProgress)));
    assert_eq!(err.user_status().as_str(), "conflict");
}

#[tokio::test]
async fn test_reader_opened_during_ingest_does_not_disturb_it() {
    let tmp = TempDir::new().unwrap();
    write_corpus(&tmp.path().join("data"), &[("landmarks.json", LANDMARKS)]);
    let writer = pipeline_with(
        config_for(&tmp),
        Arc::new(SlowEmbedder(HashingEmbedder::default())),
        Arc::new(ContextEcho),
    )
    .await;

    let (ingested, reader_state) = tokio::join!(writer.ingest(None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let reader = echo_pipeline(&tmp).await;
        reader.status().index_state
    });

    assert_eq!(ingested.unwrap().snapshot_version, 1);
    assert_eq!(reader_state, IndexState::Empty);

    let reader = echo_pipeline(&tmp).await;
    let response = reader.ask("Where is the Eiffel Tower?", Some(1)).await.unwrap();
    assert!(response.answer_text().unwrap().contains("Paris"));
}
