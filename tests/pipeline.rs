//! Pipeline integration tests.
//!
//! Every test runs fully offline: model calls go to [`MockBackend`], which
//! replays scripted replies and records the requests it received.

use async_trait::async_trait;
use edgequake_docextract::backend::{ModelRequest, UploadedFile};
use edgequake_docextract::extract::run_pipeline;
use edgequake_docextract::progress::EventSink;
use edgequake_docextract::{
    extract, extract_document_stream, extract_to_file, BackendError, CancelToken,
    DocExtractError, DocumentType, ModelBackend, PageContent, PageImage, PipelineConfig,
    PipelineEvent, SourceDocument, SourceFile, StrategyKind,
};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Replays scripted chat replies (the last one repeats) and records requests.
struct MockBackend {
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    upload_reply: Result<UploadedFile, BackendError>,
    requests: Mutex<Vec<ModelRequest>>,
    needs_model: bool,
    /// Zero-based chat calls that hang instead of answering.
    stall_calls: Vec<usize>,
    /// Cancelled when the first chat request arrives.
    cancel_on_request: Option<CancelToken>,
}

impl MockBackend {
    fn new(replies: Vec<Result<String, BackendError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            upload_reply: Ok(UploadedFile {
                id: "file-1".into(),
                name: "racun.pdf".into(),
            }),
            requests: Mutex::new(Vec::new()),
            needs_model: false,
            stall_calls: Vec::new(),
            cancel_on_request: None,
        }
    }

    fn replying(reply: &str) -> Self {
        Self::new(vec![Ok(reply.to_string())])
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn needs_model(&self) -> bool {
        self.needs_model
    }

    async fn chat(&self, request: &ModelRequest) -> Result<String, BackendError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        if let Some(token) = &self.cancel_on_request {
            token.cancel();
        }
        if self.stall_calls.contains(&call) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    }

    async fn upload(&self, _file: &SourceFile) -> Result<UploadedFile, BackendError> {
        self.upload_reply.clone()
    }
}

const INVOICE_TEXT: &str = "ALATI HORVAT d.o.o.\n\
Ilica 1, 10000 Zagreb\n\
OIB: 12345678901\n\
RAČUN br. R-5/2024\n\
Datum: 15.01.2024.\n\
Rb  Naziv              Kol  Cijena   Iznos\n\
1.  Bušilica Bosch      2   100,00   200,00\n\
Osnovica: 200,00\n\
PDV 25%: 50,00\n\
Ukupno: 250,00 EUR";

/// A page of roughly 4 500 tokens.
fn long_page(number: u32) -> PageContent {
    let mut text = format!("STRANICA-{number}\n");
    let mut i = 1;
    while text.chars().count() < 18_000 {
        text.push_str(&format!(
            "{i:>3}  Usluga održavanja informacijskog sustava, stavka {i}   1 kom   100,00\n"
        ));
        i += 1;
    }
    PageContent {
        page_number: number,
        text,
        elements: Vec::new(),
    }
}

fn text_document(text: &str) -> SourceDocument {
    SourceDocument {
        pages: vec![PageContent {
            page_number: 1,
            text: text.to_string(),
            elements: Vec::new(),
        }],
        ..Default::default()
    }
}

fn config_with(backend: Arc<MockBackend>, strategies: Vec<StrategyKind>) -> PipelineConfig {
    PipelineConfig::builder()
        .backend(backend)
        .strategies(strategies)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

async fn collect_events(
    mut events: edgequake_docextract::EventStream,
) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    out
}

// ── Chunked extraction ───────────────────────────────────────────────────────

#[tokio::test]
async fn two_pages_over_budget_become_two_chunks() {
    let backend = Arc::new(MockBackend::new(vec![
        Ok(r#"{"documentType":"invoice","documentNumber":"R-17/2024","date":"15.01.2024.",
              "currency":"EUR","supplier":{"name":"Alati Horvat d.o.o.","oib":"12345678901"},
              "items":[{"description":"Servis klima uređaja","quantity":1,"unit":"kom",
                        "unitPrice":"100,00","totalPrice":"100,00"}]}"#
            .into()),
        Ok(r#"Evo rezultata: {"items":[{"description":"Zamjena filtera","quantity":2,
              "unitPrice":12.5,"totalPrice":25}],
              "totals":{"subtotal":"125,00","vatAmount":"31,25","totalAmount":"156,25"}} Hvala."#
            .into()),
    ]));
    let config = PipelineConfig::builder()
        .backend(backend.clone())
        .context_window_tokens(8192)
        .build()
        .unwrap();
    let doc = SourceDocument {
        pages: vec![long_page(1), long_page(2)],
        ..Default::default()
    };

    let out = extract(doc, &config).await.unwrap();

    assert_eq!(out.chunk_count, 2);
    assert_eq!(out.document_type, DocumentType::Invoice);
    assert_eq!(out.document_number.as_deref(), Some("R-17/2024"));
    assert_eq!(out.date.as_deref(), Some("2024-01-15"));
    assert_eq!(out.supplier.oib.as_deref(), Some("12345678901"));
    assert_eq!(out.items.len(), 2);
    assert_eq!(out.items[1].position, 2);
    assert_eq!(out.totals.total_amount, Some(156.25));
    assert!((out.confidence - (0.95 + 0.90) / 2.0).abs() < 1e-9);
    assert_eq!(out.chunks[1].analysis_method, "coordinate:balanced");
    assert!(!out.oom_detected);

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].user_text.contains("STRANICA-1"));
    assert!(!requests[0].user_text.contains("STRANICA-2"));
    assert!(requests[1].user_text.contains("STRANICA-2"));
}

#[tokio::test]
async fn out_of_memory_reply_falls_back_to_regex() {
    let backend = Arc::new(MockBackend::replying(
        "Error: CUDA out of memory. Tried to allocate 2.00 GiB",
    ));
    let config = config_with(backend.clone(), vec![StrategyKind::Coordinate]);

    let out = extract(text_document(INVOICE_TEXT), &config).await.unwrap();

    assert_eq!(out.source, "fallback:oom");
    assert!(out.oom_detected);
    assert_eq!(out.analysis_method, "regex");
    assert_eq!(out.document_number.as_deref(), Some("R-5/2024"));
    assert_eq!(out.totals.total_amount, Some(250.0));
    // OOM is not retried.
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn http_500_with_memory_body_counts_as_oom() {
    let backend = Arc::new(MockBackend::new(vec![Err(BackendError::Http {
        status: 500,
        body: "llama_decode: failed to allocate KV cache (VRAM)".into(),
    })]));
    let config = config_with(backend, vec![StrategyKind::Coordinate]);

    let out = extract(text_document(INVOICE_TEXT), &config).await.unwrap();

    assert!(out.oom_detected);
    assert_eq!(out.chunks[0].source, "fallback:oom");
}

#[tokio::test]
async fn deterministic_only_needs_no_backend() {
    let config = PipelineConfig::builder()
        .strategies(vec![StrategyKind::Deterministic])
        .build()
        .unwrap();

    let out = extract(text_document(INVOICE_TEXT), &config).await.unwrap();

    assert_eq!(out.source, "deterministic");
    assert_eq!(out.document_type, DocumentType::Invoice);
    assert!((out.confidence - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn vision_sends_the_chunk_page_images() {
    let backend = Arc::new(MockBackend::replying(
        r#"{"documentType":"delivery","documentNumber":"OT-88"}"#,
    ));
    let config = config_with(backend.clone(), vec![StrategyKind::Vision]);
    let mut doc = text_document("OTPREMNICA OT-88");
    doc.images.push(PageImage {
        page_number: 1,
        width: 10,
        height: 10,
        mime_type: Some("image/png".into()),
        data: vec![0x89, b'P', b'N', b'G'],
    });

    let out = extract(doc, &config).await.unwrap();

    assert_eq!(out.document_type, DocumentType::Delivery);
    assert_eq!(out.source, "vision");
    let requests = backend.requests();
    assert_eq!(requests[0].images.len(), 1);
    assert_eq!(requests[0].images[0].mime_type, "image/png");
}

#[tokio::test]
async fn slow_chunk_times_out_without_stopping_the_rest() {
    let mut mock = MockBackend::replying(
        r#"{"documentNumber":"R-17/2024","items":[{"description":"Zamjena filtera",
            "quantity":2,"unitPrice":12.5,"totalPrice":25}],"totals":{"totalAmount":"156,25"}}"#,
    );
    mock.stall_calls = vec![0];
    let backend = Arc::new(mock);
    let config = PipelineConfig::builder()
        .backend(backend.clone())
        .context_window_tokens(8192)
        .chunk_timeout_secs(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let doc = SourceDocument {
        pages: vec![long_page(1), long_page(2)],
        ..Default::default()
    };

    let out = extract(doc, &config).await.unwrap();

    assert_eq!(out.chunk_count, 2);
    assert_eq!(out.chunks[0].source, "fallback:timeout");
    assert_eq!(out.chunks[0].analysis_method, "regex");
    assert_eq!(out.chunks[1].source, "coordinate");
    assert_eq!(out.document_number.as_deref(), Some("R-17/2024"));
    assert_eq!(out.totals.total_amount, Some(156.25));
    assert_eq!(out.items.len(), 1);
    assert!(!out.oom_detected);
    assert!((out.confidence - (0.6 + 0.95) / 2.0).abs() < 1e-9);
    // The timed-out request is not retried.
    assert_eq!(backend.requests().len(), 2);
}

#[tokio::test]
async fn one_out_of_memory_chunk_degrades_only_itself() {
    let backend = Arc::new(MockBackend::new(vec![
        Ok("Error: CUDA out of memory. Tried to allocate 2.00 GiB".into()),
        Ok(r#"{"documentType":"invoice","documentNumber":"R-17/2024",
              "items":[{"description":"Zamjena filtera","quantity":2,"unitPrice":12.5,
                        "totalPrice":25}],
              "totals":{"totalAmount":"225,00"}}"#
            .into()),
    ]));
    let config = PipelineConfig::builder()
        .backend(backend.clone())
        .context_window_tokens(8192)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let mut first = long_page(1);
    first.text.push_str("1. Bušilica Bosch 2 kom 100,00 200,00
");
    let doc = SourceDocument {
        pages: vec![first, long_page(2)],
        ..Default::default()
    };

    let out = extract(doc, &config).await.unwrap();

    assert_eq!(out.chunk_count, 2);
    assert_eq!(out.chunks[0].source, "fallback:oom");
    assert_eq!(out.chunks[1].source, "coordinate");
    assert!(out.oom_detected);
    assert!((out.confidence - (0.6 + 0.95) / 2.0).abs() < 1e-9);

    let descriptions: Vec<&str> = out.items.iter().map(|i| i.description.as_str()).collect();
    assert_eq!(descriptions, ["Bušilica Bosch", "Zamjena filtera"]);
    let positions: Vec<u32> = out.items.iter().map(|i| i.position).collect();
    assert_eq!(positions, [1, 2]);
    assert_eq!(out.document_number.as_deref(), Some("R-17/2024"));
    assert_eq!(out.totals.total_amount, Some(225.0));
}

// ── Configuration errors ─────────────────────────────────────────────────────

#[tokio::test]
async fn backend_needing_a_model_rejects_a_missing_model() {
    let mut mock = MockBackend::replying("{}");
    mock.needs_model = true;
    let config = config_with(Arc::new(mock), vec![StrategyKind::Vision]);

    let err = extract(text_document(INVOICE_TEXT), &config)
        .await
        .unwrap_err();

    match err {
        DocExtractError::ModelNotSelected { strategy } => assert_eq!(strategy, "vision"),
        other => panic!("unexpected error: {other}"),
    }
}

// ── Whole-file strategies ────────────────────────────────────────────────────

fn pdf_file() -> SourceFile {
    SourceFile {
        name: "racun.pdf".into(),
        mime_type: "application/pdf".into(),
        bytes: b"%PDF-1.7 ...".to_vec(),
    }
}

#[tokio::test]
async fn upload_answers_for_the_whole_file() {
    let backend = Arc::new(MockBackend::replying(
        r#"{"documentType":"quote","documentNumber":"P-3/2024","totals":{"totalAmount":"1.250,00"}}"#,
    ));
    let config = config_with(
        backend.clone(),
        vec![StrategyKind::Upload, StrategyKind::Coordinate],
    );
    let mut doc = text_document(INVOICE_TEXT);
    doc.file = Some(pdf_file());

    let out = extract(doc, &config).await.unwrap();

    assert_eq!(out.source, "upload");
    assert_eq!(out.document_type, DocumentType::Quote);
    assert_eq!(out.totals.total_amount, Some(1250.0));
    assert_eq!(out.chunk_count, 1);
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].file_ids, vec!["file-1".to_string()]);
}

#[tokio::test]
async fn failed_upload_marks_the_chunk_result() {
    let mut mock = MockBackend::replying(r#"{"documentType":"invoice","documentNumber":"R-5/2024"}"#);
    mock.upload_reply = Err(BackendError::Http {
        status: 413,
        body: "payload too large".into(),
    });
    let backend = Arc::new(mock);
    let config = config_with(
        backend.clone(),
        vec![StrategyKind::Upload, StrategyKind::Coordinate],
    );
    let mut doc = text_document(INVOICE_TEXT);
    doc.file = Some(pdf_file());

    let out = extract(doc, &config).await.unwrap();

    assert_eq!(out.source, "fallback:http");
    assert_eq!(out.analysis_method, "coordinate");
    assert_eq!(out.document_number.as_deref(), Some("R-5/2024"));
}

#[tokio::test]
async fn whole_file_strategies_without_a_file_are_skipped() {
    let backend = Arc::new(MockBackend::replying(r#"{"documentNumber":"R-9"}"#));
    let config = config_with(
        backend,
        vec![StrategyKind::RawFile, StrategyKind::Coordinate],
    );

    let out = extract(text_document(INVOICE_TEXT), &config).await.unwrap();

    assert_eq!(out.source, "coordinate");
}

// ── Streaming and cancellation ───────────────────────────────────────────────

#[tokio::test]
async fn stream_reports_the_run_in_order() {
    let backend = Arc::new(MockBackend::replying(
        r#"{"documentType":"invoice","documentNumber":"R-5/2024"}"#,
    ));
    let config = config_with(backend, vec![StrategyKind::Coordinate]);

    let (events, _cancel) = extract_document_stream(text_document(INVOICE_TEXT), &config)
        .await
        .unwrap();
    let events = collect_events(events).await;

    assert!(matches!(events.first(), Some(PipelineEvent::Assessed(_))));
    assert!(matches!(
        events[1],
        PipelineEvent::Chunked { total_chunks: 1, .. }
    ));
    assert!(matches!(
        events[2],
        PipelineEvent::ChunkStarted { chunk_index: 0, .. }
    ));
    match &events[3] {
        PipelineEvent::ChunkCompleted { source, .. } => assert_eq!(source, "coordinate"),
        other => panic!("unexpected event {other:?}"),
    }
    match events.last() {
        Some(PipelineEvent::Completed(doc)) => {
            assert_eq!(doc.document_number.as_deref(), Some("R-5/2024"))
        }
        other => panic!("unexpected last event {other:?}"),
    }
}

#[tokio::test]
async fn stream_reports_strategy_failures() {
    let backend = Arc::new(MockBackend::replying("I could not read this document."));
    let config = config_with(backend, vec![StrategyKind::Coordinate]);

    let (events, _cancel) = extract_document_stream(text_document(INVOICE_TEXT), &config)
        .await
        .unwrap();
    let events = collect_events(events).await;

    let failed = events.iter().find_map(|e| match e {
        PipelineEvent::StrategyFailed {
            chunk_index,
            strategy,
            reason,
            ..
        } => Some((*chunk_index, *strategy, *reason)),
        _ => None,
    });
    assert_eq!(
        failed,
        Some((Some(0), StrategyKind::Coordinate, "unparsable"))
    );
}

#[tokio::test]
async fn cancelling_before_the_first_chunk_stops_the_run() {
    let backend = Arc::new(MockBackend::replying(r#"{"documentNumber":"R-5/2024"}"#));
    let config = config_with(backend.clone(), vec![StrategyKind::Coordinate]);

    // The spawned task has not been polled yet on the test's runtime.
    let (events, cancel) = extract_document_stream(text_document(INVOICE_TEXT), &config)
        .await
        .unwrap();
    cancel.cancel();
    let events = collect_events(events).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Cancelled { completed_chunks: 0 })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Completed(_))));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn cancelling_mid_run_lets_the_current_chunk_finish() {
    let token = CancelToken::new();
    let mut mock = MockBackend::replying(r#"{"documentNumber":"R-17/2024"}"#);
    mock.cancel_on_request = Some(token.clone());
    let backend = Arc::new(mock);
    let config = PipelineConfig::builder()
        .backend(backend.clone())
        .context_window_tokens(8192)
        .build()
        .unwrap();
    let doc = SourceDocument {
        pages: vec![long_page(1), long_page(2)],
        ..Default::default()
    };
    let (sink, mut rx) = EventSink::channel();

    let dyn_backend: Arc<dyn ModelBackend> = backend.clone();
    let err = run_pipeline(doc, &config, Some(dyn_backend), &sink, Some(token.subscribe()))
        .await
        .unwrap_err();
    drop(sink);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(
        err,
        DocExtractError::Cancelled {
            completed: 1,
            total: 2
        }
    ));
    match events.iter().find(|e| matches!(e, PipelineEvent::ChunkCompleted { .. })) {
        Some(PipelineEvent::ChunkCompleted { source, .. }) => assert_eq!(source, "coordinate"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::Cancelled { completed_chunks: 1 })
    ));
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn cancelled_pipeline_returns_an_error() {
    let config = PipelineConfig::builder()
        .strategies(vec![StrategyKind::Deterministic])
        .build()
        .unwrap();
    let token = CancelToken::new();
    token.cancel();

    let err = run_pipeline(
        text_document(INVOICE_TEXT),
        &config,
        None,
        &EventSink::none(),
        Some(token.subscribe()),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        DocExtractError::Cancelled {
            completed: 0,
            total: 1
        }
    ));
}

// ── File output ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn extract_to_file_writes_complete_json() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("racun.json");
    std::fs::write(
        &input,
        serde_json::to_vec(&text_document(INVOICE_TEXT)).unwrap(),
    )
    .unwrap();
    let output = dir.path().join("out").join("racun.result.json");
    let config = PipelineConfig::builder()
        .strategies(vec![StrategyKind::Deterministic])
        .build()
        .unwrap();

    let doc = extract_to_file(input.to_string_lossy(), &output, &config)
        .await
        .unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["documentType"], "invoice");
    assert_eq!(written["documentNumber"], "R-5/2024");
    assert!(written["items"].is_array());
    assert!(written["totals"].is_object());
    assert_eq!(doc.document_number.as_deref(), Some("R-5/2024"));
}

#[tokio::test]
async fn missing_input_file_is_reported() {
    let config = PipelineConfig::builder()
        .strategies(vec![StrategyKind::Deterministic])
        .build()
        .unwrap();
    let err = extract_to_file("/no/such/racun.json", "/tmp/never.json", &config)
        .await
        .unwrap_err();
    assert!(matches!(err, DocExtractError::FileNotFound { .. }));
}
