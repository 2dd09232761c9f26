//! Eager (whole-document) extraction entry points.
//!
//! [`extract`] waits for every chunk and returns the merged document. The
//! streaming API in [`crate::stream`] runs the very same [`run_pipeline`]
//! with an event sink and a cancellation receiver attached.

use crate::backend::{HttpBackend, LlmProviderBackend, ModelBackend};
use crate::config::PipelineConfig;
use crate::document::{PageImage, PositionedTextElement, SourceDocument};
use crate::error::DocExtractError;
use crate::output::ExtractedDocument;
use crate::pipeline::assess::{assess_document, ContextAssessment};
use crate::pipeline::chunk::{join_pages, ChunkMetadata, Chunker, DocumentChunk};
use crate::pipeline::layout::reconstruct_pages;
use crate::pipeline::merge::merge;
use crate::pipeline::input;
use crate::progress::{EventSink, PipelineEvent};
use crate::strategy::{Degradation, Dispatcher, StrategyInput};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Load `input` (path or URL) and extract it.
///
/// # Errors
/// Input errors ([`DocExtractError::FileNotFound`],
/// [`DocExtractError::DownloadFailed`], ...) and configuration errors
/// ([`DocExtractError::ModelNotSelected`],
/// [`DocExtractError::ProviderNotConfigured`]). Model failures never surface
/// here: they degrade the affected chunk instead.
pub async fn extract_document(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<ExtractedDocument, DocExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let doc = input::load_document(input_str, config.download_timeout_secs).await?;
    extract(doc, config).await
}

/// Extract an in-memory document.
pub async fn extract(
    doc: SourceDocument,
    config: &PipelineConfig,
) -> Result<ExtractedDocument, DocExtractError> {
    let backend = resolve_backend(config).await?;
    run_pipeline(doc, config, backend, &EventSink::none(), None).await
}

/// Like [`extract_document`], attaching the original file (PDF, image, ...)
/// for the whole-file strategies.
pub async fn extract_with_file(
    input_str: impl AsRef<str>,
    original: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ExtractedDocument, DocExtractError> {
    let mut doc = input::load_document(input_str.as_ref(), config.download_timeout_secs).await?;
    doc.file = Some(input::load_raw_file(original.as_ref()).await?);
    extract(doc, config).await
}

/// Extract and write the document as pretty JSON.
///
/// The file is written to a temporary sibling and renamed into place, so a
/// failed run never leaves a partial file behind.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ExtractedDocument, DocExtractError> {
    let document = extract_document(input_str, config).await?;
    write_document(output_path.as_ref(), &document)?;
    Ok(document)
}

/// Synchronous wrapper around [`extract_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<ExtractedDocument, DocExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_document(input_str, config))
}

/// Assess a document's complexity without extracting it.
///
/// Does not require a model backend.
pub async fn assess_input(input_str: impl AsRef<str>) -> Result<ContextAssessment, DocExtractError> {
    let doc = input::load_document(input_str.as_ref(), 120).await?;
    let text = join_pages(&reconstruct_pages(&doc));
    Ok(assess_document(&doc, &text))
}

/// Write a document as pretty JSON, atomically (temp file + rename).
pub fn write_document(path: &Path, document: &ExtractedDocument) -> Result<(), DocExtractError> {
    write_json_atomic(path, &document.to_json_pretty())
}

fn write_json_atomic(path: &Path, json: &str) -> Result<(), DocExtractError> {
    let write_err = |source: std::io::Error| DocExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(json.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

// ── Backend resolution ───────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DocExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn wrap(provider: Arc<dyn LLMProvider>, label: &str) -> Option<Arc<dyn ModelBackend>> {
    Some(Arc::new(LlmProviderBackend::new(provider, label)))
}

/// Resolve the model backend, from most-specific to least-specific.
///
/// 1. `config.backend` as-is.
/// 2. `config.provider`, wrapped in an [`LlmProviderBackend`].
/// 3. `config.endpoint`: an OpenAI-compatible server through [`HttpBackend`].
/// 4. `config.provider_name` (+ `config.model`) via [`ProviderFactory`].
/// 5. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set.
/// 6. `OPENAI_API_KEY` → OpenAI.
/// 7. [`ProviderFactory::from_env`] auto-detection.
///
/// Returns `Ok(None)` when only the deterministic strategy is configured and
/// no backend was given explicitly.
pub async fn resolve_backend(
    config: &PipelineConfig,
) -> Result<Option<Arc<dyn ModelBackend>>, DocExtractError> {
    if let Some(ref backend) = config.backend {
        return Ok(Some(Arc::clone(backend)));
    }
    if !config.needs_backend() {
        return Ok(None);
    }

    if let Some(ref provider) = config.provider {
        let label = config.provider_name.as_deref().unwrap_or("custom");
        return Ok(wrap(Arc::clone(provider), label));
    }

    if let Some(ref endpoint) = config.endpoint {
        let mut http = HttpBackend::new(endpoint, config.api_key.clone(), config.chunk_timeout_secs)?;
        if let Some(ref upload) = config.upload_endpoint {
            http = http.with_upload_endpoint(upload.clone());
        }
        return Ok(Some(Arc::new(http)));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok(wrap(create_provider(name, model)?, name));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Ok(wrap(create_provider(&prov, &model)?, &prov));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Ok(wrap(create_provider("openai", model)?, "openai"));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No model backend could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, pass --endpoint, or use --strategy deterministic.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(wrap(llm_provider, "auto"))
}

// ── Core pipeline ────────────────────────────────────────────────────────

/// Run the whole pipeline on one document.
///
/// Reconstruct → assess → (whole-file strategies) → chunk → per-chunk
/// cascade → merge. Chunks run sequentially; `cancel` and a closed `sink`
/// are checked before each one.
///
/// # Errors
/// Configuration errors from [`Dispatcher::new`], and
/// [`DocExtractError::Cancelled`] when the run was stopped.
pub async fn run_pipeline(
    doc: SourceDocument,
    config: &PipelineConfig,
    backend: Option<Arc<dyn ModelBackend>>,
    sink: &EventSink,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<ExtractedDocument, DocExtractError> {
    let start = Instant::now();
    let dispatcher = Dispatcher::new(config, backend)?;

    // ── Step 1: Reconstruct and assess ───────────────────────────────────
    let pages = reconstruct_pages(&doc);
    let text = join_pages(&pages);
    let assessment = assess_document(&doc, &text);
    info!(
        "Assessed {} page(s), ~{} tokens: {:?} (score {})",
        doc.pages.len(),
        assessment.estimated_tokens,
        assessment.tier,
        assessment.score
    );
    sink.emit(PipelineEvent::Assessed(assessment));

    let elements: Vec<PositionedTextElement> = doc
        .pages
        .iter()
        .flat_map(|p| p.elements.iter().cloned())
        .collect();
    let SourceDocument { images, file, .. } = doc;

    // ── Step 2: Whole-file strategies ────────────────────────────────────
    let mut prior = Degradation::default();
    if dispatcher.has_file_strategies() {
        let whole = DocumentChunk {
            id: 0,
            spatial_text: text.clone(),
            elements: elements.clone(),
            metadata: ChunkMetadata {
                chunk_index: 0,
                total_chunks: 1,
                page_range: (!pages.is_empty()).then(|| pages.iter().map(|p| p.page_number).collect()),
            },
        };
        match dispatcher.analyze_file(&whole, file.as_ref(), sink).await {
            Ok(mut result) => {
                result.chunk_index = Some(0);
                sink.emit(PipelineEvent::FileAnalyzed {
                    strategy: result.source.clone(),
                    confidence: result.confidence,
                });
                let document = merge(vec![result]);
                info!("Extraction complete (whole file) in {}ms", start.elapsed().as_millis());
                sink.emit(PipelineEvent::Completed(Box::new(document.clone())));
                return Ok(document);
            }
            Err(degradation) => {
                debug!("Whole-file strategies gave no result: {:?}", degradation);
                prior = degradation;
            }
        }
    }

    // ── Step 3: Chunk ────────────────────────────────────────────────────
    let context_window = config
        .context_window_tokens
        .unwrap_or(assessment.context_window_tokens);
    let chunker = Chunker::for_context_window(context_window);
    let chunks = chunker.chunk(&text, &pages, &elements);
    drop(elements);
    let total = chunks.len();
    sink.emit(PipelineEvent::Chunked {
        total_chunks: total,
        budget_tokens: chunker.budget_tokens(),
    });

    // ── Step 4: Analyze chunk by chunk ───────────────────────────────────
    let mut images = images;
    let mut results = Vec::with_capacity(total);
    for (i, chunk) in chunks.iter().enumerate() {
        let cancelled = cancel.as_ref().is_some_and(|rx| *rx.borrow());
        if cancelled || sink.is_closed() {
            info!("Extraction cancelled after {}/{} chunk(s)", i, total);
            sink.emit(PipelineEvent::Cancelled { completed_chunks: i });
            return Err(DocExtractError::Cancelled {
                completed: i,
                total,
            });
        }

        sink.emit(PipelineEvent::ChunkStarted {
            chunk_index: i,
            total_chunks: total,
            pages: chunk.pages().to_vec(),
        });

        let result = {
            let input = StrategyInput {
                chunk,
                images: images_for(&images, chunk.pages()),
                file: file.as_ref(),
            };
            dispatcher.analyze_chunk(&input, &prior, sink).await
        };

        sink.emit(PipelineEvent::ChunkCompleted {
            chunk_index: i,
            total_chunks: total,
            source: result.source.clone(),
            confidence: result.confidence,
            oom_detected: result.oom_detected,
        });
        results.push(result);

        release_images(&mut images, &chunks[i + 1..]);
    }

    // ── Step 5: Merge ────────────────────────────────────────────────────
    let document = merge(results);
    info!(
        "Extraction complete: {} chunk(s), {} item(s), confidence {:.2}, {}ms",
        total,
        document.items.len(),
        document.confidence,
        start.elapsed().as_millis()
    );
    sink.emit(PipelineEvent::Completed(Box::new(document.clone())));
    Ok(document)
}

/// Images for a chunk's pages; every image when the pages are unknown.
fn images_for<'a>(images: &'a [PageImage], pages: &[u32]) -> Vec<&'a PageImage> {
    images
        .iter()
        .filter(|img| pages.is_empty() || pages.contains(&img.page_number))
        .collect()
}

/// Drop images no remaining chunk will look at.
fn release_images(images: &mut Vec<PageImage>, remaining: &[DocumentChunk]) {
    let before = images.len();
    images.retain(|img| {
        remaining
            .iter()
            .any(|c| c.pages().is_empty() || c.pages().contains(&img.page_number))
    });
    if images.len() < before {
        debug!("Released {} page image(s)", before - images.len());
    }
}
