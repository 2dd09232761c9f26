//! CLI binary for edgequake-docextract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, renders pipeline events as a progress bar and prints
//! the extracted document as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docextract::pipeline::assess::assess_document;
use edgequake_docextract::pipeline::chunk::join_pages;
use edgequake_docextract::pipeline::input::{load_document, load_raw_file};
use edgequake_docextract::pipeline::layout::reconstruct_pages;
use edgequake_docextract::{
    extract, extract_document_stream, write_document, ExtractedDocument, HttpBackend,
    MemoryProfile, PipelineConfig, PipelineEvent, StrategyKind,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress rendering ───────────────────────────────────────────────────────

/// Renders [`PipelineEvent`]s on a single indicatif bar.
struct EventProgress {
    bar: ProgressBar,
}

impl EventProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn handle(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Assessed(a) => {
                self.bar.set_message(format!(
                    "{:?} document, ~{} tokens",
                    a.tier, a.estimated_tokens
                ));
            }
            PipelineEvent::FileAnalyzed {
                strategy,
                confidence,
            } => {
                self.bar.println(format!(
                    "  {} Whole file  {}  {}",
                    green("✓"),
                    strategy,
                    dim(&format!("confidence {confidence:.2}")),
                ));
            }
            PipelineEvent::Chunked {
                total_chunks,
                budget_tokens,
            } => {
                self.activate_bar(*total_chunks);
                self.bar.println(format!(
                    "{} {}",
                    cyan("◆"),
                    bold(&format!(
                        "Extracting {total_chunks} chunk(s) of ≤{budget_tokens} tokens…"
                    ))
                ));
            }
            PipelineEvent::ChunkStarted { chunk_index, pages, .. } => {
                let pages = if pages.is_empty() {
                    String::new()
                } else {
                    format!(" (pages {:?})", pages)
                };
                self.bar.set_message(format!("chunk {}{}", chunk_index + 1, pages));
            }
            PipelineEvent::StrategyFailed {
                chunk_index,
                strategy,
                error,
                ..
            } => {
                let target = match chunk_index {
                    Some(i) => format!("chunk {}", i + 1),
                    None => "file".to_string(),
                };
                let msg = if error.chars().count() > 80 {
                    format!("{}\u{2026}", error.chars().take(79).collect::<String>())
                } else {
                    error.clone()
                };
                self.bar.println(format!(
                    "  {} {:<13} {:<9} {}",
                    red("✗"),
                    strategy.as_str(),
                    target,
                    red(&msg),
                ));
            }
            PipelineEvent::ChunkCompleted {
                chunk_index,
                total_chunks,
                source,
                confidence,
                oom_detected,
            } => {
                let mark = if source.starts_with("fallback") {
                    cyan("⚠")
                } else {
                    green("✓")
                };
                self.bar.println(format!(
                    "  {} Chunk {:>3}/{:<3}  {:<20}  {}{}",
                    mark,
                    chunk_index + 1,
                    total_chunks,
                    source,
                    dim(&format!("confidence {confidence:.2}")),
                    if *oom_detected { red("  OOM") } else { String::new() },
                ));
                self.bar.inc(1);
            }
            PipelineEvent::Cancelled { completed_chunks } => {
                self.bar.finish_and_clear();
                eprintln!(
                    "{} Cancelled after {} chunk(s)",
                    red("✘"),
                    bold(&completed_chunks.to_string())
                );
            }
            PipelineEvent::Completed(doc) => {
                self.bar.finish_and_clear();
                eprintln!(
                    "{} {} {} with {} item(s), confidence {:.2}",
                    if doc.source.starts_with("fallback") {
                        cyan("⚠")
                    } else {
                        green("✔")
                    },
                    bold(doc.document_type.as_str()),
                    doc.document_number.as_deref().unwrap_or("(no number)"),
                    doc.items.len(),
                    doc.confidence,
                );
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Regex-only extraction, no model needed
  docextract --strategy deterministic racun.json

  # Local LM Studio server, coordinate prompt then page images
  docextract --endpoint http://localhost:1234/v1 --model qwen2.5-vl-7b-instruct \
             --strategy coordinate --strategy vision racun.json -o racun.out.json

  # Send the original PDF to an OpenWebUI-style server first
  docextract --endpoint http://localhost:3000 --api-key sk-... --model llama3.2-vision \
             --strategy upload --strategy coordinate --file racun.pdf racun.json

  # Hosted provider through edgequake-llm
  docextract --provider openai --model gpt-4.1-mini racun.json

  # Complexity assessment only (no model needed)
  docextract --assess-only racun.json

  # Models available on a local server
  docextract --endpoint http://localhost:1234 --list-models

STRATEGIES:
  coordinate     reconstructed text + element coordinates (default)
  vision         page images, capped by the memory profile
  upload         upload the original file, then chat about it
  raw_file       post the original file bytes to /v1/files
  deterministic  regex extraction; always tried last

MEMORY PROFILES:
  Profile   Completion tokens  Vision pages/request
  ───────   ─────────────────  ────────────────────
  high      16000              5
  balanced  8000               3 (default)
  low       4000               2
  minimal   2000               1

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  DOCEXTRACT_ENDPOINT     OpenAI-compatible server URL
  DOCEXTRACT_API_KEY      Bearer token for the endpoint
"#;

/// Extract structured data from invoices, quotes and delivery notes.
#[derive(Parser, Debug)]
#[command(
    name = "docextract",
    version,
    about = "Extract structured data from business documents using LLMs with regex fallback",
    long_about = "Extract supplier, buyer, line items and totals from business documents \
(positioned-text JSON from a page/OCR tool, images or PDFs). Works with hosted providers \
through edgequake-llm and with any OpenAI-compatible endpoint (LM Studio, OpenWebUI, vLLM).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document: positioned-text JSON, image or PDF (local path or URL).
    #[arg(required_unless_present = "list_models")]
    input: Option<String>,

    /// Write the JSON result to this file instead of stdout.
    #[arg(short, long, env = "DOCEXTRACT_OUTPUT")]
    output: Option<PathBuf>,

    /// Strategy to try, in order; repeat the flag for a cascade.
    #[arg(long = "strategy", value_enum, env = "DOCEXTRACT_STRATEGY", value_delimiter = ',')]
    strategies: Vec<StrategyArg>,

    /// Model ID (required for --endpoint servers).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// OpenAI-compatible server URL (e.g. http://localhost:1234/v1).
    #[arg(long, env = "DOCEXTRACT_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token for --endpoint.
    #[arg(long, env = "DOCEXTRACT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Exact file-upload URL; probes the usual paths when unset.
    #[arg(long, env = "DOCEXTRACT_UPLOAD_ENDPOINT")]
    upload_endpoint: Option<String>,

    /// Original file (PDF, image) for the upload and raw_file strategies.
    #[arg(long, env = "DOCEXTRACT_FILE")]
    file: Option<PathBuf>,

    /// Override the assessed context window (tokens, ≥512).
    #[arg(long, env = "DOCEXTRACT_CONTEXT_WINDOW")]
    context_window: Option<usize>,

    /// Memory profile of the model server.
    #[arg(long, env = "DOCEXTRACT_MEMORY_PROFILE", value_enum, default_value = "balanced")]
    memory_profile: MemoryProfileArg,

    /// Max completion tokens (defaults to the memory profile's limit).
    #[arg(long, env = "DOCEXTRACT_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "DOCEXTRACT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per strategy on transient failures.
    #[arg(long, env = "DOCEXTRACT_MAX_RETRIES", default_value_t = 1)]
    max_retries: u32,

    /// Timeout for each strategy attempt on a chunk, in seconds.
    #[arg(long, env = "DOCEXTRACT_CHUNK_TIMEOUT", default_value_t = 120)]
    chunk_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCEXTRACT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOCEXTRACT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "DOCEXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Print the complexity assessment only, no extraction.
    #[arg(long)]
    assess_only: bool,

    /// List the models served by --endpoint and exit.
    #[arg(long)]
    list_models: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCEXTRACT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Coordinate,
    Vision,
    Upload,
    #[value(name = "raw_file", alias = "raw-file")]
    RawFile,
    Deterministic,
}

impl From<StrategyArg> for StrategyKind {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Coordinate => StrategyKind::Coordinate,
            StrategyArg::Vision => StrategyKind::Vision,
            StrategyArg::Upload => StrategyKind::Upload,
            StrategyArg::RawFile => StrategyKind::RawFile,
            StrategyArg::Deterministic => StrategyKind::Deterministic,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MemoryProfileArg {
    High,
    Balanced,
    Low,
    Minimal,
}

impl From<MemoryProfileArg> for MemoryProfile {
    fn from(v: MemoryProfileArg) -> Self {
        match v {
            MemoryProfileArg::High => MemoryProfile::HighMemory,
            MemoryProfileArg::Balanced => MemoryProfile::Balanced,
            MemoryProfileArg::Low => MemoryProfile::LowMemory,
            MemoryProfileArg::Minimal => MemoryProfile::Minimal,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.assess_only && !cli.list_models;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── List-models mode ─────────────────────────────────────────────────
    if cli.list_models {
        let endpoint = cli
            .endpoint
            .as_deref()
            .context("--list-models needs --endpoint")?;
        let backend = HttpBackend::new(endpoint, cli.api_key.clone(), cli.chunk_timeout)
            .context("Invalid endpoint")?;
        let models = backend
            .list_models()
            .await
            .with_context(|| format!("Failed to list models at {}", backend.base_url()))?;
        for model in models {
            println!("{model}");
        }
        return Ok(());
    }

    // ── Load input ───────────────────────────────────────────────────────
    let input = cli.input.as_deref().context("No input document given")?;
    let mut doc = load_document(input, cli.download_timeout)
        .await
        .with_context(|| format!("Failed to load {input}"))?;
    if let Some(ref path) = cli.file {
        doc.file = Some(
            load_raw_file(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    // ── Assess-only mode ─────────────────────────────────────────────────
    if cli.assess_only {
        let text = join_pages(&reconstruct_pages(&doc));
        let assessment = assess_document(&doc, &text);
        println!(
            "{}",
            serde_json::to_string_pretty(&assessment).context("Failed to serialize assessment")?
        );
        return Ok(());
    }

    let config = build_config(&cli).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let document = if show_progress {
        run_with_progress(doc, &config).await?
    } else {
        extract(doc, &config).await.context("Extraction failed")?
    };

    if let Some(ref output_path) = cli.output {
        write_document(output_path, &document).context("Failed to write output")?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&output_path.display().to_string()));
        }
    } else {
        println!("{}", document.to_json_pretty());
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Extracted {} item(s) from {} chunk(s), confidence {:.2}{}",
            document.items.len(),
            document.chunk_count,
            document.confidence,
            if document.oom_detected { " (model ran out of memory)" } else { "" }
        );
    }

    Ok(())
}

/// Drive the streaming API, rendering events; Ctrl-C cancels before the
/// next chunk.
async fn run_with_progress(
    doc: edgequake_docextract::SourceDocument,
    config: &PipelineConfig,
) -> Result<ExtractedDocument> {
    let progress = EventProgress::new();
    let (mut events, cancel) = match extract_document_stream(doc, config).await {
        Ok(started) => started,
        Err(e) => {
            progress.bar.finish_and_clear();
            return Err(e).context("Extraction failed");
        }
    };

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut document = None;
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                progress.handle(&event);
                if let PipelineEvent::Completed(doc) = event {
                    document = Some(*doc);
                }
            }
            _ = &mut ctrl_c, if !cancel.is_cancelled() => {
                progress.bar.println(format!("{} Cancelling after the current chunk…", cyan("◆")));
                cancel.cancel();
            }
        }
    }

    document.context("Extraction did not complete")
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .memory_profile(cli.memory_profile.into())
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .chunk_timeout_secs(cli.chunk_timeout)
        .download_timeout_secs(cli.download_timeout);

    if !cli.strategies.is_empty() {
        builder = builder.strategies(cli.strategies.iter().map(|s| (*s).into()).collect());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint.clone());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref url) = cli.upload_endpoint {
        builder = builder.upload_endpoint(url.clone());
    }
    if let Some(tokens) = cli.context_window {
        builder = builder.context_window_tokens(tokens);
    }
    if let Some(n) = cli.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
