//! CLI binary for chunkcanvas-ingest.
//!
//! A thin shim over the library crate: maps flags to `BackendConfig`, runs
//! the inputs through a `BatchOrchestrator` and prints the combined text.

use anyhow::{bail, Context, Result};
use chunkcanvas_ingest::config::{DEFAULT_OLLAMA_ENDPOINT, DEFAULT_OPENAI_COMPAT_ENDPOINT};
use chunkcanvas_ingest::models::{list_ollama_models, list_openai_models};
use chunkcanvas_ingest::orchestrator::NoopObserver;
use chunkcanvas_ingest::{
    write_output, BackendConfig, BatchFile, BatchObserver, BatchOrchestrator, BatchRequest,
    BatchState, CancelToken, FileStatus, Pipeline, Registry,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── Batch observer using indicatif ───────────────────────────────────────

/// Drives one progress bar from the weighted batch progress and prints a
/// line whenever a file reaches a terminal state.
struct CliObserver {
    bar: Option<ProgressBar>,
    echo_tokens: bool,
    reported: Mutex<Vec<bool>>,
    started: Instant,
}

impl CliObserver {
    fn new(total_files: usize, show_progress: bool, echo_tokens: bool) -> Self {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new(100);
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.set_prefix("Ingesting");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Self {
            bar,
            echo_tokens,
            reported: Mutex::new(vec![false; total_files]),
            started: Instant::now(),
        }
    }

    fn println(&self, line: String) {
        match self.bar {
            Some(ref bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

impl BatchObserver for CliObserver {
    fn on_state(&self, state: &BatchState) {
        if let Some(ref bar) = self.bar {
            bar.set_position(state.progress.round() as u64);
            if let Some(file) = state.files.get(state.current_index) {
                bar.set_message(format!(
                    "{}/{} {}  {}",
                    state.current_index + 1,
                    state.total_files,
                    file.name,
                    dim(&file.message)
                ));
            }
        }

        let Ok(mut reported) = self.reported.lock() else {
            return;
        };
        for (i, file) in state.files.iter().enumerate() {
            if reported[i] || !file.status.is_terminal() {
                continue;
            }
            reported[i] = true;
            let line = match (&file.status, &file.result) {
                (FileStatus::Completed, Some(r)) if r.failed_units > 0 => format!(
                    "  {} {}  {}",
                    yellow("⚠"),
                    file.name,
                    dim(&format!(
                        "{} page(s), {} failed, {} chars",
                        r.pages,
                        r.failed_units,
                        r.text.len()
                    ))
                ),
                (FileStatus::Completed, Some(r)) => format!(
                    "  {} {}  {}",
                    green("✓"),
                    file.name,
                    dim(&format!("{} page(s), {} chars", r.pages, r.text.len()))
                ),
                (FileStatus::Failed(msg), _) => {
                    format!("  {} {}  {}", red("✗"), file.name, red(msg))
                }
                (FileStatus::Cancelled, _) => format!("  {} {}  cancelled", yellow("■"), file.name),
                _ => continue,
            };
            self.println(line);
        }
    }

    fn on_token(&self, _file_index: usize, _page_num: usize, token: &str) {
        if self.echo_tokens {
            match self.bar {
                Some(ref bar) => bar.suspend(|| eprint!("{token}")),
                None => eprint!("{token}"),
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan through a local Ollama vision model
  canvas-ingest -p ollama --model llava:13b scan.pdf

  # Several files through a hosted model, ten pages per request
  CANVAS_API_KEY=sk-or-... canvas-ingest -p cloud --pages-per-batch 10 a.pdf b.pdf -o all.md

  # LM Studio / vLLM, at most four pages in flight, tokens echoed live
  canvas-ingest -p openai-compatible --endpoint http://localhost:1234/v1 --concurrency 4 --stream report.pdf

  # Audio transcription
  canvas-ingest -p openai-compatible --model whisper-1 meeting.mp3

  # Docling server, JSON batch state
  canvas-ingest -p docling --json paper.pdf > paper.json

  # Which models does the local server offer?
  canvas-ingest -p ollama --list-models

PIPELINES:
  Name                 Aliases                  Inputs
  ──────────────────   ──────────────────────   ─────────────────────────
  cloud                openrouter, gemini       pdf, image, audio, video
  ollama               local-vision             pdf, image
  openai-compatible    lmstudio, vllm           pdf, image, audio, video
  docling              external                 pdf
  .txt/.md/.csv/.tsv files are read directly, whatever the pipeline.

ENVIRONMENT VARIABLES:
  CANVAS_PIPELINE      Default pipeline
  CANVAS_ENDPOINT      Backend base URL
  CANVAS_MODEL         Model ID
  CANVAS_API_KEY       Bearer credential (cloud, optional for local servers)
  RUST_LOG             Log filter, overrides --verbose / --quiet

PDF rendering uses the system pdfium library (libpdfium.so / .dylib / pdfium.dll)
found next to the binary or on the library search path.
"#;

/// Convert PDFs, images, audio and video to text through local or cloud models.
#[derive(Parser, Debug)]
#[command(
    name = "canvas-ingest",
    version,
    about = "Convert documents and media to text through local or cloud inference backends",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs, processed in order.
    #[arg(required_unless_present = "list_models")]
    inputs: Vec<String>,

    /// Backend pipeline: cloud, ollama, openai-compatible, docling.
    #[arg(short, long, env = "CANVAS_PIPELINE", default_value = "cloud",
          value_parser = parse_pipeline)]
    pipeline: Pipeline,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "CANVAS_OUTPUT")]
    output: Option<PathBuf>,

    /// Backend base URL (defaults depend on the pipeline).
    #[arg(long, env = "CANVAS_ENDPOINT")]
    endpoint: Option<String>,

    /// Model ID. Local pipelines fall back to the first model the server lists.
    #[arg(long, env = "CANVAS_MODEL")]
    model: Option<String>,

    /// Bearer credential.
    #[arg(long, env = "CANVAS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Path to a text file with a custom prompt.
    #[arg(long, env = "CANVAS_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Cloud only: pages per request (default: whole document).
    #[arg(long, env = "CANVAS_PAGES_PER_BATCH")]
    pages_per_batch: Option<usize>,

    /// Cloud only: retries after the first attempt on 429 / 5xx / transport errors.
    #[arg(long, env = "CANVAS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Cloud only: base backoff in milliseconds (doubles per retry).
    #[arg(long, env = "CANVAS_RETRY_BACKOFF_MS", default_value_t = 2000)]
    retry_backoff_ms: u64,

    /// Local pipelines: maximum pages in flight (default: all).
    #[arg(short, long, env = "CANVAS_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "CANVAS_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Longest edge of rendered pages, in pixels.
    #[arg(long, env = "CANVAS_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "CANVAS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "CANVAS_PDF_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Docling only: VLM endpoint the server should call.
    #[arg(long, env = "CANVAS_VLM_URL")]
    vlm_url: Option<String>,

    /// Ollama only: keep the model loaded afterwards.
    #[arg(long)]
    no_unload: bool,

    /// Keep model output exactly as returned (no fence stripping).
    #[arg(long)]
    raw: bool,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "CANVAS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Echo tokens to stderr as they arrive.
    #[arg(long)]
    stream: bool,

    /// Print the batch state as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// List models offered by the local server and exit.
    #[arg(long)]
    list_models: bool,

    /// Disable the progress bar.
    #[arg(long, env = "CANVAS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_pipeline(s: &str) -> Result<Pipeline, String> {
    s.parse::<Pipeline>().map_err(|e| e.to_string())
}

fn build_config(cli: &Cli) -> Result<BackendConfig> {
    let mut builder = BackendConfig::builder()
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .request_timeout_secs(cli.timeout)
        .max_rendered_pixels(cli.max_pixels)
        .temperature(cli.temperature)
        .unload_model(!cli.no_unload)
        .clean_output(!cli.raw)
        .download_timeout_secs(cli.download_timeout);
    if let Some(ref e) = cli.endpoint {
        builder = builder.endpoint(e);
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m);
    }
    if let Some(ref k) = cli.api_key {
        builder = builder.api_key(k);
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
        builder = builder.prompt(prompt);
    }
    if let Some(n) = cli.pages_per_batch {
        builder = builder.pages_per_batch(n);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(ref p) = cli.password {
        builder = builder.password(p);
    }
    if let Some(ref u) = cli.vlm_url {
        builder = builder.upstream_vlm_url(u);
    }
    builder.build().context("Invalid configuration")
}

async fn list_models(cli: &Cli) -> Result<()> {
    let client = reqwest::Client::new();
    let endpoint = |default: &str| {
        cli.endpoint
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    };
    let models = match cli.pipeline {
        Pipeline::LocalVisionChat => {
            list_ollama_models(&client, &endpoint(DEFAULT_OLLAMA_ENDPOINT)).await?
        }
        Pipeline::LocalOpenAiCompatible => {
            list_openai_models(
                &client,
                &endpoint(DEFAULT_OPENAI_COMPAT_ENDPOINT),
                cli.api_key.as_deref(),
            )
            .await?
        }
        other => bail!("--list-models is only available for local pipelines, not '{other}'"),
    };
    for model in models {
        println!("{model}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives the feedback that matters; keep library INFO
    // logs out of its way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list_models;
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

    if cli.list_models {
        return list_models(&cli).await.context("Failed to list models");
    }

    let config = build_config(&cli)?;
    let files: Vec<BatchFile> = cli
        .inputs
        .iter()
        .map(|input| BatchFile::location(input.clone(), cli.pipeline))
        .collect();
    let total_files = files.len();

    // ── Ctrl-C → cancel ──────────────────────────────────────────────────
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // ── Run batch ────────────────────────────────────────────────────────
    let orchestrator = BatchOrchestrator::new(Arc::new(Registry::with_defaults()))
        .with_page_stream(cli.stream || cli.pipeline != Pipeline::ExternalStreamingService);
    let batch = BatchRequest::new(files, config).with_cancel(cancel);

    let state = if cli.quiet {
        orchestrator.run(batch, &NoopObserver).await
    } else {
        let observer = CliObserver::new(total_files, show_progress, cli.stream);
        let state = orchestrator.run(batch, &observer).await;
        observer.finish();
        if cli.stream {
            eprintln!();
        }
        let done = state.completed().count();
        eprintln!(
            "{} {}/{} file(s)  {}",
            if state.is_complete() { green("✔") } else { red("✘") },
            bold(&done.to_string()),
            total_files,
            dim(&format!("{:.1}s", observer.started.elapsed().as_secs_f64()))
        );
        state
    };

    // ── Output ───────────────────────────────────────────────────────────
    let rendered = if cli.json {
        serde_json::to_string_pretty(&state).context("Failed to serialize batch state")?
    } else if total_files == 1 {
        state
            .completed()
            .next()
            .map(|(_, r)| r.text.clone())
            .unwrap_or_default()
    } else {
        state.combined_text()
    };

    if !rendered.is_empty() || cli.json {
        match cli.output {
            Some(ref path) => {
                write_output(path, &rendered)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                if !cli.quiet {
                    eprintln!("{} {}", dim("→"), path.display());
                }
            }
            None => {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "{rendered}").context("Failed to write to stdout")?;
            }
        }
    }

    match state.stopped_by() {
        Some(entry) => match entry.status {
            FileStatus::Cancelled => std::process::exit(130),
            FileStatus::Failed(ref msg) => bail!("Batch stopped at '{}': {}", entry.name, msg),
            _ => Ok(()),
        },
        None => Ok(()),
    }
}
