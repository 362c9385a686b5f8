//! # chunkcanvas-ingest
//!
//! Turn PDFs, images, audio and video into plain text through one of four
//! pluggable inference backends, streaming progress and tokens as they come.
//!
//! ## Why several backends?
//!
//! No single service is right for every deployment. A hosted multimodal
//! model reads native PDFs and audio but costs money and needs a key; a
//! local Ollama or LM Studio instance is free and private but only sees one
//! rasterised page at a time; a docling server does its own layout analysis.
//! All four sit behind one [`Backend`] contract, and the caller picks per
//! file with a [`Pipeline`].
//!
//! ## Pipeline Overview
//!
//! ```text
//! path / URL
//!  │
//!  ├─ 1. Input     read bytes, detect modality from the extension
//!  ├─ 2. Route     Registry::resolve(pipeline, modality), fail fast if unsupported
//!  ├─ 3. Split     pages → PNG (vision) or page-range sub-PDFs (cloud), via pdfium
//!  ├─ 4. Dispatch  concurrent page calls / sequential batches with retry / one upload
//!  ├─ 5. Stream    progress + tokens → ProgressSink / PageStreamSink
//!  └─ 6. Assemble  "--- Page k ---" blocks in page order, failures inlined
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunkcanvas_ingest::{parse_file, BackendConfig, Pipeline, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::with_defaults();
//!     let config = BackendConfig::builder().model("llava:13b").build()?;
//!     let result = parse_file(&registry, "scan.pdf", Pipeline::LocalVisionChat, &config).await?;
//!     println!("{}", result.text);
//!     eprintln!("{} page(s), {} failed", result.pages, result.failed_units);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `canvas-ingest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! chunkcanvas-ingest = { version = "0.3", default-features = false }
//! ```
//!
//! ## Choosing a Pipeline
//!
//! | Pipeline | Server | PDF | Image | Audio | Video |
//! |----------|--------|-----|-------|-------|-------|
//! | `cloud`  | OpenRouter-style API | native, batched | ✓ | ✓ | ✓ |
//! | `ollama` | Ollama `/api/chat` | per page | ✓ | | |
//! | `openai-compatible` | LM Studio, vLLM… | per page | ✓ | transcription | ✓ |
//! | `docling` | docling server | server-side | | | |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod request;
pub mod stream;
pub mod wire;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{Backend, LeafExtractor, Registry, Route};
pub use cancel::CancelToken;
pub use config::{BackendConfig, BackendConfigBuilder, Modality, Pipeline};
pub use convert::{parse_document, parse_document_sync, parse_file, write_output};
pub use error::{ErrorClass, IngestError, PageFailure};
pub use orchestrator::{
    BatchFile, BatchInput, BatchObserver, BatchOrchestrator, BatchRequest, BatchState, FileEntry,
    FileStatus,
};
pub use output::ParseResult;
pub use pipeline::input::InputDocument;
pub use progress::{PageStreamSink, ParseEvent, ProgressSink};
pub use request::ParseRequest;
pub use stream::{parse_document_stream, ParseEventStream};
