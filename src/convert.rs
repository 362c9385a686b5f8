//! Single-document entry points.
//!
//! ## Why resolve before dispatch?
//!
//! [`parse_document`] asks the [`Registry`] for a route first, so an
//! unsupported pipeline/modality pairing fails before any byte is read or
//! any connection is opened. Everything after that is the backend's job;
//! this layer only adds the guarantees every backend shares:
//!
//! * progress reported to the caller never goes backwards
//! * cancellation is logged quietly and surfaces as `IngestError::Cancelled`
//! * timing and outcome are logged once per document

use crate::backend::{Registry, Route};
use crate::config::{BackendConfig, Pipeline};
use crate::error::IngestError;
use crate::output::ParseResult;
use crate::pipeline::input;
use crate::progress::MonotonicProgress;
use crate::request::ParseRequest;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert one document.
///
/// # Returns
/// `Ok(ParseResult)` even if some pages failed; those are inlined as
/// `[ERROR]` blocks and counted in `failed_units`.
///
/// # Errors
/// * [`IngestError::UnsupportedPipeline`] when nothing can handle the input
/// * [`IngestError::Cancelled`] when `request.cancel` fired
/// * any other fatal error of the chosen backend
pub async fn parse_document(
    registry: &Registry,
    request: &ParseRequest,
) -> Result<ParseResult, IngestError> {
    let start = Instant::now();
    let doc = &request.document;
    let route = registry.resolve(request.pipeline, request.modality())?;
    debug!("{} ({}) → {:?}", doc.name, doc.modality, route);

    if request.cancel.is_cancelled() {
        debug!("{}: cancelled before dispatch", doc.name);
        return Err(IngestError::Cancelled);
    }

    let scoped = request
        .clone()
        .with_progress(Arc::new(MonotonicProgress::new(Arc::clone(&request.progress))));

    let result = match route {
        Route::Backend(backend) => backend.convert(&scoped).await,
        Route::Leaf(extractor) => {
            scoped.emit_progress(0.0, &format!("Extracting {}", doc.modality));
            let extracted = tokio::select! {
                _ = scoped.cancel.cancelled() => Err(IngestError::Cancelled),
                r = extractor.extract(doc) => r,
            };
            if extracted.is_ok() {
                scoped.emit_progress(100.0, "Extracted");
            }
            extracted
        }
    };

    let elapsed_ms = start.elapsed().as_millis();
    match &result {
        Ok(r) => info!(
            "{}: {} chars from {} page(s) via {} in {}ms ({} failed)",
            doc.name,
            r.text.len(),
            r.pages,
            r.pipeline,
            elapsed_ms,
            r.failed_units
        ),
        Err(IngestError::Cancelled) => debug!("{}: cancelled after {}ms", doc.name, elapsed_ms),
        Err(e) => warn!("{}: failed after {}ms: {}", doc.name, elapsed_ms, e),
    }
    result
}

/// Read `input` (path or URL) and convert it with default callbacks.
pub async fn parse_file(
    registry: &Registry,
    input_str: impl AsRef<str>,
    pipeline: Pipeline,
    config: &BackendConfig,
) -> Result<ParseResult, IngestError> {
    let doc = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let request = ParseRequest::new(doc, pipeline, config.clone());
    parse_document(registry, &request).await
}

/// Synchronous wrapper around [`parse_document`].
///
/// Creates a temporary tokio runtime internally; do not call from inside one.
pub fn parse_document_sync(
    registry: &Registry,
    request: &ParseRequest,
) -> Result<ParseResult, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(parse_document(registry, request))
}

/// Write `text` to `path` atomically (temp file in the same directory, then rename).
pub fn write_output(path: &Path, text: &str) -> Result<(), IngestError> {
    let write_err = |source: std::io::Error| IngestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(text.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
