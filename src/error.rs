//! Error types for the chunkcanvas-ingest library.
//!
//! Two distinct error shapes reflect two distinct failure scopes:
//!
//! * [`IngestError`]: **File-level**: the document cannot be converted at
//!   all (unreadable input, unsupported pipeline, transport loss, service
//!   error event, cancellation). Returned as `Err(IngestError)` from
//!   [`crate::convert::parse_document`] and stops the batch orchestrator.
//!
//! * [`PageFailure`]: **Unit-level**: one page or page batch failed. It is
//!   rendered inline as `[ERROR] <message>` in the assembled text so the
//!   rest of the document stays useful.
//!
//! Every [`IngestError`] also carries an [`ErrorClass`] which decides
//! whether the cloud backend retries, aborts, or stops silently.

use std::path::PathBuf;
use thiserror::Error;

/// Retry classification of an [`IngestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// HTTP 429 / 5xx or a transient transport failure.
    Retryable,
    /// Any other failure; retrying will not help.
    Fatal,
    /// The caller signalled the cancellation token.
    Cancelled,
}

/// All file-level errors returned by chunkcanvas-ingest.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The file claims to be a PDF but the magic bytes disagree.
    #[error("File is not a valid PDF: '{name}'\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    // ── Document errors ───────────────────────────────────────────────────
    /// The document could not be opened by the page splitter.
    #[error("Document '{name}' could not be opened: {detail}")]
    CorruptDocument { name: String, detail: String },

    /// A requested page does not exist.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium failed to render or copy a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Routing / config errors ───────────────────────────────────────────
    /// No backend handles this pipeline + modality combination.
    #[error("Pipeline '{pipeline}' cannot process {modality} input")]
    UnsupportedPipeline { pipeline: String, modality: String },

    /// Builder validation failed, or a required field is missing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Network errors ────────────────────────────────────────────────────
    /// Connection failure, timeout, or a body that broke off mid-read.
    #[error("Transport error talking to '{endpoint}': {detail}")]
    Transport { endpoint: String, detail: String },

    /// HTTP 429 from the inference endpoint.
    #[error("Rate limited by '{endpoint}': {detail}")]
    RateLimited { endpoint: String, detail: String },

    /// HTTP 5xx from the inference endpoint.
    #[error("Server error {status} from '{endpoint}': {detail}")]
    ServerError {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// Any other non-2xx status.
    #[error("Request to '{endpoint}' rejected with HTTP {status}: {detail}")]
    ClientError {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// A response body that does not match the expected wire format.
    #[error("Malformed response: {0}")]
    Protocol(String),

    /// The conversion microservice emitted an `error` event.
    #[error("Conversion service reported an error: {message}")]
    Service { message: String },

    /// An inference server reported an error inside a token stream.
    #[error("'{endpoint}' failed mid-stream: {message}")]
    StreamFailed { endpoint: String, message: String },

    /// The caller cancelled the conversion.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the combined output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Classify the error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            IngestError::Cancelled => ErrorClass::Cancelled,
            IngestError::Transport { .. }
            | IngestError::RateLimited { .. }
            | IngestError::ServerError { .. } => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }

    /// Build the error for a non-2xx HTTP status.
    pub fn from_status(endpoint: &str, status: u16, body: &str) -> Self {
        let detail = summarise_body(body);
        match status {
            429 => IngestError::RateLimited {
                endpoint: endpoint.to_string(),
                detail,
            },
            500..=599 => IngestError::ServerError {
                endpoint: endpoint.to_string(),
                status,
                detail,
            },
            _ => IngestError::ClientError {
                endpoint: endpoint.to_string(),
                status,
                detail,
            },
        }
    }

    /// Map a reqwest failure (connect, timeout, broken body) to `Transport`.
    pub fn transport(endpoint: &str, err: &reqwest::Error) -> Self {
        let detail = if err.is_timeout() {
            format!("timed out ({err})")
        } else if err.is_connect() {
            format!("connection failed ({err})")
        } else {
            err.to_string()
        };
        IngestError::Transport {
            endpoint: endpoint.to_string(),
            detail,
        }
    }
}

/// Keep error bodies short enough to inline into the assembled text.
fn summarise_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty body)".to_string();
    }
    match trimmed.char_indices().nth(300) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// A non-fatal failure of one page or page batch.
///
/// Its `Display` output is what follows the `[ERROR] ` marker in the
/// assembled text.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
pub struct PageFailure {
    /// First page covered by the failed unit (1-indexed).
    pub first_page: usize,
    /// Last page covered by the failed unit (equal to `first_page` for single pages).
    pub last_page: usize,
    pub message: String,
}

impl PageFailure {
    pub fn new(first_page: usize, last_page: usize, err: &IngestError) -> Self {
        Self {
            first_page,
            last_page,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let e = IngestError::from_status("http://x", 429, "slow down");
        assert!(matches!(e, IngestError::RateLimited { .. }));
        assert_eq!(e.class(), ErrorClass::Retryable);

        let e = IngestError::from_status("http://x", 503, "");
        assert!(matches!(e, IngestError::ServerError { status: 503, .. }));
        assert_eq!(e.class(), ErrorClass::Retryable);

        let e = IngestError::from_status("http://x", 401, "bad key");
        assert!(matches!(e, IngestError::ClientError { status: 401, .. }));
        assert_eq!(e.class(), ErrorClass::Fatal);
    }

    #[test]
    fn cancelled_is_its_own_class() {
        assert_eq!(IngestError::Cancelled.class(), ErrorClass::Cancelled);
        assert!(IngestError::Cancelled.is_cancelled());
        assert_eq!(
            IngestError::Protocol("bad json".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let e = IngestError::from_status("http://x", 400, &body);
        let msg = e.to_string();
        assert!(msg.len() < 500, "got {} bytes", msg.len());
        assert!(msg.ends_with('…'));
    }

    #[test]
    fn empty_body_is_labelled() {
        let e = IngestError::from_status("http://x", 500, "  ");
        assert!(e.to_string().contains("(empty body)"));
    }

    #[test]
    fn page_failure_display_is_the_message() {
        let f = PageFailure::new(2, 2, &IngestError::Service {
            message: "boom".into(),
        });
        assert_eq!(f.to_string(), "Conversion service reported an error: boom");
    }
}
