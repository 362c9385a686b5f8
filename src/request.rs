//! The immutable request handed to a backend.

use crate::cancel::CancelToken;
use crate::config::{BackendConfig, Modality, Pipeline};
use crate::pipeline::input::InputDocument;
use crate::progress::{NoopSink, PageStreamCallback, ProgressCallback};
use std::fmt;
use std::sync::Arc;

/// Everything a backend needs to convert one document.
///
/// Backends only ever see `&ParseRequest`; once dispatched the request is
/// not mutated.
#[derive(Clone)]
pub struct ParseRequest {
    pub document: InputDocument,
    pub pipeline: Pipeline,
    pub config: BackendConfig,
    pub cancel: CancelToken,
    pub progress: ProgressCallback,
    /// Receives per-page tokens. `None` means the caller has no use for
    /// streaming and backends may pick a non-streaming route.
    pub page_stream: Option<PageStreamCallback>,
}

impl fmt::Debug for ParseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseRequest")
            .field("document", &self.document.name)
            .field("modality", &self.document.modality)
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("page_stream", &self.page_stream.is_some())
            .finish()
    }
}

impl ParseRequest {
    /// A request with a no-op progress sink, no page stream and a fresh token.
    pub fn new(document: InputDocument, pipeline: Pipeline, config: BackendConfig) -> Self {
        Self {
            document,
            pipeline,
            config,
            cancel: CancelToken::new(),
            progress: Arc::new(NoopSink),
            page_stream: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_page_stream(mut self, sink: PageStreamCallback) -> Self {
        self.page_stream = Some(sink);
        self
    }

    pub fn modality(&self) -> Modality {
        self.document.modality
    }

    /// Forward a token to the page stream, if one is attached.
    pub(crate) fn emit_token(&self, page_num: usize, token: &str, page_text: &str) {
        if let Some(ref sink) = self.page_stream {
            sink.on_page_token(page_num, token, page_text);
        }
    }

    pub(crate) fn emit_progress(&self, percent: f32, message: &str) {
        self.progress.on_progress(percent, message);
    }
}
