//! Backend contract and registry.
//!
//! ## Why a closed enum plus a map?
//!
//! [`Pipeline`] is a closed enum, so "which pipelines exist" and "which
//! modalities each accepts" are exhaustive matches the compiler checks. The
//! [`Registry`] maps each pipeline to one `Arc<dyn Backend>` so callers (and
//! tests) can swap an implementation without touching dispatch.
//!
//! Leaf modalities (plain text, spreadsheets, Word documents) do not go
//! through an inference server at all. They resolve to a [`LeafExtractor`]
//! registered for the modality, whatever pipeline the caller picked.

pub mod cloud;
pub mod docling;
pub(crate) mod http;
pub mod leaf;
pub mod ollama;
pub mod openai_compat;
mod vision;

use crate::config::{Modality, Pipeline};
use crate::error::IngestError;
use crate::output::ParseResult;
use crate::pipeline::input::InputDocument;
use crate::pipeline::split::{PageSplitter, PdfiumSplitter};
use crate::request::ParseRequest;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use cloud::CloudBackend;
pub use docling::DoclingBackend;
pub use leaf::{DelimitedTextExtractor, PlainTextExtractor};
pub use ollama::OllamaBackend;
pub use openai_compat::OpenAiCompatBackend;

/// One inference backend.
///
/// `convert` returns `Ok` even when some pages failed (they are inlined as
/// `[ERROR]` blocks); `Err` means the document as a whole could not be
/// converted, or the request was cancelled.
#[async_trait]
pub trait Backend: Send + Sync {
    fn pipeline(&self) -> Pipeline;

    async fn convert(&self, request: &ParseRequest) -> Result<ParseResult, IngestError>;
}

/// Single-shot extractor for a leaf modality.
#[async_trait]
pub trait LeafExtractor: Send + Sync {
    /// Label stored in [`ParseResult::pipeline`].
    fn name(&self) -> &'static str;

    async fn extract(&self, document: &InputDocument) -> Result<ParseResult, IngestError>;
}

/// What a request resolves to.
#[derive(Clone)]
pub enum Route {
    Backend(Arc<dyn Backend>),
    Leaf(Arc<dyn LeafExtractor>),
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Backend(b) => write!(f, "Backend({})", b.pipeline()),
            Route::Leaf(l) => write!(f, "Leaf({})", l.name()),
        }
    }
}

/// Pipeline → backend and leaf modality → extractor.
#[derive(Default, Clone)]
pub struct Registry {
    backends: HashMap<Pipeline, Arc<dyn Backend>>,
    leaves: HashMap<Modality, Arc<dyn LeafExtractor>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pipelines: Vec<_> = self.backends.keys().map(Pipeline::as_str).collect();
        pipelines.sort_unstable();
        let mut leaves: Vec<_> = self.leaves.keys().map(Modality::as_str).collect();
        leaves.sort_unstable();
        f.debug_struct("Registry")
            .field("pipelines", &pipelines)
            .field("leaves", &leaves)
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// All four backends over pdfium, plus the built-in leaf extractors.
    pub fn with_defaults() -> Self {
        Self::with_splitter(reqwest::Client::new(), Arc::new(PdfiumSplitter))
    }

    /// All four backends sharing `client` and `splitter`.
    pub fn with_splitter(client: reqwest::Client, splitter: Arc<dyn PageSplitter>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CloudBackend::new(client.clone(), Arc::clone(&splitter))));
        registry.register(Arc::new(OllamaBackend::new(client.clone(), Arc::clone(&splitter))));
        registry.register(Arc::new(OpenAiCompatBackend::new(client.clone(), splitter)));
        registry.register(Arc::new(DoclingBackend::new(client)));
        registry.register_leaf(Modality::Text, Arc::new(PlainTextExtractor));
        registry.register_leaf(Modality::Spreadsheet, Arc::new(DelimitedTextExtractor));
        registry
    }

    /// Register `backend` under its own pipeline, returning the one it replaced.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> Option<Arc<dyn Backend>> {
        self.backends.insert(backend.pipeline(), backend)
    }

    pub fn register_leaf(
        &mut self,
        modality: Modality,
        extractor: Arc<dyn LeafExtractor>,
    ) -> Option<Arc<dyn LeafExtractor>> {
        self.leaves.insert(modality, extractor)
    }

    /// Pick exactly one route for `(pipeline, modality)`.
    ///
    /// Fails with [`IngestError::UnsupportedPipeline`] when the pipeline does
    /// not accept the modality or nothing is registered for it.
    pub fn resolve(&self, pipeline: Pipeline, modality: Modality) -> Result<Route, IngestError> {
        let unsupported = || IngestError::UnsupportedPipeline {
            pipeline: pipeline.to_string(),
            modality: modality.to_string(),
        };
        if modality.is_leaf() {
            return self
                .leaves
                .get(&modality)
                .map(|l| Route::Leaf(Arc::clone(l)))
                .ok_or_else(unsupported);
        }
        if !pipeline.supports(modality) {
            return Err(unsupported());
        }
        self.backends
            .get(&pipeline)
            .map(|b| Route::Backend(Arc::clone(b)))
            .ok_or_else(unsupported)
    }
}
