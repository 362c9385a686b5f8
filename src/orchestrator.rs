//! Sequential multi-file batch orchestration.
//!
//! ## Why sequential?
//!
//! Each backend already saturates its server with one document: the vision
//! backends fan pages out concurrently and the cloud backend is rate-limited.
//! Running files one after another keeps load predictable and lets a failure
//! stop the batch cleanly, keeping every result produced so far.
//!
//! ## Single writer
//!
//! Backends report progress and tokens through a [`ChannelSink`]; the
//! orchestrator's own loop drains that channel while it awaits the
//! conversion, and is the only code that mutates [`BatchState`]. Observers
//! get a shared reference after each change.
//!
//! ```text
//! Pending ─▶ Dispatched ─▶ Streaming* ─┬─▶ Completed
//!                                      ├─▶ Failed(message)   (batch stops)
//!                                      └─▶ Cancelled         (batch stops)
//! ```

use crate::backend::Registry;
use crate::cancel::CancelToken;
use crate::config::{BackendConfig, Pipeline};
use crate::convert::parse_document;
use crate::error::IngestError;
use crate::output::ParseResult;
use crate::pipeline::input::{self, InputDocument};
use crate::progress::{ChannelSink, ParseEvent};
use crate::request::ParseRequest;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where a batch file's bytes come from.
#[derive(Debug, Clone)]
pub enum BatchInput {
    /// Already in memory.
    Document(InputDocument),
    /// Local path or URL, read when the file's turn comes.
    Location(String),
}

/// One file of a batch and the pipeline to run it through.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub input: BatchInput,
    pub pipeline: Pipeline,
}

impl BatchFile {
    pub fn document(document: InputDocument, pipeline: Pipeline) -> Self {
        Self {
            input: BatchInput::Document(document),
            pipeline,
        }
    }

    pub fn location(location: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            input: BatchInput::Location(location.into()),
            pipeline,
        }
    }

    /// Display name: the document name, or the last path segment.
    pub fn name(&self) -> String {
        match &self.input {
            BatchInput::Document(doc) => doc.name.clone(),
            BatchInput::Location(loc) => Path::new(loc.trim_end_matches('/'))
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| loc.clone()),
        }
    }
}

/// Files plus the settings they share.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub files: Vec<BatchFile>,
    pub config: BackendConfig,
    pub cancel: CancelToken,
}

impl BatchRequest {
    pub fn new(files: Vec<BatchFile>, config: BackendConfig) -> Self {
        Self {
            files,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "kebab-case")]
pub enum FileStatus {
    Pending,
    Dispatched,
    Streaming,
    Completed,
    Failed(String),
    Cancelled,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed(_) | FileStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub pipeline: Pipeline,
    pub status: FileStatus,
    /// This file's own progress, `0..=100`.
    pub progress: f32,
    pub message: String,
    /// Live text per page while streaming.
    pub pages: BTreeMap<usize, String>,
    pub result: Option<ParseResult>,
}

/// Everything a UI needs to draw a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchState {
    pub current_index: usize,
    pub total_files: usize,
    pub files: Vec<FileEntry>,
    /// Whole-batch progress, `0..=100`, never decreasing.
    pub progress: f32,
}

impl BatchState {
    fn new(files: &[BatchFile]) -> Self {
        Self {
            current_index: 0,
            total_files: files.len(),
            files: files
                .iter()
                .map(|f| FileEntry {
                    name: f.name(),
                    pipeline: f.pipeline,
                    status: FileStatus::Pending,
                    progress: 0.0,
                    message: String::new(),
                    pages: BTreeMap::new(),
                    result: None,
                })
                .collect(),
            progress: 0.0,
        }
    }

    /// Raise batch progress to reflect `file_percent` of file `index`.
    fn advance(&mut self, index: usize, file_percent: f32) {
        if self.total_files == 0 {
            return;
        }
        let n = self.total_files as f32;
        let p = file_percent.clamp(0.0, 100.0);
        let overall = (index as f32 / n * 100.0 + p / 100.0 * (100.0 / n)).min(100.0);
        if overall > self.progress {
            self.progress = overall;
        }
    }

    /// Completed files, in order.
    pub fn completed(&self) -> impl Iterator<Item = (&FileEntry, &ParseResult)> {
        self.files
            .iter()
            .filter_map(|f| f.result.as_ref().map(|r| (f, r)))
    }

    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Completed)
    }

    /// The status that stopped the batch early, if any.
    pub fn stopped_by(&self) -> Option<&FileEntry> {
        self.files
            .iter()
            .find(|f| matches!(f.status, FileStatus::Failed(_) | FileStatus::Cancelled))
    }

    /// Completed results joined in batch order under `# <file name>` headers.
    pub fn combined_text(&self) -> String {
        self.completed()
            .map(|(f, r)| format!("# {}\n\n{}", f.name, r.text.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Receives batch updates. Every method defaults to a no-op.
pub trait BatchObserver: Send + Sync {
    /// Called after every state change.
    fn on_state(&self, _state: &BatchState) {}

    /// A token for page `page_num` of file `file_index`.
    fn on_token(&self, _file_index: usize, _page_num: usize, _token: &str) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// Runs a batch one file at a time.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    registry: Arc<Registry>,
    stream_pages: bool,
}

impl BatchOrchestrator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            stream_pages: true,
        }
    }

    /// Whether requests carry a page-stream sink (default `true`).
    ///
    /// Without one, live tokens are not reported and the docling backend
    /// uses its plain route.
    pub fn with_page_stream(mut self, enabled: bool) -> Self {
        self.stream_pages = enabled;
        self
    }

    /// Run every file in order, stopping at the first failure or cancellation.
    ///
    /// Always returns the final state; inspect [`BatchState::stopped_by`].
    pub async fn run(&self, batch: BatchRequest, observer: &dyn BatchObserver) -> BatchState {
        let mut state = BatchState::new(&batch.files);
        info!("Batch of {} file(s) started", state.total_files);
        observer.on_state(&state);

        for (index, file) in batch.files.into_iter().enumerate() {
            state.current_index = index;
            if batch.cancel.is_cancelled() {
                debug!("Batch cancelled before file {}", index + 1);
                state.files[index].status = FileStatus::Cancelled;
                observer.on_state(&state);
                break;
            }

            state.files[index].status = FileStatus::Dispatched;
            observer.on_state(&state);

            let outcome = self
                .run_file(index, file, &batch.config, &batch.cancel, &mut state, observer)
                .await;

            let entry = &mut state.files[index];
            let stop = match outcome {
                Ok(result) => {
                    entry.status = FileStatus::Completed;
                    entry.progress = 100.0;
                    entry.result = Some(result);
                    state.advance(index, 100.0);
                    false
                }
                Err(IngestError::Cancelled) => {
                    debug!("{}: cancelled", entry.name);
                    entry.status = FileStatus::Cancelled;
                    true
                }
                Err(e) => {
                    warn!("{}: {}; stopping batch", entry.name, e);
                    entry.status = FileStatus::Failed(e.to_string());
                    true
                }
            };
            observer.on_state(&state);
            if stop {
                break;
            }
        }

        info!(
            "Batch finished: {}/{} file(s) completed",
            state.completed().count(),
            state.total_files
        );
        state
    }

    async fn run_file(
        &self,
        index: usize,
        file: BatchFile,
        config: &BackendConfig,
        cancel: &CancelToken,
        state: &mut BatchState,
        observer: &dyn BatchObserver,
    ) -> Result<ParseResult, IngestError> {
        let document = match file.input {
            BatchInput::Document(doc) => doc,
            BatchInput::Location(loc) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                    r = input::resolve_input(&loc, config.download_timeout_secs) => r?,
                }
            }
        };

        let (sink, mut rx) = ChannelSink::channel();
        let sink = Arc::new(sink);
        let mut request = ParseRequest::new(document, file.pipeline, config.clone())
            .with_cancel(cancel.clone())
            .with_progress(sink.clone());
        if self.stream_pages {
            request = request.with_page_stream(sink);
        }

        let conversion = parse_document(&self.registry, &request);
        tokio::pin!(conversion);
        let result = loop {
            tokio::select! {
                Some(event) = rx.recv() => apply_event(state, index, event, observer),
                r = &mut conversion => break r,
            }
        };
        drain(&mut rx, state, index, observer);
        result
    }
}

fn drain(
    rx: &mut mpsc::UnboundedReceiver<ParseEvent>,
    state: &mut BatchState,
    index: usize,
    observer: &dyn BatchObserver,
) {
    while let Ok(event) = rx.try_recv() {
        apply_event(state, index, event, observer);
    }
}

fn apply_event(state: &mut BatchState, index: usize, event: ParseEvent, observer: &dyn BatchObserver) {
    match event {
        ParseEvent::Progress { percent, message } => {
            let entry = &mut state.files[index];
            entry.progress = entry.progress.max(percent.clamp(0.0, 100.0));
            entry.message = message;
            state.advance(index, percent);
        }
        ParseEvent::PageToken {
            page_num,
            token,
            page_text,
        } => {
            let entry = &mut state.files[index];
            entry.status = FileStatus::Streaming;
            entry.pages.insert(page_num, page_text);
            observer.on_token(index, page_num, &token);
        }
    }
    observer.on_state(state);
}
