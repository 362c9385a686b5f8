//! External streaming microservice backend (docling server).
//!
//! The server owns layout analysis and its own VLM calls; this side only
//! uploads the PDF and reads back Markdown. Two routes:
//!
//! | Route | When | Response |
//! |-------|------|----------|
//! | `POST /docling/parse` | no page stream sink | `{filename, markdown, num_pages}` |
//! | `POST /docling/parse/stream` | page stream sink set | SSE `progress` / `page_result` / `complete` / `error` |
//!
//! Both take multipart fields `file`, `vllm_url` and `timeout`.
//!
//! On the stream route `complete` carries the authoritative text. If the
//! connection closes before it arrives, the text is rebuilt from the
//! `page_result` events received so far, in ascending page order.

use super::http;
use super::Backend;
use crate::config::{Pipeline, DEFAULT_DOCLING_ENDPOINT, DEFAULT_DOCLING_VLM_URL};
use crate::error::IngestError;
use crate::output::ParseResult;
use crate::request::ParseRequest;
use crate::wire::sse::{ConversionEvent, SseFrameDecoder};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

pub struct DoclingBackend {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    filename: Option<String>,
    markdown: String,
    #[serde(default)]
    num_pages: Option<usize>,
}

/// What the stream route has delivered so far.
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    pages: BTreeMap<usize, String>,
    complete: Option<(String, Option<usize>)>,
    total_pages: usize,
}

impl StreamState {
    /// Apply one event. `Break` once `complete` arrives.
    pub(crate) fn apply(
        &mut self,
        request: &ParseRequest,
        event: ConversionEvent,
    ) -> Result<ControlFlow<()>, IngestError> {
        match event {
            ConversionEvent::Progress {
                page,
                total_pages,
                status,
            } => {
                if total_pages > 0 {
                    self.total_pages = total_pages;
                }
                let percent = if self.total_pages > 0 {
                    page as f32 / self.total_pages as f32 * 100.0
                } else {
                    0.0
                };
                let message = if self.total_pages > 0 {
                    format!("{status} ({page}/{})", self.total_pages)
                } else {
                    status
                };
                request.emit_progress(percent, &message);
            }
            ConversionEvent::PageResult { page, markdown } => {
                let text = self.pages.entry(page).or_default();
                text.push_str(&markdown);
                request.emit_token(page, &markdown, text);
            }
            ConversionEvent::Complete {
                markdown,
                num_pages,
            } => {
                self.complete = Some((markdown, num_pages));
                return Ok(ControlFlow::Break(()));
            }
            ConversionEvent::Error { message } => {
                return Err(IngestError::Service { message });
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Final text and page count.
    pub(crate) fn finish(self) -> (String, usize) {
        match self.complete {
            Some((markdown, num_pages)) => {
                let pages = num_pages.unwrap_or(self.total_pages.max(self.pages.len()));
                (markdown, pages)
            }
            None => {
                let pages = self.total_pages.max(self.pages.len());
                let text = self.pages.into_values().collect::<Vec<_>>().join("\n\n");
                (text, pages)
            }
        }
    }
}

impl DoclingBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn form(&self, request: &ParseRequest) -> Result<reqwest::multipart::Form, IngestError> {
        let doc = &request.document;
        let part = reqwest::multipart::Part::bytes(doc.bytes.to_vec())
            .file_name(doc.name.clone())
            .mime_str("application/pdf")
            .map_err(|e| IngestError::Internal(format!("multipart part: {e}")))?;
        let vlm_url = request
            .config
            .upstream_vlm_url
            .clone()
            .unwrap_or_else(|| DEFAULT_DOCLING_VLM_URL.to_string());
        Ok(reqwest::multipart::Form::new()
            .part("file", part)
            .text("vllm_url", vlm_url)
            .text("timeout", request.config.request_timeout_secs.to_string()))
    }

    async fn parse_plain(&self, request: &ParseRequest, base: &str) -> Result<ParseResult, IngestError> {
        let url = http::join(base, "docling/parse");
        request.emit_progress(0.0, "Uploading to conversion service");
        let builder = self
            .client
            .post(&url)
            .timeout(http::request_timeout(request))
            .multipart(self.form(request)?);
        let resp = http::send(builder, &url, &request.cancel).await?;
        let parsed: ParseResponse = http::read_json(resp, &url, &request.cancel).await?;
        debug!(
            "{} → {} page(s)",
            parsed.filename.as_deref().unwrap_or(&request.document.name),
            parsed.num_pages.unwrap_or(0)
        );
        request.emit_progress(100.0, "Conversion complete");
        Ok(ParseResult::new(parsed.markdown, request.pipeline.as_str())
            .with_pages(parsed.num_pages.unwrap_or(0)))
    }

    async fn parse_streaming(
        &self,
        request: &ParseRequest,
        base: &str,
    ) -> Result<ParseResult, IngestError> {
        let url = http::join(base, "docling/parse/stream");
        request.emit_progress(0.0, "Uploading to conversion service");
        let limit = http::request_timeout(request);
        let builder = self.client.post(&url).multipart(self.form(request)?);
        let resp = http::send_streaming(builder, &url, &request.cancel, limit).await?;

        let mut decoder = SseFrameDecoder::new();
        let mut state = StreamState::default();
        let mut completed = false;
        http::for_each_chunk(resp, &url, &request.cancel, limit, |chunk| {
            for frame in decoder.push(chunk) {
                let Some(event) = ConversionEvent::from_frame(&frame) else {
                    continue;
                };
                if state.apply(request, event)?.is_break() {
                    completed = true;
                    return Ok(ControlFlow::Break(()));
                }
            }
            Ok(ControlFlow::Continue(()))
        })
        .await?;
        if !completed {
            for frame in decoder.finish() {
                if let Some(event) = ConversionEvent::from_frame(&frame) {
                    if state.apply(request, event)?.is_break() {
                        completed = true;
                    }
                }
            }
        }
        if !completed {
            warn!(
                "{}: stream ended without 'complete'; rebuilding from page results",
                request.document.name
            );
        }

        let (text, pages) = state.finish();
        request.emit_progress(100.0, "Conversion complete");
        Ok(ParseResult::new(text, request.pipeline.as_str()).with_pages(pages))
    }
}

#[async_trait]
impl Backend for DoclingBackend {
    fn pipeline(&self) -> Pipeline {
        Pipeline::ExternalStreamingService
    }

    async fn convert(&self, request: &ParseRequest) -> Result<ParseResult, IngestError> {
        request.document.validate()?;
        let base = request.config.endpoint_or(DEFAULT_DOCLING_ENDPOINT).to_string();
        info!(
            "{}: {} bytes to {} ({})",
            request.document.name,
            request.document.len(),
            base,
            if request.page_stream.is_some() { "streaming" } else { "plain" }
        );
        if request.page_stream.is_some() {
            self.parse_streaming(request, &base).await
        } else {
            self.parse_plain(request, &base).await
        }
    }
}
