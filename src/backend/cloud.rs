//! Cloud multimodal backend (OpenRouter-style chat completions).
//!
//! ## Batching
//!
//! A PDF is cut into ranges of `pages_per_batch` pages; each range is
//! extracted as a standalone PDF and sent as a `file` content part next to
//! an instruction naming the range. Without a batch size the original bytes
//! go up unsplit in one request. Batches run one after another so a rate
//! limit hit on batch 2 does not multiply across the rest.
//!
//! ## Retry
//!
//! Every request runs under [`with_retry`]: 429, 5xx and transport errors
//! back off exponentially, everything else fails the batch at once. A failed
//! batch is inlined as `--- Pages a-b ---\n[ERROR] …` and the next batch
//! still runs.
//!
//! Images, audio and video are single requests using `image_url`,
//! `input_audio` and `video_url` parts respectively.

use super::http;
use super::Backend;
use crate::config::{Modality, Pipeline, DEFAULT_CLOUD_ENDPOINT, DEFAULT_CLOUD_MODEL};
use crate::error::{IngestError, PageFailure};
use crate::output::ParseResult;
use crate::pipeline::assemble::{assemble_batches, count_failures, UnitOutcome};
use crate::pipeline::encode::{audio_format, data_url, to_base64};
use crate::pipeline::postprocess::clean_page_text;
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::pipeline::split::{self, batch_ranges, PageSplitter, RenderOptions};
use crate::prompts::{batch_instruction, default_prompt};
use crate::request::ParseRequest;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CloudBackend {
    client: reqwest::Client,
    splitter: Arc<dyn PageSplitter>,
}

impl CloudBackend {
    pub fn new(client: reqwest::Client, splitter: Arc<dyn PageSplitter>) -> Self {
        Self { client, splitter }
    }

    /// Send one chat request (with retry) and return the assistant text.
    async fn complete(
        &self,
        request: &ParseRequest,
        url: &str,
        label: &str,
        content: Vec<Value>,
    ) -> Result<String, IngestError> {
        let api_key = api_key(request)?;
        let body = json!({
            "model": request.config.model.as_deref().unwrap_or(DEFAULT_CLOUD_MODEL),
            "temperature": request.config.temperature,
            "messages": [{ "role": "user", "content": content }],
        });
        let policy = RetryPolicy::from_config(&request.config);

        with_retry(&policy, &request.cancel, label, |attempt| {
            let builder = self
                .client
                .post(url)
                .bearer_auth(api_key)
                .timeout(http::request_timeout(request))
                .json(&body);
            async move {
                debug!("{}: attempt {}", label, attempt + 1);
                let resp = http::send(builder, url, &request.cancel).await?;
                let value: Value = http::read_json(resp, url, &request.cancel).await?;
                message_text(url, &value)
            }
        })
        .await
    }

    async fn convert_pdf(&self, request: &ParseRequest, url: &str) -> Result<ParseResult, IngestError> {
        let doc = &request.document;
        doc.validate()?;
        let opts = RenderOptions {
            max_rendered_pixels: request.config.max_rendered_pixels,
            password: request.config.password.clone(),
        };
        let total = split::page_count(&self.splitter, doc, &opts).await?;
        let ranges = batch_ranges(total, request.config.pages_per_batch);
        let base_prompt = request
            .config
            .prompt
            .as_deref()
            .unwrap_or_else(|| default_prompt(Modality::Pdf));
        info!("{}: {} page(s) in {} batch(es)", doc.name, total, ranges.len());
        request.emit_progress(0.0, &format!("Sending {} batch(es)", ranges.len()));

        let mut batches: Vec<((usize, usize), UnitOutcome)> = Vec::with_capacity(ranges.len());
        for (i, &(first, last)) in ranges.iter().enumerate() {
            request.cancel.check()?;
            let label = format!("Pages {first}-{last}");
            let outcome = self
                .send_batch(request, url, &label, base_prompt, (first, last), total, &opts)
                .await;
            let outcome = match outcome {
                Ok(text) => Ok(text),
                Err(e) if e.is_cancelled() => {
                    debug!("{}: cancelled", label);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{}: {}", label, e);
                    Err(PageFailure::new(first, last, &e))
                }
            };
            batches.push(((first, last), outcome));
            let percent = (i + 1) as f32 / ranges.len() as f32 * 100.0;
            request.emit_progress(percent, &format!("Batch {}/{} done", i + 1, ranges.len()));
        }

        let batches: Vec<_> = batches
            .into_iter()
            .map(|(range, outcome)| (range, outcome.map(|t| self.finish_text(request, t))))
            .collect();
        let failed = count_failures(batches.iter().map(|(_, o)| o));
        Ok(ParseResult::new(assemble_batches(&batches, total), request.pipeline.as_str())
            .with_pages(total)
            .with_failed_units(failed))
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_batch(
        &self,
        request: &ParseRequest,
        url: &str,
        label: &str,
        base_prompt: &str,
        (first, last): (usize, usize),
        total: usize,
        opts: &RenderOptions,
    ) -> Result<String, IngestError> {
        let doc = &request.document;
        let payload = if first == 1 && last == total {
            doc.bytes.to_vec()
        } else {
            split::extract_pages(&self.splitter, doc, first, last, opts)
                .await?
                .payload
        };
        let filename = if first == 1 && last == total {
            doc.name.clone()
        } else {
            format!("{}-pages-{first}-{last}.pdf", doc.name.trim_end_matches(".pdf"))
        };
        let content = vec![
            json!({ "type": "text", "text": batch_instruction(base_prompt, first, last, total) }),
            json!({
                "type": "file",
                "file": { "filename": filename, "file_data": data_url("application/pdf", &payload) },
            }),
        ];
        drop(payload);
        self.complete(request, url, label, content).await
    }

    async fn convert_single(&self, request: &ParseRequest, url: &str) -> Result<ParseResult, IngestError> {
        let doc = &request.document;
        let modality = doc.modality;
        let prompt = request
            .config
            .prompt
            .as_deref()
            .unwrap_or_else(|| default_prompt(modality));
        let media = match modality {
            Modality::Image => json!({
                "type": "image_url",
                "image_url": { "url": data_url(&doc.mime_type, &doc.bytes) },
            }),
            Modality::Audio => json!({
                "type": "input_audio",
                "input_audio": {
                    "data": to_base64(&doc.bytes),
                    "format": audio_format(&doc.mime_type, &doc.extension()),
                },
            }),
            Modality::Video => json!({
                "type": "video_url",
                "video_url": { "url": data_url(&doc.mime_type, &doc.bytes) },
            }),
            other => {
                return Err(IngestError::UnsupportedPipeline {
                    pipeline: request.pipeline.to_string(),
                    modality: other.to_string(),
                })
            }
        };
        info!("{}: single {} request", doc.name, modality);
        request.emit_progress(0.0, &format!("Sending {modality}"));
        let content = vec![json!({ "type": "text", "text": prompt }), media];
        let text = self.complete(request, url, &doc.name, content).await?;
        request.emit_progress(100.0, "Done");
        Ok(ParseResult::new(self.finish_text(request, text), request.pipeline.as_str()).with_pages(1))
    }

    fn finish_text(&self, request: &ParseRequest, text: String) -> String {
        if request.config.clean_output {
            clean_page_text(&text)
        } else {
            text
        }
    }
}

fn api_key(request: &ParseRequest) -> Result<&str, IngestError> {
    request
        .config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| IngestError::InvalidConfig("the cloud pipeline needs an API key".into()))
}

/// Pull `choices[0].message.content` out of a completion body.
///
/// Some gateways answer 200 with an `error` object; its `code` is classified
/// like an HTTP status so upstream rate limits are still retried.
fn message_text(url: &str, value: &Value) -> Result<String, IngestError> {
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(match err.get("code").and_then(Value::as_u64) {
            Some(code) => IngestError::from_status(url, code as u16, message),
            None => IngestError::Protocol(format!("error object from '{url}': {message}")),
        });
    }
    match value.pointer("/choices/0/message/content") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(parts)) => Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")),
        Some(Value::Null) | None => Err(IngestError::Protocol(format!(
            "no choices[0].message.content in response from '{url}'"
        ))),
        Some(other) => Err(IngestError::Protocol(format!(
            "unexpected content type from '{url}': {other}"
        ))),
    }
}

#[async_trait]
impl Backend for CloudBackend {
    fn pipeline(&self) -> Pipeline {
        Pipeline::CloudMultimodal
    }

    async fn convert(&self, request: &ParseRequest) -> Result<ParseResult, IngestError> {
        // A missing key must fail the file, not every batch inline.
        api_key(request)?;
        let base = request.config.endpoint_or(DEFAULT_CLOUD_ENDPOINT);
        let url = http::join(base, "chat/completions");
        match request.modality() {
            Modality::Pdf => self.convert_pdf(request, &url).await,
            _ => self.convert_single(request, &url).await,
        }
    }
}
