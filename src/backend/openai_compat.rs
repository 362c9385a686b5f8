//! Local OpenAI-compatible backend (LM Studio, vLLM, llama.cpp server…).
//!
//! * **PDF / image**: same page fan-out as the Ollama backend, but each page
//!   is a streaming `/chat/completions` call with an `image_url` data URL,
//!   decoded by [`crate::wire::sse`].
//! * **Video**: one streaming call with the whole file as a `video_url`
//!   data URL. Tokens are reported as page 1.
//! * **Audio**: one non-streaming multipart upload to
//!   `/audio/transcriptions`; the response is `{"text": "…"}`.
//!
//! There is no unload step: these servers manage residency themselves.

use super::http::{self, PageAccumulator};
use super::vision;
use super::Backend;
use crate::config::{Modality, Pipeline, DEFAULT_OPENAI_COMPAT_ENDPOINT};
use crate::error::IngestError;
use crate::models::{self, list_openai_models};
use crate::output::ParseResult;
use crate::pipeline::encode::data_url;
use crate::pipeline::postprocess::clean_page_text;
use crate::pipeline::split::{PageSplitter, PageUnit};
use crate::prompts::default_prompt;
use crate::request::ParseRequest;
use crate::wire::sse::SseChatDecoder;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    splitter: Arc<dyn PageSplitter>,
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
}

impl OpenAiCompatBackend {
    pub fn new(client: reqwest::Client, splitter: Arc<dyn PageSplitter>) -> Self {
        Self { client, splitter }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder, request: &ParseRequest) -> reqwest::RequestBuilder {
        match request.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }

    async fn resolve_model(&self, request: &ParseRequest, base: &str) -> Result<String, IngestError> {
        if let Some(model) = request.config.model.as_deref().filter(|m| !m.is_empty()) {
            return Ok(model.to_string());
        }
        let api_key = request.config.api_key.as_deref();
        let listed = tokio::select! {
            _ = request.cancel.cancelled() => return Err(IngestError::Cancelled),
            r = list_openai_models(&self.client, base, api_key) => r?,
        };
        let model = models::first_model(listed, base)?;
        debug!("No model configured; using '{}' from {}", model, base);
        Ok(model)
    }

    fn prompt<'a>(&self, request: &'a ParseRequest) -> &'a str {
        request
            .config
            .prompt
            .as_deref()
            .unwrap_or_else(|| default_prompt(request.modality()))
    }

    /// One streaming chat call whose user turn is `prompt` plus `media`.
    async fn stream_chat(
        &self,
        request: &ParseRequest,
        url: &str,
        model: &str,
        page_num: usize,
        media: Value,
    ) -> Result<String, IngestError> {
        let body = json!({
            "model": model,
            "stream": true,
            "temperature": request.config.temperature,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.prompt(request) },
                    media,
                ],
            }],
        });
        let limit = http::request_timeout(request);
        let builder = self.authorize(self.client.post(url).json(&body), request);
        let resp = http::send_streaming(builder, url, &request.cancel, limit).await?;
        drop(body);

        let mut decoder = SseChatDecoder::new();
        let mut page = PageAccumulator::new(request, url, page_num);
        http::for_each_chunk(resp, url, &request.cancel, limit, |chunk| {
            page.apply(decoder.push(chunk))
        })
        .await?;
        if !page.is_finished() {
            let _flow = page.apply(decoder.finish())?;
        }
        Ok(page.into_text())
    }

    async fn chat_page(
        &self,
        request: &ParseRequest,
        url: &str,
        model: &str,
        unit: PageUnit,
    ) -> Result<String, IngestError> {
        let media = json!({
            "type": "image_url",
            "image_url": { "url": data_url(&unit.mime_type, &unit.payload) },
        });
        let page_num = unit.page_num;
        drop(unit);
        self.stream_chat(request, url, model, page_num, media).await
    }

    async fn convert_video(
        &self,
        request: &ParseRequest,
        base: &str,
    ) -> Result<ParseResult, IngestError> {
        let model = self.resolve_model(request, base).await?;
        let url = http::join(base, "chat/completions");
        let doc = &request.document;
        info!("{}: sending {} byte video to {}", doc.name, doc.len(), url);
        request.emit_progress(0.0, "Uploading video");

        let media = json!({
            "type": "video_url",
            "video_url": { "url": data_url(&doc.mime_type, &doc.bytes) },
        });
        let text = self.stream_chat(request, &url, &model, 1, media).await?;
        let text = if request.config.clean_output {
            clean_page_text(&text)
        } else {
            text
        };
        request.emit_progress(100.0, "Video transcribed");
        Ok(ParseResult::new(text, request.pipeline.as_str()).with_pages(1))
    }

    async fn convert_audio(
        &self,
        request: &ParseRequest,
        base: &str,
    ) -> Result<ParseResult, IngestError> {
        let model = self.resolve_model(request, base).await?;
        let url = http::join(base, "audio/transcriptions");
        let doc = &request.document;
        info!("{}: uploading {} byte audio to {}", doc.name, doc.len(), url);
        request.emit_progress(0.0, "Uploading audio");

        let part = reqwest::multipart::Part::bytes(doc.bytes.to_vec())
            .file_name(doc.name.clone())
            .mime_str(&doc.mime_type)
            .map_err(|e| IngestError::Internal(format!("invalid MIME type '{}': {e}", doc.mime_type)))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model);
        let builder = self
            .client
            .post(&url)
            .timeout(http::request_timeout(request))
            .multipart(form);
        let resp = http::send(self.authorize(builder, request), &url, &request.cancel).await?;
        let transcription: Transcription = http::read_json(resp, &url, &request.cancel).await?;

        request.emit_progress(100.0, "Audio transcribed");
        Ok(ParseResult::new(transcription.text.trim(), request.pipeline.as_str()).with_pages(1))
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn pipeline(&self) -> Pipeline {
        Pipeline::LocalOpenAiCompatible
    }

    async fn convert(&self, request: &ParseRequest) -> Result<ParseResult, IngestError> {
        let base = request
            .config
            .endpoint_or(DEFAULT_OPENAI_COMPAT_ENDPOINT)
            .to_string();
        match request.modality() {
            Modality::Audio => self.convert_audio(request, &base).await,
            Modality::Video => self.convert_video(request, &base).await,
            _ => {
                let model = self.resolve_model(request, &base).await?;
                let url = http::join(&base, "chat/completions");
                vision::convert_pages(request, &self.splitter, |unit| {
                    self.chat_page(request, &url, &model, unit)
                })
                .await
            }
        }
    }
}
