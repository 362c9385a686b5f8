//! Local vision-chat backend (Ollama).
//!
//! One streaming `/api/chat` call per page, all pages in flight at once
//! unless a concurrency ceiling is configured. Each call carries the page
//! PNG base64-encoded in `messages[0].images`:
//!
//! ```json
//! {"model": "…", "stream": true, "options": {"temperature": 0.1},
//!  "messages": [{"role": "user", "content": "<prompt>", "images": ["<b64>"]}]}
//! ```
//!
//! The body is NDJSON, decoded by [`crate::wire::ndjson`]. Once the fan-out
//! settles the model is unloaded with `keep_alive: 0` so a local GPU is not
//! held after a document. That call is fire-and-forget.

use super::http::{self, PageAccumulator};
use super::vision;
use super::Backend;
use crate::config::{Pipeline, DEFAULT_OLLAMA_ENDPOINT};
use crate::error::IngestError;
use crate::models::{self, list_ollama_models};
use crate::output::ParseResult;
use crate::pipeline::encode::to_base64;
use crate::pipeline::split::{PageSplitter, PageUnit};
use crate::prompts::default_prompt;
use crate::request::ParseRequest;
use crate::wire::ndjson::NdjsonChatDecoder;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub struct OllamaBackend {
    client: reqwest::Client,
    splitter: Arc<dyn PageSplitter>,
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, splitter: Arc<dyn PageSplitter>) -> Self {
        Self { client, splitter }
    }

    async fn resolve_model(&self, request: &ParseRequest, base: &str) -> Result<String, IngestError> {
        if let Some(model) = request.config.model.as_deref().filter(|m| !m.is_empty()) {
            return Ok(model.to_string());
        }
        let listed = tokio::select! {
            _ = request.cancel.cancelled() => return Err(IngestError::Cancelled),
            r = list_ollama_models(&self.client, base) => r?,
        };
        let model = models::first_model(listed, base)?;
        debug!("No model configured; using '{}' from {}", model, base);
        Ok(model)
    }

    async fn chat_page(
        &self,
        request: &ParseRequest,
        url: &str,
        model: &str,
        unit: PageUnit,
    ) -> Result<String, IngestError> {
        let prompt = request
            .config
            .prompt
            .as_deref()
            .unwrap_or_else(|| default_prompt(request.modality()));
        let body = json!({
            "model": model,
            "stream": true,
            "options": { "temperature": request.config.temperature },
            "messages": [{
                "role": "user",
                "content": prompt,
                "images": [to_base64(&unit.payload)],
            }],
        });
        let page_num = unit.page_num;
        drop(unit);

        let limit = http::request_timeout(request);
        let builder = self.client.post(url).json(&body);
        let resp = http::send_streaming(builder, url, &request.cancel, limit).await?;
        drop(body);

        let mut decoder = NdjsonChatDecoder::new();
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
}

/// Ask Ollama to release `model` from memory. Errors are logged and dropped.
async fn unload(client: reqwest::Client, base: String, model: String) {
    let url = http::join(&base, "api/generate");
    let body = json!({ "model": model, "keep_alive": 0 });
    match client.post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => debug!("Unloaded '{}'", model),
        Ok(resp) => debug!("Unload of '{}' returned HTTP {}", model, resp.status()),
        Err(e) => debug!("Unload of '{}' failed: {}", model, e),
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn pipeline(&self) -> Pipeline {
        Pipeline::LocalVisionChat
    }

    async fn convert(&self, request: &ParseRequest) -> Result<ParseResult, IngestError> {
        let base = request.config.endpoint_or(DEFAULT_OLLAMA_ENDPOINT).to_string();
        let model = self.resolve_model(request, &base).await?;
        let url = http::join(&base, "api/chat");

        let result = vision::convert_pages(request, &self.splitter, |unit| {
            self.chat_page(request, &url, &model, unit)
        })
        .await;

        if request.config.unload_model && !matches!(result, Err(IngestError::Cancelled)) {
            tokio::spawn(unload(self.client.clone(), base, model));
        }
        result
    }
}
