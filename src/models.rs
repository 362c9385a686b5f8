//! Model discovery for the local backends.
//!
//! When no model is configured, the local backends ask the server which
//! models it serves and use the first one. Listing is cheap but not free
//! (Ollama stats every model blob on disk), so results are kept in a
//! [`ModelCache`] keyed by endpoint for a few minutes.

use crate::error::IngestError;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a fetched model list stays fresh.
pub const MODEL_CACHE_TTL: Duration = Duration::from_secs(300);

/// Process-wide cache shared by all backends.
pub static MODEL_CACHE: Lazy<ModelCache> = Lazy::new(|| ModelCache::new(MODEL_CACHE_TTL));

#[derive(Debug, Clone)]
struct CachedModels {
    models: Vec<String>,
    fetched_at: Instant,
}

/// Endpoint → model names, with a staleness check on read.
#[derive(Debug)]
pub struct ModelCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedModels>>,
}

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<Vec<String>> {
        self.get_at(endpoint, Instant::now())
    }

    /// Like [`get`](Self::get), judged against an explicit clock reading.
    pub fn get_at(&self, endpoint: &str, now: Instant) -> Option<Vec<String>> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(endpoint)?;
        if now.saturating_duration_since(entry.fetched_at) > self.ttl {
            return None;
        }
        Some(entry.models.clone())
    }

    pub fn insert(&self, endpoint: &str, models: Vec<String>) {
        self.insert_at(endpoint, models, Instant::now());
    }

    pub fn insert_at(&self, endpoint: &str, models: Vec<String>, fetched_at: Instant) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(endpoint.to_string(), CachedModels { models, fetched_at });
        }
    }

    pub fn invalidate(&self, endpoint: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(endpoint);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

// ── Listing ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OpenAiModels {
    #[serde(default)]
    data: Vec<OpenAiModel>,
}

#[derive(Deserialize)]
struct OpenAiModel {
    id: String,
}

async fn get_json<T: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<T, IngestError> {
    let resp = request
        .send()
        .await
        .map_err(|e| IngestError::transport(url, &e))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(IngestError::from_status(url, status.as_u16(), &body));
    }
    resp.json::<T>()
        .await
        .map_err(|e| IngestError::Protocol(format!("model list from '{url}': {e}")))
}

/// Models served by an Ollama instance (`GET /api/tags`).
pub async fn list_ollama_models(
    client: &reqwest::Client,
    base: &str,
) -> Result<Vec<String>, IngestError> {
    if let Some(models) = MODEL_CACHE.get(base) {
        return Ok(models);
    }
    let url = format!("{base}/api/tags");
    let tags: OllamaTags = get_json(client.get(&url), &url).await?;
    let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
    debug!("{} lists {} models", base, models.len());
    MODEL_CACHE.insert(base, models.clone());
    Ok(models)
}

/// Models served by an OpenAI-compatible server (`GET /models`).
pub async fn list_openai_models(
    client: &reqwest::Client,
    base: &str,
    api_key: Option<&str>,
) -> Result<Vec<String>, IngestError> {
    if let Some(models) = MODEL_CACHE.get(base) {
        return Ok(models);
    }
    let url = format!("{base}/models");
    let mut request = client.get(&url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let list: OpenAiModels = get_json(request, &url).await?;
    let models: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
    debug!("{} lists {} models", base, models.len());
    MODEL_CACHE.insert(base, models.clone());
    Ok(models)
}

/// The configured model, or the first one the server lists.
pub(crate) fn first_model(models: Vec<String>, base: &str) -> Result<String, IngestError> {
    models.into_iter().next().ok_or_else(|| {
        IngestError::InvalidConfig(format!(
            "no model configured and '{base}' does not list any models"
        ))
    })
}
