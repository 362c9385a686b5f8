//! Configuration types for document ingestion.
//!
//! Every backend knob lives in [`BackendConfig`], built via its
//! [`BackendConfigBuilder`]. A single struct covers all four backends: each
//! backend reads the fields it understands and falls back to its own
//! defaults (for instance the endpoint) for the rest.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default base URL of the cloud multimodal API.
pub const DEFAULT_CLOUD_ENDPOINT: &str = "https://openrouter.ai/api/v1";
/// Default base URL of a local Ollama server.
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
/// Default base URL of a local OpenAI-compatible server (LM Studio).
pub const DEFAULT_OPENAI_COMPAT_ENDPOINT: &str = "http://localhost:1234/v1";
/// Default base URL of the docling conversion service.
pub const DEFAULT_DOCLING_ENDPOINT: &str = "http://localhost:8020";
/// Default upstream VLM the docling service forwards to.
pub const DEFAULT_DOCLING_VLM_URL: &str = "http://localhost:8000/v1/chat/completions";

/// Default cloud model when none is configured.
pub const DEFAULT_CLOUD_MODEL: &str = "google/gemini-2.5-flash";

/// Configuration forwarded to a backend for one file.
///
/// # Example
/// ```rust
/// use chunkcanvas_ingest::BackendConfig;
///
/// let config = BackendConfig::builder()
///     .endpoint("http://localhost:11434")
///     .model("llama3.2-vision")
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, Some(4));
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend. `None` selects the backend's default.
    pub endpoint: Option<String>,

    /// Model identifier. Local backends fall back to the first model the
    /// server lists; the cloud backend to [`DEFAULT_CLOUD_MODEL`].
    pub model: Option<String>,

    /// Instruction text sent alongside each page. `None` uses the built-in
    /// prompt for the input modality.
    pub prompt: Option<String>,

    /// Credential forwarded as a bearer token. Never logged.
    pub api_key: Option<String>,

    /// Pages per cloud request. `None` sends the whole document at once.
    pub pages_per_batch: Option<usize>,

    /// Retries after the first attempt on 429 / 5xx / transport failure. Default: 3.
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled after each retry. Default: 2000.
    pub retry_backoff_ms: u64,

    /// Ceiling on concurrent page calls for local backends. `None` (default)
    /// dispatches every page at once.
    pub concurrency: Option<usize>,

    /// Request timeout in seconds. Default: 300. Bounds the whole call on
    /// non-streaming routes; on streaming routes it bounds the wait for
    /// response headers and each gap between body chunks.
    pub request_timeout_secs: u64,

    /// Longest edge of a rendered page image in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Sampling temperature for chat-style backends. Default: 0.1.
    pub temperature: f32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// VLM endpoint the docling service should call. Default: [`DEFAULT_DOCLING_VLM_URL`].
    pub upstream_vlm_url: Option<String>,

    /// Ask Ollama to unload the model after a document. Default: true.
    pub unload_model: bool,

    /// Apply [`crate::pipeline::postprocess::clean_page_text`] to page output. Default: true.
    pub clean_output: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            prompt: None,
            api_key: None,
            pages_per_batch: None,
            max_retries: 3,
            retry_backoff_ms: 2000,
            concurrency: None,
            request_timeout_secs: 300,
            max_rendered_pixels: 2000,
            temperature: 0.1,
            password: None,
            upstream_vlm_url: None,
            unload_model: true,
            clean_output: true,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("prompt", &self.prompt.as_ref().map(|p| p.len()))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("pages_per_batch", &self.pages_per_batch)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("concurrency", &self.concurrency)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("temperature", &self.temperature)
            .field("upstream_vlm_url", &self.upstream_vlm_url)
            .field("unload_model", &self.unload_model)
            .field("clean_output", &self.clean_output)
            .finish()
    }
}

impl BackendConfig {
    /// Create a new builder for `BackendConfig`.
    pub fn builder() -> BackendConfigBuilder {
        BackendConfigBuilder {
            config: Self::default(),
        }
    }

    /// The configured endpoint, or `default` with any trailing slash removed.
    pub fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
    }
}

/// Builder for [`BackendConfig`].
#[derive(Debug)]
pub struct BackendConfigBuilder {
    config: BackendConfig,
}

impl BackendConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn pages_per_batch(mut self, n: usize) -> Self {
        self.config.pages_per_batch = Some(n);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = Some(n.max(1));
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn upstream_vlm_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream_vlm_url = Some(url.into());
        self
    }

    pub fn unload_model(mut self, v: bool) -> Self {
        self.config.unload_model = v;
        self
    }

    pub fn clean_output(mut self, v: bool) -> Self {
        self.config.clean_output = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BackendConfig, IngestError> {
        let c = &self.config;
        if c.pages_per_batch == Some(0) {
            return Err(IngestError::InvalidConfig(
                "pages_per_batch must be ≥ 1".into(),
            ));
        }
        if let Some(ref endpoint) = c.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(IngestError::InvalidConfig(format!(
                    "endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
        }
        if c.request_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// The four pluggable document → text backends.
///
/// Each variant is one backend implementation; [`Pipeline::supports`]
/// decides which input modalities it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pipeline {
    /// Metered cloud multimodal chat API with batching and retry.
    CloudMultimodal,
    /// Local Ollama vision-chat server, NDJSON streaming.
    LocalVisionChat,
    /// Local OpenAI-compatible server (LM Studio, vLLM), SSE streaming.
    LocalOpenAiCompatible,
    /// External docling conversion microservice, typed SSE events.
    ExternalStreamingService,
}

impl Pipeline {
    pub const ALL: [Pipeline; 4] = [
        Pipeline::CloudMultimodal,
        Pipeline::LocalVisionChat,
        Pipeline::LocalOpenAiCompatible,
        Pipeline::ExternalStreamingService,
    ];

    /// Stable tag stored in [`crate::output::ParseResult::pipeline`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::CloudMultimodal => "cloud-multimodal",
            Pipeline::LocalVisionChat => "local-vision-chat",
            Pipeline::LocalOpenAiCompatible => "local-openai-compatible",
            Pipeline::ExternalStreamingService => "external-streaming-service",
        }
    }

    /// Whether this backend can process the given modality.
    pub fn supports(&self, modality: Modality) -> bool {
        use Modality::*;
        match self {
            Pipeline::CloudMultimodal => matches!(modality, Pdf | Image | Audio | Video),
            Pipeline::LocalVisionChat => matches!(modality, Pdf | Image),
            Pipeline::LocalOpenAiCompatible => matches!(modality, Pdf | Image | Audio | Video),
            Pipeline::ExternalStreamingService => matches!(modality, Pdf),
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloud" | "cloud-multimodal" | "openrouter" | "gemini" => Ok(Pipeline::CloudMultimodal),
            "ollama" | "local-vision" | "local-vision-chat" => Ok(Pipeline::LocalVisionChat),
            "openai-compatible" | "local-openai" | "local-openai-compatible" | "lmstudio"
            | "vllm" => Ok(Pipeline::LocalOpenAiCompatible),
            "docling" | "external" | "external-streaming-service" => {
                Ok(Pipeline::ExternalStreamingService)
            }
            other => Err(IngestError::InvalidConfig(format!(
                "unknown pipeline '{other}' (expected cloud, ollama, openai-compatible or docling)"
            ))),
        }
    }
}

/// Input modality, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    Pdf,
    Image,
    Audio,
    Video,
    Spreadsheet,
    Text,
    WordDocument,
    Unknown,
}

impl Modality {
    /// Detect modality from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Modality::Pdf,
            "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" | "tif" | "tiff" => Modality::Image,
            "mp3" | "wav" | "m4a" | "ogg" | "flac" | "aac" => Modality::Audio,
            "mp4" | "mov" | "avi" | "mkv" | "webm" => Modality::Video,
            "csv" | "tsv" | "xlsx" | "xls" | "ods" => Modality::Spreadsheet,
            "txt" | "md" | "markdown" | "json" | "html" | "htm" => Modality::Text,
            "docx" => Modality::WordDocument,
            _ => Modality::Unknown,
        }
    }

    /// Leaf modalities are handled by single-shot extractors, not backends.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Modality::Spreadsheet | Modality::Text | Modality::WordDocument
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Pdf => "pdf",
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Video => "video",
            Modality::Spreadsheet => "spreadsheet",
            Modality::Text => "text",
            Modality::WordDocument => "word-document",
            Modality::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MIME type for a file extension, used for data URLs and uploads.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = BackendConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_backoff_ms, 2000);
        assert_eq!(c.concurrency, None);
        assert_eq!(c.pages_per_batch, None);
        assert!(c.unload_model);
    }

    #[test]
    fn builder_rejects_zero_batch() {
        let err = BackendConfig::builder().pages_per_batch(0).build();
        assert!(matches!(err, Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_non_http_endpoint() {
        let err = BackendConfig::builder().endpoint("ftp://x").build();
        assert!(matches!(err, Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn debug_redacts_credential() {
        let c = BackendConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn endpoint_fallback_strips_slash() {
        let c = BackendConfig::builder()
            .endpoint("http://host:1234/v1/")
            .build()
            .unwrap();
        assert_eq!(c.endpoint_or(DEFAULT_OLLAMA_ENDPOINT), "http://host:1234/v1");
        let d = BackendConfig::default();
        assert_eq!(d.endpoint_or(DEFAULT_OLLAMA_ENDPOINT), DEFAULT_OLLAMA_ENDPOINT);
    }

    #[test]
    fn pipeline_aliases() {
        assert_eq!("ollama".parse::<Pipeline>().unwrap(), Pipeline::LocalVisionChat);
        assert_eq!("LMStudio".parse::<Pipeline>().unwrap(), Pipeline::LocalOpenAiCompatible);
        assert_eq!("docling".parse::<Pipeline>().unwrap(), Pipeline::ExternalStreamingService);
        assert_eq!("openrouter".parse::<Pipeline>().unwrap(), Pipeline::CloudMultimodal);
        assert!("carrier-pigeon".parse::<Pipeline>().is_err());
    }

    #[test]
    fn pipeline_support_matrix() {
        assert!(Pipeline::CloudMultimodal.supports(Modality::Video));
        assert!(!Pipeline::LocalVisionChat.supports(Modality::Audio));
        assert!(Pipeline::LocalOpenAiCompatible.supports(Modality::Audio));
        assert!(!Pipeline::ExternalStreamingService.supports(Modality::Image));
        for p in Pipeline::ALL {
            assert!(!p.supports(Modality::Spreadsheet));
            assert!(!p.supports(Modality::Unknown));
        }
    }

    #[test]
    fn modality_detection() {
        assert_eq!(Modality::from_extension("PDF"), Modality::Pdf);
        assert_eq!(Modality::from_extension("jpeg"), Modality::Image);
        assert_eq!(Modality::from_extension("m4a"), Modality::Audio);
        assert_eq!(Modality::from_extension("mov"), Modality::Video);
        assert_eq!(Modality::from_extension("xlsx"), Modality::Spreadsheet);
        assert_eq!(Modality::from_extension("exe"), Modality::Unknown);
        assert!(Modality::Spreadsheet.is_leaf());
        assert!(!Modality::Pdf.is_leaf());
        assert_eq!(mime_for_extension("WAV"), "audio/wav");
    }
}
