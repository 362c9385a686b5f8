//! Input resolution: turn a user-supplied path or URL into an in-memory document.
//!
//! Every backend uploads or renders from bytes, so the document is read
//! once here and shared behind an `Arc` by all page tasks. Modality and MIME
//! type come from the file extension; PDFs are additionally checked for the
//! `%PDF` magic so a mislabelled file fails before any network call.

use crate::config::{mime_for_extension, Modality};
use crate::error::IngestError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A document held in memory, cheap to clone.
#[derive(Clone, Debug)]
pub struct InputDocument {
    /// File name including extension, used for uploads and labels.
    pub name: String,
    pub bytes: Arc<Vec<u8>>,
    pub mime_type: String,
    pub modality: Modality,
}

impl InputDocument {
    /// Build a document from raw bytes, detecting modality from `name`.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let ext = extension_of(&name);
        Self {
            mime_type: mime_for_extension(&ext).to_string(),
            modality: Modality::from_extension(&ext),
            name,
            bytes: Arc::new(bytes),
        }
    }

    /// Override the detected modality (e.g. an extension-less upload).
    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lower-case extension without the dot, or `""`.
    pub fn extension(&self) -> String {
        extension_of(&self.name)
    }

    /// Reject PDFs whose first bytes are not `%PDF`.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.modality == Modality::Pdf && self.bytes.len() >= 4 && &self.bytes[..4] != b"%PDF" {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&self.bytes[..4]);
            return Err(IngestError::NotAPdf {
                name: self.name.clone(),
                magic,
            });
        }
        Ok(())
    }
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL into an [`InputDocument`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<InputDocument, IngestError> {
    let doc = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else if input.trim().is_empty() {
        return Err(IngestError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(input).await?
    };
    doc.validate()?;
    Ok(doc)
}

async fn read_local(path_str: &str) -> Result<InputDocument, IngestError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IngestError::FileNotFound { path: path.clone() },
        std::io::ErrorKind::PermissionDenied => IngestError::PermissionDenied { path: path.clone() },
        _ => IngestError::InvalidInput {
            input: format!("{path_str}: {e}"),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());

    debug!("Read local input: {} ({} bytes)", path.display(), bytes.len());
    Ok(InputDocument::from_bytes(name, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<InputDocument, IngestError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| IngestError::DownloadFailed {
        url: url.to_string(),
        reason: if e.is_timeout() {
            format!("timed out after {timeout_secs}s")
        } else {
            e.to_string()
        },
    })?;

    if !response.status().is_success() {
        return Err(IngestError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let name = filename_from_url(url);
    info!("Downloaded {} ({} bytes)", name, bytes.len());
    Ok(InputDocument::from_bytes(name, bytes.to_vec()))
}

/// Last path segment of a URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
