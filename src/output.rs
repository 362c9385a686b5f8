//! Result types returned by a backend for one file.

use serde::{Deserialize, Serialize};

/// Text extracted from one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Assembled text in page order. May contain inline `[ERROR]` markers
    /// for pages that failed.
    pub text: String,

    /// Row list, only for spreadsheet-origin inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<String>>>,

    /// Tag of the pipeline that produced the text, e.g. `"local-vision-chat"`.
    pub pipeline: String,

    /// Number of pages (or page units) the backend processed. 0 when unknown.
    pub pages: usize,

    /// Number of pages or batches rendered as inline errors.
    pub failed_units: usize,
}

impl ParseResult {
    pub fn new(text: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pipeline: pipeline.into(),
            ..Default::default()
        }
    }

    pub fn with_pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_failed_units(mut self, failed: usize) -> Self {
        self.failed_units = failed;
        self
    }

    pub fn with_rows(mut self, rows: Vec<Vec<String>>) -> Self {
        self.rows = Some(rows);
        self
    }
}
