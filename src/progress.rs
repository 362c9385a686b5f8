//! Progress and page-stream sinks.
//!
//! Backends report through two small traits rather than knowing anything
//! about the UI:
//!
//! * [`ProgressSink`] receives `(percent, message)` for the current file.
//! * [`PageStreamSink`] receives `(page_num, token, page_text_so_far)` as
//!   tokens arrive. It is optional; backends that can run with or without
//!   streaming (the docling service) pick their route by its presence.
//!
//! Both are implemented for plain closures, for [`NoopSink`], and for
//! [`ChannelSink`], which forwards every call into a Tokio channel as a
//! [`ParseEvent`] so the consumer can drain events on its own task.
//!
//! # Thread safety
//!
//! Concurrent backends call the sinks from several page tasks at once;
//! implementations must be `Send + Sync`.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Receives coarse progress for one file.
pub trait ProgressSink: Send + Sync {
    /// `percent` is in `0.0..=100.0`.
    fn on_progress(&self, percent: f32, message: &str);
}

/// Receives incremental per-page text.
pub trait PageStreamSink: Send + Sync {
    /// * `page_num` : 1-indexed page number
    /// * `token`    : the newly arrived text fragment
    /// * `page_text`: everything received for this page so far, `token` included
    fn on_page_token(&self, page_num: usize, token: &str, page_text: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn on_progress(&self, percent: f32, message: &str) {
        self(percent, message)
    }
}

impl<F> PageStreamSink for F
where
    F: Fn(usize, &str, &str) + Send + Sync,
{
    fn on_page_token(&self, page_num: usize, token: &str, page_text: &str) {
        self(page_num, token, page_text)
    }
}

/// Discards everything. Default progress sink of a request.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&self, _percent: f32, _message: &str) {}
}

impl PageStreamSink for NoopSink {
    fn on_page_token(&self, _page_num: usize, _token: &str, _page_text: &str) {}
}

/// One event produced while a file is being parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParseEvent {
    Progress {
        percent: f32,
        message: String,
    },
    PageToken {
        page_num: usize,
        token: String,
        page_text: String,
    },
}

/// Forwards sink calls into an unbounded channel.
///
/// Sends after the receiver is dropped are ignored: the consumer stopped
/// caring, which must never fail a conversion.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ParseEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ParseEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ParseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, percent: f32, message: &str) {
        let _ = self.tx.send(ParseEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }
}

impl PageStreamSink for ChannelSink {
    fn on_page_token(&self, page_num: usize, token: &str, page_text: &str) {
        let _ = self.tx.send(ParseEvent::PageToken {
            page_num,
            token: token.to_string(),
            page_text: page_text.to_string(),
        });
    }
}

/// Wraps a sink so that reported progress never goes backwards.
///
/// Concurrent page tasks finish in any order and may report percentages
/// computed from slightly stale counters; the wrapper clamps each report to
/// the running maximum and to `0..=100`.
pub struct MonotonicProgress {
    inner: Arc<dyn ProgressSink>,
    high_water: Mutex<f32>,
}

impl MonotonicProgress {
    pub fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            high_water: Mutex::new(0.0),
        }
    }
}

impl ProgressSink for MonotonicProgress {
    fn on_progress(&self, percent: f32, message: &str) {
        let clamped = {
            let mut high = self
                .high_water
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let p = if percent.is_finite() {
                percent.clamp(0.0, 100.0)
            } else {
                *high
            };
            if p > *high {
                *high = p;
            }
            *high
        };
        self.inner.on_progress(clamped, message);
    }
}

/// Convenience alias for the progress sink stored on a request.
pub type ProgressCallback = Arc<dyn ProgressSink>;
/// Convenience alias for the optional page-stream sink stored on a request.
pub type PageStreamCallback = Arc<dyn PageStreamSink>;
