//! HTTP plumbing shared by every backend.
//!
//! Each network await is raced against the request's [`CancelToken`];
//! losing the race drops the reqwest future, which closes the connection.

use crate::cancel::CancelToken;
use crate::error::IngestError;
use crate::request::ParseRequest;
use crate::wire::StreamItem;
use futures::StreamExt;
use std::ops::ControlFlow;
use std::time::Duration;

/// Join a base endpoint and a path without doubling slashes.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn request_timeout(request: &ParseRequest) -> Duration {
    Duration::from_secs(request.config.request_timeout_secs.max(1))
}

/// Send `builder` and return the response if its status is 2xx.
///
/// Non-2xx statuses are classified by [`IngestError::from_status`] with the
/// response body as detail.
pub(crate) async fn send(
    builder: reqwest::RequestBuilder,
    url: &str,
    cancel: &CancelToken,
) -> Result<reqwest::Response, IngestError> {
    cancel.check()?;
    let resp = tokio::select! {
        _ = cancel.cancelled() => return Err(IngestError::Cancelled),
        r = builder.send() => r.map_err(|e| IngestError::transport(url, &e))?,
    };
    check_status(resp, url, cancel).await
}

/// Like [`send`] for streamed bodies: `limit` bounds only the wait for
/// response headers, so a long but live body is never cut off. Pair with
/// [`for_each_chunk`], which bounds the gap between chunks instead.
pub(crate) async fn send_streaming(
    builder: reqwest::RequestBuilder,
    url: &str,
    cancel: &CancelToken,
    limit: Duration,
) -> Result<reqwest::Response, IngestError> {
    cancel.check()?;
    let resp = tokio::select! {
        _ = cancel.cancelled() => return Err(IngestError::Cancelled),
        r = tokio::time::timeout(limit, builder.send()) => match r {
            Ok(sent) => sent.map_err(|e| IngestError::transport(url, &e))?,
            Err(_) => return Err(timed_out(url, "response headers", limit)),
        },
    };
    check_status(resp, url, cancel).await
}

fn timed_out(url: &str, what: &str, limit: Duration) -> IngestError {
    IngestError::Transport {
        endpoint: url.to_string(),
        detail: format!("timed out after {}s waiting for {what}", limit.as_secs()),
    }
}

async fn check_status(
    resp: reqwest::Response,
    url: &str,
    cancel: &CancelToken,
) -> Result<reqwest::Response, IngestError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = tokio::select! {
        _ = cancel.cancelled() => return Err(IngestError::Cancelled),
        b = resp.text() => b.unwrap_or_default(),
    };
    Err(IngestError::from_status(url, status.as_u16(), &body))
}

/// Read a whole JSON body.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    url: &str,
    cancel: &CancelToken,
) -> Result<T, IngestError> {
    let bytes = tokio::select! {
        _ = cancel.cancelled() => return Err(IngestError::Cancelled),
        b = resp.bytes() => b.map_err(|e| IngestError::transport(url, &e))?,
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| IngestError::Protocol(format!("unexpected body from '{url}': {e}")))
}

/// Feed every body chunk to `on_chunk` as it arrives off the socket.
///
/// Stops early when `on_chunk` returns `Break`; returns once the body ends.
/// Fails with `Transport` if no chunk arrives for `idle`.
pub(crate) async fn for_each_chunk<F>(
    resp: reqwest::Response,
    url: &str,
    cancel: &CancelToken,
    idle: Duration,
    mut on_chunk: F,
) -> Result<(), IngestError>
where
    F: FnMut(&[u8]) -> Result<ControlFlow<()>, IngestError>,
{
    let mut body = std::pin::pin!(resp.bytes_stream());
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            chunk = tokio::time::timeout(idle, body.next()) => match chunk {
                Ok(chunk) => chunk,
                Err(_) => return Err(timed_out(url, "the next chunk", idle)),
            },
        };
        match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(IngestError::transport(url, &e)),
            Some(Ok(bytes)) => {
                if on_chunk(&bytes[..])?.is_break() {
                    return Ok(());
                }
            }
        }
    }
}

/// Running text of one page, fed from a decoded token stream.
pub(crate) struct PageAccumulator<'a> {
    request: &'a ParseRequest,
    endpoint: &'a str,
    page_num: usize,
    text: String,
    finished: bool,
}

impl<'a> PageAccumulator<'a> {
    pub(crate) fn new(request: &'a ParseRequest, endpoint: &'a str, page_num: usize) -> Self {
        Self {
            request,
            endpoint,
            page_num,
            text: String::new(),
            finished: false,
        }
    }

    /// Apply decoded items; tokens are forwarded to the page stream sink.
    pub(crate) fn apply(&mut self, items: Vec<StreamItem>) -> Result<ControlFlow<()>, IngestError> {
        for item in items {
            match item {
                StreamItem::Token(token) => {
                    self.text.push_str(&token);
                    self.request.emit_token(self.page_num, &token, &self.text);
                }
                StreamItem::Done => {
                    self.finished = true;
                    return Ok(ControlFlow::Break(()));
                }
                StreamItem::Failed(message) => {
                    return Err(IngestError::StreamFailed {
                        endpoint: self.endpoint.to_string(),
                        message,
                    });
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn into_text(self) -> String {
        self.text
    }
}
