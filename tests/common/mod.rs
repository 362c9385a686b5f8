//! Shared fixtures for the integration tests.
//!
//! * [`FakeServer`]: a minimal HTTP/1.1 server on an ephemeral port. Each
//!   connection serves one request; the handler picks a [`Reply`], which can
//!   be a plain body, a body written in delayed chunks, or a stream that is
//!   held open until the client hangs up.
//! * [`FakeSplitter`]: a [`PageSplitter`] that needs no pdfium. Page `k`
//!   renders to the bytes `page-k`; a range renders to `pages-a-b`.

#![allow(dead_code)]

use base64::Engine;
use chunkcanvas_ingest::error::IngestError;
use chunkcanvas_ingest::pipeline::input::InputDocument;
use chunkcanvas_ingest::pipeline::split::{PageBatch, PageSplitter, PageUnit, RenderOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ── Fake HTTP server ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

pub enum Reply {
    /// Status, content type and a body written in one go.
    Full(u16, &'static str, Vec<u8>),
    /// Body pieces, each written after its delay.
    Chunks(u16, &'static str, Vec<(Duration, Vec<u8>)>),
    /// Writes `first`, then keeps the connection open until the client leaves.
    Hang(u16, &'static str, Vec<u8>),
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Reply::Full(200, "application/json", value.to_string().into_bytes())
    }

    pub fn status(status: u16, body: &str) -> Self {
        Reply::Full(status, "application/json", body.as_bytes().to_vec())
    }

    pub fn ndjson(lines: &[&str]) -> Self {
        let body = lines.iter().map(|l| format!("{l}\n")).collect::<String>();
        Reply::Full(200, "application/x-ndjson", body.into_bytes())
    }

    pub fn sse(body: &str) -> Self {
        Reply::Full(200, "text/event-stream", body.as_bytes().to_vec())
    }
}

type Handler = dyn Fn(&Request) -> Reply + Send + Sync;

pub struct FakeServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeServer {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);
        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = serve(socket, handler, log).await;
                });
            }
        });
        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    /// Wait up to one second for `path` to be hit `n` times.
    pub async fn wait_for_hits(&self, path: &str, n: usize) -> bool {
        for _ in 0..100 {
            if self.hits(path) >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

async fn serve(
    mut socket: TcpStream,
    handler: Arc<Handler>,
    log: Arc<Mutex<Vec<Request>>>,
) -> std::io::Result<()> {
    let request = read_request(&mut socket).await?;
    log.lock().unwrap().push(request.clone());
    let reply = handler(&request);

    let (status, content_type) = match &reply {
        Reply::Full(s, c, _) | Reply::Chunks(s, c, _) | Reply::Hang(s, c, _) => (*s, *c),
    };
    let head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        reason(status)
    );
    socket.write_all(head.as_bytes()).await?;

    match reply {
        Reply::Full(_, _, body) => {
            socket.write_all(&body).await?;
        }
        Reply::Chunks(_, _, chunks) => {
            for (delay, chunk) in chunks {
                tokio::time::sleep(delay).await;
                socket.write_all(&chunk).await?;
                socket.flush().await?;
            }
        }
        Reply::Hang(_, _, first) => {
            socket.write_all(&first).await?;
            socket.flush().await?;
            let mut sink = [0u8; 1024];
            while socket.read(&mut sink).await? > 0 {}
            return Ok(());
        }
    }
    socket.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Request> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut rest = buf[header_end + 4..].to_vec();
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    let body = if let Some(len) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while rest.len() < len {
            let n = socket.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            rest.extend_from_slice(&tmp[..n]);
        }
        rest.truncate(len);
        rest
    } else if header("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        loop {
            if let Some(body) = decode_chunked(&rest) {
                break body;
            }
            let n = socket.read(&mut tmp).await?;
            if n == 0 {
                break Vec::new();
            }
            rest.extend_from_slice(&tmp[..n]);
        }
    } else {
        Vec::new()
    };

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decode a complete chunked body, or `None` if more bytes are needed.
fn decode_chunked(mut data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = find(data, b"\r\n")?;
        let size_str = String::from_utf8_lossy(&data[..line_end]);
        let size = usize::from_str_radix(size_str.split(';').next()?.trim(), 16).ok()?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Some(out);
        }
        if data.len() < size + 2 {
            return None;
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size + 2..];
    }
}

// ── Fake splitter ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeSplitter {
    pub pages: usize,
    pub renders: AtomicUsize,
    pub extracts: AtomicUsize,
}

impl FakeSplitter {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            ..Default::default()
        })
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl PageSplitter for FakeSplitter {
    fn page_count(&self, _doc: &InputDocument, _opts: &RenderOptions) -> Result<usize, IngestError> {
        Ok(self.pages)
    }

    fn render_page(
        &self,
        _doc: &InputDocument,
        page_num: usize,
        _opts: &RenderOptions,
    ) -> Result<PageUnit, IngestError> {
        if page_num == 0 || page_num > self.pages {
            return Err(IngestError::PageOutOfRange {
                page: page_num,
                total: self.pages,
            });
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(PageUnit {
            page_num,
            payload: format!("page-{page_num}").into_bytes(),
            mime_type: "image/png".into(),
        })
    }

    fn extract_pages(
        &self,
        _doc: &InputDocument,
        first: usize,
        last: usize,
        _opts: &RenderOptions,
    ) -> Result<PageBatch, IngestError> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        Ok(PageBatch {
            first,
            last,
            payload: format!("pages-{first}-{last}").into_bytes(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// A document that passes the `%PDF` magic check.
pub fn fake_pdf(name: &str) -> InputDocument {
    InputDocument::from_bytes(name, b"%PDF-1.7 fake".to_vec())
}

pub fn b64_decode(s: &str) -> String {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s)
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Decode the payload of a `data:<mime>;base64,<b64>` URL.
pub fn data_url_payload(url: &str) -> String {
    url.split_once(";base64,")
        .map(|(_, b64)| b64_decode(b64))
        .unwrap_or_default()
}

/// Page number of a fake-rendered page payload (`page-k`).
pub fn page_of(payload: &str) -> usize {
    payload
        .strip_prefix("page-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}
