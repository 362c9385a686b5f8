//! Server-sent events, in the two dialects the backends speak.
//!
//! * **Chat chunks** (OpenAI-compatible `/chat/completions`): lines of the
//!   form `data: <json>` whose payload carries `choices[0].delta.content`,
//!   terminated by `data: [DONE]`. Anything else is ignored.
//! * **Typed frames** (docling `/docling/parse/stream`): `event: <name>`
//!   followed by `data: <json>`. Each `data:` line is paired with the most
//!   recent `event:` line; a blank line ends the frame.

use super::lines::LineBuffer;
use super::StreamItem;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Payload of a `data:` line, or `None` for any other line.
fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

// ── Chat chunks ──────────────────────────────────────────────────────────

/// Decode a single SSE chat line.
pub fn decode_chat_line(line: &str) -> Option<StreamItem> {
    let payload = data_payload(line.trim_end())?;
    if payload == "[DONE]" {
        return Some(StreamItem::Done);
    }
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            debug!("Ignoring non-JSON SSE data ({}): {:.80}", e, payload);
            return None;
        }
    };
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Some(StreamItem::Failed(message));
    }
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(|t| StreamItem::Token(t.to_string()))
}

/// Incremental decoder for chat-completion chunk streams.
#[derive(Debug, Default)]
pub struct SseChatDecoder {
    lines: LineBuffer,
}

impl SseChatDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| decode_chat_line(line))
            .collect()
    }

    pub fn finish(&mut self) -> Vec<StreamItem> {
        self.lines
            .finish()
            .and_then(|line| decode_chat_line(&line))
            .into_iter()
            .collect()
    }
}

// ── Typed frames ─────────────────────────────────────────────────────────

/// One `event:` / `data:` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental decoder for typed event streams.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    lines: LineBuffer,
    event: Option<String>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let lines = self.lines.push(chunk);
        lines.iter().filter_map(|l| self.line(l)).collect()
    }

    pub fn finish(&mut self) -> Vec<SseFrame> {
        match self.lines.finish() {
            Some(line) => self.line(&line).into_iter().collect(),
            None => Vec::new(),
        }
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.trim().is_empty() {
            self.event = None;
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return None;
        }
        let data = data_payload(line)?;
        Some(SseFrame {
            event: self.event.clone().unwrap_or_else(|| "message".to_string()),
            data: data.to_string(),
        })
    }
}

/// Typed event of the conversion microservice.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionEvent {
    Progress {
        page: usize,
        total_pages: usize,
        status: String,
    },
    PageResult {
        page: usize,
        markdown: String,
    },
    Complete {
        markdown: String,
        num_pages: Option<usize>,
    },
    Error {
        message: String,
    },
}

#[derive(Deserialize)]
struct ProgressData {
    #[serde(default)]
    status: String,
    #[serde(default)]
    page: usize,
    #[serde(default)]
    total_pages: usize,
}

#[derive(Deserialize)]
struct PageResultData {
    page: usize,
    #[serde(default)]
    markdown: String,
}

#[derive(Deserialize)]
struct CompleteData {
    markdown: String,
    #[serde(default)]
    num_pages: Option<usize>,
}

#[derive(Deserialize)]
struct ErrorData {
    message: String,
}

impl ConversionEvent {
    /// Interpret a frame. Unknown event names and undecodable payloads yield
    /// `None`, except for `error`, whose raw payload is kept as the message.
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        let data = frame.data.as_str();
        let parsed = match frame.event.as_str() {
            "progress" => serde_json::from_str::<ProgressData>(data).map(|d| {
                ConversionEvent::Progress {
                    page: d.page,
                    total_pages: d.total_pages,
                    status: d.status,
                }
            }),
            "page_result" => serde_json::from_str::<PageResultData>(data).map(|d| {
                ConversionEvent::PageResult {
                    page: d.page,
                    markdown: d.markdown,
                }
            }),
            "complete" => serde_json::from_str::<CompleteData>(data).map(|d| {
                ConversionEvent::Complete {
                    markdown: d.markdown,
                    num_pages: d.num_pages,
                }
            }),
            "error" => {
                let message = serde_json::from_str::<ErrorData>(data)
                    .map(|d| d.message)
                    .unwrap_or_else(|_| data.to_string());
                return Some(ConversionEvent::Error { message });
            }
            other => {
                debug!("Ignoring SSE event '{}'", other);
                return None;
            }
        };
        match parsed {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Skipping malformed '{}' event: {}", frame.event, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_chunks_and_done() {
        let mut d = SseChatDecoder::new();
        let items = d.push(
            b": keep-alive\n\
              data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
              data: not json\n\
              data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n\
              data: [DONE]\n\n",
        );
        assert_eq!(
            items,
            vec![
                StreamItem::Token("Hi".into()),
                StreamItem::Token(" there".into()),
                StreamItem::Done
            ]
        );
    }

    #[test]
    fn chat_error_payload_fails() {
        let item = decode_chat_line("data: {\"error\":{\"message\":\"context length exceeded\"}}");
        assert_eq!(item, Some(StreamItem::Failed("context length exceeded".into())));
    }

    #[test]
    fn frames_pair_event_and_data_across_reads() {
        let mut d = SseFrameDecoder::new();
        let mut frames = d.push(b"event: progress\ndata: {\"status\":\"conv");
        assert!(frames.is_empty());
        frames.extend(d.push(b"erting\",\"page\":0,\"total_pages\":0}\n\nevent: page_result\n"));
        frames.extend(d.push(b"data: {\"page\":1,\"markdown\":\"# One\"}\n\n"));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "progress");
        assert_eq!(frames[1].event, "page_result");
        assert_eq!(
            ConversionEvent::from_frame(&frames[1]),
            Some(ConversionEvent::PageResult {
                page: 1,
                markdown: "# One".into()
            })
        );
    }

    #[test]
    fn data_without_event_is_message() {
        let mut d = SseFrameDecoder::new();
        let frames = d.push(b"data: {}\n\n");
        assert_eq!(frames[0].event, "message");
        assert_eq!(ConversionEvent::from_frame(&frames[0]), None);
    }

    #[test]
    fn error_event_keeps_raw_payload_when_not_json() {
        let frame = SseFrame {
            event: "error".into(),
            data: "kaboom".into(),
        };
        assert_eq!(
            ConversionEvent::from_frame(&frame),
            Some(ConversionEvent::Error {
                message: "kaboom".into()
            })
        );
    }

    #[test]
    fn complete_event_decodes() {
        let frame = SseFrame {
            event: "complete".into(),
            data: "{\"markdown\":\"all\",\"num_pages\":3}".into(),
        };
        assert_eq!(
            ConversionEvent::from_frame(&frame),
            Some(ConversionEvent::Complete {
                markdown: "all".into(),
                num_pages: Some(3)
            })
        );
    }
}
