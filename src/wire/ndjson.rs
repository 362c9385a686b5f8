//! Ollama `/api/chat` streaming: one JSON object per line.
//!
//! Relevant fields are `message.content` (the token) and `done`. A line
//! carrying `error` fails the page. Lines that are not valid JSON are
//! skipped; the rest of the stream is still used.

use super::lines::LineBuffer;
use super::StreamItem;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

/// Decode a single line into zero or more items.
pub fn decode_line(line: &str) -> Vec<StreamItem> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let parsed: ChatLine = match serde_json::from_str(line) {
        Ok(p) => p,
        Err(e) => {
            debug!("Skipping malformed NDJSON line ({}): {:.80}", e, line);
            return Vec::new();
        }
    };

    if let Some(error) = parsed.error {
        return vec![StreamItem::Failed(error)];
    }

    let mut items = Vec::with_capacity(2);
    if let Some(message) = parsed.message {
        if !message.content.is_empty() {
            items.push(StreamItem::Token(message.content));
        }
    }
    if parsed.done {
        items.push(StreamItem::Done);
    }
    items
}

/// Incremental decoder over raw body chunks.
#[derive(Debug, Default)]
pub struct NdjsonChatDecoder {
    lines: LineBuffer,
}

impl NdjsonChatDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        self.lines
            .push(chunk)
            .iter()
            .flat_map(|line| decode_line(line))
            .collect()
    }

    /// Decode whatever the final unterminated line still holds.
    pub fn finish(&mut self) -> Vec<StreamItem> {
        self.lines
            .finish()
            .map(|line| decode_line(&line))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[StreamItem]) -> String {
        items
            .iter()
            .filter_map(|i| match i {
                StreamItem::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn decodes_tokens_and_done() {
        let mut d = NdjsonChatDecoder::new();
        let mut items = d.push(
            b"{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n\
              {\"message\":{\"content\":\"lo\"},\"done\":false}\n",
        );
        items.extend(d.push(b"{\"message\":{\"content\":\"\"},\"done\":true}\n"));
        assert_eq!(tokens(&items), "Hello");
        assert_eq!(items.last(), Some(&StreamItem::Done));
    }

    #[test]
    fn malformed_line_is_skipped() {
        let mut d = NdjsonChatDecoder::new();
        let items = d.push(
            b"{\"message\":{\"content\":\"a\"}}\n{not json\n{\"message\":{\"content\":\"b\"}}\n",
        );
        assert_eq!(tokens(&items), "ab");
    }

    #[test]
    fn final_unterminated_line_is_parsed() {
        let mut d = NdjsonChatDecoder::new();
        let mut items = d.push(b"{\"message\":{\"content\":\"x\"}}\n{\"message\":{\"content\":\"y\"},\"done\":true}");
        assert_eq!(tokens(&items), "x");
        items.extend(d.finish());
        assert_eq!(tokens(&items), "xy");
        assert_eq!(items.last(), Some(&StreamItem::Done));
    }

    #[test]
    fn error_line_fails() {
        let items = decode_line("{\"error\":\"model 'nope' not found\"}");
        assert_eq!(items, vec![StreamItem::Failed("model 'nope' not found".into())]);
    }
}
