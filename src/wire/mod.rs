//! Streaming wire protocols consumed by the backends.
//!
//! Decoders here are pure: they accept raw body chunks exactly as they come
//! off the socket (arbitrary boundaries, possibly splitting a UTF-8
//! sequence) and yield typed items. Backends own the network loop; tests
//! feed chunks by hand.
//!
//! * [`lines`] : byte-level line buffering shared by both formats
//! * [`ndjson`]: Ollama line-delimited JSON chat stream
//! * [`sse`]   : OpenAI-style `data:` chunks and typed `event:`/`data:` frames

pub mod lines;
pub mod ndjson;
pub mod sse;

/// One decoded item of a chat token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// An incremental text token.
    Token(String),
    /// The server signalled the end of the answer.
    Done,
    /// The server reported an error inside the stream.
    Failed(String),
}
