//! Channel streaming API: consume progress and tokens as a `Stream`.
//!
//! ## Why a spawned task?
//!
//! Backends call their sinks synchronously from inside page tasks. Rather
//! than make every caller write a `Send + Sync` sink, [`parse_document_stream`]
//! installs a [`ChannelSink`], spawns the conversion, and hands back the
//! receiving end as a [`ParseEventStream`]. The stream ends when the
//! conversion finishes (the sink is dropped with the request); the final
//! [`ParseResult`] comes from the returned join handle.

use crate::backend::Registry;
use crate::convert::parse_document;
use crate::error::IngestError;
use crate::output::ParseResult;
use crate::progress::{ChannelSink, ParseEvent};
use crate::request::ParseRequest;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// A boxed stream of conversion events.
pub type ParseEventStream = Pin<Box<dyn Stream<Item = ParseEvent> + Send>>;

/// Start converting `request` in the background.
///
/// The request's own progress and page-stream sinks are replaced by the
/// channel; cancel through `request.cancel` as usual.
pub fn parse_document_stream(
    registry: Arc<Registry>,
    request: ParseRequest,
) -> (JoinHandle<Result<ParseResult, IngestError>>, ParseEventStream) {
    let (sink, rx) = ChannelSink::channel();
    let sink = Arc::new(sink);
    let request = request
        .with_progress(sink.clone())
        .with_page_stream(sink);
    let handle = tokio::spawn(async move { parse_document(&registry, &request).await });
    (handle, Box::pin(UnboundedReceiverStream::new(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, Pipeline};
    use crate::pipeline::input::InputDocument;
    use futures::StreamExt;

    #[tokio::test]
    async fn events_end_when_conversion_finishes() {
        let registry = Arc::new(Registry::with_defaults());
        let doc = InputDocument::from_bytes("a.txt", b"streamed".to_vec());
        let request = ParseRequest::new(doc, Pipeline::CloudMultimodal, BackendConfig::default());
        let (handle, events) = parse_document_stream(registry, request);

        let events: Vec<ParseEvent> = events.collect().await;
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.text, "streamed");
        assert!(matches!(
            events.last(),
            Some(ParseEvent::Progress { percent, .. }) if *percent == 100.0
        ));
    }
}
