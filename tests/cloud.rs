//! Cloud backend: batching, retry and error inlining against a fake gateway.

mod common;

use chunkcanvas_ingest::{
    parse_document, BackendConfig, IngestError, InputDocument, ParseRequest, Pipeline, Registry,
};
use common::{data_url_payload, fake_pdf, FakeServer, FakeSplitter, Reply};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CHAT: &str = "/api/v1/chat/completions";

fn registry(splitter: &Arc<FakeSplitter>) -> Registry {
    Registry::with_splitter(reqwest::Client::new(), splitter.clone())
}

fn config(url: &str) -> chunkcanvas_ingest::BackendConfigBuilder {
    BackendConfig::builder()
        .endpoint(format!("{url}/api/v1"))
        .api_key("sk-test")
        .retry_backoff_ms(10)
}

fn completion(text: &str) -> Reply {
    Reply::json(json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] }))
}

fn file_payload(body: &Value) -> String {
    let url = body["messages"][0]["content"][1]["file"]["file_data"]
        .as_str()
        .unwrap_or_default();
    data_url_payload(url)
}

#[tokio::test]
async fn whole_document_batch_is_returned_bare() {
    let server = FakeServer::start(|_req| completion("# Title\n\nBody text.")).await;
    let splitter = FakeSplitter::new(3);
    let request = ParseRequest::new(
        fake_pdf("report.pdf"),
        Pipeline::CloudMultimodal,
        config(&server.url).build().unwrap(),
    );

    let result = parse_document(&registry(&splitter), &request).await.unwrap();

    assert_eq!(result.text, "# Title\n\nBody text.");
    assert_eq!(result.pages, 3);
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.path, CHAT);
    assert_eq!(req.header("authorization"), Some("Bearer sk-test"));
    let body = req.json();
    let file = &body["messages"][0]["content"][1]["file"];
    assert_eq!(file["filename"], "report.pdf");
    assert!(file["file_data"]
        .as_str()
        .unwrap()
        .starts_with("data:application/pdf;base64,"));
    // Unsplit: the original bytes are uploaded.
    assert_eq!(file_payload(&body), "%PDF-1.7 fake");
    assert_eq!(splitter.extracts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pages_are_sent_in_labelled_batches() {
    let server = FakeServer::start(|req| {
        let payload = file_payload(&req.json());
        completion(&format!("text of {payload}"))
    })
    .await;
    let splitter = FakeSplitter::new(5);
    let request = ParseRequest::new(
        fake_pdf("book.pdf"),
        Pipeline::CloudMultimodal,
        config(&server.url).pages_per_batch(2).build().unwrap(),
    );

    let result = parse_document(&registry(&splitter), &request).await.unwrap();

    assert_eq!(
        result.text,
        "--- Pages 1-2 ---\ntext of pages-1-2\n\n\
         --- Pages 3-4 ---\ntext of pages-3-4\n\n\
         --- Page 5 ---\ntext of pages-5-5"
    );
    let payloads: Vec<String> = server
        .requests()
        .iter()
        .map(|r| file_payload(&r.json()))
        .collect();
    assert_eq!(payloads, vec!["pages-1-2", "pages-3-4", "pages-5-5"]);
    let instruction = server.requests()[1].json()["messages"][0]["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert!(instruction.contains("pages 3-4 of a 5-page document"));
}

#[tokio::test]
async fn rate_limits_are_retried_with_backoff() {
    let calls = AtomicUsize::new(0);
    let server = FakeServer::start(move |_req| match calls.fetch_add(1, Ordering::SeqCst) {
        0 | 1 => Reply::status(429, r#"{"error":"slow down"}"#),
        _ => completion("finally"),
    })
    .await;
    let splitter = FakeSplitter::new(1);
    let request = ParseRequest::new(
        fake_pdf("doc.pdf"),
        Pipeline::CloudMultimodal,
        config(&server.url).build().unwrap(),
    );

    let result = parse_document(&registry(&splitter), &request).await.unwrap();

    assert_eq!(result.text, "finally");
    assert_eq!(server.hits(CHAT), 3);
}

#[tokio::test]
async fn exhausted_retries_fail_a_single_request() {
    let server = FakeServer::start(|_req| Reply::status(429, "busy")).await;
    let splitter = FakeSplitter::new(0);
    let doc = InputDocument::from_bytes("scan.png", b"\x89PNG".to_vec());
    let request = ParseRequest::new(
        doc,
        Pipeline::CloudMultimodal,
        config(&server.url).build().unwrap(),
    );

    let err = parse_document(&registry(&splitter), &request)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::RateLimited { .. }), "{err:?}");
    assert_eq!(server.hits(CHAT), 4);
}

#[tokio::test]
async fn client_error_is_inlined_and_later_batches_run() {
    let server = FakeServer::start(|req| {
        let payload = file_payload(&req.json());
        if payload == "pages-1-1" {
            Reply::status(400, r#"{"error":{"message":"file too large"}}"#)
        } else {
            completion(&format!("ok {payload}"))
        }
    })
    .await;
    let splitter = FakeSplitter::new(2);
    let request = ParseRequest::new(
        fake_pdf("doc.pdf"),
        Pipeline::CloudMultimodal,
        config(&server.url).pages_per_batch(1).build().unwrap(),
    );

    let result = parse_document(&registry(&splitter), &request).await.unwrap();

    // 400 is not retried.
    assert_eq!(server.hits(CHAT), 2);
    assert_eq!(result.failed_units, 1);
    assert!(
        result
            .text
            .starts_with("--- Page 1 ---\n[ERROR] Request to '"),
        "{}",
        result.text
    );
    assert!(result.text.contains("HTTP 400"));
    assert!(result.text.ends_with("--- Page 2 ---\nok pages-2-2"));
}

#[tokio::test]
async fn embedded_error_object_is_classified() {
    let calls = AtomicUsize::new(0);
    let server = FakeServer::start(move |_req| match calls.fetch_add(1, Ordering::SeqCst) {
        0 => Reply::json(json!({ "error": { "code": 503, "message": "provider down" } })),
        _ => completion("recovered"),
    })
    .await;
    let splitter = FakeSplitter::new(1);
    let request = ParseRequest::new(
        fake_pdf("doc.pdf"),
        Pipeline::CloudMultimodal,
        config(&server.url).build().unwrap(),
    );

    let result = parse_document(&registry(&splitter), &request).await.unwrap();

    assert_eq!(result.text, "recovered");
    assert_eq!(server.hits(CHAT), 2);
}

#[tokio::test]
async fn audio_is_sent_as_input_audio() {
    let server = FakeServer::start(|req| {
        let body = req.json();
        let part = &body["messages"][0]["content"][1];
        if part["type"] == "input_audio" && part["input_audio"]["format"] == "wav" {
            completion("spoken words")
        } else {
            Reply::status(400, "wrong shape")
        }
    })
    .await;
    let splitter = FakeSplitter::new(0);
    let doc = InputDocument::from_bytes("memo.wav", b"RIFF....WAVE".to_vec());
    let request = ParseRequest::new(
        doc,
        Pipeline::CloudMultimodal,
        config(&server.url).build().unwrap(),
    );

    let result = parse_document(&registry(&splitter), &request).await.unwrap();
    assert_eq!(result.text, "spoken words");
}

#[tokio::test]
async fn missing_api_key_is_a_config_error() {
    let server = FakeServer::start(|_req| completion("unused")).await;
    let splitter = FakeSplitter::new(0);
    let doc = InputDocument::from_bytes("scan.png", b"\x89PNG".to_vec());
    let config = BackendConfig::builder()
        .endpoint(format!("{}/api/v1", server.url))
        .build()
        .unwrap();
    let request = ParseRequest::new(doc, Pipeline::CloudMultimodal, config);

    let err = parse_document(&registry(&splitter), &request)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::InvalidConfig(_)), "{err:?}");
    assert_eq!(server.requests().len(), 0);
}

#[tokio::test]
async fn missing_api_key_fails_a_pdf_before_splitting() {
    let server = FakeServer::start(|_req| completion("unused")).await;
    let splitter = FakeSplitter::new(3);
    let config = BackendConfig::builder()
        .endpoint(format!("{}/api/v1", server.url))
        .pages_per_batch(1)
        .build()
        .unwrap();
    let request = ParseRequest::new(fake_pdf("doc.pdf"), Pipeline::CloudMultimodal, config);

    let err = parse_document(&registry(&splitter), &request)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::InvalidConfig(_)), "{err:?}");
    assert_eq!(server.requests().len(), 0);
    assert_eq!(splitter.extracts.load(Ordering::SeqCst), 0);
}
