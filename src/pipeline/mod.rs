//! Backend-independent stages of document conversion.
//!
//! Each submodule implements one step and is tested on its own; backends
//! compose them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ encode ──▶ (backend call, retry) ──▶ postprocess ──▶ assemble
//! (bytes)   (pdfium)   (base64)                             (cleanup)       (page order)
//! ```
//!
//! 1. [`input`]    read a path or URL into an [`input::InputDocument`]
//! 2. [`split`]    count, rasterise or extract pages; pdfium runs in
//!    `spawn_blocking` because it is not async-safe
//! 3. [`encode`]   PNG and base64 / data-URL wrapping for request bodies
//! 4. [`retry`]    exponential backoff for the cloud backend
//! 5. [`fanout`]   concurrent page dispatch into fixed slots
//! 6. [`postprocess`] strip fences and stray whitespace from model output
//! 7. [`assemble`] join slots with page markers, failures inlined

pub mod assemble;
pub mod encode;
pub mod fanout;
pub mod input;
pub mod postprocess;
pub mod retry;
pub mod split;
