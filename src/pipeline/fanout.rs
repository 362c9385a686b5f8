//! Concurrent page fan-out shared by the local vision backends.
//!
//! Every page becomes one future. By default all of them are in flight at
//! once; [`crate::config::BackendConfig::concurrency`] caps that with a
//! `buffer_unordered` window so a very large document does not overwhelm a
//! local inference server or exhaust file descriptors.
//!
//! Completion order is irrelevant: each outcome lands in the slot of its
//! page index. A page future that would start after the token is signalled
//! returns `Cancelled` without calling `call`; any `Cancelled` outcome turns
//! the whole fan-out into `Err(Cancelled)` once the window has drained.

use crate::cancel::CancelToken;
use crate::error::{IngestError, PageFailure};
use crate::pipeline::assemble::UnitOutcome;
use crate::progress::ProgressSink;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::{debug, warn};

/// Run `call(page_num)` for pages `1..=total` and collect outcomes in page order.
pub async fn fan_out_pages<F, Fut>(
    total: usize,
    concurrency: Option<usize>,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
    call: F,
) -> Result<Vec<UnitOutcome>, IngestError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<String, IngestError>>,
{
    if total == 0 {
        return Ok(Vec::new());
    }
    let window = concurrency.unwrap_or(total).clamp(1, total);
    debug!("Fanning out {} pages (window {})", total, window);

    let call = &call;
    let mut settled_stream = stream::iter(1..=total)
        .map(|page_num| async move {
            if cancel.is_cancelled() {
                return (page_num, Err(IngestError::Cancelled));
            }
            (page_num, call(page_num).await)
        })
        .buffer_unordered(window);

    let mut slots: Vec<Option<UnitOutcome>> = vec![None; total];
    let mut settled = 0usize;
    let mut cancelled = false;

    while let Some((page_num, result)) = settled_stream.next().await {
        settled += 1;
        let percent = settled as f32 / total as f32 * 100.0;
        match result {
            Ok(text) => {
                progress.on_progress(percent, &format!("Page {page_num}/{total} done"));
                slots[page_num - 1] = Some(Ok(text));
            }
            Err(e) if e.is_cancelled() => {
                debug!("Page {}: cancelled", page_num);
                cancelled = true;
            }
            Err(e) => {
                warn!("Page {}: {}", page_num, e);
                progress.on_progress(percent, &format!("Page {page_num}/{total} failed"));
                slots[page_num - 1] = Some(Err(PageFailure::new(page_num, page_num, &e)));
            }
        }
    }

    if cancelled {
        return Err(IngestError::Cancelled);
    }

    Ok(slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.unwrap_or_else(|| {
                Err(PageFailure {
                    first_page: i + 1,
                    last_page: i + 1,
                    message: "page was not processed".to_string(),
                })
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assemble::assemble_pages;
    use crate::progress::NoopSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn outcomes_are_in_page_order_despite_completion_order() {
        // Later pages finish first.
        let out = fan_out_pages(5, None, &CancelToken::new(), &NoopSink, |p| async move {
            sleep(Duration::from_millis((6 - p as u64) * 10)).await;
            Ok(format!("text {p}"))
        })
        .await
        .unwrap();

        let text = assemble_pages(&out);
        let positions: Vec<usize> = (1..=5)
            .map(|k| text.find(&format!("--- Page {k} ---")).expect("marker present"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{text}");
    }

    #[tokio::test]
    async fn one_failed_page_is_isolated() {
        let out = fan_out_pages(3, None, &CancelToken::new(), &NoopSink, |p| async move {
            if p == 2 {
                Err(IngestError::Transport {
                    endpoint: "http://local".into(),
                    detail: "connection reset".into(),
                })
            } else {
                Ok(format!("page {p} ok"))
            }
        })
        .await
        .unwrap();

        assert_eq!(out[0].as_ref().unwrap(), "page 1 ok");
        assert!(out[1].as_ref().unwrap_err().message.contains("connection reset"));
        assert_eq!(out[2].as_ref().unwrap(), "page 3 ok");
    }

    #[tokio::test]
    async fn pre_cancelled_token_dispatches_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);
        let out = fan_out_pages(4, None, &cancel, &NoopSink, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(String::new()) }
        })
        .await;
        assert!(matches!(out, Err(IngestError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn window_limits_in_flight_calls() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let out = fan_out_pages(8, Some(2), &CancelToken::new(), &NoopSink, |p| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(p.to_string())
            }
        })
        .await
        .unwrap();
        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sink = move |p: f32, _m: &str| s.lock().unwrap().push(p);
        fan_out_pages(4, None, &CancelToken::new(), &sink, |p| async move {
            Ok(p.to_string())
        })
        .await
        .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(*seen.last().unwrap(), 100.0);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
