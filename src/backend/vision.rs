//! Page flow shared by the two local vision backends.
//!
//! ```text
//! document ──▶ page count ──▶ fan-out ─┬─▶ render p1 ─▶ call ─▶ slot 1
//!                                      ├─▶ render p2 ─▶ call ─▶ slot 2
//!                                      └─▶ …
//!                                           │
//!                               assemble "--- Page k ---" in order
//! ```
//!
//! Each page task renders lazily, right before its call, and the PNG is
//! dropped as soon as the request body is built. An image input is a single
//! unit carrying its own bytes.

use crate::config::Modality;
use crate::error::IngestError;
use crate::output::ParseResult;
use crate::pipeline::assemble::{assemble_pages, count_failures};
use crate::pipeline::fanout::fan_out_pages;
use crate::pipeline::postprocess::clean_page_text;
use crate::pipeline::split::{self, PageSplitter, PageUnit, RenderOptions};
use crate::request::ParseRequest;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) fn render_options(request: &ParseRequest) -> RenderOptions {
    RenderOptions {
        max_rendered_pixels: request.config.max_rendered_pixels,
        password: request.config.password.clone(),
    }
}

/// Fan `call` out over every page of `request.document`.
pub(crate) async fn convert_pages<F, Fut>(
    request: &ParseRequest,
    splitter: &Arc<dyn PageSplitter>,
    call: F,
) -> Result<ParseResult, IngestError>
where
    F: Fn(PageUnit) -> Fut,
    Fut: Future<Output = Result<String, IngestError>>,
{
    let doc = &request.document;
    let opts = render_options(request);

    let total = match doc.modality {
        Modality::Image => 1,
        _ => {
            doc.validate()?;
            split::page_count(splitter, doc, &opts).await?
        }
    };
    if total == 0 {
        return Err(IngestError::CorruptDocument {
            name: doc.name.clone(),
            detail: "document has no pages".into(),
        });
    }
    info!("{}: {} page(s) via {}", doc.name, total, request.pipeline);
    request.emit_progress(0.0, &format!("Processing {total} page(s)"));

    let call = &call;
    let opts = &opts;
    let slots = fan_out_pages(
        total,
        request.config.concurrency,
        &request.cancel,
        request.progress.as_ref(),
        |page_num| async move {
            let unit = match doc.modality {
                Modality::Image => PageUnit {
                    page_num,
                    payload: doc.bytes.to_vec(),
                    mime_type: doc.mime_type.clone(),
                },
                _ => split::render_page(splitter, doc, page_num, opts).await?,
            };
            request.cancel.check()?;
            debug!("Page {}: {} bytes", page_num, unit.payload.len());
            call(unit).await
        },
    )
    .await?;

    let slots: Vec<_> = if request.config.clean_output {
        slots
            .into_iter()
            .map(|slot| slot.map(|text| clean_page_text(&text)))
            .collect()
    } else {
        slots
    };

    let failed = count_failures(&slots);
    if failed > 0 {
        info!("{}: {}/{} page(s) failed", doc.name, failed, total);
    }
    Ok(ParseResult::new(assemble_pages(&slots), request.pipeline.as_str())
        .with_pages(total)
        .with_failed_units(failed))
}
