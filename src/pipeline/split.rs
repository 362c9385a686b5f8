//! Page splitting: turn a paged document into independently dispatchable units.
//!
//! Two shapes are produced:
//!
//! * [`PageUnit`]: one page rasterised to PNG, for vision backends.
//! * [`PageBatch`]: a standalone sub-document covering a page range, for
//!   the cloud backend which accepts native PDF uploads.
//!
//! ## Why load per call?
//!
//! Every [`PageSplitter`] method opens the document afresh from the shared
//! bytes. Calls are therefore idempotent and independent, so page tasks can
//! render concurrently, and a page's raster lives only as long as the task
//! that sends it.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is CPU-bound and not async-safe. [`render_page`] and
//! [`extract_pages`] move the work to Tokio's blocking pool.

use crate::error::IngestError;
use crate::pipeline::encode;
use crate::pipeline::input::InputDocument;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// One page, rendered and ready to upload.
#[derive(Debug, Clone)]
pub struct PageUnit {
    /// 1-indexed page number.
    pub page_num: usize,
    pub payload: Vec<u8>,
    pub mime_type: String,
}

/// A contiguous page range extracted as its own document.
#[derive(Debug, Clone)]
pub struct PageBatch {
    /// First page, 1-indexed, inclusive.
    pub first: usize,
    /// Last page, 1-indexed, inclusive.
    pub last: usize,
    pub payload: Vec<u8>,
}

/// Rendering knobs taken from [`crate::config::BackendConfig`].
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
}

/// Splits a page-addressable document.
///
/// Implementations must be side-effect free: the same call with the same
/// arguments yields the same bytes, and concurrent calls do not interfere.
pub trait PageSplitter: Send + Sync {
    fn page_count(&self, doc: &InputDocument, opts: &RenderOptions) -> Result<usize, IngestError>;

    /// Rasterise page `page_num` (1-indexed) to PNG.
    fn render_page(
        &self,
        doc: &InputDocument,
        page_num: usize,
        opts: &RenderOptions,
    ) -> Result<PageUnit, IngestError>;

    /// Copy pages `first..=last` (1-indexed) into a new document.
    fn extract_pages(
        &self,
        doc: &InputDocument,
        first: usize,
        last: usize,
        opts: &RenderOptions,
    ) -> Result<PageBatch, IngestError>;
}

/// [`PageSplitter`] backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumSplitter;

impl PdfiumSplitter {
    fn open<'a>(
        pdfium: &'a Pdfium,
        doc: &'a InputDocument,
        password: Option<&str>,
    ) -> Result<PdfDocument<'a>, IngestError> {
        pdfium
            .load_pdf_from_byte_slice(doc.bytes.as_slice(), password)
            .map_err(|e| IngestError::CorruptDocument {
                name: doc.name.clone(),
                detail: format!("{:?}", e),
            })
    }
}

impl PageSplitter for PdfiumSplitter {
    fn page_count(&self, doc: &InputDocument, opts: &RenderOptions) -> Result<usize, IngestError> {
        let pdfium = Pdfium::default();
        let document = Self::open(&pdfium, doc, opts.password.as_deref())?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        doc: &InputDocument,
        page_num: usize,
        opts: &RenderOptions,
    ) -> Result<PageUnit, IngestError> {
        let pdfium = Pdfium::default();
        let document = Self::open(&pdfium, doc, opts.password.as_deref())?;
        let pages = document.pages();
        let total = pages.len() as usize;
        if page_num == 0 || page_num > total {
            return Err(IngestError::PageOutOfRange {
                page: page_num,
                total,
            });
        }

        let page = pages
            .get((page_num - 1) as PdfPageIndex)
            .map_err(|e| IngestError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let max_px = opts.max_rendered_pixels.max(100) as i32;
        let render_config = PdfRenderConfig::new()
            .set_target_width(max_px)
            .set_maximum_height(max_px);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| IngestError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        let payload = encode::encode_png(&image).map_err(|e| IngestError::RasterisationFailed {
            page: page_num,
            detail: format!("PNG encoding failed: {}", e),
        })?;

        Ok(PageUnit {
            page_num,
            payload,
            mime_type: "image/png".to_string(),
        })
    }

    fn extract_pages(
        &self,
        doc: &InputDocument,
        first: usize,
        last: usize,
        opts: &RenderOptions,
    ) -> Result<PageBatch, IngestError> {
        let pdfium = Pdfium::default();
        let source = Self::open(&pdfium, doc, opts.password.as_deref())?;
        let total = source.pages().len() as usize;
        if first == 0 || first > last || last > total {
            return Err(IngestError::PageOutOfRange { page: last, total });
        }

        let mut target = pdfium
            .create_new_pdf()
            .map_err(|e| IngestError::Internal(format!("pdfium create_new_pdf: {:?}", e)))?;

        target
            .pages_mut()
            .copy_page_range_from_document(
                &source,
                (first - 1) as PdfPageIndex..=(last - 1) as PdfPageIndex,
                0,
            )
            .map_err(|e| IngestError::RasterisationFailed {
                page: first,
                detail: format!("copying pages {}-{}: {:?}", first, last, e),
            })?;

        let payload = target
            .save_to_bytes()
            .map_err(|e| IngestError::Internal(format!("pdfium save_to_bytes: {:?}", e)))?;

        debug!("Extracted pages {}-{} → {} bytes", first, last, payload.len());
        Ok(PageBatch {
            first,
            last,
            payload,
        })
    }
}

/// Async wrapper: count pages on the blocking pool.
pub async fn page_count(
    splitter: &Arc<dyn PageSplitter>,
    doc: &InputDocument,
    opts: &RenderOptions,
) -> Result<usize, IngestError> {
    let splitter = Arc::clone(splitter);
    let doc = doc.clone();
    let opts = opts.clone();
    tokio::task::spawn_blocking(move || splitter.page_count(&doc, &opts))
        .await
        .map_err(|e| IngestError::Internal(format!("Page count task panicked: {}", e)))?
}

/// Async wrapper: render one page on the blocking pool.
pub async fn render_page(
    splitter: &Arc<dyn PageSplitter>,
    doc: &InputDocument,
    page_num: usize,
    opts: &RenderOptions,
) -> Result<PageUnit, IngestError> {
    let splitter = Arc::clone(splitter);
    let doc = doc.clone();
    let opts = opts.clone();
    tokio::task::spawn_blocking(move || splitter.render_page(&doc, page_num, &opts))
        .await
        .map_err(|e| IngestError::Internal(format!("Render task panicked: {}", e)))?
}

/// Async wrapper: extract a page range on the blocking pool.
pub async fn extract_pages(
    splitter: &Arc<dyn PageSplitter>,
    doc: &InputDocument,
    first: usize,
    last: usize,
    opts: &RenderOptions,
) -> Result<PageBatch, IngestError> {
    let splitter = Arc::clone(splitter);
    let doc = doc.clone();
    let opts = opts.clone();
    tokio::task::spawn_blocking(move || splitter.extract_pages(&doc, first, last, &opts))
        .await
        .map_err(|e| IngestError::Internal(format!("Extract task panicked: {}", e)))?
}

/// Group `total` pages into inclusive 1-indexed ranges of at most `per_batch`.
///
/// `None` (or a batch size ≥ `total`) yields a single range.
pub fn batch_ranges(total: usize, per_batch: Option<usize>) -> Vec<(usize, usize)> {
    if total == 0 {
        return Vec::new();
    }
    let size = per_batch.filter(|&n| n > 0).unwrap_or(total).min(total);
    (1..=total)
        .step_by(size)
        .map(|first| (first, (first + size - 1).min(total)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_ranges_default_is_one_batch() {
        assert_eq!(batch_ranges(7, None), vec![(1, 7)]);
        assert_eq!(batch_ranges(7, Some(100)), vec![(1, 7)]);
    }

    #[test]
    fn batch_ranges_split_evenly_with_remainder() {
        assert_eq!(batch_ranges(7, Some(3)), vec![(1, 3), (4, 6), (7, 7)]);
        assert_eq!(batch_ranges(4, Some(2)), vec![(1, 2), (3, 4)]);
        assert_eq!(batch_ranges(3, Some(1)), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn batch_ranges_empty_document() {
        assert!(batch_ranges(0, Some(5)).is_empty());
    }
}
