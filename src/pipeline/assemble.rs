//! Assembly: turn per-unit outcomes into one ordered text.
//!
//! Outcomes are stored in fixed-index slots (slot `k - 1` holds page `k`),
//! so the output order is the page order no matter which concurrent call
//! finished first. Failed units are inlined as `[ERROR] <message>` in place.

use crate::error::PageFailure;

/// Outcome of one page or batch call.
pub type UnitOutcome = Result<String, PageFailure>;

/// Marker line preceding a single page.
pub fn page_marker(page_num: usize) -> String {
    format!("--- Page {page_num} ---")
}

/// Marker line preceding a page range.
pub fn range_marker(first: usize, last: usize) -> String {
    if first == last {
        page_marker(first)
    } else {
        format!("--- Pages {first}-{last} ---")
    }
}

fn render_outcome(marker: String, outcome: &UnitOutcome) -> String {
    match outcome {
        Ok(text) => format!("{marker}\n{text}"),
        Err(failure) => format!("{marker}\n[ERROR] {failure}"),
    }
}

/// Join page slots as `--- Page k ---\n<text>` in ascending page order.
pub fn assemble_pages(slots: &[UnitOutcome]) -> String {
    slots
        .iter()
        .enumerate()
        .map(|(i, outcome)| render_outcome(page_marker(i + 1), outcome))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Join batch outcomes, labelling each with its page range.
///
/// A single successful batch covering the whole document is returned bare:
/// there is nothing to disambiguate.
pub fn assemble_batches(batches: &[((usize, usize), UnitOutcome)], total_pages: usize) -> String {
    if let [((1, last), Ok(text))] = batches {
        if *last == total_pages {
            return text.clone();
        }
    }
    batches
        .iter()
        .map(|((first, last), outcome)| render_outcome(range_marker(*first, *last), outcome))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn count_failures<'a>(outcomes: impl IntoIterator<Item = &'a UnitOutcome>) -> usize {
    outcomes.into_iter().filter(|o| o.is_err()).count()
}
