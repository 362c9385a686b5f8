//! Built-in instructions sent alongside each page, image, clip or batch.
//!
//! Callers override these via [`crate::config::BackendConfig::prompt`];
//! the constants here are used only when no override is provided.

use crate::config::Modality;

/// Transcribe one rendered page.
pub const DEFAULT_PAGE_PROMPT: &str = r#"You are a precise document transcriber. Transcribe ALL text visible on this page image.

Rules:
- Preserve reading order as a human would read the page, including multi-column layouts.
- Keep headings, lists and paragraphs as plain Markdown.
- Render tables as GFM pipe tables.
- Do not describe decorative elements, page numbers or running headers.
- Output ONLY the transcribed content, with no commentary and no code fences."#;

/// Transcribe a native document upload (one or more pages).
pub const DEFAULT_DOCUMENT_PROMPT: &str = r#"Extract the complete text of the attached document.

Rules:
- Keep the original page order and reading order.
- Keep headings, lists and tables (as GFM pipe tables).
- Do not summarise, translate or add commentary.
- Output ONLY the extracted text."#;

/// Transcribe an audio clip.
pub const DEFAULT_AUDIO_PROMPT: &str =
    "Transcribe this audio verbatim. Output only the transcript, without timestamps or commentary.";

/// Describe and transcribe a video.
pub const DEFAULT_VIDEO_PROMPT: &str = r#"Transcribe all speech in this video verbatim, and transcribe any on-screen text.
Where no speech is present, briefly describe what is shown. Output plain text only."#;

/// Built-in prompt for a modality.
pub fn default_prompt(modality: Modality) -> &'static str {
    match modality {
        Modality::Pdf => DEFAULT_DOCUMENT_PROMPT,
        Modality::Audio => DEFAULT_AUDIO_PROMPT,
        Modality::Video => DEFAULT_VIDEO_PROMPT,
        _ => DEFAULT_PAGE_PROMPT,
    }
}

/// Instruction for one cloud batch covering pages `first..=last` of `total`.
pub fn batch_instruction(base: &str, first: usize, last: usize, total: usize) -> String {
    if first == 1 && last == total {
        return base.to_string();
    }
    format!(
        "{base}\n\nThe attached file contains pages {first}-{last} of a {total}-page document. \
         Transcribe only those pages."
    )
}
