//! Payload encoding: raster images to PNG bytes, bytes to base64 / data URLs.
//!
//! Chat-style backends embed every page, image, audio clip or video as
//! base64 inside the JSON body. PNG is used for rendered pages because it is
//! lossless; JPEG artefacts around glyphs hurt OCR accuracy.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:<mime>;base64,<payload>`
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, to_base64(bytes))
}

/// Audio format name expected by `input_audio` content parts.
pub fn audio_format(mime_type: &str, extension: &str) -> String {
    match (mime_type, extension) {
        ("audio/mpeg", _) | (_, "mp3") => "mp3".to_string(),
        ("audio/wav", _) | (_, "wav") => "wav".to_string(),
        (_, ext) if !ext.is_empty() => ext.to_string(),
        _ => "wav".to_string(),
    }
}
