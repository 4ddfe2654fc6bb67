//! Decoding of base64 document payloads
//!
//! Requests carry the PDF as a base64 string. Callers in the wild send it
//! padded or unpadded, wrapped at 76 columns, or as a `data:` URL, so the
//! decoder normalises all of those before handing the bytes on.

use anyhow::{Context, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

/// Default upper bound for a decoded document (100 MB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024 * 1024;

/// PDF files may carry junk before the header; readers accept it within this window
const PDF_HEADER_WINDOW: usize = 1024;

/// Decode a base64 payload into PDF bytes.
///
/// Fails on empty input, invalid base64, documents over `max_bytes` and
/// payloads that are not PDF files.
pub fn decode_document(content: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let encoded = strip_data_url(content.trim());
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    if compact.is_empty() {
        anyhow::bail!("Empty document payload");
    }

    // Cheap pre-check so oversized payloads never get allocated in full
    let estimated = compact.len() / 4 * 3;
    if estimated > max_bytes.saturating_add(3) {
        anyhow::bail!(
            "Document too large: ~{} bytes (limit {} bytes)",
            estimated,
            max_bytes
        );
    }

    let bytes = if compact.ends_with('=') {
        STANDARD.decode(compact.as_bytes())
    } else {
        STANDARD_NO_PAD.decode(compact.trim_end_matches('=').as_bytes())
    }
    .context("Invalid base64 payload")?;

    if bytes.len() > max_bytes {
        anyhow::bail!(
            "Document too large: {} bytes (limit {} bytes)",
            bytes.len(),
            max_bytes
        );
    }

    if !is_pdf(&bytes) {
        let detected = infer::get(&bytes)
            .map(|t| t.mime_type())
            .unwrap_or("unknown");
        anyhow::bail!("Payload is not a PDF document (detected: {detected})");
    }

    Ok(bytes)
}

/// Check PDF magic bytes
pub fn is_pdf(bytes: &[u8]) -> bool {
    if let Some(kind) = infer::get(bytes) {
        if kind.mime_type() == "application/pdf" {
            return true;
        }
    }

    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

fn strip_data_url(content: &str) -> &str {
    if !content.starts_with("data:") {
        return content;
    }
    match content.find(";base64,") {
        Some(idx) => &content[idx + ";base64,".len()..],
        None => content,
    }
}
