//! User-turn assembly: prompt text plus an optional attached file.
//!
//! The file type is decided from content (magic bytes), never from the file
//! name. Anything unreadable, unrecognised, or too large is dropped with a
//! warning and the turn goes ahead with text only.

use std::path::Path;

use crate::inference::types::Part;

/// Inline payload ceiling accepted by the provider.
pub const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Detect a MIME type from the leading bytes of a file.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") {
        match &bytes[8..12] {
            b"WEBP" => return Some("image/webp"),
            b"WAVE" => return Some("audio/wav"),
            _ => {}
        }
    }
    if bytes.starts_with(b"BM") && bytes.len() >= 14 {
        return Some("image/bmp");
    }
    if bytes.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }
    if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xff, 0xfb]) || bytes.starts_with(&[0xff, 0xf3]) {
        return Some("audio/mpeg");
    }
    if bytes.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if bytes.starts_with(b"fLaC") {
        return Some("audio/flac");
    }
    if bytes.starts_with(&[0x1a, 0x45, 0xdf, 0xa3]) {
        return Some("video/webm");
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return Some(match &bytes[8..12] {
            b"qt  " => "video/quicktime",
            b"M4A " => "audio/mp4",
            _ => "video/mp4",
        });
    }
    None
}

/// Read and sniff an attachment, returning the inline media part if usable.
pub async fn load_attachment(path: &Path) -> Option<Part> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "attachment unreadable, skipping");
            return None;
        }
    };
    if metadata.len() > MAX_ATTACHMENT_BYTES {
        tracing::warn!(
            path = %path.display(),
            size = metadata.len(),
            limit = MAX_ATTACHMENT_BYTES,
            "attachment too large, skipping"
        );
        return None;
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "attachment unreadable, skipping");
            return None;
        }
    };

    match sniff_mime(&bytes) {
        Some(mime) => {
            tracing::debug!(path = %path.display(), mime, size = bytes.len(), "attaching file");
            Some(Part::inline_media(mime, &bytes))
        }
        None => {
            tracing::warn!(path = %path.display(), "attachment type not recognised, skipping");
            None
        }
    }
}

/// Parts for the opening user message: attachment (if any) first, then the prompt.
pub async fn build_prompt_parts(prompt: &str, attachment: Option<&Path>) -> Vec<Part> {
    let mut parts = Vec::with_capacity(2);
    if let Some(path) = attachment {
        if let Some(media) = load_attachment(path).await {
            parts.push(media);
        }
    }
    parts.push(Part::text(prompt));
    parts
}
