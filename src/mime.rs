//! MIME type guessing from names and content

/// Types that say nothing about the content and are worth re-sniffing
pub const AMBIGUOUS_TYPES: &[&str] = &[
    "application/octet-stream",
    "text/plain",
    "application/x-unknown",
];

/// Best-effort guess from the extension of a path or entry name
///
/// Query strings and fragments are ignored. Returns `None` when the
/// extension is missing or unknown.
pub fn guess_from_path(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    if !name.contains('.') {
        return None;
    }
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// Derive a type from the leading bytes of a body
pub fn sniff_from_data(data: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"ITSF", "application/vnd.ms-htmlhelp"),
    ];

    if data.is_empty() {
        return None;
    }
    for (magic, mime) in SIGNATURES {
        if data.starts_with(magic) {
            return Some(*mime);
        }
    }

    let head = trim_leading_whitespace(&data[..data.len().min(512)]);
    if head.starts_with(b"<?xml") {
        return Some("text/xml");
    }
    const HTML_MARKERS: &[&[u8]] = &[b"<!doctype html", b"<html", b"<head", b"<body", b"<script"];
    if HTML_MARKERS
        .iter()
        .any(|marker| starts_with_ignore_case(head, marker))
    {
        return Some("text/html");
    }

    let binary = head
        .iter()
        .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c));
    if binary {
        Some("application/octet-stream")
    } else {
        Some("text/plain")
    }
}

/// Whether a declared type should be replaced by sniffing
pub fn is_ambiguous(mime: &str) -> bool {
    AMBIGUOUS_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(mime.trim()))
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}
