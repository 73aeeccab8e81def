//! Utility functions for the assembler.
//!
//! - Attribute/component name case conversion
//! - Marker-based HTML injection
//! - Stable page seeds for token draws

use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Case Conversion
// ---------------------------------------------------------------------------

/// Convert a kebab-case (or snake_case) name to camelCase.
///
/// `data-size` → `dataSize`, `my-card` → `myCard`. Names without separators
/// are returned unchanged.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '-' || ch == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// HTML Injection
// ---------------------------------------------------------------------------

pub const HEAD_CLOSE: &str = "</head>";
pub const BODY_CLOSE: &str = "</body>";

/// Insert `fragment` immediately before the first `marker`.
/// Documents without the marker get the fragment appended.
pub fn inject_before(html: &str, marker: &str, fragment: &str) -> String {
    if fragment.is_empty() {
        return html.to_string();
    }
    match html.find(marker) {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + fragment.len());
            out.push_str(&html[..pos]);
            out.push_str(fragment);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{html}{fragment}"),
    }
}

// ---------------------------------------------------------------------------
// Seeds
// ---------------------------------------------------------------------------

/// Derive a stable 64-bit seed from a page route.
pub fn stable_seed(route: &str) -> u64 {
    let digest = Sha256::digest(route.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Normalize a route to forward slashes with no leading/trailing separators.
pub fn normalize_route(route: &str) -> String {
    route
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
