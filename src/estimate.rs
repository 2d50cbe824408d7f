//! Link length prediction, computed before any encryption happens.

use serde_json::Value;

use crate::envelope::{SHARED_MARKER, page_url_without_fragment};
use crate::payload::SharePayload;

/// `{"role":"assistant","content":},` around each message
pub const MESSAGE_OVERHEAD: usize = 34;
/// Colon and comma per MCP connection entry
pub const CONNECTION_OVERHEAD: usize = 2;
/// Quoted camelCase key, colon, comma and brackets per included field
pub const FIELD_OVERHEAD: usize = 20;
/// Binary-to-text expansion of base64 (~1.33)
pub const ENCODING_EXPANSION: f64 = 4.0 / 3.0;
/// Salt, nonce, iteration varint, tag and JSON braces, after encoding
pub const ENVELOPE_OVERHEAD: usize = 100;

/// Widely supported URL length ceiling
pub const DEFAULT_MAX_LINK_LENGTH: usize = 2000;
/// Above this a QR code of the link becomes hard to scan
pub const DEFAULT_QR_MAX_LENGTH: usize = 1500;

/// Length of everything before the encoded payload: page URL plus `#shared=`.
pub fn base_link_length(page_url: &str) -> usize {
    page_url_without_fragment(page_url).len() + SHARED_MARKER.len()
}

/// Serialized length of a string, quotes and escapes included
fn quoted_len(s: &str) -> usize {
    serde_json::to_string(s).map(|q| q.len()).unwrap_or(s.len() * 6 + 2)
}

fn opaque_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// UTF-8 bytes of the serialized payload, before encryption and encoding.
///
/// Every included field pays `FIELD_OVERHEAD` for its key, and strings are
/// measured in their escaped form, so the result never falls short of the
/// real JSON.
pub fn content_bytes(payload: &SharePayload) -> usize {
    let strings = [
        payload.base_url.as_deref(),
        payload.api_key.as_deref(),
        payload.model.as_deref(),
        payload.welcome_message.as_deref(),
    ];
    let mut total: usize = strings
        .into_iter()
        .flatten()
        .map(|s| FIELD_OVERHEAD + quoted_len(s))
        .sum();

    if let Some(messages) = &payload.messages {
        total += FIELD_OVERHEAD;
        total += messages
            .iter()
            .map(|m| quoted_len(&m.content) + MESSAGE_OVERHEAD)
            .sum::<usize>();
    }
    for library in [&payload.prompt_library, &payload.function_library]
        .into_iter()
        .flatten()
    {
        total += FIELD_OVERHEAD + opaque_len(library);
    }
    if let Some(connections) = &payload.mcp_connections {
        total += FIELD_OVERHEAD;
        total += connections
            .iter()
            .map(|(name, secret)| quoted_len(name) + quoted_len(secret) + CONNECTION_OVERHEAD)
            .sum::<usize>();
    }
    total
}

/// Predicted length in bytes of the final link.
pub fn estimate(payload: &SharePayload, base_link_length: usize) -> usize {
    let encoded = (content_bytes(payload) as f64 * ENCODING_EXPANSION).ceil() as usize;
    encoded + ENVELOPE_OVERHEAD + base_link_length
}

/// Estimate plus the ceilings the UI renders against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkEstimate {
    pub bytes: usize,
    pub max: usize,
    pub qr_max: usize,
}

impl LinkEstimate {
    pub fn new(bytes: usize, max: usize, qr_max: usize) -> Self {
        Self { bytes, max, qr_max }
    }

    pub fn exceeds_max(&self) -> bool {
        self.bytes > self.max
    }

    pub fn fits_qr(&self) -> bool {
        self.bytes <= self.qr_max
    }

    /// Fill level of the length bar, clamped to 0.0..=1.0
    pub fn fill_ratio(&self) -> f64 {
        if self.max == 0 {
            return 1.0;
        }
        (self.bytes as f64 / self.max as f64).min(1.0)
    }
}
