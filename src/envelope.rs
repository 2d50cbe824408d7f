//! Envelope wire format and URL fragment handling.
//!
//! `salt(16) || nonce(12) || varint(iterations) || ciphertext || tag(16)`,
//! base64url without padding, placed after `#shared=`. The fragment is
//! never sent to a server, so the encoded data must always follow the `#`.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use tracing::debug;

use crate::crypto::{Envelope, MAX_ITERATIONS, MIN_ITERATIONS, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::{Result, ShareError};

pub const SHARED_MARKER: &str = "#shared=";

/// u32 needs at most five LEB128 bytes
const MAX_VARINT_LEN: usize = 5;
const MIN_DECODED_LEN: usize = SALT_LEN + NONCE_LEN + 1 + TAG_LEN;

fn malformed(reason: &str) -> ShareError {
    debug!(reason, "rejecting shared link");
    ShareError::MalformedEnvelope(reason.to_string())
}

pub fn write_varint(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Returns the value and the number of bytes consumed.
pub fn read_varint(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            if i > 0 && *byte == 0 {
                return Err(malformed("overlong iteration count"));
            }
            let value = u32::try_from(value).map_err(|_| malformed("iteration count overflow"))?;
            return Ok((value, i + 1));
        }
    }
    Err(malformed("truncated iteration count"))
}

pub fn encode(envelope: &Envelope) -> String {
    let mut bytes =
        Vec::with_capacity(SALT_LEN + NONCE_LEN + MAX_VARINT_LEN + envelope.ciphertext.len() + TAG_LEN);
    bytes.extend_from_slice(&envelope.salt);
    bytes.extend_from_slice(&envelope.nonce);
    write_varint(envelope.iterations, &mut bytes);
    bytes.extend_from_slice(&envelope.ciphertext);
    bytes.extend_from_slice(&envelope.auth_tag);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode(encoded: &str) -> Result<Envelope> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|_| malformed("not base64url"))?;
    if bytes.len() < MIN_DECODED_LEN {
        return Err(malformed("too short"));
    }

    let (salt, rest) = bytes.split_at(SALT_LEN);
    let (nonce, rest) = rest.split_at(NONCE_LEN);
    let (iterations, used) = read_varint(rest)?;
    if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
        return Err(malformed("iteration count out of range"));
    }
    let rest = &rest[used..];
    if rest.len() < TAG_LEN {
        return Err(malformed("too short"));
    }
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    let mut envelope = Envelope {
        salt: [0u8; SALT_LEN],
        nonce: [0u8; NONCE_LEN],
        iterations,
        ciphertext: ciphertext.to_vec(),
        auth_tag: [0u8; TAG_LEN],
    };
    envelope.salt.copy_from_slice(salt);
    envelope.nonce.copy_from_slice(nonce);
    envelope.auth_tag.copy_from_slice(tag);
    Ok(envelope)
}

/// Page URL with any existing fragment removed.
pub fn page_url_without_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// `page_url#shared=encoded`
pub fn build_link(page_url: &str, encoded: &str) -> String {
    format!("{}{}{}", page_url_without_fragment(page_url), SHARED_MARKER, encoded)
}

/// Encoded data after `#shared=`, or `None` when the URL carries no share.
pub fn parse_link(url: &str) -> Option<&str> {
    url.find(SHARED_MARKER)
        .map(|idx| &url[idx + SHARED_MARKER.len()..])
}

/// The URL with its `#shared=...` part removed.
pub fn strip_shared_fragment(url: &str) -> &str {
    match url.find(SHARED_MARKER) {
        Some(idx) => &url[..idx],
        None => url,
    }
}
