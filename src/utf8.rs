//! Double utf8 encoding transforms used by legacy polling sessions.
//!
//! Some deployments re-encode the utf8 bytes of every text frame as latin-1
//! codepoints before they go over a polling connection. When the
//! `double_encode_utf8` option is enabled, outbound text frames bound for a
//! polling transport get that treatment and text frames received from a
//! polling transport get the inverse applied before parsing. Websocket frames
//! are never touched.

use crate::str::Str;

/// Re-encode every utf8 byte of `s` as a latin-1 codepoint.
///
/// Ascii input is returned unchanged since every ascii byte is its own
/// codepoint.
pub fn apply_double_encode(s: &str) -> String {
    s.bytes().map(char::from).collect()
}

/// Undo [`apply_double_encode`].
///
/// The transform is best effort: an input that is not a valid double encoded
/// string (a codepoint above `U+00FF` or a byte sequence that is not utf8) is
/// returned unchanged rather than rejected, a frame may legitimately come
/// from a peer that does not double encode.
pub fn undo_double_encode(s: Str) -> Str {
    let mut bytes = Vec::with_capacity(s.len());
    for c in s.chars() {
        match u8::try_from(c as u32) {
            Ok(b) => bytes.push(b),
            Err(_) => return s,
        }
    }
    match String::from_utf8(bytes) {
        Ok(decoded) => Str::from(decoded),
        Err(_) => s,
    }
}
