//! Length prefixed packet framing for http long-polling bodies.
//!
//! A polling body concatenates packets as `<length>:<packet>` where the
//! length counts unicode scalar values, not bytes. The packets themselves are
//! already framed text, binary packets appear in their `b4` base64 rendition
//! since this client always announces `b64=1` on the polling connection.

use crate::errors::Error;
use crate::str::Str;

const PACKET_SEPARATOR: u8 = b':';

/// Encode already framed packets into a single polling body
pub fn encode<'a>(packets: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    let mut itoa_buf = itoa::Buffer::new();
    for packet in packets {
        out.push_str(itoa_buf.format(packet.chars().count()));
        out.push(PACKET_SEPARATOR as char);
        out.push_str(packet);
    }
    out
}

/// Split a polling body into its framed packets.
///
/// Every length prefix must be a decimal digit run followed by the separator
/// and must match the remaining payload, otherwise the whole body is
/// rejected: a corrupted prefix desynchronizes everything after it.
pub fn decode(payload: &Str) -> Result<Vec<Str>, Error> {
    let mut packets = Vec::new();
    let mut rest = payload.slice(..);
    while !rest.is_empty() {
        let colon = rest.find(':').ok_or(Error::InvalidPayloadLength)?;
        let len: usize = rest[..colon]
            .parse()
            .map_err(|_| Error::InvalidPayloadLength)?;
        let data = rest.slice(colon + 1..);

        // the length counts scalar values, find the matching byte boundary
        let mut chars = 0;
        let mut byte_len = data.len();
        for (idx, _) in data.char_indices() {
            if chars == len {
                byte_len = idx;
                break;
            }
            chars += 1;
        }
        if chars < len {
            return Err(Error::InvalidPayloadLength);
        }

        packets.push(data.slice(..byte_len));
        rest = data.slice(byte_len..);
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_payload() {
        let body = encode(["4hello€", "b4AQIDBA==", "4hello€"]);
        assert_eq!(body, "7:4hello€10:b4AQIDBA==7:4hello€");
    }

    #[test]
    fn encode_empty_payload() {
        assert_eq!(encode([]), "");
    }

    #[test]
    fn decode_payload() {
        let packets = decode(&Str::from("7:4hello€10:b4AQIDBA==7:4hello€")).unwrap();
        assert_eq!(packets, vec!["4hello€", "b4AQIDBA==", "4hello€"]);
    }

    #[test]
    fn decode_multibyte_boundaries() {
        let packets = decode(&Str::from("4:4foo3:4€f10:4faaaaaaaa")).unwrap();
        assert_eq!(packets, vec!["4foo", "4€f", "4faaaaaaaa"]);
    }

    #[test]
    fn decode_empty_payload() {
        assert!(decode(&Str::from("")).unwrap().is_empty());
    }

    #[test]
    fn decode_missing_separator() {
        let err = decode(&Str::from("4foo")).unwrap_err();
        assert!(matches!(err, Error::InvalidPayloadLength));
    }

    #[test]
    fn decode_bad_length_prefix() {
        let err = decode(&Str::from("x:4foo")).unwrap_err();
        assert!(matches!(err, Error::InvalidPayloadLength));
        let err = decode(&Str::from(":4foo")).unwrap_err();
        assert!(matches!(err, Error::InvalidPayloadLength));
    }

    #[test]
    fn decode_truncated_packet() {
        let err = decode(&Str::from("10:4foo")).unwrap_err();
        assert!(matches!(err, Error::InvalidPayloadLength));
    }
}
