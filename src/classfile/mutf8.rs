//! Modified UTF-8 as used by `CONSTANT_Utf8_info` (JVMS §4.4.7).
//!
//! The encoding differs from standard UTF-8 in two ways: the NUL character is written as the
//! two-byte sequence `C0 80`, and supplementary characters are written as a surrogate pair,
//! each half encoded in three bytes. Names and descriptors the rewriter derives are kept as
//! raw bytes wherever possible; these helpers are only needed at the edges, when a Rust
//! string enters or leaves the constant pool.

/// Encodes a Rust string to modified UTF-8.
#[must_use]
pub fn encode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut units = [0_u16; 2];

    for ch in value.chars() {
        match ch as u32 {
            0 => out.extend_from_slice(&[0xC0, 0x80]),
            1..=0x7F => out.push(ch as u8),
            _ => {
                for unit in ch.encode_utf16(&mut units) {
                    encode_unit(*unit, &mut out);
                }
            }
        }
    }

    out
}

#[allow(clippy::cast_possible_truncation)]
fn encode_unit(unit: u16, out: &mut Vec<u8>) {
    match unit {
        0x0001..=0x007F => out.push(unit as u8),
        0x0000 | 0x0080..=0x07FF => {
            out.push(0xC0 | (unit >> 6) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
        _ => {
            out.push(0xE0 | (unit >> 12) as u8);
            out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
    }
}

/// Decodes modified UTF-8 into a Rust string.
///
/// Decoding never fails: malformed sequences and lone surrogates become `U+FFFD`. The
/// result is meant for diagnostics and comparisons, never for writing back.
#[must_use]
pub fn decode_lossy(bytes: &[u8]) -> String {
    let mut units = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        let first = bytes[index];
        let (unit, width) = match first {
            0x01..=0x7F => (u16::from(first), 1),
            0xC0..=0xDF if continuation(bytes, index + 1) => (
                (u16::from(first & 0x1F) << 6) | u16::from(bytes[index + 1] & 0x3F),
                2,
            ),
            0xE0..=0xEF if continuation(bytes, index + 1) && continuation(bytes, index + 2) => (
                (u16::from(first & 0x0F) << 12)
                    | (u16::from(bytes[index + 1] & 0x3F) << 6)
                    | u16::from(bytes[index + 2] & 0x3F),
                3,
            ),
            _ => (0xFFFD, 1),
        };
        units.push(unit);
        index += width;
    }

    String::from_utf16_lossy(&units)
}

fn continuation(bytes: &[u8], index: usize) -> bool {
    bytes.get(index).is_some_and(|b| b & 0xC0 == 0x80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_identity() {
        assert_eq!(encode("java/lang/Object"), b"java/lang/Object");
        assert_eq!(decode_lossy(b"java/lang/Object"), "java/lang/Object");
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), [b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode_lossy(&[b'a', 0xC0, 0x80, b'b']), "a\0b");
    }

    #[test]
    fn supplementary_uses_surrogates() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded, [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(decode_lossy(&encoded), "\u{1F600}");
    }

    #[test]
    fn two_and_three_byte_forms() {
        let value = "caf\u{e9}\u{20ac}";
        assert_eq!(decode_lossy(&encode(value)), value);
        assert_eq!(encode(value), value.as_bytes());
    }

    #[test]
    fn malformed_becomes_replacement() {
        assert_eq!(decode_lossy(&[0xC0]), "\u{FFFD}");
        assert_eq!(decode_lossy(&[0xED, 0xA0, 0xBD]), "\u{FFFD}");
    }
}
