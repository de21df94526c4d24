//! Packing of the binary metadata payload into the `d1` string array.
//!
//! Two layouts exist. The current one starts with `\u0000` and stores one
//! byte per char. The legacy one packs 7-bit groups, adds one to each
//! (modulo 128) and may start with a `￿` marker.

use crate::classfile::constant_pool::modified_utf8_len;
use crate::error::{MetadataFormatError, MetadataResult};

const UTF8_MODE_MARKER: char = '\u{0}';
const SEVEN_BIT_MODE_MARKER: char = '\u{ffff}';
const MAX_UTF8_INFO_LENGTH: usize = 65535;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Encoding {
    Utf8,
    SevenBit { marker: bool },
}

pub(crate) fn decode_bytes(data: &[String]) -> MetadataResult<(Vec<u8>, Encoding)> {
    let first = data.first().and_then(|chunk| chunk.chars().next());
    if first == Some(UTF8_MODE_MARKER) {
        let mut bytes = Vec::new();
        for c in data.concat().chars().skip(1) {
            let byte = u8::try_from(u32::from(c)).map_err(|_| {
                MetadataFormatError(format!("char U+{:04X} in utf8-mode metadata", u32::from(c)))
            })?;
            bytes.push(byte);
        }
        return Ok((bytes, Encoding::Utf8));
    }

    let marker = first == Some(SEVEN_BIT_MODE_MARKER);
    let mut septets = Vec::new();
    for c in data.concat().chars().skip(usize::from(marker)) {
        let code = u32::from(c);
        if code > 0x7F {
            return Err(MetadataFormatError(format!(
                "char U+{code:04X} in 7-bit metadata"
            )));
        }
        septets.push(((code as u8).wrapping_add(0x7F)) & 0x7F);
    }
    Ok((decode_7_to_8(&septets), Encoding::SevenBit { marker }))
}

pub(crate) fn encode_bytes(data: &[u8], encoding: Encoding) -> Vec<String> {
    match encoding {
        Encoding::Utf8 => {
            let chars = std::iter::once(UTF8_MODE_MARKER).chain(data.iter().map(|b| char::from(*b)));
            split_chars(chars)
        }
        Encoding::SevenBit { marker } => {
            let septets = encode_8_to_7(data)
                .into_iter()
                .map(|septet| char::from((septet + 1) & 0x7F));
            if marker {
                split_chars(std::iter::once(SEVEN_BIT_MODE_MARKER).chain(septets))
            } else {
                split_chars(septets)
            }
        }
    }
}

/// Break chars into strings that each fit a `CONSTANT_Utf8` entry.
fn split_chars(chars: impl Iterator<Item = char>) -> Vec<String> {
    let mut result = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;
    for c in chars {
        buffer.push(c);
        buffer_len += modified_utf8_len(c.encode_utf8(&mut [0; 4]));
        if buffer_len >= MAX_UTF8_INFO_LENGTH - 1 {
            result.push(std::mem::take(&mut buffer));
            buffer_len = 0;
        }
    }
    if !buffer.is_empty() {
        result.push(buffer);
    }
    result
}

fn encode_8_to_7(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity((data.len() * 8).div_ceil(7));
    let mut accumulator = 0u32;
    let mut bits = 0u32;
    for byte in data {
        accumulator |= u32::from(*byte) << bits;
        bits += 8;
        while bits >= 7 {
            result.push((accumulator & 0x7F) as u8);
            accumulator >>= 7;
            bits -= 7;
        }
    }
    if bits > 0 {
        result.push((accumulator & 0x7F) as u8);
    }
    result
}

fn decode_7_to_8(data: &[u8]) -> Vec<u8> {
    let len = 7 * data.len() / 8;
    let mut result = Vec::with_capacity(len);
    let mut accumulator = 0u32;
    let mut bits = 0u32;
    for septet in data {
        accumulator |= u32::from(*septet & 0x7F) << bits;
        bits += 7;
        if bits >= 8 {
            if result.len() == len {
                break;
            }
            result.push((accumulator & 0xFF) as u8);
            accumulator >>= 8;
            bits -= 8;
        }
    }
    result
}
