//! Utility functions for BER-TLV and Distinguished Encoding Rules.


use std::fmt;

use rasn::types::Oid;


/// A problem walking a sequence of BER-TLV data objects.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TlvError {
    /// The input ended inside a tag.
    TruncatedTag { offset: usize },

    /// The length field is missing, malformed or too long.
    InvalidLength { offset: usize },

    /// The value is shorter than announced by the length field.
    TruncatedValue { offset: usize, expected: usize, available: usize },
}
impl fmt::Display for TlvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedTag { offset }
                => write!(f, "truncated tag at offset {}", offset),
            Self::InvalidLength { offset }
                => write!(f, "invalid length at offset {}", offset),
            Self::TruncatedValue { offset, expected, available }
                => write!(f, "value at offset {} announces {} bytes but only {} are available", offset, expected, available),
        }
    }
}
impl std::error::Error for TlvError {
}


/// A BER-TLV data object borrowed from a buffer.
///
/// Multi-byte tags are stored big-endian in `tag` (e.g. `0x7F49`).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tlv<'a> {
    pub tag: u32,
    pub value: &'a [u8],

    /// The complete encoding of this object (tag, length and value).
    pub raw: &'a [u8],
}


/// Encode an ASN.1 DER primitive value length.
pub fn encode_primitive_length(output: &mut Vec<u8>, length: usize) {
    if length < 128 {
        // single-byte encoding
        output.push(length as u8);
        return;
    }

    // 0b1nnn_nnnn followed by the big-endian length in n bytes
    let length_bytes = length.to_be_bytes();
    let leading_zeroes = length_bytes.iter().take_while(|b| **b == 0x00).count();
    let significant = &length_bytes[leading_zeroes..];
    output.push(0b1000_0000 | significant.len() as u8);
    output.extend(significant);
}


/// Decode an ASN.1 DER primitive value length.
///
/// The length must be at the beginning of the input slice.
///
/// Returns a tuple `(length, rest)` where `rest` is the rest of the input slice once the length has
/// been removed.
pub fn try_decode_primitive_length(input: &[u8]) -> Option<(usize, &[u8])> {
    let (&start_byte, rest) = input.split_first()?;
    if start_byte & 0b1000_0000 == 0 {
        return Some((usize::from(start_byte), rest));
    }

    let length_byte_count = usize::from(start_byte & 0b0111_1111);
    if length_byte_count == 0 || length_byte_count > rest.len() {
        // indefinite lengths are not allowed in DER
        return None;
    }
    let mut length: usize = 0;
    for length_byte in &rest[..length_byte_count] {
        length = length.checked_mul(256)?
            .checked_add(usize::from(*length_byte))?;
    }
    Some((length, &rest[length_byte_count..]))
}


/// Appends a complete TLV (tag, DER length and value) to the output.
///
/// Tags above `0xFF` are written as two bytes.
pub fn encode_tlv(output: &mut Vec<u8>, tag: u32, value: &[u8]) {
    let tag_bytes = tag.to_be_bytes();
    let leading_zeroes = tag_bytes.iter().take_while(|b| **b == 0x00).count().min(3);
    output.extend(&tag_bytes[leading_zeroes..]);
    encode_primitive_length(output, value.len());
    output.extend(value);
}


/// Splits the input into consecutive BER-TLV data objects.
pub fn parse_tlvs(input: &[u8]) -> Result<Vec<Tlv<'_>>, TlvError> {
    let mut ret = Vec::new();
    let mut offset = 0;
    while offset < input.len() {
        let start = offset;

        // tag: low five bits all set means more tag bytes follow, each with the top bit set except
        // for the last one
        let mut tag = u32::from(input[offset]);
        offset += 1;
        if tag & 0x1F == 0x1F {
            loop {
                let Some(&tag_byte) = input.get(offset) else {
                    return Err(TlvError::TruncatedTag { offset: start });
                };
                tag = (tag << 8) | u32::from(tag_byte);
                offset += 1;
                if tag_byte & 0x80 == 0 {
                    break;
                }
                if offset - start > 3 {
                    return Err(TlvError::TruncatedTag { offset: start });
                }
            }
        }

        let (length, rest) = try_decode_primitive_length(&input[offset..])
            .ok_or(TlvError::InvalidLength { offset })?;
        let value_start = input.len() - rest.len();
        if rest.len() < length {
            return Err(TlvError::TruncatedValue { offset: value_start, expected: length, available: rest.len() });
        }
        offset = value_start + length;
        ret.push(Tlv {
            tag,
            value: &input[value_start..offset],
            raw: &input[start..offset],
        });
    }
    Ok(ret)
}


/// Encode an object identifier value into bytes using DER encoding rules.
///
/// No tag or length is encoded, only the actual value.
pub fn oid_to_der_bytes(oid: &Oid) -> Vec<u8> {
    fn encode_arc(ret: &mut Vec<u8>, arc: u32) {
        // base-128, most significant group first, continuation bit on all but the last byte
        let mut groups = [0u8; 5];
        let mut count = 0;
        let mut remaining = arc;
        loop {
            groups[count] = (remaining & 0b0111_1111) as u8;
            count += 1;
            remaining >>= 7;
            if remaining == 0 {
                break;
            }
        }
        for i in (0..count).rev() {
            let continuation = if i > 0 { 0b1000_0000 } else { 0 };
            ret.push(groups[i] | continuation);
        }
    }

    let mut ret = Vec::new();
    match &oid[..] {
        [] => {},
        [first] => encode_arc(&mut ret, 40*first),
        [first, second, rest @ ..] => {
            encode_arc(&mut ret, 40*first + second);
            for arc in rest {
                encode_arc(&mut ret, *arc);
            }
        },
    }
    ret
}
