//! Byte type implementations (`&[u8]`, `Vec<u8>`) and the bytea text forms.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::{FromWireValue, ToWireValue, write_prefixed};

impl<'a> FromWireValue<'a> for &'a [u8] {
    /// Text bytea must be unescaped, which needs an owned buffer.
    fn from_text(oid: Oid, _bytes: &'a [u8]) -> Result<Self> {
        Err(Error::Decode(format!(
            "cannot borrow text-format oid {oid} as bytes; decode into Vec<u8>"
        )))
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(Error::Decode(format!("cannot decode oid {oid} as bytes")));
        }
        Ok(bytes)
    }
}

impl FromWireValue<'_> for Vec<u8> {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(Error::Decode(format!("cannot decode oid {oid} as Vec<u8>")));
        }
        decode_bytea_text(bytes)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(Error::Decode(format!("cannot decode oid {oid} as Vec<u8>")));
        }
        Ok(bytes.to_vec())
    }
}

impl ToWireValue for [u8] {
    fn natural_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match target_oid {
            oid::BYTEA | 0 => {
                write_prefixed(buf, |b| {
                    b.extend_from_slice(self);
                    Ok(())
                })?;
                Ok(FormatCode::Binary)
            }
            _ => Err(Error::unsupported(target_oid, "[u8]")),
        }
    }
}

impl ToWireValue for Vec<u8> {
    fn natural_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        self.as_slice().encode(target_oid, buf)
    }
}

/// `\x` followed by lowercase hex, the server's default `bytea_output`.
pub(crate) fn encode_bytea_text(bytes: &[u8], out: &mut Vec<u8>) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    out.reserve(2 + bytes.len() * 2);
    out.extend_from_slice(b"\\x");
    for &b in bytes {
        out.push(HEX[usize::from(b >> 4)]);
        out.push(HEX[usize::from(b & 0x0f)]);
    }
}

/// Accepts both `hex` and `escape` output formats.
pub(crate) fn decode_bytea_text(text: &[u8]) -> Result<Vec<u8>> {
    match text.strip_prefix(b"\\x") {
        Some(hex) => decode_hex(hex),
        None => decode_escape(text),
    }
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("invalid hex length".into()));
    }

    let mut result = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks_exact(2) {
        if let [high, low] = chunk {
            result.push((hex_digit(*high)? << 4) | hex_digit(*low)?);
        }
    }
    Ok(result)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
    }
}

/// `\\` is a backslash, `\ooo` an octal byte, anything else literal.
fn decode_escape(text: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut rest = text;
    while let Some((&b, after)) = rest.split_first() {
        if b != b'\\' {
            out.push(b);
            rest = after;
            continue;
        }
        match after {
            [b'\\', tail @ ..] => {
                out.push(b'\\');
                rest = tail;
            }
            [a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', tail @ ..] => {
                out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                rest = tail;
            }
            _ => return Err(Error::Decode("invalid bytea escape sequence".into())),
        }
    }
    Ok(out)
}
