//! Frame envelope and field primitives.
//!
//! Every message in both directions is `[tag] length payload`, where the tag is
//! absent for startup-phase messages and `length` is a big-endian i32 that
//! counts itself but not the tag.

use crate::error::{Error, Result};
use zerocopy::FromBytes;

use super::types::{I16BE, I32BE, U16BE, U32BE};

/// Largest frame length accepted from a server.
///
/// A declared length above this is treated as a desynchronized stream.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Size of a tagged frame header (tag + length).
pub const HEADER_LEN: usize = 5;

fn short(what: &str, have: usize, need: usize) -> Error {
    Error::ProtocolSync(format!("{what}: buffer too short: {have} < {need}"))
}

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&b, rest)) => Ok((b, rest)),
        None => Err(short("read_u8", 0, 1)),
    }
}

/// Read 2-byte big-endian signed integer.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (head, rest) = data.split_at_checked(2).ok_or_else(|| short("read_i16", data.len(), 2))?;
    let value = I16BE::ref_from_bytes(head)
        .map_err(|e| Error::ProtocolSync(format!("read_i16: {e:?}")))?
        .get();
    Ok((value, rest))
}

/// Read 2-byte big-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    let (head, rest) = data.split_at_checked(2).ok_or_else(|| short("read_u16", data.len(), 2))?;
    let value = U16BE::ref_from_bytes(head)
        .map_err(|e| Error::ProtocolSync(format!("read_u16: {e:?}")))?
        .get();
    Ok((value, rest))
}

/// Read 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (head, rest) = data.split_at_checked(4).ok_or_else(|| short("read_i32", data.len(), 4))?;
    let value = I32BE::ref_from_bytes(head)
        .map_err(|e| Error::ProtocolSync(format!("read_i32: {e:?}")))?
        .get();
    Ok((value, rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (head, rest) = data.split_at_checked(4).ok_or_else(|| short("read_u32", data.len(), 4))?;
    let value = U32BE::ref_from_bytes(head)
        .map_err(|e| Error::ProtocolSync(format!("read_u32: {e:?}")))?
        .get();
    Ok((value, rest))
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len)
        .ok_or_else(|| short("read_bytes", data.len(), len))
}

/// Read null-terminated string.
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::ProtocolSync("read_cstring: no null terminator found".into()))?;
    let (bytes, rest) = data.split_at(pos);
    Ok((bytes, rest.get(1..).unwrap_or_default()))
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|e| Error::ProtocolSync(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Write 1-byte unsigned integer.
#[inline]
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte big-endian signed integer.
#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 2-byte big-endian unsigned integer.
#[inline]
pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian signed integer.
#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian unsigned integer.
#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write null-terminated string.
#[inline]
pub fn write_cstring(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s);
    out.push(0);
}

/// Write null-terminated string from &str.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    write_cstring(out, s.as_bytes());
}

/// Encode a complete frame. `tag` is `None` for startup-phase messages.
pub fn frame(out: &mut Vec<u8>, tag: Option<u8>, payload: &[u8]) {
    let mut msg = match tag {
        Some(t) => MessageBuilder::new(out, t),
        None => MessageBuilder::new_startup(out),
    };
    msg.write_bytes(payload);
    msg.finish();
}

/// Validate a tagged frame header and return `(tag, payload_len)`.
///
/// A declared length below 4 or above [`MAX_FRAME_LEN`] means the stream can no
/// longer be trusted.
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, usize)> {
    let [tag, a, b, c, d] = *header;
    let len = u32::from_be_bytes([a, b, c, d]) as usize;
    if len < 4 {
        return Err(Error::ProtocolSync(format!(
            "frame '{}' declares length {len} < 4",
            tag as char
        )));
    }
    if len > MAX_FRAME_LEN {
        return Err(Error::ProtocolSync(format!(
            "frame '{}' declares unrealistic length {len}",
            tag as char
        )));
    }
    Ok((tag, len - 4))
}

/// Incremental decoder over an in-memory byte buffer.
///
/// Bytes are appended with [`extend`](Self::extend); complete frames are taken
/// with [`next_frame`](Self::next_frame).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    startup: bool,
}

impl FrameDecoder {
    /// Decoder for tagged frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder whose first frame is an untagged startup-phase message.
    pub fn new_startup() -> Self {
        Self {
            buf: Vec::new(),
            startup: true,
        }
    }

    /// Append raw bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete frame as `(tag, payload)`.
    ///
    /// Untagged startup messages are reported with tag `0`. After one, the
    /// decoder switches back to tagged frames unless the message was an
    /// SSLRequest, which is followed by another untagged startup message.
    pub fn next_frame(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.startup {
            let Some(len_bytes) = self.buf.first_chunk::<4>() else {
                return Ok(None);
            };
            let len = u32::from_be_bytes(*len_bytes) as usize;
            if !(4..=MAX_FRAME_LEN).contains(&len) {
                return Err(Error::ProtocolSync(format!(
                    "startup frame declares length {len}"
                )));
            }
            if self.buf.len() < len {
                return Ok(None);
            }
            let payload = self.buf.get(4..len).unwrap_or_default().to_vec();
            self.buf.drain(..len);
            let is_ssl_request = payload.first_chunk::<4>()
                == Some(&super::frontend::startup::SSL_REQUEST_CODE.to_be_bytes());
            self.startup = is_ssl_request;
            return Ok(Some((0, payload)));
        }

        let Some(header) = self.buf.first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };
        let (tag, len) = parse_frame_header(header)?;
        let end = HEADER_LEN + len;
        if self.buf.len() < end {
            return Ok(None);
        }
        let payload = self.buf.get(HEADER_LEN..end).unwrap_or_default().to_vec();
        self.buf.drain(..end);
        Ok(Some((tag, payload)))
    }
}

/// Message builder helper that handles the length field.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Start building a startup message (no type byte).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Get mutable access to the underlying buffer.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        write_u8(self.buf, value);
    }

    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    pub fn write_u16(&mut self, value: u16) {
        write_u16(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    pub fn write_u32(&mut self, value: u32) {
        write_u32(self.buf, value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as u32;
        if let Some(slot) = self.buf.get_mut(self.start..self.start + 4) {
            slot.copy_from_slice(&len.to_be_bytes());
        }
    }
}
