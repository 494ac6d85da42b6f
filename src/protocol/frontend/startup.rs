//! Untagged startup-phase messages and Terminate.

use crate::protocol::codec::MessageBuilder;

/// Protocol version 3.0 (major << 16 | minor)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

pub const SSL_REQUEST_CODE: i32 = 80877103;

pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Write an SSLRequest. The server answers with one byte, 'S' or 'N'.
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a StartupMessage: version, then `name\0value\0` pairs, then `\0`.
pub fn write_startup<'a>(buf: &mut Vec<u8>, params: impl IntoIterator<Item = (&'a str, &'a str)>) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Write a CancelRequest. It goes over a fresh connection and gets no reply.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: u32, secret_key: u32) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(CANCEL_REQUEST_CODE);
    msg.write_u32(pid);
    msg.write_u32(secret_key);
    msg.finish();
}

pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::TERMINATE).finish();
}

/// Split a StartupMessage payload (after the length) into its version and
/// parameter pairs. Used by scripted servers.
pub fn parse_startup(payload: &[u8]) -> crate::Result<(i32, Vec<(String, String)>)> {
    use crate::protocol::codec::{read_cstr, read_i32};

    let (version, mut rest) = read_i32(payload)?;
    let mut params = Vec::new();
    while rest.first().is_some_and(|&b| b != 0) {
        let (name, after) = read_cstr(rest)?;
        let (value, after) = read_cstr(after)?;
        params.push((name.to_string(), value.to_string()));
        rest = after;
    }
    Ok((version, params))
}
