//! Extended query protocol messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Write a Parse message to create a prepared statement.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (0 = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Parameter values already encoded for Bind, with one format code each.
#[derive(Debug, Default, Clone)]
pub struct EncodedParams {
    pub formats: Vec<FormatCode>,
    /// Concatenated `int32 length + bytes` values (-1 length for NULL)
    pub values: Vec<u8>,
}

impl EncodedParams {
    pub fn count(&self) -> usize {
        self.formats.len()
    }
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// - `portal`: Portal name (empty string for unnamed portal)
/// - `statement`: Statement name
/// - `result_formats`: empty means all text; a single entry applies to every column
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &EncodedParams,
    result_formats: &[FormatCode],
) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(params.count() as i16);
    for &fmt in &params.formats {
        msg.write_i16(fmt as i16);
    }

    msg.write_i16(params.count() as i16);
    msg.write_bytes(&params.values);

    msg.write_i16(result_formats.len() as i16);
    for &fmt in result_formats {
        msg.write_i16(fmt as i16);
    }

    msg.finish();
}

/// Write an Execute message. `max_rows == 0` means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

/// Object kind byte shared by Describe and Close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Target {
    Statement = b'S',
    Portal = b'P',
}

pub fn write_describe(buf: &mut Vec<u8>, target: Target, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(target as u8);
    msg.write_cstr(name);
    msg.finish();
}

pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, Target::Statement, name);
}

pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, Target::Portal, name);
}

pub fn write_close(buf: &mut Vec<u8>, target: Target, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(target as u8);
    msg.write_cstr(name);
    msg.finish();
}

pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, Target::Statement, name);
}

pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, Target::Portal, name);
}

/// Write a Sync message, the batch boundary.
///
/// Outside an explicit transaction the server commits (or rolls back) the
/// implicit one and closes the unnamed portal.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}

/// Write a Flush message: ask for pending replies without ending the batch.
pub fn write_flush(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::FLUSH).finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "stmt1", "SELECT $1::int", &[0]);

        assert_eq!(buf[0], b'P');

        // Verify length field
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
    }

    #[test]
    fn test_bind_layout() {
        let params = EncodedParams {
            formats: vec![FormatCode::Text, FormatCode::Binary],
            values: [&2i32.to_be_bytes()[..], b"hi".as_slice(), &(-1i32).to_be_bytes()[..]].concat(),
        };
        let mut buf = Vec::new();
        write_bind(&mut buf, "p1", "s1", &params, &[FormatCode::Binary]);

        assert_eq!(buf[0], b'B');
        let body = &buf[5..];
        assert_eq!(&body[..6], b"p1\0s1\0");
        assert_eq!(&body[6..12], &[0, 2, 0, 0, 0, 1]);
        assert_eq!(&body[12..14], &[0, 2]);
        assert_eq!(&body[14..24], &[0, 0, 0, 2, b'h', b'i', 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&body[24..], &[0, 1, 0, 1]);
    }

    #[test]
    fn test_sync() {
        let mut buf = Vec::new();
        write_sync(&mut buf);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'S');
        assert_eq!(&buf[1..5], &4_i32.to_be_bytes());
    }

    #[test]
    fn test_describe_and_close_kinds() {
        let mut buf = Vec::new();
        write_describe_portal(&mut buf, "c1");
        write_close_statement(&mut buf, "s1");
        assert_eq!(&buf[..9], &[b'D', 0, 0, 0, 8, b'P', b'c', b'1', 0]);
        assert_eq!(&buf[9..], &[b'C', 0, 0, 0, 8, b'S', b's', b'1', 0]);
    }

    #[test]
    fn test_execute() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0);

        assert_eq!(buf[0], b'E');
        // Length: 4 + 1 (empty string + null) + 4 (max_rows) = 9
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 9);
    }
}
