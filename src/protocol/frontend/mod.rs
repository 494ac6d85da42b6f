//! Frontend (client to server) messages.

pub mod auth;
pub mod extended;
pub mod startup;

use crate::protocol::codec::MessageBuilder;

pub use auth::{write_password, write_sasl_initial_response, write_sasl_response};
pub use extended::{
    EncodedParams, Target, write_bind, write_close, write_close_portal, write_close_statement, write_describe_portal,
    write_describe_statement, write_execute, write_flush, write_parse, write_sync,
};
pub use startup::{write_cancel_request, write_ssl_request, write_startup, write_terminate};

/// Frontend message type bytes.
pub mod msg_type {
    /// Password, SASL and crypt responses all use 'p'
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const FLUSH: u8 = b'H';
    pub const TERMINATE: u8 = b'X';
}

/// Write a simple-protocol Query message. May hold several `;`-separated statements.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query() {
        let mut buf = Vec::new();
        write_query(&mut buf, "BEGIN; SELECT 1");
        assert_eq!(buf[0], b'Q');
        assert_eq!(&buf[1..5], &20u32.to_be_bytes());
        assert_eq!(&buf[5..], b"BEGIN; SELECT 1\0");
    }
}
