//! Action types for state machine I/O requests.

use crate::error::{Result, ServerError};
use crate::protocol::backend::{NotificationResponse, ParameterStatus, msg_type, parse_fields};

/// Action requested by a state machine.
///
/// The caller should perform the requested I/O and then call `step()` again.
#[derive(Debug)]
pub enum Action {
    /// Write `buffer_set.write_buffer` to the server, then read a single byte.
    ///
    /// Used for SSL negotiation: write SSL request, then read response ('S' or 'N').
    WriteAndReadByte,

    /// Read a PostgreSQL message from the server into the buffer set.
    ReadMessage,

    /// Write `buffer_set.write_buffer` to the server and flush.
    Write,

    /// Write `buffer_set.write_buffer` to the server, then read a message.
    WriteAndReadMessage,

    /// Perform TLS handshake, then call `step()` again.
    TlsHandshake,

    /// An asynchronous message was received.
    ///
    /// The caller should handle the message, read the next message,
    /// then call `step()` again.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The state machine has finished successfully.
    Finished,
}

/// A `NOTIFY` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend process
    pub pid: u32,
    pub channel: String,
    pub payload: String,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time, between any request and its ReadyForQuery.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification(Notification),

    /// Non-fatal notice/warning from server.
    Notice(ServerError),

    /// Server parameter value changed.
    ParameterChanged { name: String, value: String },
}

/// Parse the message if its tag is one of the asynchronous ones.
pub(crate) fn parse_async_message(type_byte: u8, payload: &[u8]) -> Result<Option<AsyncMessage>> {
    let message = match type_byte {
        msg_type::NOTICE_RESPONSE => AsyncMessage::Notice(parse_fields(payload)?),
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            }
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let n = NotificationResponse::parse(payload)?;
            AsyncMessage::Notification(Notification {
                pid: n.pid,
                channel: n.channel.to_string(),
                payload: n.payload.to_string(),
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification() {
        let payload = b"\0\0\x04\xd2jobs\0run 7\0";
        match parse_async_message(b'A', payload).unwrap() {
            Some(AsyncMessage::Notification(n)) => {
                assert_eq!(n.pid, 1234);
                assert_eq!(n.channel, "jobs");
                assert_eq!(n.payload, "run 7");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_async_tags() {
        assert!(parse_async_message(b'Z', b"I").unwrap().is_none());
        assert!(parse_async_message(b'A', b"\0\0").is_err());
    }
}
