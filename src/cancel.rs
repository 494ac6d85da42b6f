//! Out-of-band query cancellation.

use std::time::Duration;

use crate::error::Result;
use crate::opts::TransportTarget;
use crate::protocol::frontend::write_cancel_request;

/// Everything needed to cancel the query running on one backend.
///
/// Obtained from `Conn::cancel_token`. It can be moved to another thread or
/// task; cancelling opens a second transport and does not touch the
/// connection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelToken {
    target: TransportTarget,
    process_id: u32,
    secret_key: u32,
    timeout: Option<Duration>,
}

impl CancelToken {
    pub(crate) fn new(target: TransportTarget, process_id: u32, secret_key: u32, timeout: Option<Duration>) -> Self {
        Self {
            target,
            process_id,
            secret_key,
            timeout,
        }
    }

    pub fn target(&self) -> &TransportTarget {
        &self.target
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    fn request(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, self.process_id, self.secret_key);
        buf
    }

    /// Send a CancelRequest. The server answers nothing; whether a query was
    /// actually cancelled shows up on the original connection.
    #[cfg(feature = "sync")]
    pub fn cancel(&self) -> Result<()> {
        tracing::debug!(pid = self.process_id, target = %self.target, "sending cancel request");
        let mut stream = crate::sync::stream::Stream::connect(&self.target, self.timeout)?;
        stream.write_all(&self.request())?;
        stream.flush()?;
        Ok(())
    }

    /// Async variant of [`cancel`](Self::cancel).
    #[cfg(feature = "tokio")]
    pub async fn cancel_async(&self) -> Result<()> {
        tracing::debug!(pid = self.process_id, target = %self.target, "sending cancel request");
        let mut stream = crate::tokio::stream::Stream::connect(&self.target).await?;
        stream.write_all(&self.request()).await?;
        stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::FrameDecoder;

    #[test]
    fn test_request_layout() {
        let token = CancelToken::new(TransportTarget::Hostname("db".into(), 5432), 77, 0xdead_beef, None);
        let request = token.request();
        assert_eq!(request.len(), 16);

        let mut decoder = FrameDecoder::new_startup();
        decoder.extend(&request);
        let (_, payload) = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&payload[..4], &80877102i32.to_be_bytes());
        assert_eq!(&payload[4..8], &77u32.to_be_bytes());
        assert_eq!(&payload[8..], &0xdead_beefu32.to_be_bytes());
    }
}
