//! A connection shared between threads.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

use super::Conn;

/// Cloneable handle that serializes access to one [`Conn`].
///
/// Each [`with`](Self::with) call holds the lock for a whole protocol
/// exchange, so callers never interleave frames.
#[derive(Clone)]
pub struct SharedConn {
    inner: Arc<Mutex<Conn>>,
}

impl SharedConn {
    pub fn new(conn: Conn) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with exclusive access to the connection.
    ///
    /// A lock poisoned by a panicking caller may have left a request half
    /// sent, so it is reported as [`Error::ConnectionDoesNotExist`].
    pub fn with<R>(&self, f: impl FnOnce(&mut Conn) -> Result<R>) -> Result<R> {
        let mut conn = self.inner.lock().map_err(|_poisoned| Error::ConnectionDoesNotExist)?;
        f(&mut *conn)
    }
}

impl From<Conn> for SharedConn {
    fn from(conn: Conn) -> Self {
        Self::new(conn)
    }
}
