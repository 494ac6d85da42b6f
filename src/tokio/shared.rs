//! A connection shared between tasks.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

use super::Conn;

/// Cloneable handle that serializes access to one [`Conn`] across tasks.
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

    /// Wait for exclusive access. Hold the guard for a whole exchange.
    pub async fn lock(&self) -> MutexGuard<'_, Conn> {
        self.inner.lock().await
    }

    /// Run `f` with exclusive access to the connection.
    pub async fn with<R>(&self, f: impl AsyncFnOnce(&mut Conn) -> Result<R>) -> Result<R> {
        let mut conn = self.inner.lock().await;
        f(&mut *conn).await
    }
}

impl From<Conn> for SharedConn {
    fn from(conn: Conn) -> Self {
        Self::new(conn)
    }
}
