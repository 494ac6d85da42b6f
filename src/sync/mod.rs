//! Synchronous PostgreSQL client.

mod conn;
mod portal;
mod shared;
pub(crate) mod stream;
mod transaction;

pub use conn::Conn;
pub use portal::NamedPortal;
pub use shared::SharedConn;
pub use transaction::Transaction;
