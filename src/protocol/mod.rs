//! Wire protocol: frame envelope plus message encoders and parsers.
//!
//! - `backend`: server to client messages (parsing)
//! - `frontend`: client to server messages (encoding)
//! - `codec`: frame envelope and field primitives
//! - `types`: oids, format codes, transaction status

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use types::{FormatCode, Oid, TransactionStatus};
