//! A native PostgreSQL wire-protocol client.
//!
//! # Features
//!
//! - **Zero-copy parsing**: Message payloads are parsed directly from the read buffer
//! - **Sans-I/O state machines**: Protocol logic is separated from I/O
//! - **Sync and async APIs**: Choose between synchronous and tokio-based async
//! - **Extended protocol**: prepared statements, named portals and batches under one Sync
//! - **Transactions**: nested blocks map onto savepoints
//! - **Authentication**: trust, cleartext, MD5, SCRAM-SHA-256 and (with `legacy-crypt`) crypt
//!
//! # Example
//!
//! ```no_run
//! use postwire::sync::Conn;
//! use postwire::Opts;
//!
//! fn main() -> postwire::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::new(opts)?;
//!
//!     let rows: Vec<(i32,)> = conn.query_collect("SELECT 1 AS num")?;
//!     println!("Rows: {:?}", rows);
//!
//!     let stmt = conn.prepare("SELECT $1::int4 + 1")?;
//!     let next: Option<(i32,)> = conn.exec_first(&stmt, (41,))?;
//!     assert_eq!(next, Some((42,)));
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer_set;
pub mod cancel;
pub mod conversion;
pub mod error;
pub mod handler;
pub mod opts;
pub mod protocol;
pub mod state;
pub mod statement;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer_set::BufferSet;
pub use cancel::CancelToken;
pub use conversion::{FromRow, FromWireValue, Row, ToParams, ToWireValue, TypeRegistry, Value};
pub use error::{Error, Result, ServerError};
pub use handler::{
    AsyncMessageHandler, CollectHandler, DropHandler, FirstRowHandler, RowHandler, RowsHandler,
};
pub use opts::{Opts, SslMode, TransportTarget};
pub use protocol::backend::ColumnInfo;
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use state::{AsyncMessage, Batch, BatchOutcome, Notification};
pub use statement::{IntoStatement, PreparedStatement};
