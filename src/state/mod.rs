//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the caller what to do next.

pub mod action;
pub mod batch;
pub mod connection;
pub mod extended;
pub mod session;
pub mod simple_query;
pub mod transaction;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::types::TransactionStatus;

pub use action::{Action, AsyncMessage, Notification};
pub use batch::{Batch, BatchOutcome, BatchStateMachine};
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use extended::ExtendedQueryStateMachine;
pub use session::{Lifecycle, NotificationCallback, PortalState, Session};
pub use simple_query::SimpleQueryStateMachine;
pub use transaction::{Frame, RootKind, TransactionStack};

/// A protocol exchange driven one message at a time.
pub trait StateMachine {
    /// Advance using the message in `buffer_set` (if any) and say what I/O
    /// comes next.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Status of the ReadyForQuery that ended the exchange, once seen.
    ///
    /// Drivers apply it to the session even when `step` returned an error,
    /// since the server is back in sync at that point.
    fn ready_status(&self) -> Option<TransactionStatus>;
}
