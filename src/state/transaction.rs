//! Transaction and savepoint bookkeeping.

use crate::error::{Error, Result};
use crate::protocol::types::TransactionStatus;

/// Longest identifier the server keeps without truncation (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Begun through [`TransactionStack::begin`].
    Explicit,
    /// The server reported an open transaction nobody began through the stack,
    /// e.g. a raw `BEGIN` sent with `query`.
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Root(RootKind),
    Savepoint(String),
}

/// Nesting of the open transaction block.
///
/// Reconciled with the server on every ReadyForQuery: the stack is empty
/// exactly when the status is idle.
#[derive(Debug, Default, Clone)]
pub struct TransactionStack {
    frames: Vec<Frame>,
}

impl TransactionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn innermost(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn contains_savepoint(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.frames
            .iter()
            .rposition(|f| matches!(f, Frame::Savepoint(n) if n == name))
    }

    /// Record a `BEGIN` about to be sent.
    pub fn begin(&mut self) {
        tracing::debug!("transaction stack: begin");
        self.frames.clear();
        self.frames.push(Frame::Root(RootKind::Explicit));
    }

    pub fn push_savepoint(&mut self, name: &str) {
        tracing::debug!(depth = self.frames.len() + 1, "transaction stack: savepoint {name}");
        self.frames.push(Frame::Savepoint(name.to_string()));
    }

    /// Pop frames down to and including the named savepoint.
    pub fn release(&mut self, name: &str) -> Result<()> {
        let index = self.position(name).ok_or_else(|| unknown_savepoint(name))?;
        tracing::debug!(depth = index, "transaction stack: release {name}");
        self.frames.truncate(index);
        Ok(())
    }

    /// Pop the frames above the named savepoint, keeping it.
    pub fn rollback_to(&mut self, name: &str) -> Result<()> {
        let index = self.position(name).ok_or_else(|| unknown_savepoint(name))?;
        tracing::debug!(depth = index + 1, "transaction stack: rollback to {name}");
        self.frames.truncate(index + 1);
        Ok(())
    }

    /// Align with the status reported by ReadyForQuery.
    pub fn reconcile(&mut self, status: TransactionStatus) {
        match status {
            TransactionStatus::Idle => {
                if !self.frames.is_empty() {
                    tracing::debug!(depth = self.frames.len(), "transaction stack: cleared");
                    self.frames.clear();
                }
            }
            TransactionStatus::InTransaction | TransactionStatus::Failed => {
                if self.frames.is_empty() {
                    tracing::debug!("transaction stack: implicit root");
                    self.frames.push(Frame::Root(RootKind::Implicit));
                }
            }
        }
    }
}

fn unknown_savepoint(name: &str) -> Error {
    Error::InvalidUsage(format!("no savepoint named {name:?} is open"))
}

/// Name for the savepoint a scoped block opens at `depth`.
pub fn scoped_savepoint_name(depth: usize) -> String {
    format!("_pw_sp_{depth}")
}

/// Savepoint names must be non-empty identifiers the server keeps intact.
pub fn validate_savepoint_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidUsage("savepoint name is empty".into()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidUsage(format!(
            "savepoint name is {} bytes, at most {MAX_IDENTIFIER_LEN} allowed",
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(Error::InvalidUsage("savepoint name contains NUL".into()));
    }
    Ok(())
}

/// Double-quote an identifier for inclusion in SQL text.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
