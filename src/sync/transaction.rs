//! Transaction support for synchronous PostgreSQL connections.

use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::state::transaction::{Frame, scoped_savepoint_name};
use crate::statement::IntoStatement;

use super::Conn;
use super::portal::NamedPortal;

/// One level of a transaction block: the outermost `BEGIN`, or a savepoint
/// standing in for a nested block.
///
/// The connection is passed to every method. A handle only acts on the
/// connection that created it, and only while its level is still open.
#[derive(Debug)]
pub struct Transaction {
    connection_id: u32,
    depth: usize,
    savepoint: Option<String>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn start(conn: &mut Conn) -> Result<Self> {
        let connection_id = conn.connection_id();
        if conn.transactions().is_empty() && !conn.in_transaction() {
            conn.begin()?;
            return Ok(Self {
                connection_id,
                depth: 1,
                savepoint: None,
                finished: false,
            });
        }
        let depth = conn.transactions().depth() + 1;
        let name = scoped_savepoint_name(depth);
        conn.savepoint(&name)?;
        Ok(Self {
            connection_id,
            depth,
            savepoint: Some(name),
            finished: false,
        })
    }

    /// Nesting level, 1 for the outermost block.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Name of the savepoint backing this level, if it is nested.
    pub fn savepoint_name(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }

    /// True once committed or rolled back through this handle.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn check(&self, conn: &Conn) -> Result<()> {
        conn.session().ensure_open()?;
        if self.finished {
            return Err(Error::InvalidUsage("transaction already finished".into()));
        }
        let actual = conn.connection_id();
        if self.connection_id != actual {
            return Err(Error::InvalidUsage(format!(
                "connection mismatch: expected {}, got {}",
                self.connection_id, actual
            )));
        }
        Ok(())
    }

    /// Whether this level is still on the connection's transaction stack.
    fn is_open(&self, conn: &Conn) -> bool {
        let frame = self
            .depth
            .checked_sub(1)
            .and_then(|index| conn.transactions().frames().get(index));
        match (&self.savepoint, frame) {
            (None, Some(Frame::Root(_))) => true,
            (Some(name), Some(Frame::Savepoint(open))) => name == open,
            _ => false,
        }
    }

    /// Commit the outermost level, or release the savepoint of a nested one.
    ///
    /// # Errors
    ///
    /// [`Error::InFailedTransaction`] while the transaction is aborted; the
    /// handle stays usable for [`rollback`](Self::rollback).
    pub fn commit(&mut self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        if !self.is_open(conn) {
            return Err(Error::InvalidUsage("transaction block already ended".into()));
        }
        match &self.savepoint {
            Some(name) => conn.release(name)?,
            None => conn.commit()?,
        }
        self.finished = true;
        Ok(())
    }

    /// Roll back this level. A nested level rolls back to its savepoint and
    /// releases it, leaving the enclosing block usable.
    pub fn rollback(&mut self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        if self.is_open(conn) {
            match &self.savepoint {
                Some(name) => {
                    conn.rollback_to(name)?;
                    conn.release(name)?;
                }
                None => conn.rollback()?,
            }
        }
        self.finished = true;
        Ok(())
    }

    /// Open a named savepoint inside this level.
    pub fn savepoint(&self, conn: &mut Conn, name: &str) -> Result<()> {
        self.check(conn)?;
        conn.savepoint(name)
    }

    /// Bind a named portal for incremental fetching.
    ///
    /// The portal lives until [`NamedPortal::close`] or the end of the
    /// transaction, whichever comes first.
    pub fn exec_portal<S: IntoStatement, P: ToParams>(
        &self,
        conn: &mut Conn,
        statement: S,
        params: P,
    ) -> Result<NamedPortal<'_>> {
        self.check(conn)?;
        let (name, columns) = conn.bind_portal(statement, params)?;
        Ok(NamedPortal::new(name, columns))
    }
}
