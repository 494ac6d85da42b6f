//! Named portal for iterative row fetching.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::conversion::FromRow;
use crate::error::Result;
use crate::handler::{CollectHandler, RowHandler};
use crate::protocol::backend::ColumnInfo;

use super::Conn;

/// Handle to a named portal for iterative row fetching.
///
/// Created by [`Transaction::exec_portal()`](super::Transaction::exec_portal).
/// The lifetime ties the portal to the transaction that created it, so the
/// transaction cannot be finished while the portal is alive.
///
/// # Example
///
/// ```ignore
/// let mut tx = conn.start_transaction()?;
/// let mut portal = tx.exec_portal(&mut conn, &stmt, ())?;
///
/// while !portal.is_complete() {
///     let rows: Vec<(i32,)> = portal.execute_collect(&mut conn, 100)?;
///     process(rows);
/// }
///
/// portal.close(&mut conn)?;
/// tx.commit(&mut conn)?;
/// ```
pub struct NamedPortal<'tx> {
    name: String,
    columns: Arc<[ColumnInfo]>,
    complete: bool,
    _marker: PhantomData<&'tx ()>,
}

impl NamedPortal<'_> {
    pub(crate) fn new(name: String, columns: Arc<[ColumnInfo]>) -> Self {
        Self {
            name,
            columns,
            complete: false,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Check if portal execution is complete (no more rows available).
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fetch up to `max_rows` rows into `handler`; 0 fetches all remaining
    /// rows. Returns true when more rows remain.
    pub fn execute<H: RowHandler>(&mut self, conn: &mut Conn, max_rows: u32, handler: &mut H) -> Result<bool> {
        let has_more = conn.execute_portal(&self.name, &self.columns, max_rows, handler)?;
        self.complete = !has_more;
        Ok(has_more)
    }

    /// Fetch up to `max_rows` typed rows.
    pub fn execute_collect<T: for<'a> FromRow<'a>>(&mut self, conn: &mut Conn, max_rows: u32) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.execute(conn, max_rows, &mut handler)?;
        Ok(handler.into_rows())
    }

    pub fn close(self, conn: &mut Conn) -> Result<()> {
        conn.close_portal(&self.name)
    }
}
