//! Result handlers.

use std::sync::Arc;

use crate::conversion::{FromRow, Row};
use crate::error::Result;
use crate::protocol::backend::query::{ColumnInfo, CommandComplete, DataRow};
use crate::state::action::AsyncMessage;

/// Receives the rows of a result as frames arrive.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// For multi-statement simple queries like `"SELECT 1; UPDATE foo SET x=1"`:
/// ```text
/// result_start → row* → result_end   // SELECT 1
/// result_end                          // UPDATE
/// ```
///
/// Each column's [`format`](ColumnInfo::format) says how its bytes are encoded.
/// An error returned here is reported once the server is back in sync; later
/// rows of the same request are skipped.
pub trait RowHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: &[ColumnInfo]) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()>;

    /// Called when a result set ends.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// A handler that discards all results.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: Option<u64>,
}

impl DropHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows affected by the last command, if its tag carries a count.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl RowHandler for DropHandler {
    fn row(&mut self, _cols: &[ColumnInfo], _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// Handler that collects typed rows.
///
/// # Example
///
/// ```ignore
/// let mut handler: CollectHandler<(i32, String)> = CollectHandler::new();
/// conn.query("SELECT id, name FROM users", &mut handler)?;
/// for (id, name) in handler.into_rows() {
///     println!("{}: {}", id, name);
/// }
/// ```
#[derive(Debug)]
pub struct CollectHandler<T> {
    rows: Vec<T>,
}

impl<T> Default for CollectHandler<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> CollectHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T: for<'a> FromRow<'a>> RowHandler for CollectHandler<T> {
    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()> {
        self.rows.push(T::from_row(cols, row)?);
        Ok(())
    }
}

/// Handler that collects only the first row.
#[derive(Debug)]
pub struct FirstRowHandler<T> {
    row: Option<T>,
}

impl<T> Default for FirstRowHandler<T> {
    fn default() -> Self {
        Self { row: None }
    }
}

impl<T> FirstRowHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&T> {
        self.row.as_ref()
    }

    pub fn into_row(self) -> Option<T> {
        self.row
    }
}

impl<T: for<'a> FromRow<'a>> RowHandler for FirstRowHandler<T> {
    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(T::from_row(cols, row)?);
        }
        Ok(())
    }
}

/// Collects dynamic [`Row`]s. Rows of one result share a single copy of the
/// column descriptors.
#[derive(Debug, Default)]
pub struct RowsHandler {
    columns: Option<Arc<[ColumnInfo]>>,
    rows: Vec<Row>,
}

impl RowsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl RowHandler for RowsHandler {
    fn result_start(&mut self, cols: &[ColumnInfo]) -> Result<()> {
        self.columns = Some(Arc::from(cols));
        Ok(())
    }

    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()> {
        let columns = self.columns.get_or_insert_with(|| Arc::from(cols));
        self.rows.push(Row::decode(columns, row)?);
        Ok(())
    }

    fn result_end(&mut self, _complete: CommandComplete<'_>) -> Result<()> {
        self.columns = None;
        Ok(())
    }
}

/// Observer for notices and parameter changes.
///
/// Notifications are not passed here; they go to the per-channel callbacks or
/// the connection's notification queue.
pub trait AsyncMessageHandler: Send {
    fn handle(&mut self, message: &AsyncMessage);
}

impl<F: FnMut(&AsyncMessage) + Send> AsyncMessageHandler for F {
    fn handle(&mut self, message: &AsyncMessage) {
        self(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::Value;
    use crate::protocol::types::oid;

    fn data_row(values: &[&[u8]]) -> Vec<u8> {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for v in values {
            payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
            payload.extend_from_slice(v);
        }
        payload
    }

    #[test]
    fn test_collect_and_first() {
        let cols = [ColumnInfo::new("n", oid::INT4)];
        let mut collect = CollectHandler::<(i32,)>::new();
        let mut first = FirstRowHandler::<(i32,)>::new();
        for v in [b"1", b"2"] {
            let payload = data_row(&[v]);
            collect.row(&cols, DataRow::parse(&payload).unwrap()).unwrap();
            first.row(&cols, DataRow::parse(&payload).unwrap()).unwrap();
        }
        assert_eq!(collect.into_rows(), vec![(1,), (2,)]);
        assert_eq!(first.into_row(), Some((1,)));
    }

    #[test]
    fn test_rows_share_columns() {
        let cols = [ColumnInfo::new("name", oid::TEXT)];
        let mut handler = RowsHandler::new();
        handler.result_start(&cols).unwrap();
        for v in [&b"a"[..], b"b"] {
            let payload = data_row(&[v]);
            handler.row(&cols, DataRow::parse(&payload).unwrap()).unwrap();
        }
        let rows = handler.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_by_name("name"), Some(&Value::Text("b".into())));
        assert!(std::ptr::eq(rows[0].columns(), rows[1].columns()));
    }

    #[test]
    fn test_drop_handler_counts() {
        let mut handler = DropHandler::new();
        handler
            .result_end(CommandComplete { tag: "UPDATE 3" })
            .unwrap();
        assert_eq!(handler.rows_affected(), Some(3));
    }
}
