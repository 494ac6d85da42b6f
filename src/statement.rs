//! Prepared statement handles and the statement argument of `exec_*` methods.

use std::sync::Arc;

use crate::conversion::TypeRegistry;
use crate::protocol::backend::query::ColumnInfo;
use crate::protocol::types::{FormatCode, Oid};

#[derive(Debug)]
struct StatementInner {
    name: String,
    sql: String,
    param_oids: Vec<Oid>,
    columns: Arc<[ColumnInfo]>,
    result_formats: Vec<FormatCode>,
}

/// A statement parsed and described by the server.
///
/// Cloning is cheap; every clone and every portal bound from it share the same
/// descriptors. The handle is only valid on the connection that prepared it.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    inner: Arc<StatementInner>,
}

impl PreparedStatement {
    /// Build from a statement description. Each result column gets the format
    /// the registry picks for it, which is also what Bind will request.
    pub(crate) fn new(
        name: String,
        sql: String,
        param_oids: Vec<Oid>,
        described: Vec<ColumnInfo>,
        integer_datetimes: bool,
    ) -> Self {
        let registry = TypeRegistry::global();
        let columns: Vec<ColumnInfo> = described
            .into_iter()
            .map(|col| {
                let format = registry.result_format(col.type_oid(), integer_datetimes);
                col.with_format(format)
            })
            .collect();
        let result_formats = columns.iter().map(ColumnInfo::format).collect();
        Self {
            inner: Arc::new(StatementInner {
                name,
                sql,
                param_oids,
                columns: columns.into(),
                result_formats,
            }),
        }
    }

    /// Server-side name; empty for the anonymous statement.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// Parameter types as resolved by the server.
    pub fn param_oids(&self) -> &[Oid] {
        &self.inner.param_oids
    }

    pub fn param_count(&self) -> usize {
        self.inner.param_oids.len()
    }

    /// Result columns, with the format Bind requests for each.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.inner.columns
    }

    pub(crate) fn shared_columns(&self) -> &Arc<[ColumnInfo]> {
        &self.inner.columns
    }

    pub fn result_formats(&self) -> &[FormatCode] {
        &self.inner.result_formats
    }

    /// False for statements described with NoData.
    pub fn returns_rows(&self) -> bool {
        !self.inner.columns.is_empty()
    }

    /// True when both handles come from the same Parse.
    pub fn same_as(&self, other: &PreparedStatement) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Sealed trait for types that can be used as statement references in exec_* methods.
///
/// This trait is sealed and cannot be implemented outside this crate.
pub trait IntoStatement: private::Sealed {
    /// Returns true if this is raw SQL (needs Parse message).
    fn needs_parse(&self) -> bool {
        self.as_sql().is_some()
    }

    /// Get the SQL string if this is raw SQL.
    fn as_sql(&self) -> Option<&str>;

    /// Get the prepared statement if this is a prepared statement reference.
    fn as_prepared(&self) -> Option<&PreparedStatement>;
}

mod private {
    use super::PreparedStatement;

    pub trait Sealed {}

    impl Sealed for &PreparedStatement {}
    impl Sealed for &str {}
    impl Sealed for &&str {}
    impl Sealed for &String {}
}

impl IntoStatement for &PreparedStatement {
    fn as_sql(&self) -> Option<&str> {
        None
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        Some(self)
    }
}

impl IntoStatement for &str {
    fn as_sql(&self) -> Option<&str> {
        Some(self)
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}

impl IntoStatement for &&str {
    fn as_sql(&self) -> Option<&str> {
        Some(self)
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}

impl IntoStatement for &String {
    fn as_sql(&self) -> Option<&str> {
        Some(self.as_str())
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn test_result_formats_follow_registry() {
        let stmt = PreparedStatement::new(
            "_pw_s_1".into(),
            "SELECT id, name, created FROM t".into(),
            vec![oid::INT4],
            vec![
                ColumnInfo::new("id", oid::INT4),
                ColumnInfo::new("name", oid::TEXT),
                ColumnInfo::new("created", oid::TIMESTAMPTZ),
                ColumnInfo::new("extra", 999_999),
            ],
            false,
        );
        assert_eq!(
            stmt.result_formats(),
            &[
                FormatCode::Binary,
                FormatCode::Binary,
                FormatCode::Text,
                FormatCode::Text
            ]
        );
        assert_eq!(stmt.columns()[0].format(), FormatCode::Binary);
        assert!(stmt.returns_rows());
        assert!(stmt.same_as(&stmt.clone()));
    }

    #[test]
    fn test_into_statement() {
        let sql = String::from("SELECT 1");
        assert!((&sql).needs_parse());
        assert_eq!("SELECT 2".as_sql(), Some("SELECT 2"));
        let stmt = PreparedStatement::new(String::new(), sql.clone(), vec![], vec![], true);
        let by_ref = &stmt;
        assert!(!by_ref.needs_parse());
        assert!(!stmt.returns_rows());
    }
}
