//! Row decoding traits and implementations.

use std::sync::Arc;

use crate::conversion::FromWireValue;
use crate::error::{Error, Result};
use crate::protocol::backend::query::{ColumnInfo, DataRow};
use crate::protocol::types::FormatCode;

use super::registry::TypeRegistry;
use super::value::Value;

/// Trait for decoding a PostgreSQL row into a Rust type.
///
/// Each column is decoded according to the format recorded in its descriptor.
pub trait FromRow<'a>: Sized {
    fn from_row(cols: &[ColumnInfo], row: DataRow<'a>) -> Result<Self>;
}

fn decode_column<'a, T: FromWireValue<'a>>(col: &ColumnInfo, value: Option<&'a [u8]>) -> Result<T> {
    match value {
        None => T::from_null(),
        Some(bytes) => match col.format() {
            FormatCode::Text => T::from_text(col.type_oid(), bytes),
            FormatCode::Binary => T::from_binary(col.type_oid(), bytes),
        },
    }
}

fn check_width(cols: &[ColumnInfo], row: &DataRow<'_>, want: usize) -> Result<()> {
    if cols.len() != row.len() {
        return Err(Error::ProtocolSync(format!(
            "DataRow has {} columns, RowDescription has {}",
            row.len(),
            cols.len()
        )));
    }
    if cols.len() < want {
        return Err(Error::Decode(format!(
            "row has {} columns, tuple needs {want}",
            cols.len()
        )));
    }
    Ok(())
}

/// For statements that don't return rows.
impl FromRow<'_> for () {
    fn from_row(_cols: &[ColumnInfo], _row: DataRow<'_>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_row_tuple {
    ($count:literal: $($idx:tt => $T:ident),+) => {
        impl<'a, $($T: FromWireValue<'a>),+> FromRow<'a> for ($($T,)+) {
            fn from_row(cols: &[ColumnInfo], row: DataRow<'a>) -> Result<Self> {
                check_width(cols, &row, $count)?;
                let mut iter = row.iter();
                Ok(($(
                    match cols.get($idx) {
                        Some(col) => decode_column::<$T>(col, iter.next().flatten())?,
                        None => return Err(Error::Decode("column index out of range".into())),
                    },
                )+))
            }
        }
    };
}

impl_from_row_tuple!(1: 0 => T1);
impl_from_row_tuple!(2: 0 => T1, 1 => T2);
impl_from_row_tuple!(3: 0 => T1, 1 => T2, 2 => T3);
impl_from_row_tuple!(4: 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_tuple!(5: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_tuple!(6: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
impl_from_row_tuple!(7: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7);
impl_from_row_tuple!(8: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8);
impl_from_row_tuple!(9: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9);
impl_from_row_tuple!(10: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10);
impl_from_row_tuple!(11: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11);
impl_from_row_tuple!(12: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11, 11 => T12);

fn decode_values(cols: &[ColumnInfo], row: &DataRow<'_>) -> Result<Vec<Value>> {
    check_width(cols, row, 0)?;
    let registry = TypeRegistry::global();
    cols.iter()
        .zip(row.iter())
        .map(|(col, value)| registry.decode(col.type_oid(), col.format(), value))
        .collect()
}

impl FromRow<'_> for Vec<Value> {
    fn from_row(cols: &[ColumnInfo], row: DataRow<'_>) -> Result<Self> {
        decode_values(cols, &row)
    }
}

/// Owned row of dynamic values, sharing its column descriptors with the
/// other rows of the same result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ColumnInfo]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnInfo]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Decode against descriptors shared across a result set.
    pub fn decode(columns: &Arc<[ColumnInfo]>, row: DataRow<'_>) -> Result<Self> {
        let values = decode_values(columns, &row)?;
        Ok(Self {
            columns: Arc::clone(columns),
            values,
        })
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// First column with this name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl FromRow<'_> for Row {
    fn from_row(cols: &[ColumnInfo], row: DataRow<'_>) -> Result<Self> {
        Row::decode(&Arc::from(cols), row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for v in values {
            match v {
                Some(b) => {
                    payload.extend_from_slice(&(b.len() as i32).to_be_bytes());
                    payload.extend_from_slice(b);
                }
                None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        payload
    }

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", oid::INT4).with_format(FormatCode::Binary),
            ColumnInfo::new("name", oid::TEXT),
            ColumnInfo::new("salary", oid::NUMERIC),
        ]
    }

    #[test]
    fn test_tuple_mixed_formats() {
        let payload = data_row(&[Some(&7i32.to_be_bytes()), Some(b"John Doe"), None]);
        let row = DataRow::parse(&payload).unwrap();
        let (id, name, salary): (i32, &str, Option<String>) =
            FromRow::from_row(&columns(), row).unwrap();
        assert_eq!(id, 7);
        assert_eq!(name, "John Doe");
        assert_eq!(salary, None);
    }

    #[test]
    fn test_tuple_errors() {
        let payload = data_row(&[Some(&7i32.to_be_bytes()), Some(b"x"), None]);
        let row = DataRow::parse(&payload).unwrap();
        let err = <(i32, String, String)>::from_row(&columns(), row).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let short = data_row(&[Some(b"1")]);
        let row = DataRow::parse(&short).unwrap();
        assert!(<(String,)>::from_row(&columns(), row).is_err());
    }

    #[test]
    fn test_dynamic_row() {
        let payload = data_row(&[Some(&7i32.to_be_bytes()), Some(b"x"), Some(b"150000")]);
        let cols: Arc<[ColumnInfo]> = columns().into();
        let row = Row::decode(&cols, DataRow::parse(&payload).unwrap()).unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&Value::Int4(7)));
        assert_eq!(row.get_by_name("salary"), Some(&Value::Numeric("150000".into())));
        assert_eq!(row.get_by_name("missing"), None);
    }
}
