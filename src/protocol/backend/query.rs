//! Result-set backend messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u16};
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

/// Owned result column descriptor.
///
/// Statement descriptions always report text format; the engine rewrites the
/// format with [`with_format`](Self::with_format) once it picks one for Bind.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    tail: FieldDescriptionTail,
}

impl ColumnInfo {
    /// Build a descriptor by hand, mostly for scripted servers and tests.
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            name: name.into(),
            tail: FieldDescriptionTail {
                table_oid: U32BE::new(0),
                column_id: I16BE::new(0),
                type_oid: U32BE::new(type_oid),
                type_size: I16BE::new(-1),
                type_modifier: I32BE::new(-1),
                format: U16BE::new(0),
            },
        }
    }

    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }

    pub fn with_format(mut self, format: FormatCode) -> Self {
        self.tail.format = U16BE::new(format.as_u16());
        self
    }

    /// Append this descriptor in RowDescription field layout.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        crate::protocol::codec::write_cstr(out, &self.name);
        out.extend_from_slice(self.tail.as_bytes());
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug)]
pub struct RowDescription {
    columns: Vec<ColumnInfo>,
}

impl RowDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_fields, mut data) = read_u16(payload)?;
        let mut columns = Vec::with_capacity(num_fields as usize);

        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            let tail = FieldDescriptionTail::read_from_bytes(tail)
                .map_err(|e| Error::ProtocolSync(format!("FieldDescription tail: {e:?}")))?;
            columns.push(ColumnInfo {
                name: name.to_string(),
                tail,
            });
            data = rest;
        }

        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<ColumnInfo> {
        self.columns
    }
}

/// DataRow message - contains a single row of data.
///
/// `parse` walks every length prefix once, so iteration afterwards cannot run
/// past the payload.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_u16(payload)?;

        let mut rest = columns_data;
        for _ in 0..num_columns {
            let (len, after) = read_i32(rest)?;
            rest = match len {
                -1 => after,
                n if n >= 0 => read_bytes(after, n as usize)?.1,
                n => {
                    return Err(Error::ProtocolSync(format!(
                        "DataRow: negative column length {n}"
                    )));
                }
            };
        }
        if !rest.is_empty() {
            return Err(Error::ProtocolSync(format!(
                "DataRow: {} trailing bytes",
                rest.len()
            )));
        }

        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values; `None` is NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }

    pub fn get(&self, index: usize) -> Option<Option<&'a [u8]>> {
        self.iter().nth(index)
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let (len, rest) = self.remaining.split_first_chunk::<4>()?;
        let len = i32::from_be_bytes(*len);
        if len < 0 {
            self.remaining = rest;
            return Some(None);
        }
        let (value, rest) = rest.split_at_checked(len as usize)?;
        self.remaining = rest;
        Some(Some(value))
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Rows affected, for tags that carry a count.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut parts = self.tag.split_whitespace();
        let command = parts.next()?;
        let count = match command {
            // INSERT carries a legacy oid before the count
            "INSERT" => parts.nth(1)?,
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH" => parts.next()?,
            _ => return None,
        };
        count.parse().ok()
    }

    /// Get the command name from the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description(cols: &[ColumnInfo]) -> Vec<u8> {
        let mut payload = (cols.len() as u16).to_be_bytes().to_vec();
        for c in cols {
            c.write_to(&mut payload);
        }
        payload
    }

    #[test]
    fn test_row_description_roundtrip_layout() {
        let cols = [
            ColumnInfo::new("id", 23),
            ColumnInfo::new("name", 25).with_format(FormatCode::Binary),
        ];
        let payload = row_description(&cols);
        assert_eq!(payload.len(), 2 + 3 + TAIL_SIZE + 5 + TAIL_SIZE);

        let desc = RowDescription::parse(&payload).unwrap();
        let parsed = desc.columns();
        assert_eq!(parsed[0].name, "id");
        assert_eq!(parsed[0].type_oid(), 23);
        assert_eq!(parsed[0].format(), FormatCode::Text);
        assert_eq!(parsed[1].type_oid(), 25);
        assert_eq!(parsed[1].format(), FormatCode::Binary);
        assert_eq!(parsed[1].type_size(), -1);
    }

    #[test]
    fn test_row_description_truncated() {
        let payload = row_description(&[ColumnInfo::new("id", 23)]);
        assert!(RowDescription::parse(&payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn test_data_row_with_null() {
        let payload = [0, 3, 0, 0, 0, 1, b'7', 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0];
        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.len(), 3);
        let values: Vec<_> = row.iter().collect();
        assert_eq!(values, [Some(&b"7"[..]), None, Some(&b""[..])]);
    }

    #[test]
    fn test_data_row_inconsistent_lengths() {
        assert!(DataRow::parse(&[0, 1, 0, 0, 0, 5, b'a']).is_err());
        assert!(DataRow::parse(&[0, 1, 0xff, 0xff, 0xff, 0xfe]).is_err());
        assert!(DataRow::parse(&[0, 0, 9]).is_err());
    }

    #[test]
    fn test_rows_affected() {
        let tag = |t| CommandComplete { tag: t }.rows_affected();
        assert_eq!(tag("INSERT 0 1"), Some(1));
        assert_eq!(tag("UPDATE 10"), Some(10));
        assert_eq!(tag("SELECT 5"), Some(5));
        assert_eq!(tag("BEGIN"), None);
        assert_eq!(tag("CREATE TABLE"), None);
    }
}
