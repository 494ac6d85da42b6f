//! Error and notice response messages.

use crate::error::{Result, ServerError};
use crate::protocol::codec::{read_cstr, read_u8};

/// Error field type codes.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    /// Non-localized severity (9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Parse the payload of an `ErrorResponse` or `NoticeResponse`.
///
/// The payload is a list of `(code byte, cstring)` pairs ending in a zero byte.
pub fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = ServerError::default();
    let mut data = payload;

    loop {
        let (code, rest) = read_u8(data)?;
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let owned = || Some(value.to_string());
        match code {
            field_type::SEVERITY => fields.severity = owned(),
            field_type::SEVERITY_NON_LOCALIZED => fields.severity_non_localized = owned(),
            field_type::CODE => fields.code = owned(),
            field_type::MESSAGE => fields.message = owned(),
            field_type::DETAIL => fields.detail = owned(),
            field_type::HINT => fields.hint = owned(),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => fields.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => fields.internal_query = owned(),
            field_type::WHERE => fields.where_ = owned(),
            field_type::SCHEMA => fields.schema = owned(),
            field_type::TABLE => fields.table = owned(),
            field_type::COLUMN => fields.column = owned(),
            field_type::DATA_TYPE => fields.data_type = owned(),
            field_type::CONSTRAINT => fields.constraint = owned(),
            field_type::FILE => fields.file = owned(),
            field_type::LINE => fields.line = value.parse().ok(),
            field_type::ROUTINE => fields.routine = owned(),
            _ => tracing::debug!("unknown error field type: {}", code as char),
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let payload = b"SERROR\0VERROR\0C42601\0Msyntax error at or near \"SELEC\"\0P1\0Fscan.l\0L1176\0\0";
        let e = parse_fields(payload).unwrap();
        assert_eq!(e.severity(), Some("ERROR"));
        assert_eq!(e.code(), Some("42601"));
        assert_eq!(e.message(), "syntax error at or near \"SELEC\"");
        assert_eq!(e.position, Some(1));
        assert_eq!(e.line, Some(1176));
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_parse_fields_truncated() {
        assert!(parse_fields(b"SERROR\0Mno end").is_err());
        assert!(parse_fields(b"").is_err());
    }
}
