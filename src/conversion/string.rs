//! String type implementations (&str, String).

use crate::error::{Error, Result};
use crate::protocol::types::oid::{self, is_text_like};
use crate::protocol::types::{FormatCode, Oid};

use super::numeric::numeric_to_string;
use super::registry::TypeRegistry;
use super::{FromWireValue, ToWireValue, utf8, write_prefixed};

impl<'a> FromWireValue<'a> for &'a str {
    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if !is_text_like(oid) {
            return Err(Error::Decode(format!("cannot borrow oid {oid} as str")));
        }
        utf8(bytes)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if !is_text_like(oid) {
            return Err(Error::Decode(format!("cannot borrow oid {oid} as str")));
        }
        utf8(bytes)
    }
}

/// Every column has a text form, so `String` decodes anything the server
/// sent as text and any binary column with a registered codec.
impl FromWireValue<'_> for String {
    fn from_text(_oid: Oid, bytes: &[u8]) -> Result<Self> {
        utf8(bytes).map(str::to_owned)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            _ if is_text_like(oid) => utf8(bytes).map(str::to_owned),
            oid::JSONB => match bytes.split_first() {
                Some((1, json)) => utf8(json).map(str::to_owned),
                _ => Err(Error::Decode("unsupported jsonb version".into())),
            },
            oid::NUMERIC => numeric_to_string(bytes),
            _ => TypeRegistry::global().render_text(oid, FormatCode::Binary, bytes),
        }
    }
}

impl ToWireValue for str {
    fn natural_oid(&self) -> Oid {
        oid::TEXT
    }

    /// Binary for text-like parameters, text format for everything else so
    /// the server's input function parses it.
    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match target_oid {
            oid::JSONB => {
                write_prefixed(buf, |b| {
                    b.push(1);
                    b.extend_from_slice(self.as_bytes());
                    Ok(())
                })?;
                Ok(FormatCode::Binary)
            }
            _ => {
                write_prefixed(buf, |b| {
                    b.extend_from_slice(self.as_bytes());
                    Ok(())
                })?;
                Ok(if is_text_like(target_oid) {
                    FormatCode::Binary
                } else {
                    FormatCode::Text
                })
            }
        }
    }
}

impl ToWireValue for String {
    fn natural_oid(&self) -> Oid {
        oid::TEXT
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        self.as_str().encode(target_oid, buf)
    }
}
