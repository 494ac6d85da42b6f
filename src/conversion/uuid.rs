//! `uuid` text form, plus `uuid::Uuid` conversions behind `with-uuid`.

use crate::error::{Error, Result};

pub(crate) fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Accepts the forms the server's input function does: optional braces and
/// hyphens after any group of four hex digits.
pub(crate) fn parse_uuid(s: &str) -> Result<[u8; 16]> {
    let invalid = || Error::Decode(format!("invalid UUID: {s:?}"));
    let inner = s
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(s);

    let mut out = [0u8; 16];
    let mut nibbles = inner.bytes().filter(|&b| b != b'-');
    for slot in &mut out {
        let (Some(high), Some(low)) = (nibbles.next(), nibbles.next()) else {
            return Err(invalid());
        };
        let digit = |b: u8| (b as char).to_digit(16).ok_or_else(invalid);
        *slot = ((digit(high)? << 4) | digit(low)?) as u8;
    }
    if nibbles.next().is_some() || inner.starts_with('-') || inner.ends_with('-') {
        return Err(invalid());
    }
    Ok(out)
}

#[cfg(feature = "with-uuid")]
mod typed {
    use crate::conversion::{FromWireValue, ToWireValue, utf8, write_prefixed};
    use crate::error::{Error, Result};
    use crate::protocol::types::{FormatCode, Oid, oid};

    impl FromWireValue<'_> for uuid::Uuid {
        fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::UUID {
                return Err(Error::Decode(format!("cannot decode oid {oid} as UUID")));
            }
            super::parse_uuid(utf8(bytes)?).map(uuid::Uuid::from_bytes)
        }

        fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::UUID {
                return Err(Error::Decode(format!("cannot decode oid {oid} as UUID")));
            }
            uuid::Uuid::from_slice(bytes).map_err(|e| Error::Decode(format!("invalid UUID: {e}")))
        }
    }

    impl ToWireValue for uuid::Uuid {
        fn natural_oid(&self) -> Oid {
            oid::UUID
        }

        fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
            match target_oid {
                oid::UUID => {
                    write_prefixed(buf, |b| {
                        b.extend_from_slice(self.as_bytes());
                        Ok(())
                    })?;
                    Ok(FormatCode::Binary)
                }
                _ => Err(Error::unsupported(target_oid, "uuid::Uuid")),
            }
        }
    }
}
