//! Primitive type implementations (bool, integers, floats).
//!
//! Integers decode from any integer column and narrow with a range check.
//! Integers encode into any integer parameter, plus `numeric` in text form.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::numeric::numeric_to_string;
use super::{FromWireValue, ToWireValue, utf8, write_prefixed};

fn oid_name(oid: Oid) -> &'static str {
    match oid {
        oid::INT2 => "INT2",
        oid::INT4 => "INT4",
        oid::INT8 => "INT8",
        oid::OID => "OID",
        oid::NUMERIC => "NUMERIC",
        oid::FLOAT4 => "FLOAT4",
        oid::FLOAT8 => "FLOAT8",
        _ => "value",
    }
}

fn write_fixed<const N: usize>(buf: &mut Vec<u8>, bytes: [u8; N]) -> Result<FormatCode> {
    write_prefixed(buf, |b| {
        b.extend_from_slice(&bytes);
        Ok(())
    })?;
    Ok(FormatCode::Binary)
}

fn write_text(buf: &mut Vec<u8>, text: &str) -> Result<FormatCode> {
    write_prefixed(buf, |b| {
        b.extend_from_slice(text.as_bytes());
        Ok(())
    })?;
    Ok(FormatCode::Text)
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {what} length: {}", bytes.len())))
}

// === Boolean ===

impl FromWireValue<'_> for bool {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BOOL {
            return Err(Error::Decode(format!("cannot decode oid {oid} as bool")));
        }
        match bytes {
            b"t" | b"true" | b"TRUE" | b"T" | b"1" => Ok(true),
            b"f" | b"false" | b"FALSE" | b"F" | b"0" => Ok(false),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BOOL {
            return Err(Error::Decode(format!("cannot decode oid {oid} as bool")));
        }
        let [b] = fixed::<1>(bytes, "boolean")?;
        Ok(b != 0)
    }
}

impl ToWireValue for bool {
    fn natural_oid(&self) -> Oid {
        oid::BOOL
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match target_oid {
            oid::BOOL => write_fixed(buf, [u8::from(*self)]),
            _ => Err(Error::unsupported(target_oid, "bool")),
        }
    }
}

// === Integer types ===

/// Any integer column, widened to i64.
pub(crate) fn decode_int_text(oid: Oid, bytes: &[u8], rust_type: &str) -> Result<i64> {
    if !matches!(oid, oid::INT2 | oid::INT4 | oid::INT8 | oid::OID) {
        return Err(Error::Decode(format!("cannot decode oid {oid} as {rust_type}")));
    }
    let s = utf8(bytes)?;
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid {rust_type} {s:?}: {e}")))
}

pub(crate) fn decode_int_binary(oid: Oid, bytes: &[u8], rust_type: &str) -> Result<i64> {
    match oid {
        oid::INT2 => Ok(i64::from(i16::from_be_bytes(fixed(bytes, "INT2")?))),
        oid::INT4 => Ok(i64::from(i32::from_be_bytes(fixed(bytes, "INT4")?))),
        oid::OID => Ok(i64::from(u32::from_be_bytes(fixed(bytes, "OID")?))),
        oid::INT8 => Ok(i64::from_be_bytes(fixed(bytes, "INT8")?)),
        _ => Err(Error::Decode(format!("cannot decode oid {oid} as {rust_type}"))),
    }
}

/// Write an integer for an integer or numeric parameter.
pub(crate) fn encode_int(
    value: i128,
    rust_type: &'static str,
    target_oid: Oid,
    buf: &mut Vec<u8>,
) -> Result<FormatCode> {
    let overflow = || Error::overflow(rust_type, oid_name(target_oid));
    match target_oid {
        oid::INT2 => write_fixed(buf, i16::try_from(value).map_err(|_| overflow())?.to_be_bytes()),
        oid::INT4 => write_fixed(buf, i32::try_from(value).map_err(|_| overflow())?.to_be_bytes()),
        oid::INT8 => write_fixed(buf, i64::try_from(value).map_err(|_| overflow())?.to_be_bytes()),
        oid::OID => write_fixed(buf, u32::try_from(value).map_err(|_| overflow())?.to_be_bytes()),
        oid::NUMERIC => write_text(buf, &value.to_string()),
        _ => Err(Error::unsupported(target_oid, rust_type)),
    }
}

macro_rules! impl_int {
    ($t:ty, $name:literal, $natural:expr) => {
        impl FromWireValue<'_> for $t {
            fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
                let wide = decode_int_text(oid, bytes, $name)?;
                <$t>::try_from(wide).map_err(|_| Error::decode_overflow(oid_name(oid), $name))
            }

            fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
                let wide = decode_int_binary(oid, bytes, $name)?;
                <$t>::try_from(wide).map_err(|_| Error::decode_overflow(oid_name(oid), $name))
            }
        }

        impl ToWireValue for $t {
            fn natural_oid(&self) -> Oid {
                $natural
            }

            fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
                encode_int(i128::from(*self), $name, target_oid, buf)
            }
        }
    };
}

impl_int!(i16, "i16", oid::INT2);
impl_int!(i32, "i32", oid::INT4);
impl_int!(i64, "i64", oid::INT8);
impl_int!(u32, "u32", oid::OID);

/// Encode-only: the server has no matching unsigned or one-byte integer types.
macro_rules! impl_int_encode_only {
    ($t:ty, $name:literal, $natural:expr) => {
        impl ToWireValue for $t {
            fn natural_oid(&self) -> Oid {
                $natural
            }

            fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
                encode_int(i128::from(*self), $name, target_oid, buf)
            }
        }
    };
}

impl_int_encode_only!(i8, "i8", oid::INT2);
impl_int_encode_only!(u8, "u8", oid::INT2);
impl_int_encode_only!(u16, "u16", oid::INT4);
impl_int_encode_only!(u64, "u64", oid::INT8);

// === Floating point ===

/// Float text as the server's float and numeric input functions accept it.
pub(crate) fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v == f64::INFINITY {
        "Infinity".into()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".into()
    } else {
        v.to_string()
    }
}

fn parse_float(bytes: &[u8], what: &str) -> Result<f64> {
    let s = utf8(bytes)?;
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid {what} {s:?}: {e}")))
}

impl FromWireValue<'_> for f32 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::FLOAT4 {
            return Err(Error::Decode(format!("cannot decode oid {oid} as f32")));
        }
        let s = utf8(bytes)?;
        s.parse()
            .map_err(|e| Error::Decode(format!("invalid f32 {s:?}: {e}")))
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::FLOAT4 {
            return Err(Error::Decode(format!("cannot decode oid {oid} as f32")));
        }
        Ok(f32::from_be_bytes(fixed(bytes, "FLOAT4")?))
    }
}

impl ToWireValue for f32 {
    fn natural_oid(&self) -> Oid {
        oid::FLOAT4
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match target_oid {
            oid::FLOAT4 => write_fixed(buf, self.to_be_bytes()),
            oid::FLOAT8 => write_fixed(buf, f64::from(*self).to_be_bytes()),
            oid::NUMERIC => write_text(buf, &float_text(f64::from(*self))),
            _ => Err(Error::unsupported(target_oid, "f32")),
        }
    }
}

impl FromWireValue<'_> for f64 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::FLOAT4 | oid::FLOAT8 => parse_float(bytes, "f64"),
            oid::NUMERIC => parse_float(bytes, "numeric"),
            _ => Err(Error::Decode(format!("cannot decode oid {oid} as f64"))),
        }
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::FLOAT4 => Ok(f64::from(f32::from_be_bytes(fixed(bytes, "FLOAT4")?))),
            oid::FLOAT8 => Ok(f64::from_be_bytes(fixed(bytes, "FLOAT8")?)),
            oid::NUMERIC => parse_float(numeric_to_string(bytes)?.as_bytes(), "numeric"),
            _ => Err(Error::Decode(format!("cannot decode oid {oid} as f64"))),
        }
    }
}

impl ToWireValue for f64 {
    fn natural_oid(&self) -> Oid {
        oid::FLOAT8
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match target_oid {
            oid::FLOAT8 => write_fixed(buf, self.to_be_bytes()),
            oid::FLOAT4 => {
                let narrow = *self as f32;
                if self.is_finite() && !narrow.is_finite() {
                    return Err(Error::overflow("f64", "FLOAT4"));
                }
                write_fixed(buf, narrow.to_be_bytes())
            }
            oid::NUMERIC => write_text(buf, &float_text(*self)),
            _ => Err(Error::unsupported(target_oid, "f64")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<T: ToWireValue>(v: T, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
        let mut buf = Vec::new();
        let format = v.encode(target, &mut buf)?;
        Ok((format, buf))
    }

    #[test]
    fn test_bool_text() {
        assert!(bool::from_text(oid::BOOL, b"t").unwrap());
        assert!(!bool::from_text(oid::BOOL, b"f").unwrap());
        assert!(bool::from_text(oid::BOOL, b"maybe").is_err());
    }

    #[test]
    fn test_bool_binary() {
        assert!(bool::from_binary(oid::BOOL, &[1]).unwrap());
        assert!(bool::from_binary(oid::BOOL, &[1, 0]).is_err());
        assert_eq!(encoded(true, oid::BOOL).unwrap(), (FormatCode::Binary, vec![0, 0, 0, 1, 1]));
    }

    #[test]
    fn test_int_widening() {
        assert_eq!(i64::from_binary(oid::INT2, &(-5i16).to_be_bytes()).unwrap(), -5);
        assert_eq!(i32::from_text(oid::INT8, b"42").unwrap(), 42);
        assert_eq!(u32::from_binary(oid::OID, &[0xff, 0xff, 0xff, 0xff]).unwrap(), u32::MAX);
    }

    #[test]
    fn test_int_decode_overflow() {
        assert!(matches!(i16::from_text(oid::INT2, b"40000"), Err(Error::Decode(_))));
        let big = (1i64 << 40).to_be_bytes();
        assert!(matches!(i32::from_binary(oid::INT8, &big), Err(Error::Decode(_))));
        assert!(matches!(u32::from_text(oid::INT4, b"-1"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_int_encode() {
        assert_eq!(encoded(7i32, oid::INT8).unwrap().1, [0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(encoded(7u8, oid::INT2).unwrap().1, [0, 0, 0, 2, 0, 7]);
        assert_eq!(
            encoded(150_000i64, oid::NUMERIC).unwrap(),
            (FormatCode::Text, b"\0\0\0\x06150000".to_vec())
        );
    }

    #[test]
    fn test_int_encode_overflow() {
        assert!(matches!(encoded(40_000i64, oid::INT2), Err(Error::BindParameter(_))));
        assert!(matches!(encoded(u64::MAX, oid::INT8), Err(Error::BindParameter(_))));
        assert!(matches!(encoded(-1i32, oid::OID), Err(Error::BindParameter(_))));
        assert!(matches!(encoded(1i32, oid::TEXT), Err(Error::UnsupportedType { .. })));
    }

    #[test]
    fn test_floats() {
        assert_eq!(f64::from_text(oid::FLOAT8, b"1.5").unwrap(), 1.5);
        assert!(f64::from_text(oid::FLOAT8, b"Infinity").unwrap().is_infinite());
        assert!(f64::from_text(oid::FLOAT8, b"NaN").unwrap().is_nan());
        let numeric = [0, 1, 0, 0, 0, 0, 0, 0, 0, 42];
        assert_eq!(f64::from_binary(oid::NUMERIC, &numeric).unwrap(), 42.0);
        assert!(matches!(encoded(1e300f64, oid::FLOAT4), Err(Error::BindParameter(_))));
        assert_eq!(float_text(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(encoded(0.5f32, oid::NUMERIC).unwrap().1, b"\0\0\0\x030.5");
    }
}
