//! Type codec registry and the typed conversion traits built on it.
//!
//! Two layers share the same wire codecs:
//!
//! - [`TypeRegistry`] maps a server type oid to text and binary codecs over the
//!   dynamic [`Value`]. Unknown oids decode to [`Value::Unknown`].
//! - [`FromWireValue`] / [`ToWireValue`] let Rust types decode and encode
//!   directly, checking the column or parameter oid as they go.

mod bytes;
mod datetime;
mod numeric;
mod primitives;
mod registry;
mod row;
mod string;
mod uuid;
mod value;

pub use datetime::{PG_EPOCH_DAYS_FROM_UNIX, date_from_ymd, ymd_from_date};
pub use numeric::{numeric_from_str, numeric_to_string};
pub use registry::{Codec, CodecFormat, RegistryBuilder, TypeRegistry};
pub use row::{FromRow, Row};
pub use value::Value;

use crate::error::{Error, Result};
use crate::protocol::frontend::EncodedParams;
use crate::protocol::types::{FormatCode, Oid};

/// Decode a wire value into a Rust type.
///
/// The oid lets implementations reject incompatible columns with a clear error.
pub trait FromWireValue<'a>: Sized {
    /// Default implementation rejects NULL; `Option<T>` overrides it.
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self>;

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self>;
}

/// Encode a Rust value as a Bind parameter.
pub trait ToWireValue {
    /// Oid sent in Parse when the statement is not prepared beforehand.
    /// `0` lets the server infer it.
    fn natural_oid(&self) -> Oid;

    /// Write `int32 length + bytes` (or `-1` for NULL) for a parameter declared
    /// as `target_oid`, returning the format used.
    ///
    /// Fails with [`Error::UnsupportedType`] when no writer exists for that oid.
    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode>;
}

/// A full parameter list.
pub trait ToParams {
    fn param_count(&self) -> usize;

    fn natural_oids(&self) -> Vec<Oid>;

    /// Encode every parameter against its declared oid. `target_oids` has
    /// exactly `param_count()` entries.
    fn encode(&self, target_oids: &[Oid], out: &mut EncodedParams) -> Result<()>;
}

/// Write a length-prefixed value whose body is produced by `body`.
pub(crate) fn write_prefixed(buf: &mut Vec<u8>, body: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    body(buf)?;
    let len = i32::try_from(buf.len() - start - 4)
        .map_err(|_| Error::BindParameter("parameter larger than 2 GiB".into()))?;
    if let Some(slot) = buf.get_mut(start..start + 4) {
        slot.copy_from_slice(&len.to_be_bytes());
    }
    Ok(())
}

/// Length prefix for NULL.
pub(crate) fn write_null(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(-1_i32).to_be_bytes());
}

pub(crate) fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

/// Check arity, then encode `params` against `target_oids`.
pub fn encode_params<P: ToParams + ?Sized>(params: &P, target_oids: &[Oid]) -> Result<EncodedParams> {
    if params.param_count() != target_oids.len() {
        return Err(Error::BindParameter(format!(
            "statement expects {} parameters, got {}",
            target_oids.len(),
            params.param_count()
        )));
    }
    if target_oids.len() > i16::MAX as usize {
        return Err(Error::BindParameter(format!(
            "too many parameters: {}",
            target_oids.len()
        )));
    }
    let mut out = EncodedParams::default();
    out.formats.reserve(target_oids.len());
    params.encode(target_oids, &mut out)?;
    Ok(out)
}

// === Option<T> - NULL handling ===

impl<'a, T: FromWireValue<'a>> FromWireValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_text(oid, bytes).map(Some)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(oid, bytes).map(Some)
    }
}

impl<T: ToWireValue> ToWireValue for Option<T> {
    fn natural_oid(&self) -> Oid {
        self.as_ref().map_or(0, ToWireValue::natural_oid)
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match self {
            Some(v) => v.encode(target_oid, buf),
            None => {
                write_null(buf);
                Ok(FormatCode::Binary)
            }
        }
    }
}

impl<T: ToWireValue + ?Sized> ToWireValue for &T {
    fn natural_oid(&self) -> Oid {
        (*self).natural_oid()
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        (*self).encode(target_oid, buf)
    }
}

// === ToParams ===

impl ToParams for () {
    fn param_count(&self) -> usize {
        0
    }

    fn natural_oids(&self) -> Vec<Oid> {
        Vec::new()
    }

    fn encode(&self, _target_oids: &[Oid], _out: &mut EncodedParams) -> Result<()> {
        Ok(())
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn param_count(&self) -> usize {
        (*self).param_count()
    }

    fn natural_oids(&self) -> Vec<Oid> {
        (*self).natural_oids()
    }

    fn encode(&self, target_oids: &[Oid], out: &mut EncodedParams) -> Result<()> {
        (*self).encode(target_oids, out)
    }
}

/// Homogeneous lists, e.g. `Vec<Value>` or `[&dyn ToWireValue]`.
impl<T: ToWireValue> ToParams for [T] {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn natural_oids(&self) -> Vec<Oid> {
        self.iter().map(ToWireValue::natural_oid).collect()
    }

    fn encode(&self, target_oids: &[Oid], out: &mut EncodedParams) -> Result<()> {
        for (value, &oid) in self.iter().zip(target_oids) {
            let format = value.encode(oid, &mut out.values)?;
            out.formats.push(format);
        }
        Ok(())
    }
}

impl<T: ToWireValue> ToParams for Vec<T> {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn natural_oids(&self) -> Vec<Oid> {
        self.as_slice().natural_oids()
    }

    fn encode(&self, target_oids: &[Oid], out: &mut EncodedParams) -> Result<()> {
        self.as_slice().encode(target_oids, out)
    }
}

macro_rules! impl_to_params {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<$($T: ToWireValue),+> ToParams for ($($T,)+) {
            fn param_count(&self) -> usize {
                $count
            }

            fn natural_oids(&self) -> Vec<Oid> {
                vec![$(self.$idx.natural_oid()),+]
            }

            fn encode(&self, target_oids: &[Oid], out: &mut EncodedParams) -> Result<()> {
                $(
                    let oid = target_oids.get($idx).copied().unwrap_or(0);
                    let format = self.$idx.encode(oid, &mut out.values)?;
                    out.formats.push(format);
                )+
                Ok(())
            }
        }
    };
}

impl_to_params!(1, 0: T0);
impl_to_params!(2, 0: T0, 1: T1);
impl_to_params!(3, 0: T0, 1: T1, 2: T2);
impl_to_params!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_params!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_params!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_params!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_params!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);
impl_to_params!(13, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11, 12: T12);
impl_to_params!(14, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11, 12: T12, 13: T13);
impl_to_params!(15, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11, 12: T12, 13: T13, 14: T14);
impl_to_params!(16, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11, 12: T12, 13: T13, 14: T14, 15: T15);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn test_option_null() {
        assert_eq!(Option::<i32>::from_null().unwrap(), None);
        assert!(i32::from_null().is_err());
    }

    #[test]
    fn test_encode_params_arity() {
        let err = encode_params(&(1i32, "x"), &[oid::INT4]).unwrap_err();
        assert!(matches!(err, Error::BindParameter(_)));

        let encoded = encode_params(&(1i32, "x"), &[oid::INT4, oid::TEXT]).unwrap();
        assert_eq!(encoded.count(), 2);
        assert_eq!(encoded.formats, [FormatCode::Binary, FormatCode::Binary]);
        assert_eq!(
            encoded.values,
            [0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 1, b'x']
        );
    }

    #[test]
    fn test_encode_params_null_and_text_fallback() {
        let none: Option<i64> = None;
        let encoded = encode_params(&(none, "150000"), &[oid::INT8, oid::NUMERIC]).unwrap();
        assert_eq!(encoded.formats, [FormatCode::Binary, FormatCode::Text]);
        assert_eq!(&encoded.values[..4], &(-1i32).to_be_bytes());
        assert_eq!(&encoded.values[4..], b"\0\0\0\x06150000");
    }

    #[test]
    fn test_dynamic_params() {
        let params = vec![Value::Int4(7), Value::Null];
        assert_eq!(params.natural_oids(), [oid::INT4, 0]);
        let encoded = encode_params(&params, &[oid::INT8, oid::TEXT]).unwrap();
        assert_eq!(
            encoded.values,
            [0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0, 7, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_unsupported_parameter_type() {
        let err = encode_params(&(true,), &[oid::UUID]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { oid: oid::UUID, .. }));
    }
}
