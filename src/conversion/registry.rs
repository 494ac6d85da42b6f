//! Oid-keyed codec table over [`Value`].

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::protocol::types::oid::{self, is_text_like};
use crate::protocol::types::{FormatCode, Oid};

use super::bytes::{decode_bytea_text, encode_bytea_text};
use super::datetime::{
    format_date, format_time, format_timestamp, parse_date, parse_time, parse_timestamp,
};
use super::numeric::{canonical, numeric_from_str, numeric_to_string};
use super::primitives::float_text;
use super::uuid::{format_uuid, parse_uuid};
use super::value::Value;
use super::{utf8, write_null, write_prefixed};

/// Writer for one representation. Receives the parameter oid so shared
/// writers can name it in errors.
pub type EncodeFn = fn(Oid, &Value, &mut Vec<u8>) -> Result<()>;
pub type DecodeFn = fn(&[u8]) -> Result<Value>;

/// One representation (text or binary) of a type.
#[derive(Debug, Clone, Copy)]
pub struct CodecFormat {
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

/// Codec entry for one server type.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    pub oid: Oid,
    pub name: &'static str,
    pub text: CodecFormat,
    pub binary: Option<CodecFormat>,
    /// Binary form is only valid with `integer_datetimes = on`.
    pub needs_integer_datetimes: bool,
}

/// Immutable codec table.
///
/// The process uses one table, read through [`global`](Self::global). Install
/// a customized one with [`install`](Self::install) before the first query.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    codecs: HashMap<Oid, Codec>,
}

static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

impl TypeRegistry {
    /// Builder seeded with the builtin codecs.
    pub fn builder() -> RegistryBuilder {
        let mut builder = RegistryBuilder::empty();
        for codec in builtins() {
            builder = builder.register(codec);
        }
        builder
    }

    pub fn builtins() -> Self {
        Self::builder().build()
    }

    /// The process-wide table, built from the builtins on first use.
    pub fn global() -> &'static TypeRegistry {
        GLOBAL.get_or_init(Self::builtins)
    }

    /// Set the process-wide table. Fails, returning the argument, once a
    /// table is in place.
    pub fn install(registry: TypeRegistry) -> core::result::Result<(), TypeRegistry> {
        GLOBAL.set(registry)
    }

    pub fn get(&self, oid: Oid) -> Option<&Codec> {
        self.codecs.get(&oid)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Result format to request in Bind for a column of this type.
    pub fn result_format(&self, oid: Oid, integer_datetimes: bool) -> FormatCode {
        match self.get(oid) {
            Some(codec)
                if codec.binary.is_some()
                    && (!codec.needs_integer_datetimes || integer_datetimes) =>
            {
                FormatCode::Binary
            }
            _ => FormatCode::Text,
        }
    }

    /// Decode a column. `None` is NULL. Unknown oids become [`Value::Unknown`].
    pub fn decode(&self, oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        let half = self.get(oid).and_then(|codec| match format {
            FormatCode::Text => Some(codec.text),
            FormatCode::Binary => codec.binary,
        });
        match half {
            Some(half) => (half.decode)(bytes),
            None => Ok(Value::Unknown {
                oid,
                format,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// Write `value` as a Bind parameter declared as `oid`, length prefix
    /// included, and return the format used.
    ///
    /// Binary is used when the codec has it, except for datetimes, which go as
    /// text so the server's `integer_datetimes` setting does not matter.
    /// `Value::Text` goes as text for any non-textual oid.
    pub fn encode(&self, oid: Oid, value: &Value, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match value {
            Value::Null => {
                write_null(buf);
                return Ok(FormatCode::Binary);
            }
            Value::Unknown { format, bytes, .. } => {
                write_raw(buf, bytes)?;
                return Ok(*format);
            }
            Value::Text(s) if !is_text_like(oid) && oid != oid::JSONB => {
                write_raw(buf, s.as_bytes())?;
                return Ok(FormatCode::Text);
            }
            _ => {}
        }

        let codec = self
            .get(oid)
            .ok_or_else(|| Error::unsupported(oid, value.type_name()))?;
        let (format, half) = match codec.binary {
            Some(binary) if !codec.needs_integer_datetimes => (FormatCode::Binary, binary),
            _ => (FormatCode::Text, codec.text),
        };
        write_prefixed(buf, |b| (half.encode)(oid, value, b))?;
        Ok(format)
    }

    /// Decode and re-render in the type's text form.
    pub fn render_text(&self, oid: Oid, format: FormatCode, bytes: &[u8]) -> Result<String> {
        let codec = self
            .get(oid)
            .ok_or_else(|| Error::Decode(format!("no codec for oid {oid}")))?;
        let value = self.decode(oid, format, Some(bytes))?;
        let mut out = Vec::new();
        (codec.text.encode)(oid, &value, &mut out).map_err(|e| match e {
            // a server value the text writer cannot place is a decode failure
            Error::BindParameter(message) => Error::Decode(message),
            other => other,
        })?;
        String::from_utf8(out).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
    }
}

/// Mutable staging for a [`TypeRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    codecs: HashMap<Oid, Codec>,
}

impl RegistryBuilder {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add or replace the codec for `codec.oid`.
    pub fn register(mut self, codec: Codec) -> Self {
        self.codecs.insert(codec.oid, codec);
        self
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            codecs: self.codecs,
        }
    }
}

fn write_raw(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    write_prefixed(buf, |b| {
        b.extend_from_slice(bytes);
        Ok(())
    })
}

fn mismatch(oid: Oid, value: &Value) -> Error {
    Error::unsupported(oid, value.type_name())
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {what} length: {}", bytes.len())))
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8], what: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let s = utf8(bytes)?;
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid {what} {s:?}: {e}")))
}

fn integer(value: &Value) -> Option<i128> {
    value.as_i64().map(i128::from)
}

fn narrow<T: TryFrom<i128>>(oid: Oid, value: &Value, to: &str) -> Result<T> {
    let wide = integer(value).ok_or_else(|| mismatch(oid, value))?;
    T::try_from(wide).map_err(|_| Error::overflow(value.type_name(), to))
}

fn float(oid: Oid, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| mismatch(oid, value))
}

fn text_of(oid: Oid, value: &Value) -> Result<&str> {
    match value {
        Value::Text(s) | Value::Json(s) => Ok(s),
        _ => Err(mismatch(oid, value)),
    }
}

// === bool ===

fn bool_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    let b = v.as_bool().ok_or_else(|| mismatch(oid, v))?;
    out.push(u8::from(b));
    Ok(())
}

fn bool_bin_dec(bytes: &[u8]) -> Result<Value> {
    let [b] = fixed::<1>(bytes, "bool")?;
    Ok(Value::Bool(b != 0))
}

fn bool_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    let b = v.as_bool().ok_or_else(|| mismatch(oid, v))?;
    out.push(if b { b't' } else { b'f' });
    Ok(())
}

fn bool_text_dec(bytes: &[u8]) -> Result<Value> {
    match bytes {
        b"t" | b"true" => Ok(Value::Bool(true)),
        b"f" | b"false" => Ok(Value::Bool(false)),
        _ => Err(Error::Decode(format!(
            "invalid boolean: {:?}",
            String::from_utf8_lossy(bytes)
        ))),
    }
}

// === bytea ===

fn bytea_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Bytea(b) => {
            out.extend_from_slice(b);
            Ok(())
        }
        _ => Err(mismatch(oid, v)),
    }
}

fn bytea_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Bytea(bytes.to_vec()))
}

fn bytea_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Bytea(b) => {
            encode_bytea_text(b, out);
            Ok(())
        }
        _ => Err(mismatch(oid, v)),
    }
}

fn bytea_text_dec(bytes: &[u8]) -> Result<Value> {
    decode_bytea_text(bytes).map(Value::Bytea)
}

// === "char" ===

fn char_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Char(0) => Ok(()),
        Value::Char(c) => {
            out.push(c.to_be_bytes()[0]);
            Ok(())
        }
        _ => Err(mismatch(oid, v)),
    }
}

fn char_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Char(c) => {
            out.extend_from_slice(&c.to_be_bytes());
            Ok(())
        }
        _ => Err(mismatch(oid, v)),
    }
}

fn char_dec(bytes: &[u8]) -> Result<Value> {
    match bytes {
        [] => Ok(Value::Char(0)),
        [b] => Ok(Value::Char(i8::from_be_bytes([*b]))),
        _ => Err(Error::Decode(format!("invalid \"char\" length: {}", bytes.len()))),
    }
}

// === text-like ===

fn text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(text_of(oid, v)?.as_bytes());
    Ok(())
}

fn text_dec(bytes: &[u8]) -> Result<Value> {
    utf8(bytes).map(|s| Value::Text(s.to_owned()))
}

fn json_dec(bytes: &[u8]) -> Result<Value> {
    utf8(bytes).map(|s| Value::Json(s.to_owned()))
}

fn jsonb_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.push(1);
    text_enc(oid, v, out)
}

fn jsonb_bin_dec(bytes: &[u8]) -> Result<Value> {
    match bytes.split_first() {
        Some((1, json)) => json_dec(json),
        Some((version, _)) => Err(Error::Decode(format!("unsupported jsonb version {version}"))),
        None => Err(Error::Decode("empty jsonb value".into())),
    }
}

// === integers ===

fn int2_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&narrow::<i16>(oid, v, "INT2")?.to_be_bytes());
    Ok(())
}

fn int4_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&narrow::<i32>(oid, v, "INT4")?.to_be_bytes());
    Ok(())
}

fn int8_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&narrow::<i64>(oid, v, "INT8")?.to_be_bytes());
    Ok(())
}

fn oid_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&narrow::<u32>(oid, v, "OID")?.to_be_bytes());
    Ok(())
}

fn int_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    let n = integer(v).ok_or_else(|| mismatch(oid, v))?;
    out.extend_from_slice(n.to_string().as_bytes());
    Ok(())
}

fn int2_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int2(i16::from_be_bytes(fixed(bytes, "int2")?)))
}

fn int4_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int4(i32::from_be_bytes(fixed(bytes, "int4")?)))
}

fn int8_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int8(i64::from_be_bytes(fixed(bytes, "int8")?)))
}

fn oid_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Oid(u32::from_be_bytes(fixed(bytes, "oid")?)))
}

fn int2_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_text(bytes, "int2").map(Value::Int2)
}

fn int4_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_text(bytes, "int4").map(Value::Int4)
}

fn int8_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_text(bytes, "int8").map(Value::Int8)
}

fn oid_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_text(bytes, "oid").map(Value::Oid)
}

// === floats ===

fn float4_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Float4(f) => out.extend_from_slice(&f.to_be_bytes()),
        _ => return Err(mismatch(oid, v)),
    }
    Ok(())
}

fn float8_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&float(oid, v)?.to_be_bytes());
    Ok(())
}

fn float_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    // f32 renders through its own shortest form, not the widened f64
    let text = match v {
        Value::Float4(f) if f.is_finite() => f.to_string(),
        _ => float_text(float(oid, v)?),
    };
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

fn float4_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Float4(f32::from_be_bytes(fixed(bytes, "float4")?)))
}

fn float8_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Float8(f64::from_be_bytes(fixed(bytes, "float8")?)))
}

fn float4_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_text(bytes, "float4").map(Value::Float4)
}

fn float8_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_text(bytes, "float8").map(Value::Float8)
}

// === numeric ===

fn numeric_text_of(oid: Oid, v: &Value) -> Result<String> {
    match v {
        Value::Numeric(s) => Ok(s.clone()),
        Value::Float4(_) | Value::Float8(_) => Ok(float_text(float(oid, v)?)),
        _ => integer(v)
            .map(|n| n.to_string())
            .ok_or_else(|| mismatch(oid, v)),
    }
}

fn numeric_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&numeric_from_str(&numeric_text_of(oid, v)?)?);
    Ok(())
}

fn numeric_bin_dec(bytes: &[u8]) -> Result<Value> {
    numeric_to_string(bytes).map(Value::Numeric)
}

fn numeric_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(canonical(&numeric_text_of(oid, v)?)?.as_bytes());
    Ok(())
}

fn numeric_text_dec(bytes: &[u8]) -> Result<Value> {
    utf8(bytes).map(|s| Value::Numeric(s.to_owned()))
}

// === uuid ===

fn uuid_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Uuid(u) => {
            out.extend_from_slice(u);
            Ok(())
        }
        _ => Err(mismatch(oid, v)),
    }
}

fn uuid_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Uuid(fixed(bytes, "uuid")?))
}

fn uuid_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Uuid(u) => {
            out.extend_from_slice(format_uuid(u).as_bytes());
            Ok(())
        }
        _ => Err(mismatch(oid, v)),
    }
}

fn uuid_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_uuid(utf8(bytes)?).map(Value::Uuid)
}

// === datetimes ===

fn date_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Date(d) => out.extend_from_slice(&d.to_be_bytes()),
        _ => return Err(mismatch(oid, v)),
    }
    Ok(())
}

fn date_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Date(i32::from_be_bytes(fixed(bytes, "date")?)))
}

fn date_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Date(d) => out.extend_from_slice(format_date(*d)?.as_bytes()),
        _ => return Err(mismatch(oid, v)),
    }
    Ok(())
}

fn date_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_date(utf8(bytes)?).map(Value::Date)
}

fn micros_of(oid: Oid, v: &Value) -> Result<i64> {
    match (oid, v) {
        (oid::TIME, Value::Time(us))
        | (oid::TIMESTAMP, Value::Timestamp(us))
        | (oid::TIMESTAMPTZ, Value::TimestampTz(us) | Value::Timestamp(us)) => Ok(*us),
        _ => Err(mismatch(oid, v)),
    }
}

fn micros_bin_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&micros_of(oid, v)?.to_be_bytes());
    Ok(())
}

fn time_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Time(i64::from_be_bytes(fixed(bytes, "time")?)))
}

fn timestamp_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Timestamp(i64::from_be_bytes(fixed(bytes, "timestamp")?)))
}

fn timestamptz_bin_dec(bytes: &[u8]) -> Result<Value> {
    Ok(Value::TimestampTz(i64::from_be_bytes(fixed(bytes, "timestamptz")?)))
}

fn time_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(format_time(micros_of(oid, v)?)?.as_bytes());
    Ok(())
}

fn timestamp_text_enc(oid: Oid, v: &Value, out: &mut Vec<u8>) -> Result<()> {
    let text = format_timestamp(micros_of(oid, v)?, oid == oid::TIMESTAMPTZ)?;
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

fn time_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_time(utf8(bytes)?).map(Value::Time)
}

fn timestamp_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_timestamp(utf8(bytes)?, false).map(Value::Timestamp)
}

fn timestamptz_text_dec(bytes: &[u8]) -> Result<Value> {
    parse_timestamp(utf8(bytes)?, true).map(Value::TimestampTz)
}

// === table ===

const fn half(encode: EncodeFn, decode: DecodeFn) -> CodecFormat {
    CodecFormat { encode, decode }
}

const fn codec(
    oid: Oid,
    name: &'static str,
    text: CodecFormat,
    binary: CodecFormat,
    needs_integer_datetimes: bool,
) -> Codec {
    Codec {
        oid,
        name,
        text,
        binary: Some(binary),
        needs_integer_datetimes,
    }
}

fn builtins() -> [Codec; 21] {
    let text = half(text_enc, text_dec);
    let int_text = |decode: DecodeFn| half(int_text_enc, decode);
    let float_text_half = |decode: DecodeFn| half(float_text_enc, decode);
    [
        codec(oid::BOOL, "bool", half(bool_text_enc, bool_text_dec), half(bool_bin_enc, bool_bin_dec), false),
        codec(oid::BYTEA, "bytea", half(bytea_text_enc, bytea_text_dec), half(bytea_bin_enc, bytea_bin_dec), false),
        codec(oid::CHAR, "char", half(char_enc, char_dec), half(char_bin_enc, char_dec), false),
        codec(oid::NAME, "name", text, text, false),
        codec(oid::INT8, "int8", int_text(int8_text_dec), half(int8_bin_enc, int8_bin_dec), false),
        codec(oid::INT2, "int2", int_text(int2_text_dec), half(int2_bin_enc, int2_bin_dec), false),
        codec(oid::INT4, "int4", int_text(int4_text_dec), half(int4_bin_enc, int4_bin_dec), false),
        codec(oid::TEXT, "text", text, text, false),
        codec(oid::OID, "oid", int_text(oid_text_dec), half(oid_bin_enc, oid_bin_dec), false),
        codec(oid::JSON, "json", half(text_enc, json_dec), half(text_enc, json_dec), false),
        codec(oid::FLOAT4, "float4", float_text_half(float4_text_dec), half(float4_bin_enc, float4_bin_dec), false),
        codec(oid::FLOAT8, "float8", float_text_half(float8_text_dec), half(float8_bin_enc, float8_bin_dec), false),
        codec(oid::BPCHAR, "bpchar", text, text, false),
        codec(oid::VARCHAR, "varchar", text, text, false),
        codec(oid::DATE, "date", half(date_text_enc, date_text_dec), half(date_bin_enc, date_bin_dec), true),
        codec(oid::TIME, "time", half(time_text_enc, time_text_dec), half(micros_bin_enc, time_bin_dec), true),
        codec(oid::TIMESTAMP, "timestamp", half(timestamp_text_enc, timestamp_text_dec), half(micros_bin_enc, timestamp_bin_dec), true),
        codec(oid::TIMESTAMPTZ, "timestamptz", half(timestamp_text_enc, timestamptz_text_dec), half(micros_bin_enc, timestamptz_bin_dec), true),
        codec(oid::NUMERIC, "numeric", half(numeric_text_enc, numeric_text_dec), half(numeric_bin_enc, numeric_bin_dec), false),
        codec(oid::UUID, "uuid", half(uuid_text_enc, uuid_text_dec), half(uuid_bin_enc, uuid_bin_dec), false),
        codec(oid::JSONB, "jsonb", half(text_enc, json_dec), half(jsonb_bin_enc, jsonb_bin_dec), false),
    ]
}
