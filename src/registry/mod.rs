//! OID-keyed type codec registry.
//!
//! The typed `FromWireValue`/`ToWireValue` traits in [`crate::conversion`] decode
//! by Rust type, chosen by the caller. This module adds the other direction:
//! decoding by *wire type*, so a result set can be turned into [`crate::record::Record`]s
//! without the caller naming a type up front. Unknown OIDs (extension types,
//! user-defined composites/enums/domains) are filled in on demand by
//! [`introspect`].

pub mod introspect;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

/// A dynamically typed, decoded PostgreSQL value.
///
/// Produced by looking up a column's OID in a [`Registry`] and decoding the
/// raw wire bytes accordingly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Text-family types, bpchar, name, json/jsonb, numeric (decimal text form), etc.
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Ordered `(field name, value)` pairs of a composite type.
    Composite(Vec<(String, Value)>),
    /// `(lower, upper, lower_inclusive, upper_inclusive)`; `None` bound means unbounded.
    Range {
        lower: Option<Box<Value>>,
        upper: Option<Box<Value>>,
        lower_inclusive: bool,
        upper_inclusive: bool,
    },
    /// Raw bytes for an OID the registry has no codec for yet.
    Unknown(Vec<u8>),
}

impl Value {
    /// `true` for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// How to decode/encode values of a given OID.
#[derive(Clone)]
pub enum TypeCodec {
    Scalar(ScalarCodec),
    Array {
        elem: Oid,
    },
    Composite {
        fields: Vec<(String, Oid)>,
    },
    Range {
        elem: Oid,
    },
    Enum {
        labels: Vec<String>,
    },
    Domain {
        base: Oid,
    },
}

/// Decode/encode function set for a scalar OID.
///
/// `encode` is `None` for the built-in codecs, which only ever need to
/// decode rows coming back from the server. User-registered codecs (see
/// [`Registry::register_codec`]) supply one to support binding a [`Value`]
/// as a bound parameter.
#[derive(Clone, Copy)]
pub struct ScalarCodec {
    pub decode_text: fn(&[u8]) -> Result<Value>,
    pub decode_binary: fn(&[u8]) -> Result<Value>,
    pub encode: Option<fn(&Value, &mut Vec<u8>) -> Result<()>>,
}

impl ScalarCodec {
    /// Build a decode-only codec, e.g. for a type a caller never binds as a parameter.
    pub fn decode_only(
        decode_text: fn(&[u8]) -> Result<Value>,
        decode_binary: fn(&[u8]) -> Result<Value>,
    ) -> Self {
        Self {
            decode_text,
            decode_binary,
            encode: None,
        }
    }
}

type Table = HashMap<Oid, TypeCodec>;

/// Global, process-wide registry of built-in type codecs.
///
/// Per-connection overrides (introspected or user-registered) live in
/// [`Overlay`] and are consulted before falling back to this table.
pub struct Registry {
    global: &'static RwLock<Table>,
}

impl Registry {
    /// Handle to the global built-in registry.
    pub fn global() -> Self {
        Self {
            global: global_table(),
        }
    }

    /// Look up the codec for `oid`, checking `overlay` first.
    pub fn lookup(&self, overlay: &Overlay, oid: Oid) -> Option<TypeCodec> {
        if let Some(codec) = overlay.table.get(&oid) {
            return Some(codec.clone());
        }
        self.global.read().unwrap_or_else(|e| e.into_inner()).get(&oid).cloned()
    }

    /// Register or replace a codec in the global table. Affects every connection.
    pub fn register_global(&self, oid: Oid, codec: TypeCodec) {
        self.global
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(oid, codec);
    }

    /// Register a scalar codec for `oid`, globally. Shorthand for
    /// `register_global(oid, TypeCodec::Scalar(codec))`; prefer
    /// `Conn::register_codec`/`register_codec_by_name` for per-connection
    /// registration instead, unless the codec really should apply process-wide.
    pub fn register_codec(&self, oid: Oid, codec: ScalarCodec) {
        self.register_global(oid, TypeCodec::Scalar(codec));
    }

    /// Encode `value` for `oid` into `out`, binary format.
    ///
    /// Errors if no codec is registered for `oid`, the codec isn't a scalar,
    /// or the scalar codec has no `encode` function.
    pub fn encode(&self, overlay: &Overlay, oid: Oid, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match self.lookup(overlay, oid) {
            Some(TypeCodec::Scalar(ScalarCodec { encode: Some(f), .. })) => f(value, out),
            Some(TypeCodec::Scalar(_)) => Err(Error::Unsupported(format!(
                "no encoder registered for oid {oid}"
            ))),
            Some(_) => Err(Error::Unsupported(format!(
                "encoding non-scalar oid {oid} via Value is not supported"
            ))),
            None => Err(Error::Unsupported(format!("no codec registered for oid {oid}"))),
        }
    }

    /// Decode `bytes` for `oid`, falling back to `Value::Unknown` if no codec is
    /// registered (in the overlay or globally) for non-NULL unfamiliar OIDs.
    pub fn decode(
        &self,
        overlay: &Overlay,
        oid: Oid,
        format: FormatCode,
        bytes: Option<&[u8]>,
    ) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        let Some(codec) = self.lookup(overlay, oid) else {
            return Ok(Value::Unknown(bytes.to_vec()));
        };
        self.decode_with(overlay, &codec, format, bytes)
    }

    fn decode_with(
        &self,
        overlay: &Overlay,
        codec: &TypeCodec,
        format: FormatCode,
        bytes: &[u8],
    ) -> Result<Value> {
        match codec {
            TypeCodec::Scalar(s) => match format {
                FormatCode::Text => (s.decode_text)(bytes),
                FormatCode::Binary => (s.decode_binary)(bytes),
            },
            TypeCodec::Domain { base } => {
                let Some(base_codec) = self.lookup(overlay, *base) else {
                    return Ok(Value::Unknown(bytes.to_vec()));
                };
                self.decode_with(overlay, &base_codec, format, bytes)
            }
            TypeCodec::Enum { .. } => Ok(Value::Text(
                std::str::from_utf8(bytes)
                    .map_err(|e| Error::Decode(format!("invalid enum label: {e}")))?
                    .to_string(),
            )),
            TypeCodec::Array { elem } => self.decode_array(overlay, *elem, format, bytes),
            TypeCodec::Composite { fields } => self.decode_composite(overlay, fields, bytes),
            TypeCodec::Range { elem } => self.decode_range(overlay, *elem, format, bytes),
        }
    }

    fn decode_array(
        &self,
        overlay: &Overlay,
        elem: Oid,
        format: FormatCode,
        bytes: &[u8],
    ) -> Result<Value> {
        if format != FormatCode::Binary {
            return Err(Error::Decode("text-format array decoding unsupported".into()));
        }
        // int32 ndim, int32 has_nulls, int32 elem_oid, then ndim * (int32 dim, int32 lower_bound)
        if bytes.len() < 12 {
            return Err(Error::Decode("array header truncated".into()));
        }
        let ndim = i32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let mut offset = 12usize;
        let mut total = 1i64;
        for _ in 0..ndim {
            let dim = i32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
            total *= i64::from(dim);
            offset += 8;
        }
        if ndim == 0 {
            return Ok(Value::Array(Vec::new()));
        }

        let elem_codec = self.lookup(overlay, elem);
        let mut values = Vec::with_capacity(total.max(0) as usize);
        for _ in 0..total {
            let len = i32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
            offset += 4;
            if len < 0 {
                values.push(Value::Null);
                continue;
            }
            let len = len as usize;
            let data = &bytes[offset..offset + len];
            offset += len;
            let value = match &elem_codec {
                Some(codec) => self.decode_with(overlay, codec, format, data)?,
                None => Value::Unknown(data.to_vec()),
            };
            values.push(value);
        }
        Ok(Value::Array(values))
    }

    fn decode_composite(
        &self,
        overlay: &Overlay,
        declared_fields: &[(String, Oid)],
        bytes: &[u8],
    ) -> Result<Value> {
        if bytes.len() < 4 {
            return Err(Error::Decode("composite header truncated".into()));
        }
        let nfields = i32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut offset = 4usize;
        let mut fields = Vec::with_capacity(nfields);
        for i in 0..nfields {
            let field_oid = i32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as Oid;
            offset += 4;
            let len = i32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
            offset += 4;
            let name = declared_fields
                .get(i)
                .map(|(n, _)| n.clone())
                .unwrap_or_else(|| format!("f{i}"));
            let value = if len < 0 {
                Value::Null
            } else {
                let len = len as usize;
                let data = &bytes[offset..offset + len];
                offset += len;
                match self.lookup(overlay, field_oid) {
                    Some(codec) => self.decode_with(overlay, &codec, FormatCode::Binary, data)?,
                    None => Value::Unknown(data.to_vec()),
                }
            };
            fields.push((name, value));
        }
        Ok(Value::Composite(fields))
    }

    fn decode_range(&self, overlay: &Overlay, elem: Oid, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        if bytes.is_empty() {
            return Err(Error::Decode("range flags byte missing".into()));
        }
        const RANGE_EMPTY: u8 = 0x01;
        const RANGE_LB_INC: u8 = 0x02;
        const RANGE_UB_INC: u8 = 0x04;
        const RANGE_LB_INF: u8 = 0x08;
        const RANGE_UB_INF: u8 = 0x10;

        let flags = bytes[0];
        if flags & RANGE_EMPTY != 0 {
            return Ok(Value::Range {
                lower: None,
                upper: None,
                lower_inclusive: false,
                upper_inclusive: false,
            });
        }

        let elem_codec = self.lookup(overlay, elem);
        let mut offset = 1usize;
        let mut read_bound = |present: bool| -> Result<Option<Box<Value>>> {
            if !present {
                return Ok(None);
            }
            let len = i32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
            offset += 4;
            let len = len as usize;
            let data = &bytes[offset..offset + len];
            offset += len;
            let value = match &elem_codec {
                Some(codec) => self.decode_with(overlay, codec, format, data)?,
                None => Value::Unknown(data.to_vec()),
            };
            Ok(Some(Box::new(value)))
        };

        let lower = read_bound(flags & RANGE_LB_INF == 0)?;
        let upper = read_bound(flags & RANGE_UB_INF == 0)?;

        Ok(Value::Range {
            lower,
            upper,
            lower_inclusive: flags & RANGE_LB_INC != 0,
            upper_inclusive: flags & RANGE_UB_INC != 0,
        })
    }
}

/// Per-connection overlay of type codecs, consulted before the global table.
///
/// Populated by [`introspect`] on a registry miss and by
/// [`Registry::register_global`]'s per-connection counterpart,
/// `Overlay::register`.
#[derive(Clone, Default)]
pub struct Overlay {
    table: Table,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, oid: Oid, codec: TypeCodec) {
        self.table.insert(oid, codec);
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.table.contains_key(&oid)
    }
}

/// Codecs shared across every connection drawn from the same pool, written by
/// introspection the first time any connection resolves a given OID.
pub type SharedOverlay = Arc<RwLock<Table>>;

pub fn new_shared_overlay() -> SharedOverlay {
    Arc::new(RwLock::new(HashMap::new()))
}

fn global_table() -> &'static RwLock<Table> {
    static TABLE: OnceLock<RwLock<Table>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(builtin_codecs()))
}

macro_rules! scalar {
    ($map:expr, $oid:expr, $text:expr, $binary:expr) => {
        $map.insert($oid, TypeCodec::Scalar(ScalarCodec::decode_only($text, $binary)));
    };
}

fn builtin_codecs() -> Table {
    let mut m = Table::new();

    scalar!(m, oid::BOOL, decode_bool_text, decode_bool_binary);
    scalar!(m, oid::INT2, decode_int2_text, decode_int2_binary);
    scalar!(m, oid::INT4, decode_int4_text, decode_int4_binary);
    scalar!(m, oid::INT8, decode_int8_text, decode_int8_binary);
    scalar!(m, oid::FLOAT4, decode_float4_text, decode_float4_binary);
    scalar!(m, oid::FLOAT8, decode_float8_text, decode_float8_binary);
    scalar!(m, oid::TEXT, decode_text, decode_text);
    scalar!(m, oid::VARCHAR, decode_text, decode_text);
    scalar!(m, oid::BPCHAR, decode_text, decode_text);
    scalar!(m, oid::NAME, decode_text, decode_text);
    scalar!(m, oid::JSON, decode_text, decode_text);
    scalar!(m, oid::JSONB, decode_jsonb_text, decode_jsonb_binary);
    scalar!(m, oid::UUID, decode_uuid_text, decode_uuid_binary);
    scalar!(m, oid::NUMERIC, decode_text, decode_numeric_binary_as_text);
    scalar!(m, oid::BYTEA, decode_bytea_text, decode_bytes_raw);
    scalar!(m, oid::DATE, decode_text, decode_text);
    scalar!(m, oid::TIME, decode_text, decode_text);
    scalar!(m, oid::TIMETZ, decode_text, decode_text);
    scalar!(m, oid::TIMESTAMP, decode_text, decode_text);
    scalar!(m, oid::TIMESTAMPTZ, decode_text, decode_text);
    scalar!(m, oid::INTERVAL, decode_text, decode_text);
    scalar!(m, oid::INET, decode_text, decode_text);
    scalar!(m, oid::CIDR, decode_text, decode_text);
    scalar!(m, oid::MACADDR, decode_text, decode_text);

    m
}

fn decode_bool_text(b: &[u8]) -> Result<Value> {
    Ok(Value::Bool(b == b"t"))
}
fn decode_bool_binary(b: &[u8]) -> Result<Value> {
    Ok(Value::Bool(b.first().copied().unwrap_or(0) != 0))
}
fn decode_int2_text(b: &[u8]) -> Result<Value> {
    Ok(Value::Int2(parse_utf8(b)?))
}
fn decode_int2_binary(b: &[u8]) -> Result<Value> {
    Ok(Value::Int2(i16::from_be_bytes(fixed(b)?)))
}
fn decode_int4_text(b: &[u8]) -> Result<Value> {
    Ok(Value::Int4(parse_utf8(b)?))
}
fn decode_int4_binary(b: &[u8]) -> Result<Value> {
    Ok(Value::Int4(i32::from_be_bytes(fixed(b)?)))
}
fn decode_int8_text(b: &[u8]) -> Result<Value> {
    Ok(Value::Int8(parse_utf8(b)?))
}
fn decode_int8_binary(b: &[u8]) -> Result<Value> {
    Ok(Value::Int8(i64::from_be_bytes(fixed(b)?)))
}
fn decode_float4_text(b: &[u8]) -> Result<Value> {
    Ok(Value::Float4(parse_utf8(b)?))
}
fn decode_float4_binary(b: &[u8]) -> Result<Value> {
    Ok(Value::Float4(f32::from_be_bytes(fixed(b)?)))
}
fn decode_float8_text(b: &[u8]) -> Result<Value> {
    Ok(Value::Float8(parse_utf8(b)?))
}
fn decode_float8_binary(b: &[u8]) -> Result<Value> {
    Ok(Value::Float8(f64::from_be_bytes(fixed(b)?)))
}
fn decode_text(b: &[u8]) -> Result<Value> {
    Ok(Value::Text(
        std::str::from_utf8(b)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?
            .to_string(),
    ))
}
fn decode_jsonb_text(b: &[u8]) -> Result<Value> {
    decode_text(b)
}
fn decode_jsonb_binary(b: &[u8]) -> Result<Value> {
    // jsonb binary payload is a 1-byte version prefix followed by the json text.
    decode_text(b.get(1..).unwrap_or_default())
}
fn decode_uuid_text(b: &[u8]) -> Result<Value> {
    decode_text(b)
}
fn decode_uuid_binary(b: &[u8]) -> Result<Value> {
    if b.len() != 16 {
        return Err(Error::Decode(format!("invalid uuid length: {}", b.len())));
    }
    let hex = b.iter().map(|byte| format!("{byte:02x}")).collect::<String>();
    Ok(Value::Text(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )))
}
fn decode_numeric_binary_as_text(_b: &[u8]) -> Result<Value> {
    Err(Error::Decode(
        "numeric is always requested in text format; binary decode unreachable".into(),
    ))
}
fn decode_bytea_text(b: &[u8]) -> Result<Value> {
    if let Some(hex) = b.strip_prefix(b"\\x") {
        let mut out = Vec::with_capacity(hex.len() / 2);
        for chunk in hex.chunks(2) {
            if chunk.len() != 2 {
                return Err(Error::Decode("invalid bytea hex length".into()));
            }
            let s = std::str::from_utf8(chunk).map_err(|e| Error::Decode(e.to_string()))?;
            out.push(
                u8::from_str_radix(s, 16)
                    .map_err(|_| Error::Decode("invalid bytea hex digit".into()))?,
            );
        }
        Ok(Value::Bytes(out))
    } else {
        Ok(Value::Bytes(b.to_vec()))
    }
}
fn decode_bytes_raw(b: &[u8]) -> Result<Value> {
    Ok(Value::Bytes(b.to_vec()))
}

fn parse_utf8<T: std::str::FromStr>(b: &[u8]) -> Result<T> {
    std::str::from_utf8(b)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?
        .parse()
        .map_err(|_| Error::Decode("invalid numeric literal".into()))
}

fn fixed<const N: usize>(b: &[u8]) -> Result<[u8; N]> {
    b.try_into()
        .map_err(|_| Error::Decode(format!("expected {N} bytes, got {}", b.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_builtin_scalar() {
        let registry = Registry::global();
        let overlay = Overlay::new();
        let v = registry
            .decode(&overlay, oid::INT4, FormatCode::Binary, Some(&42i32.to_be_bytes()))
            .unwrap();
        assert_eq!(v, Value::Int4(42));
    }

    #[test]
    fn unknown_oid_falls_back_to_raw_bytes() {
        let registry = Registry::global();
        let overlay = Overlay::new();
        let v = registry.decode(&overlay, 999_999, FormatCode::Binary, Some(b"raw")).unwrap();
        assert_eq!(v, Value::Unknown(b"raw".to_vec()));
    }

    #[test]
    fn null_short_circuits_before_lookup() {
        let registry = Registry::global();
        let overlay = Overlay::new();
        let v = registry.decode(&overlay, oid::INT4, FormatCode::Binary, None).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn overlay_shadows_global() {
        let registry = Registry::global();
        let mut overlay = Overlay::new();
        overlay.register(
            60000,
            TypeCodec::Scalar(ScalarCodec::decode_only(decode_text, decode_text)),
        );
        let v = registry
            .decode(&overlay, 60000, FormatCode::Text, Some(b"hi"))
            .unwrap();
        assert_eq!(v, Value::Text("hi".into()));
    }

    #[test]
    fn encode_uses_registered_encoder() {
        let registry = Registry::global();
        let overlay = Overlay::new();
        fn encode_text(v: &Value, out: &mut Vec<u8>) -> Result<()> {
            match v {
                Value::Text(s) => {
                    out.extend_from_slice(s.as_bytes());
                    Ok(())
                }
                _ => Err(Error::Decode("expected text".into())),
            }
        }
        registry.register_codec(
            60001,
            ScalarCodec {
                decode_text,
                decode_binary: decode_text,
                encode: Some(encode_text),
            },
        );
        let mut buf = Vec::new();
        registry
            .encode(&overlay, 60001, &Value::Text("hi".into()), &mut buf)
            .unwrap();
        assert_eq!(buf, b"hi");
    }

    #[test]
    fn encode_without_encoder_errors() {
        let registry = Registry::global();
        let overlay = Overlay::new();
        let mut buf = Vec::new();
        let err = registry.encode(&overlay, oid::INT4, &Value::Int4(1), &mut buf);
        assert!(err.is_err());
    }

    #[test]
    fn decodes_array_of_int4() {
        let registry = Registry::global();
        let overlay = Overlay::new();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_be_bytes()); // ndim
        bytes.extend_from_slice(&0i32.to_be_bytes()); // has_nulls
        bytes.extend_from_slice(&oid::INT4.to_be_bytes()); // elem oid
        bytes.extend_from_slice(&2i32.to_be_bytes()); // dim
        bytes.extend_from_slice(&1i32.to_be_bytes()); // lower bound
        bytes.extend_from_slice(&4i32.to_be_bytes());
        bytes.extend_from_slice(&10i32.to_be_bytes());
        bytes.extend_from_slice(&4i32.to_be_bytes());
        bytes.extend_from_slice(&20i32.to_be_bytes());

        let v = registry
            .decode(
                &overlay,
                0, // pretend caller already resolved array OID to this codec
                FormatCode::Binary,
                Some(&bytes),
            )
            .unwrap();
        // oid 0 has no codec registered globally, so this exercises the Unknown path;
        // directly exercise decode_array instead for the happy path.
        assert_eq!(v, Value::Unknown(bytes.clone()));

        let array_value = registry
            .decode_with(
                &overlay,
                &TypeCodec::Array { elem: oid::INT4 },
                FormatCode::Binary,
                &bytes,
            )
            .unwrap();
        assert_eq!(
            array_value,
            Value::Array(vec![Value::Int4(10), Value::Int4(20)])
        );
    }
}
