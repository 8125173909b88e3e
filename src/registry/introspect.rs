//! Catalog-driven discovery of composite/array/range/enum/domain structure.
//!
//! When [`Registry::lookup`](super::Registry::lookup) misses, the connection asks
//! the server about the OID via `pg_catalog` and turns the answer into a
//! [`TypeCodec`](super::TypeCodec), which gets cached in the connection's
//! [`Overlay`](super::Overlay) (and, if the connection came from a pool with
//! sharing enabled, in the pool-wide table too).
//!
//! The catalog columns themselves (`oid`, `int2`, `int4`, `name`, `char`) are all
//! built-in scalar codecs, so resolving an unfamiliar OID never recurses back
//! into introspection.

use crate::conversion::FromRow;
use crate::error::{Error, Result};

use super::TypeCodec;

/// `typtype` values from `pg_catalog.pg_type`.
mod typtype {
    pub const BASE: &str = "b";
    pub const COMPOSITE: &str = "c";
    pub const DOMAIN: &str = "d";
    pub const ENUM: &str = "e";
    pub const RANGE: &str = "r";
}

/// One row of `pg_type` needed to classify an OID.
#[derive(Debug)]
pub struct PgType {
    pub typtype: String,
    pub typelem: u32,
    pub typbasetype: u32,
    pub typrelid: u32,
}

impl<'a> FromRow<'a> for PgType {
    fn from_row_text(
        cols: &[crate::protocol::backend::query::FieldDescription],
        row: crate::protocol::backend::query::DataRow<'a>,
    ) -> Result<Self> {
        let (typtype, typelem, typbasetype, typrelid): (String, u32, u32, u32) =
            FromRow::from_row_text(cols, row)?;
        Ok(Self {
            typtype,
            typelem,
            typbasetype,
            typrelid,
        })
    }

    fn from_row_binary(
        cols: &[crate::protocol::backend::query::FieldDescription],
        row: crate::protocol::backend::query::DataRow<'a>,
    ) -> Result<Self> {
        Self::from_row_text(cols, row)
    }
}

/// SQL used to classify an OID. Joins are avoided; each shape is resolved with
/// its own small follow-up query to keep every statement simple-protocol-safe.
pub const SELECT_PG_TYPE: &str =
    "select typtype, typelem, typbasetype, typrelid from pg_catalog.pg_type where oid = $1";

pub const SELECT_COMPOSITE_FIELDS: &str = "select attname, atttypid from pg_catalog.pg_attribute \
     where attrelid = $1 and attnum > 0 and not attisdropped order by attnum";

pub const SELECT_RANGE_SUBTYPE: &str = "select rngsubtype from pg_catalog.pg_range where rngtypid = $1";

pub const SELECT_ENUM_LABELS: &str =
    "select enumlabel from pg_catalog.pg_enum where enumtypid = $1 order by enumsortorder";

/// Turn a classified `pg_type` row plus its follow-up query results into a codec.
///
/// The follow-up rows (`composite_fields`, `range_subtype`, `enum_labels`) are
/// supplied by the caller, which is expected to have already run the
/// appropriate `SELECT_*` query above based on `pg_type.typtype`.
pub fn build_codec(
    pg_type: &PgType,
    composite_fields: Option<Vec<(String, u32)>>,
    range_subtype: Option<u32>,
    enum_labels: Option<Vec<String>>,
) -> Result<TypeCodec> {
    match pg_type.typtype.as_str() {
        typtype::COMPOSITE => Ok(TypeCodec::Composite {
            fields: composite_fields
                .ok_or_else(|| Error::Decode("composite type missing field list".into()))?,
        }),
        typtype::DOMAIN => Ok(TypeCodec::Domain {
            base: pg_type.typbasetype,
        }),
        typtype::ENUM => Ok(TypeCodec::Enum {
            labels: enum_labels.ok_or_else(|| Error::Decode("enum type missing labels".into()))?,
        }),
        typtype::RANGE => Ok(TypeCodec::Range {
            elem: range_subtype
                .ok_or_else(|| Error::Decode("range type missing subtype".into()))?,
        }),
        typtype::BASE if pg_type.typelem != 0 => Ok(TypeCodec::Array {
            elem: pg_type.typelem,
        }),
        other => Err(Error::Unsupported(format!(
            "cannot introspect pg_type.typtype = {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_requires_field_list() {
        let pg_type = PgType {
            typtype: typtype::COMPOSITE.into(),
            typelem: 0,
            typbasetype: 0,
            typrelid: 12345,
        };
        assert!(build_codec(&pg_type, None, None, None).is_err());
    }

    #[test]
    fn domain_resolves_to_base_oid() {
        let pg_type = PgType {
            typtype: typtype::DOMAIN.into(),
            typelem: 0,
            typbasetype: 23,
            typrelid: 0,
        };
        let codec = build_codec(&pg_type, None, None, None).unwrap();
        assert!(matches!(codec, TypeCodec::Domain { base: 23 }));
    }

    #[test]
    fn enum_collects_labels_in_order() {
        let pg_type = PgType {
            typtype: typtype::ENUM.into(),
            typelem: 0,
            typbasetype: 0,
            typrelid: 0,
        };
        let labels = vec!["low".to_string(), "high".to_string()];
        let codec = build_codec(&pg_type, None, None, Some(labels.clone())).unwrap();
        match codec {
            TypeCodec::Enum { labels: got } => assert_eq!(got, labels),
            _ => panic!("expected enum codec"),
        }
    }
}
