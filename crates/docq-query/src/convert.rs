use bson::spec::BinarySubtype;
use bson::{Bson, oid::ObjectId};

use crate::error::QueryError;

/// Wire types whose construction is deferred to the driver-specific converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    ObjectId,
    DateTime,
    Timestamp,
    Binary,
    Regex,
}

/// Converts between portable values and a store's wire representation.
///
/// Injected into [`QueryProcessor`](crate::QueryProcessor) and the result
/// pipeline so the compiler core stays free of any concrete store binding —
/// a different wire format (or a test double) is a different impl, not a
/// subclass.
pub trait ValueConverter {
    /// Convert a portable value into the wire representation for `ty`.
    ///
    /// Combinations the converter does not understand pass through unchanged.
    fn to_wire(&self, ty: WireType, value: Bson) -> Result<Bson, QueryError>;

    /// Convert a wire value back into a portable one. Values that are
    /// already portable pass through unchanged.
    fn to_app(&self, value: Bson) -> Bson;
}

/// BSON/MongoDB wire converter.
///
/// Regex input uses the `/pattern/options` form produced by LIKE
/// translation; a bare string is taken as a pattern with no options.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConverter;

impl ValueConverter for MongoConverter {
    fn to_wire(&self, ty: WireType, value: Bson) -> Result<Bson, QueryError> {
        match (ty, value) {
            (WireType::ObjectId, Bson::String(s)) => ObjectId::parse_str(&s)
                .map(Bson::ObjectId)
                .map_err(|e| QueryError::Convert(format!("invalid object id '{s}': {e}"))),
            (WireType::ObjectId, v @ Bson::ObjectId(_)) => Ok(v),

            (WireType::DateTime, v) => epoch_seconds(&v)
                .map(|secs| Bson::DateTime(bson::DateTime::from_millis(secs * 1000)))
                .ok_or_else(|| QueryError::Convert(format!("invalid datetime input: {v}"))),

            (WireType::Timestamp, v) => epoch_seconds(&v)
                .map(|secs| {
                    Bson::Timestamp(bson::Timestamp {
                        time: secs as u32,
                        increment: 0,
                    })
                })
                .ok_or_else(|| QueryError::Convert(format!("invalid timestamp input: {v}"))),

            (WireType::Regex, Bson::String(s)) => {
                let (pattern, options) = split_pattern(&s);
                Ok(Bson::RegularExpression(bson::Regex {
                    pattern: cstring(pattern)?,
                    options: cstring(options)?,
                }))
            }
            (WireType::Regex, v @ Bson::RegularExpression(_)) => Ok(v),

            (WireType::Binary, Bson::String(s)) => Ok(Bson::Binary(bson::Binary {
                subtype: BinarySubtype::Generic,
                bytes: s.into_bytes(),
            })),
            (WireType::Binary, v @ Bson::Binary(_)) => Ok(v),

            // unknown combination: pass through
            (_, v) => Ok(v),
        }
    }

    fn to_app(&self, value: Bson) -> Bson {
        match value {
            Bson::ObjectId(oid) => Bson::String(oid.to_hex()),
            Bson::Timestamp(ts) => {
                Bson::DateTime(bson::DateTime::from_millis(i64::from(ts.time) * 1000))
            }
            Bson::RegularExpression(re) => Bson::String(format!(
                "/{}/{}",
                re.pattern.as_str(),
                re.options.as_str()
            )),
            Bson::Binary(bin) => Bson::String(String::from_utf8_lossy(&bin.bytes).into_owned()),
            other => other,
        }
    }
}

/// Identity converter; keeps compiled documents free of any wire types.
/// Useful in tests and for targets that accept portable values directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl ValueConverter for PassthroughConverter {
    fn to_wire(&self, _ty: WireType, value: Bson) -> Result<Bson, QueryError> {
        Ok(value)
    }

    fn to_app(&self, value: Bson) -> Bson {
        value
    }
}

/// Epoch seconds from the value forms the coercion layer hands over.
fn epoch_seconds(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        Bson::String(s) => s.trim().parse::<i64>().ok(),
        Bson::DateTime(dt) => Some(dt.timestamp_millis() / 1000),
        _ => None,
    }
}

/// Regex components ride in raw C strings; an interior NUL cannot be encoded.
fn cstring(s: &str) -> Result<bson::raw::CString, QueryError> {
    bson::raw::CString::try_from(s.to_string())
        .map_err(|e| QueryError::Convert(format!("invalid regex component '{s}': {e}")))
}

/// Split a `/pattern/options` string; anything else is a bare pattern.
fn split_pattern(s: &str) -> (&str, &str) {
    if let Some(rest) = s.strip_prefix('/') {
        if let Some(idx) = rest.rfind('/') {
            return (&rest[..idx], &rest[idx + 1..]);
        }
    }
    (s, "")
}
