use bson::Bson;

use crate::convert::{ValueConverter, WireType};
use crate::error::QueryError;
use crate::modifier::Modifier;
use crate::processor::QueryProcessor;

impl<C: ValueConverter> QueryProcessor<C> {
    /// Coerce `value` into the wire form requested by `modifier`.
    ///
    /// Dispatch is a single match over (value category × modifier). Pairs
    /// with no matching branch return the value unchanged — a permissive
    /// fallback, not an error.
    pub fn coerce(&self, modifier: &Modifier, value: Bson) -> Result<Bson, QueryError> {
        match value {
            Bson::String(s) => self.coerce_string(modifier, s),
            v @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_)) => {
                self.coerce_scalar(modifier, v)
            }
            Bson::Null => Ok(Bson::Null),
            Bson::Array(items) => self.coerce_array(modifier, items),
            composite => self.coerce_composite(modifier, composite),
        }
    }

    fn coerce_string(&self, modifier: &Modifier, s: String) -> Result<Bson, QueryError> {
        match modifier {
            Modifier::Any | Modifier::Str => Ok(Bson::String(s)),
            Modifier::Int => Ok(Bson::Int64(parse_i64(&s))),
            Modifier::Float => Ok(Bson::Double(parse_f64(&s))),
            // only the literal tokens flip cleanly; anything else is truthiness
            Modifier::Bool => Ok(Bson::Boolean(match s.as_str() {
                "TRUE" => true,
                "FALSE" => false,
                other => !other.is_empty() && other != "0",
            })),
            Modifier::ObjectId => self.converter.to_wire(WireType::ObjectId, Bson::String(s)),
            Modifier::Regex => self.converter.to_wire(WireType::Regex, Bson::String(s)),
            Modifier::Binary => self.converter.to_wire(WireType::Binary, Bson::String(s)),
            Modifier::DateTime => {
                let secs = epoch_from_text(&s)?;
                self.converter.to_wire(WireType::DateTime, Bson::Int64(secs))
            }
            Modifier::Timestamp => {
                let secs = epoch_from_text(&s)?;
                self.converter
                    .to_wire(WireType::Timestamp, Bson::Int64(secs))
            }
            Modifier::Array(_) | Modifier::Other(_) => Ok(Bson::String(s)),
        }
    }

    fn coerce_scalar(&self, modifier: &Modifier, value: Bson) -> Result<Bson, QueryError> {
        match modifier {
            Modifier::Any | Modifier::Str => Ok(Bson::String(scalar_to_string(&value))),
            Modifier::Int => Ok(Bson::Int64(scalar_to_i64(&value))),
            Modifier::Float => Ok(Bson::Double(scalar_to_f64(&value))),
            Modifier::Bool => Ok(Bson::Boolean(scalar_to_f64(&value) != 0.0)),
            Modifier::ObjectId => self
                .converter
                .to_wire(WireType::ObjectId, Bson::String(scalar_to_string(&value))),
            Modifier::DateTime if !matches!(value, Bson::Boolean(_)) => self
                .converter
                .to_wire(WireType::DateTime, Bson::Int64(scalar_to_i64(&value))),
            Modifier::Timestamp if !matches!(value, Bson::Boolean(_)) => self
                .converter
                .to_wire(WireType::Timestamp, Bson::Int64(scalar_to_i64(&value))),
            _ => Ok(value),
        }
    }

    fn coerce_array(&self, modifier: &Modifier, items: Vec<Bson>) -> Result<Bson, QueryError> {
        let inner = match modifier {
            Modifier::Array(inner) => inner.as_ref().clone(),
            Modifier::Any => Modifier::Any,
            _ => return Ok(Bson::Array(items)),
        };

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.coerce(&inner, item)?);
        }
        Ok(Bson::Array(out))
    }

    fn coerce_composite(&self, modifier: &Modifier, value: Bson) -> Result<Bson, QueryError> {
        // date-like wire values: epoch-based casts come first
        if let Some(secs) = composite_epoch(&value) {
            match modifier {
                Modifier::DateTime => {
                    return self.converter.to_wire(WireType::DateTime, Bson::Int64(secs));
                }
                Modifier::Timestamp => {
                    return self
                        .converter
                        .to_wire(WireType::Timestamp, Bson::Int64(secs));
                }
                Modifier::Any | Modifier::Str => return Ok(Bson::String(format_epoch(secs)?)),
                Modifier::Int => return Ok(Bson::Int64(secs)),
                Modifier::Float => return Ok(Bson::Double(secs as f64)),
                _ => {}
            }
        }

        // the driver converter gets first shot at wire-typed modifiers
        if let Some(wire) = modifier.wire_type() {
            return self.converter.to_wire(wire, value);
        }

        // values with a natural string form cast through it
        if let Some(s) = composite_string(&value) {
            return Ok(match modifier {
                Modifier::Any | Modifier::Str => Bson::String(s),
                Modifier::Int => Bson::Int64(parse_i64(&s)),
                Modifier::Float => Bson::Double(parse_f64(&s)),
                Modifier::Bool => Bson::Boolean(!s.is_empty() && s != "0"),
                _ => value,
            });
        }

        Ok(value)
    }
}

fn scalar_to_string(value: &Bson) -> String {
    match value {
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => n.to_string(),
        Bson::Boolean(b) => b.to_string(),
        _ => String::new(),
    }
}

fn scalar_to_i64(value: &Bson) -> i64 {
    match value {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(n) => *n as i64,
        Bson::Boolean(b) => i64::from(*b),
        _ => 0,
    }
}

fn scalar_to_f64(value: &Bson) -> f64 {
    match value {
        Bson::Int32(n) => f64::from(*n),
        Bson::Int64(n) => *n as f64,
        Bson::Double(n) => *n,
        Bson::Boolean(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

fn parse_i64(s: &str) -> i64 {
    let t = s.trim();
    t.parse::<i64>()
        .or_else(|_| t.parse::<f64>().map(|f| f as i64))
        .unwrap_or(0)
}

fn parse_f64(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(0.0)
}

/// Epoch seconds of date-like wire values.
fn composite_epoch(value: &Bson) -> Option<i64> {
    match value {
        Bson::DateTime(dt) => Some(dt.timestamp_millis() / 1000),
        Bson::Timestamp(ts) => Some(i64::from(ts.time)),
        _ => None,
    }
}

/// The natural string form of a composite value, if it has one.
fn composite_string(value: &Bson) -> Option<String> {
    match value {
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::Binary(bin) => Some(String::from_utf8_lossy(&bin.bytes).into_owned()),
        Bson::RegularExpression(re) => Some(format!(
            "/{}/{}",
            re.pattern.as_str(),
            re.options.as_str()
        )),
        _ => None,
    }
}

/// Epoch seconds from a numeric or free-form date string.
fn epoch_from_text(s: &str) -> Result<i64, QueryError> {
    let t = s.trim();
    if let Ok(secs) = t.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(f) = t.parse::<f64>() {
        return Ok(f as i64);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(t) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp());
    }
    Err(QueryError::Convert(format!("unparsable date string: {s}")))
}

fn format_epoch(secs: i64) -> Result<String, QueryError> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .ok_or_else(|| QueryError::Convert(format!("epoch out of range: {secs}")))
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;

    use super::*;
    use crate::convert::MongoConverter;

    fn coerce(modifier: Modifier, value: impl Into<Bson>) -> Bson {
        QueryProcessor::new(MongoConverter)
            .coerce(&modifier, value.into())
            .unwrap()
    }

    #[test]
    fn int_from_string() {
        assert_eq!(coerce(Modifier::Int, "27"), Bson::Int64(27));
        assert_eq!(coerce(Modifier::Int, "2.9"), Bson::Int64(2));
        assert_eq!(coerce(Modifier::Int, "junk"), Bson::Int64(0));
    }

    #[test]
    fn int_from_scalars() {
        assert_eq!(coerce(Modifier::Int, 27_i32), Bson::Int64(27));
        assert_eq!(coerce(Modifier::Int, 2.9_f64), Bson::Int64(2));
        assert_eq!(coerce(Modifier::Int, true), Bson::Int64(1));
    }

    #[test]
    fn float_casts() {
        assert_eq!(coerce(Modifier::Float, "1.5"), Bson::Double(1.5));
        assert_eq!(coerce(Modifier::Float, 2_i32), Bson::Double(2.0));
    }

    #[test]
    fn string_casts() {
        assert_eq!(coerce(Modifier::Str, 27_i32), Bson::String("27".into()));
        assert_eq!(coerce(Modifier::Any, true), Bson::String("true".into()));
    }

    #[test]
    fn bool_from_literal_tokens() {
        assert_eq!(coerce(Modifier::Bool, "TRUE"), Bson::Boolean(true));
        assert_eq!(coerce(Modifier::Bool, "FALSE"), Bson::Boolean(false));
        // non-literal strings coerce by truthiness
        assert_eq!(coerce(Modifier::Bool, "yes"), Bson::Boolean(true));
        assert_eq!(coerce(Modifier::Bool, "0"), Bson::Boolean(false));
        assert_eq!(coerce(Modifier::Bool, 0_i32), Bson::Boolean(false));
        assert_eq!(coerce(Modifier::Bool, 2_i32), Bson::Boolean(true));
    }

    #[test]
    fn null_stays_null() {
        assert_eq!(coerce(Modifier::Int, Bson::Null), Bson::Null);
    }

    #[test]
    fn oid_delegates_to_converter() {
        let hex = "507f1f77bcf86cd799439011";
        match coerce(Modifier::ObjectId, hex) {
            Bson::ObjectId(oid) => assert_eq!(oid.to_hex(), hex),
            other => panic!("expected ObjectId, got {other:?}"),
        }
    }

    #[test]
    fn datetime_from_epoch_and_text() {
        let expected = Bson::DateTime(bson::DateTime::from_millis(1_400_000_000_000));
        assert_eq!(coerce(Modifier::DateTime, 1_400_000_000_i64), expected);
        assert_eq!(coerce(Modifier::DateTime, "1400000000"), expected);

        match coerce(Modifier::DateTime, "2014-05-13 16:53:20") {
            Bson::DateTime(dt) => assert_eq!(dt.timestamp_millis(), 1_400_000_000_000),
            other => panic!("expected DateTime, got {other:?}"),
        }
    }

    #[test]
    fn datetime_rejects_garbage_text() {
        let err = QueryProcessor::new(MongoConverter)
            .coerce(&Modifier::DateTime, Bson::String("not a date".into()))
            .unwrap_err();
        assert!(matches!(err, QueryError::Convert(_)));
    }

    #[test]
    fn timestamp_from_native_datetime() {
        let dt = Bson::DateTime(bson::DateTime::from_millis(1_400_000_000_000));
        match coerce(Modifier::Timestamp, dt) {
            Bson::Timestamp(ts) => assert_eq!(ts.time, 1_400_000_000),
            other => panic!("expected Timestamp, got {other:?}"),
        }
    }

    #[test]
    fn native_datetime_casts() {
        let dt = Bson::DateTime(bson::DateTime::from_millis(1_400_000_000_000));
        assert_eq!(
            coerce(Modifier::Str, dt.clone()),
            Bson::String("2014-05-13 16:53:20".into())
        );
        assert_eq!(coerce(Modifier::Int, dt), Bson::Int64(1_400_000_000));
    }

    #[test]
    fn elementwise_array_modifier() {
        let value = Bson::Array(vec!["1".into(), 2_i32.into(), 2.3.into()]);
        assert_eq!(
            coerce(Modifier::Array(Box::new(Modifier::Int)), value),
            Bson::Array(vec![1_i64.into(), 2_i64.into(), 2_i64.into()])
        );
    }

    #[test]
    fn oid_string_fallback_cast() {
        let oid = ObjectId::new();
        assert_eq!(
            coerce(Modifier::Str, Bson::ObjectId(oid)),
            Bson::String(oid.to_hex())
        );
    }

    #[test]
    fn unmatched_pair_passes_through() {
        // regex modifier on a number has no branch; value survives untouched
        assert_eq!(coerce(Modifier::Regex, 5_i32), Bson::Int32(5));
        // unknown modifier tag likewise
        assert_eq!(
            coerce(Modifier::Other("xyz".into()), "raw"),
            Bson::String("raw".into())
        );
        // array without an array modifier stays as-is
        let value = Bson::Array(vec![1.into(), 2.into()]);
        assert_eq!(coerce(Modifier::Int, value.clone()), value);
    }
}
