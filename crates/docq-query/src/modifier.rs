use serde::{Deserialize, Serialize};

use crate::convert::WireType;

/// Type modifier attached to a condition/update value, e.g. the `%i` in
/// `"age > %i"`. Drives coercion into the store's wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    /// `%any` — stringify scalars, apply elementwise to arrays.
    Any,
    /// `%s` — string.
    Str,
    /// `%i` — integer.
    Int,
    /// `%f` — float.
    Float,
    /// `%b` — boolean; strings recognize only the literals `TRUE`/`FALSE`.
    Bool,
    /// `%oid` — store object id.
    ObjectId,
    /// `%dt` — store datetime.
    DateTime,
    /// `%ts` — store timestamp.
    Timestamp,
    /// `%bin` — store binary.
    Binary,
    /// `%re` — store regular expression.
    Regex,
    /// `%<mod>[]` — elementwise application to every array member.
    Array(Box<Modifier>),
    /// Unrecognized tag; coercion passes the value through unchanged.
    Other(String),
}

impl Modifier {
    /// Parse a modifier token (without the leading `%`).
    pub fn parse(token: &str) -> Modifier {
        if let Some(inner) = token.strip_suffix("[]") {
            return Modifier::Array(Box::new(Modifier::parse(inner)));
        }
        match token {
            "any" => Modifier::Any,
            "s" => Modifier::Str,
            "i" => Modifier::Int,
            "f" => Modifier::Float,
            "b" => Modifier::Bool,
            "oid" => Modifier::ObjectId,
            "dt" => Modifier::DateTime,
            "ts" => Modifier::Timestamp,
            "bin" => Modifier::Binary,
            "re" => Modifier::Regex,
            other => Modifier::Other(other.to_string()),
        }
    }

    /// The wire type this modifier delegates to the driver converter, if any.
    pub(crate) fn wire_type(&self) -> Option<WireType> {
        match self {
            Modifier::ObjectId => Some(WireType::ObjectId),
            Modifier::DateTime => Some(WireType::DateTime),
            Modifier::Timestamp => Some(WireType::Timestamp),
            Modifier::Binary => Some(WireType::Binary),
            Modifier::Regex => Some(WireType::Regex),
            _ => None,
        }
    }
}

/// Collapse doubled escape markers and report whether a marker is live.
///
/// An odd marker count means the marker is active (a real modifier or
/// exclusion follows); an even count means literal text with every doubled
/// occurrence unescaped:
/// `%%test%%` → `(false, "%test%")`, `%test` → `(true, "%test")`,
/// `%%%test` → `(true, "%%test")`.
pub(crate) fn unescape_marker(value: &str, marker: char) -> (bool, String) {
    let count = value.matches(marker).count();
    if count == 0 {
        return (false, value.to_string());
    }

    let unescaped = if count > 1 {
        let doubled: String = [marker, marker].iter().collect();
        value.replace(&doubled, &marker.to_string())
    } else {
        value.to_string()
    };

    (count % 2 == 1, unescaped)
}
