use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed condition/update key, or a field name starting with the
    /// reserved command prefix.
    InvalidExpression(String),
    /// Operator present with neither an inline literal nor a supplied parameter.
    MissingValue(String),
    /// Condition lists nested more than one extra level deep.
    TooDeepConditions,
    /// `fetch_pairs` called without a key or value field.
    MissingKeyOrValue,
    /// Order token that is not `"field ASC"` / `"field DESC"`.
    InvalidOrder(String),
    /// Wire conversion failure (bad object id, unparsable date string, ...).
    Convert(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::InvalidExpression(msg) => write!(f, "invalid expression: {msg}"),
            QueryError::MissingValue(item) => write!(f, "missing value for item '{item}'"),
            QueryError::TooDeepConditions => write!(f, "too deep sets of conditions"),
            QueryError::MissingKeyOrValue => {
                write!(f, "fetch_pairs requires a defined key or value")
            }
            QueryError::InvalidOrder(item) => write!(f, "invalid order parameter: {item}"),
            QueryError::Convert(msg) => write!(f, "conversion error: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {}
