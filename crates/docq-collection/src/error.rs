use std::fmt;

use crate::adapter::AdapterError;

#[derive(Debug)]
pub enum SelectionError {
    Query(docq_query::QueryError),
    Adapter(AdapterError),
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::Query(e) => write!(f, "query error: {e}"),
            SelectionError::Adapter(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SelectionError {}

impl From<docq_query::QueryError> for SelectionError {
    fn from(e: docq_query::QueryError) -> Self {
        SelectionError::Query(e)
    }
}

impl From<AdapterError> for SelectionError {
    fn from(e: AdapterError) -> Self {
        SelectionError::Adapter(e)
    }
}
