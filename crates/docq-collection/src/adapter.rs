use std::fmt;

use bson::{Bson, Document};
use docq_query::QueryOptions;

/// Transport failure reported by a [`QueryAdapter`].
#[derive(Debug)]
pub struct AdapterError {
    message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter error: {}", self.message)
    }
}

impl std::error::Error for AdapterError {}

/// Outcome of an update: the number of modified documents, or the document
/// created by an upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Modified(i64),
    Upserted(Document),
}

/// The transport boundary. Receives fully compiled documents and returns
/// raw result documents; all translation happens above this trait.
pub trait QueryAdapter {
    fn find(
        &self,
        collection: &str,
        projection: &Document,
        criteria: &Document,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, AdapterError>;

    fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Document],
    ) -> Result<Vec<Document>, AdapterError>;

    fn distinct(
        &self,
        collection: &str,
        field: &str,
        criteria: &Document,
    ) -> Result<Vec<Bson>, AdapterError>;

    fn count(&self, collection: &str, criteria: &Document) -> Result<i64, AdapterError>;

    fn insert(&self, collection: &str, document: &Document) -> Result<Document, AdapterError>;

    fn update(
        &self,
        collection: &str,
        update: &Document,
        criteria: &Document,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateOutcome, AdapterError>;

    fn delete(
        &self,
        collection: &str,
        criteria: &Document,
        multi: bool,
    ) -> Result<i64, AdapterError>;
}
