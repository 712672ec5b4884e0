use std::sync::Arc;

use bson::{Bson, Document};

use docq_query::{
    Condition, PassthroughConverter, QueryBuilder, QueryProcessor, SelectQuery, ValueConverter,
};
use docq_result::ResultSet;

use crate::adapter::{QueryAdapter, UpdateOutcome};
use crate::error::SelectionError;

/// A filtered view of one collection.
///
/// Accumulates query state through the fluent setters and executes lazily:
/// the first fetch materializes a snapshot, later fetches replay it. The
/// snapshot remembers the builder generation it was taken at, so any
/// setter call makes the next fetch re-execute.
pub struct Selection<A, C> {
    adapter: Arc<A>,
    processor: QueryProcessor<C>,
    builder: QueryBuilder,
    name: String,
    primary_key: String,
    primary_modifier: String,
    snapshot: Option<Snapshot>,
}

struct Snapshot {
    documents: Vec<Document>,
    generation: u64,
    cursor: usize,
}

impl<A, C: Clone> Clone for Selection<A, C> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            processor: self.processor.clone(),
            builder: self.builder.clone(),
            name: self.name.clone(),
            primary_key: self.primary_key.clone(),
            primary_modifier: self.primary_modifier.clone(),
            snapshot: None,
        }
    }
}

impl<A, C> Selection<A, C>
where
    A: QueryAdapter,
    C: ValueConverter + Clone,
{
    pub fn new(adapter: Arc<A>, processor: QueryProcessor<C>, name: impl Into<String>) -> Self {
        let name = name.into();
        let builder = QueryBuilder::with_cmd(&name, processor.cmd());
        Self {
            adapter,
            processor,
            builder,
            name,
            primary_key: "_id".to_string(),
            primary_modifier: "%oid".to_string(),
            snapshot: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary(&self) -> &str {
        &self.primary_key
    }

    pub fn set_primary(&mut self, key: impl Into<String>, modifier: Option<&str>) {
        self.primary_key = key.into();
        if let Some(modifier) = modifier {
            self.primary_modifier = modifier.to_string();
        }
    }

    pub fn query_builder(&self) -> &QueryBuilder {
        &self.builder
    }

    // ---- fluent query state ----

    /// Add a condition; repeated calls combine with AND.
    pub fn filter(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.builder.add_where(condition);
        self
    }

    /// Condition on the primary key, coerced through the primary modifier.
    pub fn filter_primary(&mut self, key: impl Into<Bson>) -> &mut Self {
        let condition = format!("{} = {}", self.primary_key, self.primary_modifier);
        self.filter((condition, key.into()))
    }

    /// Add a projection item; repeated calls append.
    pub fn select(&mut self, item: &str) -> &mut Self {
        self.builder.add_select(item);
        self
    }

    /// Add an order token such as `"name ASC"`; repeated calls append.
    pub fn order(&mut self, item: &str) -> Result<&mut Self, SelectionError> {
        self.builder.add_order(item)?;
        Ok(self)
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.builder.limit(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.builder.offset(offset);
        self
    }

    /// Set the grouping keys; repeated calls rewrite.
    pub fn group<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.builder.group(keys);
        self
    }

    /// Add a post-grouping condition; repeated calls append.
    pub fn having(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.builder.add_having(condition);
        self
    }

    // ---- fetching ----

    /// The next document of the materialized result.
    pub fn fetch(&mut self) -> Result<Option<Document>, SelectionError> {
        self.execute()?;
        let Some(snapshot) = self.snapshot.as_mut() else {
            return Ok(None);
        };
        let doc = snapshot.documents.get(snapshot.cursor).cloned();
        if doc.is_some() {
            snapshot.cursor += 1;
        }
        Ok(doc)
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Document>, SelectionError> {
        self.execute()?;
        Ok(self
            .snapshot
            .as_ref()
            .map(|s| s.documents.clone())
            .unwrap_or_default())
    }

    /// Key/value projection; see [`ResultSet::fetch_pairs`].
    pub fn fetch_pairs(
        &mut self,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Bson, SelectionError> {
        let documents = self.fetch_all()?;
        let mut result = ResultSet::from_documents(PassthroughConverter, documents);
        Ok(result.fetch_pairs(key, value)?)
    }

    /// Document specified by primary key, fetched through a clone so the
    /// selection's own state stays untouched.
    pub fn get(&self, key: impl Into<Bson>) -> Result<Option<Document>, SelectionError> {
        let mut clone = self.clone();
        clone.filter_primary(key);
        clone.fetch()
    }

    // ---- aggregation ----

    /// Number of matching documents, or with a column given the sum of
    /// that column over them. Counts the snapshot when one is current,
    /// otherwise asks the adapter.
    pub fn count(&self, column: Option<&str>) -> Result<i64, SelectionError> {
        if let Some(column) = column {
            let total = self.sum(column)?;
            return Ok(total.as_ref().and_then(numeric_i64).unwrap_or(0));
        }

        if let Some(snapshot) = &self.snapshot {
            if snapshot.generation == self.builder.generation() {
                return Ok(snapshot.documents.len() as i64);
            }
        }

        let criteria = self.processor.process_condition(self.builder.conditions())?;
        let count = self.adapter.count(&self.name, &criteria)?;
        tracing::debug!(collection = %self.name, count, "count");
        Ok(count)
    }

    /// Run one aggregation function over the current criteria through a
    /// derived selection that imports only the conditions.
    pub fn aggregate(&self, func: &str, item: &str) -> Result<Option<Bson>, SelectionError> {
        let mut derived = Selection::new(
            Arc::clone(&self.adapter),
            self.processor.clone(),
            self.name.clone(),
        );
        derived.builder.import_conditions(&self.builder);
        derived.select(&format!("{func}({item}) AS _gres"));

        let row = derived.fetch()?;
        Ok(row.and_then(|mut doc| doc.remove("_gres")))
    }

    pub fn sum(&self, item: &str) -> Result<Option<Bson>, SelectionError> {
        self.aggregate("sum", item)
    }

    pub fn min(&self, item: &str) -> Result<Option<Bson>, SelectionError> {
        self.aggregate("min", item)
    }

    pub fn max(&self, item: &str) -> Result<Option<Bson>, SelectionError> {
        self.aggregate("max", item)
    }

    // ---- writes ----

    /// Insert one document; dotted keys expand into nested documents.
    /// Returns the stored document, normalized.
    pub fn insert(&mut self, data: &Document) -> Result<Document, SelectionError> {
        let wdata = self.processor.process_data(data, true)?;
        let inserted = self.adapter.insert(&self.name, &wdata)?;
        tracing::debug!(collection = %self.name, "insert");

        self.snapshot = None;
        Ok(self.normalize_one(inserted))
    }

    /// Update the documents matching the current criteria.
    pub fn update(
        &mut self,
        data: &Document,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateOutcome, SelectionError> {
        let wdata = self.processor.process_update(data)?;
        let criteria = self.processor.process_condition(self.builder.conditions())?;

        let outcome = self
            .adapter
            .update(&self.name, &wdata, &criteria, upsert, multi)?;

        self.snapshot = None;

        match outcome {
            UpdateOutcome::Modified(n) => {
                tracing::debug!(collection = %self.name, modified = n, "update");
                Ok(UpdateOutcome::Modified(n))
            }
            UpdateOutcome::Upserted(mut doc) => {
                // a pure $set update tells us the upserted document's fields
                let set_key = self.processor.format_cmd("set");
                if wdata.len() == 1 {
                    if let Some(Bson::Document(set)) = wdata.get(&set_key) {
                        for (key, value) in set {
                            doc.insert(key.clone(), value.clone());
                        }
                    }
                }
                tracing::debug!(collection = %self.name, "upsert");
                Ok(UpdateOutcome::Upserted(self.normalize_one(doc)))
            }
        }
    }

    /// Delete the documents matching the current criteria; returns the
    /// number removed.
    pub fn delete(&mut self, multi: bool) -> Result<i64, SelectionError> {
        let criteria = self.processor.process_condition(self.builder.conditions())?;
        let deleted = self.adapter.delete(&self.name, &criteria, multi)?;
        tracing::debug!(collection = %self.name, deleted, "delete");

        self.snapshot = None;
        Ok(deleted)
    }

    // ---- internals ----

    fn execute(&mut self) -> Result<(), SelectionError> {
        let generation = self.builder.generation();
        if self
            .snapshot
            .as_ref()
            .is_some_and(|s| s.generation == generation)
        {
            return Ok(());
        }

        let raw = if let Some(field) = self.builder.distinct_field() {
            let criteria = self.processor.process_condition(self.builder.conditions())?;
            let values = self.adapter.distinct(&self.name, field, &criteria)?;
            tracing::debug!(collection = %self.name, field, matched = values.len(), "distinct");
            values
                .into_iter()
                .map(|value| {
                    let mut doc = Document::new();
                    doc.insert(field.to_string(), value);
                    doc
                })
                .collect()
        } else {
            match self.builder.build_select_query(&self.processor)? {
                SelectQuery::Plain {
                    projection,
                    criteria,
                    options,
                } => {
                    let raw = self
                        .adapter
                        .find(&self.name, &projection, &criteria, &options)?;
                    tracing::debug!(collection = %self.name, matched = raw.len(), "find");
                    raw
                }
                SelectQuery::Pipeline(pipeline) => {
                    let raw = self.adapter.aggregate(&self.name, &pipeline)?;
                    tracing::debug!(collection = %self.name, matched = raw.len(), "aggregate");
                    raw
                }
            }
        };

        let mut result = ResultSet::new(self.processor.converter().clone(), raw.into_iter());
        let documents = result.fetch_all().to_vec();

        self.snapshot = Some(Snapshot {
            documents,
            generation,
            cursor: 0,
        });
        Ok(())
    }

    fn normalize_one(&self, doc: Document) -> Document {
        let mut result =
            ResultSet::from_documents(self.processor.converter().clone(), vec![doc]);
        result.fetch().unwrap_or_default()
    }
}

fn numeric_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        _ => None,
    }
}
