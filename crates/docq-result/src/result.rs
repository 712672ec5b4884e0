use bson::{Bson, Document};

use docq_query::{QueryError, ValueConverter};

/// A lazily normalized, re-iterable sequence of result documents.
///
/// Raw documents are pulled from the source on first access per position,
/// normalized once and cached append-only. Re-iterating replays the cache
/// without touching the source again. `fetch` advances a cursor shared by
/// all fetch calls; `iter` keeps its own position.
pub struct ResultSet<C> {
    converter: C,
    source: Box<dyn Iterator<Item = Document>>,
    cache: Vec<Document>,
    cursor: usize,
}

impl<C: ValueConverter> ResultSet<C> {
    pub fn new(converter: C, source: impl Iterator<Item = Document> + 'static) -> Self {
        Self {
            converter,
            source: Box::new(source),
            cache: Vec::new(),
            cursor: 0,
        }
    }

    pub fn from_documents(converter: C, documents: Vec<Document>) -> Self {
        Self::new(converter, documents.into_iter())
    }

    /// Pull and normalize until position `index` is cached; false when the
    /// source ends first.
    fn ensure(&mut self, index: usize) -> bool {
        while self.cache.len() <= index {
            match self.source.next() {
                Some(raw) => {
                    let normalized = normalize_document(&self.converter, raw);
                    self.cache.push(normalized);
                }
                None => return false,
            }
        }
        true
    }

    /// The next document under the shared cursor.
    pub fn fetch(&mut self) -> Option<Document> {
        if !self.ensure(self.cursor) {
            return None;
        }
        let doc = self.cache[self.cursor].clone();
        self.cursor += 1;
        Some(doc)
    }

    /// The first field value of the next document.
    pub fn fetch_field(&mut self) -> Option<Bson> {
        self.fetch()
            .and_then(|doc| doc.into_iter().next().map(|(_, value)| value))
    }

    /// All documents, fully materialized.
    pub fn fetch_all(&mut self) -> &[Document] {
        let mut index = self.cache.len();
        while self.ensure(index) {
            index += 1;
        }
        &self.cache
    }

    /// Key/value projection over all documents.
    ///
    /// With only `value`, a list of that field; with only `key`, a map from
    /// the stringified key field to whole documents; with both, a map from
    /// key field to value field. Rows missing the requested field are
    /// skipped. At least one of the two must be given.
    pub fn fetch_pairs(
        &mut self,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Bson, QueryError> {
        if key.is_none() && value.is_none() {
            return Err(QueryError::MissingKeyOrValue);
        }

        self.fetch_all();

        match (key, value) {
            (None, Some(value)) => {
                let items = self
                    .cache
                    .iter()
                    .filter_map(|row| row.get(value).cloned())
                    .collect::<Vec<_>>();
                Ok(Bson::Array(items))
            }
            (Some(key), value) => {
                let mut out = Document::new();
                for row in &self.cache {
                    let Some(k) = row.get(key) else { continue };
                    let entry = match value {
                        Some(value) => match row.get(value) {
                            Some(v) => v.clone(),
                            None => continue,
                        },
                        None => Bson::Document(row.clone()),
                    };
                    out.insert(key_string(k), entry);
                }
                Ok(Bson::Document(out))
            }
            (None, None) => unreachable!(),
        }
    }

    /// Iterate from the start with an independent position.
    pub fn iter(&mut self) -> ResultIter<'_, C> {
        ResultIter { set: self, pos: 0 }
    }
}

pub struct ResultIter<'a, C> {
    set: &'a mut ResultSet<C>,
    pos: usize,
}

impl<C: ValueConverter> Iterator for ResultIter<'_, C> {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        if !self.set.ensure(self.pos) {
            return None;
        }
        let doc = self.set.cache[self.pos].clone();
        self.pos += 1;
        Some(doc)
    }
}

/// Normalize one raw document: merge a composite top-level `_id` upward
/// (its fields first, sibling fields win on collision, `_id` removed), then
/// convert wire wrapper scalars portable throughout the tree.
fn normalize_document<C: ValueConverter>(converter: &C, doc: Document) -> Document {
    let doc = match doc.get("_id") {
        Some(Bson::Document(id)) => {
            let mut merged = id.clone();
            for (key, value) in doc {
                if key != "_id" {
                    merged.insert(key, value);
                }
            }
            merged
        }
        _ => doc,
    };

    normalize_tree(converter, doc)
}

fn normalize_tree<C: ValueConverter>(converter: &C, doc: Document) -> Document {
    doc.into_iter()
        .map(|(key, value)| (key, normalize_value(converter, value)))
        .collect()
}

fn normalize_value<C: ValueConverter>(converter: &C, value: Bson) -> Bson {
    match value {
        Bson::Document(doc) => Bson::Document(normalize_tree(converter, doc)),
        Bson::Array(items) => Bson::Array(
            items
                .into_iter()
                .map(|item| normalize_value(converter, item))
                .collect(),
        ),
        other => converter.to_app(other),
    }
}

/// Document keys must be strings; scalars keep their plain text form.
fn key_string(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => n.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use bson::oid::ObjectId;
    use bson::{Bson, doc};
    use docq_query::{MongoConverter, PassthroughConverter};

    use super::*;

    fn counted_source(
        documents: Vec<Document>,
    ) -> (impl Iterator<Item = Document>, Rc<Cell<usize>>) {
        let pulls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&pulls);
        let iter = documents.into_iter().inspect(move |_| {
            counter.set(counter.get() + 1);
        });
        (iter, pulls)
    }

    #[test]
    fn fetch_advances_shared_cursor() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "n": 1 }, doc! { "n": 2 }],
        );

        assert_eq!(result.fetch(), Some(doc! { "n": 1 }));
        assert_eq!(result.fetch(), Some(doc! { "n": 2 }));
        assert_eq!(result.fetch(), None);
    }

    #[test]
    fn source_is_pulled_once_per_position() {
        let (source, pulls) = counted_source(vec![doc! { "n": 1 }, doc! { "n": 2 }]);
        let mut result = ResultSet::new(PassthroughConverter, source);

        assert!(result.fetch().is_some());
        assert_eq!(pulls.get(), 1);

        // replaying the cache pulls nothing further
        let replay = result.iter().collect::<Vec<_>>();
        assert_eq!(replay.len(), 2);
        assert_eq!(pulls.get(), 2);

        let again = result.iter().collect::<Vec<_>>();
        assert_eq!(again.len(), 2);
        assert_eq!(pulls.get(), 2);
    }

    #[test]
    fn iter_does_not_move_the_fetch_cursor() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "n": 1 }, doc! { "n": 2 }],
        );

        assert_eq!(result.iter().count(), 2);
        assert_eq!(result.fetch(), Some(doc! { "n": 1 }));
    }

    #[test]
    fn composite_id_merges_upward() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "_id": { "kind": "exam" }, "total": 5 }],
        );

        assert_eq!(result.fetch(), Some(doc! { "kind": "exam", "total": 5 }));
    }

    #[test]
    fn sibling_fields_win_over_id_fields() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "_id": { "total": 1 }, "total": 5 }],
        );

        assert_eq!(result.fetch(), Some(doc! { "total": 5 }));
    }

    #[test]
    fn scalar_id_is_left_in_place() {
        let mut result =
            ResultSet::from_documents(PassthroughConverter, vec![doc! { "_id": 7, "n": 1 }]);

        assert_eq!(result.fetch(), Some(doc! { "_id": 7, "n": 1 }));
    }

    #[test]
    fn wire_scalars_convert_portable() {
        let oid = ObjectId::new();
        let mut result = ResultSet::from_documents(
            MongoConverter,
            vec![doc! { "_id": oid, "nested": { "ref": oid }, "refs": [oid] }],
        );

        let row = result.fetch().unwrap();
        assert_eq!(row.get("_id"), Some(&Bson::String(oid.to_hex())));
        assert_eq!(
            row.get("nested"),
            Some(&Bson::Document(doc! { "ref": oid.to_hex() }))
        );
        assert_eq!(
            row.get("refs"),
            Some(&Bson::Array(vec![Bson::String(oid.to_hex())]))
        );
    }

    #[test]
    fn fetch_field_returns_first_value() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "count": 9, "other": 1 }],
        );

        assert_eq!(result.fetch_field(), Some(Bson::Int32(9)));
        assert_eq!(result.fetch_field(), None);
    }

    #[test]
    fn fetch_pairs_value_only_lists_the_field() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "a": 1, "b": "x" }, doc! { "a": 2, "b": "y" }],
        );

        let pairs = result.fetch_pairs(None, Some("b")).unwrap();
        assert_eq!(pairs, Bson::Array(vec!["x".into(), "y".into()]));
    }

    #[test]
    fn fetch_pairs_key_only_maps_to_rows() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "id": 1, "name": "a" }, doc! { "id": 2, "name": "b" }],
        );

        let pairs = result.fetch_pairs(Some("id"), None).unwrap();
        assert_eq!(
            pairs,
            Bson::Document(doc! {
                "1": { "id": 1, "name": "a" },
                "2": { "id": 2, "name": "b" },
            })
        );
    }

    #[test]
    fn fetch_pairs_key_and_value() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "id": 1, "name": "a" }, doc! { "id": 2, "name": "b" }],
        );

        let pairs = result.fetch_pairs(Some("id"), Some("name")).unwrap();
        assert_eq!(pairs, Bson::Document(doc! { "1": "a", "2": "b" }));
    }

    #[test]
    fn fetch_pairs_requires_key_or_value() {
        let mut result = ResultSet::from_documents(PassthroughConverter, vec![doc! { "a": 1 }]);

        let err = result.fetch_pairs(None, None).unwrap_err();
        assert!(matches!(err, QueryError::MissingKeyOrValue));
    }

    #[test]
    fn fetch_pairs_skips_rows_missing_the_field() {
        let mut result = ResultSet::from_documents(
            PassthroughConverter,
            vec![doc! { "id": 1, "name": "a" }, doc! { "name": "b" }],
        );

        let pairs = result.fetch_pairs(Some("id"), Some("name")).unwrap();
        assert_eq!(pairs, Bson::Document(doc! { "1": "a" }));
    }
}
