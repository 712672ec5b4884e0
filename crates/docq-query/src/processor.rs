use bson::{Bson, Document};

use crate::convert::ValueConverter;
use crate::error::QueryError;
use crate::modifier::{Modifier, unescape_marker};

/// Compiles declarative select/order/condition/update inputs into the
/// store's native command-prefixed documents.
///
/// Pure and stateless apart from its configuration: the command prefix
/// (default `$`) and the injected wire converter. Every compile call
/// receives fresh output.
#[derive(Debug, Clone)]
pub struct QueryProcessor<C> {
    pub(crate) cmd: char,
    pub(crate) converter: C,
}

impl<C: ValueConverter> QueryProcessor<C> {
    pub fn new(converter: C) -> Self {
        Self::with_cmd(converter, '$')
    }

    pub fn with_cmd(converter: C, cmd: char) -> Self {
        Self { cmd, converter }
    }

    pub fn cmd(&self) -> char {
        self.cmd
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    /// Prefix a directive name with the command marker: `and` → `$and`.
    pub fn format_cmd(&self, cmd: &str) -> String {
        let mut out = String::with_capacity(cmd.len() + 1);
        out.push(self.cmd);
        out.push_str(cmd);
        out
    }

    /// Projection items to an inclusion/exclusion map:
    /// `["id", "!name"]` → `{id: true, name: false}`.
    ///
    /// A doubled `!!` escapes a literal leading exclamation mark.
    pub fn process_select(&self, items: &[String]) -> Document {
        let mut select = Document::new();

        for item in items {
            let (active, item) = unescape_marker(item, '!');
            match item.strip_prefix('!') {
                Some(field) if active => {
                    select.insert(field.to_string(), false);
                }
                _ => {
                    select.insert(item, true);
                }
            }
        }

        select
    }

    /// `"field ASC|DESC"` tokens to an order map `{field: 1|-1}`.
    pub fn process_order(&self, items: &[String]) -> Result<Document, QueryError> {
        let mut order = Document::new();

        for item in items {
            let (field, direction) = parse_order_token(item)
                .ok_or_else(|| QueryError::InvalidOrder(item.clone()))?;
            order.insert(field.to_string(), direction);
        }

        Ok(order)
    }

    /// Insert/update payload processing.
    ///
    /// Keys may carry an inline `%modifier` (`"age%i": "27"` → `age: 27`);
    /// a doubled `%%` escapes a literal percent sign. Values that are
    /// already native datetimes are normalized through the converter,
    /// nested documents and arrays are processed recursively. With
    /// `expand`, dotted keys unfold into nested documents (insert path).
    pub fn process_data(&self, data: &Document, expand: bool) -> Result<Document, QueryError> {
        let mut out = Document::new();

        for (key, value) in data {
            let (active, key) = unescape_marker(key, '%');

            let split = if active {
                split_modifier_key(&key).map(|(base, modifier)| (base.to_string(), modifier))
            } else {
                None
            };
            let (key, value) = match split {
                Some((base, modifier)) => (base, self.coerce(&modifier, value.clone())?),
                None => (key, self.process_value(value)?),
            };

            if expand && key.contains('.') {
                expand_row(&mut out, &key, value);
            } else {
                out.insert(key, value);
            }
        }

        Ok(out)
    }

    fn process_value(&self, value: &Bson) -> Result<Bson, QueryError> {
        match value {
            Bson::DateTime(_) => self.coerce(&Modifier::DateTime, value.clone()),
            Bson::Document(doc) => Ok(Bson::Document(self.process_data(doc, false)?)),
            Bson::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.process_value(item)?);
                }
                Ok(Bson::Array(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Split a key carrying an inline modifier: `"age%i"` → `("age", Int)`.
/// The rightmost `%` wins so unescaped literal percents stay in the name.
fn split_modifier_key(key: &str) -> Option<(&str, Modifier)> {
    let idx = key.rfind('%')?;
    let token = &key[idx + 1..];
    let base = &key[..idx];
    if token.is_empty()
        || !token
            .strip_suffix("[]")
            .unwrap_or(token)
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some((base, Modifier::parse(token)))
}

pub(crate) fn parse_order_token(item: &str) -> Option<(&str, i32)> {
    let (field, dir) = item.trim().rsplit_once(char::is_whitespace)?;
    let field = field.trim_end();

    let valid = !field.is_empty()
        && field
            .split('.')
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        return None;
    }

    if dir.eq_ignore_ascii_case("ASC") {
        Some((field, 1))
    } else if dir.eq_ignore_ascii_case("DESC") {
        Some((field, -1))
    } else {
        None
    }
}

/// Unfold a dotted key into nested documents, creating intermediate levels.
/// An already-populated leaf is left alone.
fn expand_row(data: &mut Document, key: &str, value: Bson) {
    let mut parts = key.split('.').collect::<Vec<_>>();
    let leaf = match parts.pop() {
        Some(leaf) => leaf,
        None => return,
    };

    let mut parent = data;
    for part in parts {
        if !matches!(parent.get(part), Some(Bson::Document(_))) {
            parent.insert(part.to_string(), Document::new());
        }
        parent = match parent.get_mut(part) {
            Some(Bson::Document(doc)) => doc,
            _ => return,
        };
    }

    if !parent.contains_key(leaf) {
        parent.insert(leaf.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::convert::MongoConverter;

    fn processor() -> QueryProcessor<MongoConverter> {
        QueryProcessor::new(MongoConverter)
    }

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn select_includes_and_excludes() {
        let select = processor().process_select(&items(&["id", "name", "!secret"]));
        assert_eq!(select, doc! { "id": true, "name": true, "secret": false });
    }

    #[test]
    fn select_doubled_bang_is_literal() {
        let select = processor().process_select(&items(&["!!odd"]));
        assert_eq!(select, doc! { "!odd": true });
    }

    #[test]
    fn order_tokens() {
        let order = processor()
            .process_order(&items(&["name ASC", "age DESC", "a.b asc"]))
            .unwrap();
        assert_eq!(order, doc! { "name": 1, "age": -1, "a.b": 1 });
    }

    #[test]
    fn order_rejects_garbage() {
        let err = processor().process_order(&items(&["name"])).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOrder(_)));

        let err = processor()
            .process_order(&items(&["name SIDEWAYS"]))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidOrder(_)));
    }

    #[test]
    fn data_inline_modifiers() {
        let data = doc! { "name": "roman", "age%i": "27", "numbers%i[]": ["1", 2, 2.3] };
        let out = processor().process_data(&data, false).unwrap();
        assert_eq!(
            out,
            doc! { "name": "roman", "age": 27_i64, "numbers": [1_i64, 2_i64, 2_i64] }
        );
    }

    #[test]
    fn data_doubled_percent_is_literal_key() {
        let data = doc! { "name%%tag%%": 1 };
        let out = processor().process_data(&data, false).unwrap();
        assert_eq!(out, doc! { "name%tag%": 1 });
    }

    #[test]
    fn data_recurses_into_documents() {
        let data = doc! { "info": { "score%f": "1.5" } };
        let out = processor().process_data(&data, false).unwrap();
        assert_eq!(out, doc! { "info": { "score": 1.5 } });
    }

    #[test]
    fn data_expands_dotted_keys() {
        let data = doc! { "address.city": "Brno", "address.zip": "60200", "name": "roman" };
        let out = processor().process_data(&data, true).unwrap();
        assert_eq!(
            out,
            doc! { "address": { "city": "Brno", "zip": "60200" }, "name": "roman" }
        );
    }

    #[test]
    fn data_keeps_dotted_keys_without_expand() {
        let data = doc! { "address.city": "Brno" };
        let out = processor().process_data(&data, false).unwrap();
        assert_eq!(out, doc! { "address.city": "Brno" });
    }

    #[test]
    fn native_datetime_is_normalized() {
        let dt = bson::DateTime::from_millis(1_400_000_000_000);
        let data = doc! { "created": dt };
        let out = processor().process_data(&data, false).unwrap();
        assert_eq!(out, doc! { "created": dt });
    }
}
