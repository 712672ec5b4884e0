use bson::{Bson, Document};

use crate::convert::ValueConverter;
use crate::error::QueryError;
use crate::processor::QueryProcessor;

impl<C: ValueConverter> QueryProcessor<C> {
    /// Compile an update payload into directive form.
    ///
    /// Unprefixed keys gather into the `set` directive, merging with an
    /// explicit one when present. `unset` accepts a field list in any shape
    /// and maps every field to an empty string. Directives that carry field
    /// payloads (`setOnInsert`, `addToSet`, `push`) run through data
    /// processing so inline modifiers apply; unknown directives pass
    /// through untouched.
    pub fn process_update(&self, data: &Document) -> Result<Document, QueryError> {
        let set_key = self.format_cmd("set");

        let mut set = match data.get(&set_key) {
            Some(Bson::Document(doc)) => doc.clone(),
            _ => Document::new(),
        };

        let mut out = Document::new();

        for (key, value) in data {
            if *key == set_key {
                continue;
            }

            if !key.starts_with(self.cmd) {
                set.insert(key.clone(), value.clone());
                continue;
            }

            let directive = &key[self.cmd.len_utf8()..];
            let value = match directive {
                "unset" => Bson::Document(unset_fields(value)),
                "setOnInsert" | "addToSet" | "push" => match value {
                    Bson::Document(doc) => Bson::Document(self.process_data(doc, false)?),
                    other => other.clone(),
                },
                _ => value.clone(),
            };
            out.insert(key.clone(), value);
        }

        if !set.is_empty() {
            out.insert(set_key, self.process_data(&set, false)?);
        }

        Ok(out)
    }
}

/// Field names to unset, mapped to the empty-string placeholder the store
/// expects. Accepts a single name, a list, or a document's keys.
fn unset_fields(value: &Bson) -> Document {
    let mut out = Document::new();
    match value {
        Bson::String(field) => {
            out.insert(field.clone(), "");
        }
        Bson::Array(items) => {
            for item in items {
                if let Bson::String(field) = item {
                    out.insert(field.clone(), "");
                }
            }
        }
        Bson::Document(doc) => {
            for (field, _) in doc {
                out.insert(field.clone(), "");
            }
        }
        _ => {}
    }
    out
}
