use bson::{Bson, Document};

use crate::convert::ValueConverter;
use crate::error::QueryError;
use crate::expression;
use crate::modifier::Modifier;
use crate::operator;
use crate::processor::QueryProcessor;

/// One input condition: a bare expression key, a key with a bound
/// parameter, or a group of conditions that flattens into its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Expr(String),
    Param(String, Bson),
    Group(Vec<Condition>),
}

impl From<&str> for Condition {
    fn from(key: &str) -> Self {
        Condition::Expr(key.to_string())
    }
}

impl From<String> for Condition {
    fn from(key: String) -> Self {
        Condition::Expr(key)
    }
}

impl<V: Into<Bson>> From<(&str, V)> for Condition {
    fn from((key, value): (&str, V)) -> Self {
        Condition::Param(key.to_string(), value.into())
    }
}

impl<V: Into<Bson>> From<(String, V)> for Condition {
    fn from((key, value): (String, V)) -> Self {
        Condition::Param(key, value.into())
    }
}

impl From<Vec<Condition>> for Condition {
    fn from(group: Vec<Condition>) -> Self {
        Condition::Group(group)
    }
}

impl<C: ValueConverter> QueryProcessor<C> {
    /// Compile a set of conditions into one criteria document.
    ///
    /// Multiple conditions combine under the `and` directive; a single
    /// condition compiles bare. Groups flatten into the surrounding set
    /// and may not nest further.
    pub fn process_condition(&self, conditions: &[Condition]) -> Result<Document, QueryError> {
        let mut parsed = self.compile_set(conditions, 0)?;

        if parsed.len() > 1 {
            let mut out = Document::new();
            out.insert(
                self.format_cmd("and"),
                parsed.into_iter().map(Bson::Document).collect::<Vec<_>>(),
            );
            Ok(out)
        } else {
            Ok(parsed.pop().unwrap_or_default())
        }
    }

    fn compile_set(&self, conditions: &[Condition], depth: usize) -> Result<Vec<Document>, QueryError> {
        let mut parsed = Vec::with_capacity(conditions.len());

        for condition in conditions {
            match condition {
                Condition::Expr(key) => parsed.push(self.compile_one(key, None)?),
                Condition::Param(key, value) => parsed.push(self.compile_one(key, Some(value))?),
                Condition::Group(inner) => {
                    if depth > 0 {
                        return Err(QueryError::TooDeepConditions);
                    }
                    parsed.extend(self.compile_set(inner, depth + 1)?);
                }
            }
        }

        Ok(parsed)
    }

    /// Compile a single condition key with its optional bound parameter.
    fn compile_one(&self, key: &str, param: Option<&Bson>) -> Result<Document, QueryError> {
        if let Some(expr) = expression::parse(self.cmd, key)? {
            let value = match (&expr.inline, param) {
                (Some(inline), _) => Bson::String(inline.clone()),
                (None, Some(param)) => param.clone(),
                (None, None) => return Err(QueryError::MissingValue(expr.identifier)),
            };
            return self.format_condition(&expr.identifier, &expr.operator, value, expr.modifier);
        }

        let param = param.ok_or_else(|| QueryError::MissingValue(key.to_string()))?;

        match param {
            // ['$or' => [...]]: directive over a list of inner conditions
            Bson::Array(items) if !items.is_empty() && key.starts_with(self.cmd) => {
                let mut out = Document::new();
                out.insert(key.to_string(), self.compile_list(items)?);
                Ok(out)
            }
            Bson::Document(inner) if !inner.is_empty() && key.starts_with(self.cmd) => {
                let items = inner
                    .iter()
                    .map(|(k, v)| Bson::Document({
                        let mut d = Document::new();
                        d.insert(k.clone(), v.clone());
                        d
                    }))
                    .collect::<Vec<_>>();
                let mut out = Document::new();
                out.insert(key.to_string(), self.compile_list(&items)?);
                Ok(out)
            }

            // plain list value: implicit membership test
            Bson::Array(items) if !items.is_empty() => {
                self.format_condition(key, "IN", param.clone(), None)
            }

            // ['size' => ['$elemMatch' => [...]]]: directive-shaped value,
            // inner documents compile as conditions
            Bson::Document(inner)
                if !inner.is_empty()
                    && inner.iter().next().is_some_and(|(k, _)| k.starts_with(self.cmd)) =>
            {
                let mut rebuilt = Document::new();
                for (k, v) in inner {
                    let value = match v {
                        Bson::Document(d) if !d.is_empty() => {
                            Bson::Document(self.compile_merged_doc(d)?)
                        }
                        other => other.clone(),
                    };
                    rebuilt.insert(k.clone(), value);
                }
                let mut out = Document::new();
                out.insert(key.to_string(), rebuilt);
                Ok(out)
            }

            _ => {
                let mut out = Document::new();
                out.insert(key.to_string(), param.clone());
                Ok(out)
            }
        }
    }

    /// Inner conditions as a list of single-condition documents.
    fn compile_list(&self, items: &[Bson]) -> Result<Vec<Bson>, QueryError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Bson::String(key) => out.push(Bson::Document(self.compile_one(key, None)?)),
                Bson::Document(doc) => out.push(Bson::Document(self.compile_merged_doc(doc)?)),
                other => {
                    return Err(QueryError::InvalidExpression(format!(
                        "inner condition must be an expression or a document, got {other}"
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Inner conditions merged into a single document, entry by entry.
    fn compile_merged_doc(&self, doc: &Document) -> Result<Document, QueryError> {
        let mut merged = Document::new();
        for (key, value) in doc {
            let compiled = self.compile_one(key, Some(value))?;
            merged.extend(compiled);
        }
        Ok(merged)
    }

    /// Assemble the final condition document for one identifier.
    fn format_condition(
        &self,
        identifier: &str,
        operator: &str,
        value: Bson,
        modifier: Option<Modifier>,
    ) -> Result<Document, QueryError> {
        // command-prefixed operators pass to the wire verbatim
        let native = operator.strip_prefix(self.cmd);

        let (op, value, modifier) = match native {
            Some(op) => (op.to_string(), value, modifier),
            None => {
                let op = operator.to_ascii_lowercase();
                if op == "like" {
                    let value = match value {
                        Bson::String(s) => Bson::String(like_to_pattern(&s)),
                        other => other,
                    };
                    (op, value, Some(Modifier::Regex))
                } else {
                    (op, value, modifier)
                }
            }
        };

        let value = match &modifier {
            Some(modifier) => self.coerce(modifier, value)?,
            None => value,
        };

        let op = match native {
            Some(_) => op,
            None => operator::translate(&op).map_or(op, str::to_string),
        };

        if op == "=" {
            let mut out = Document::new();
            out.insert(identifier.to_string(), value);
            return Ok(out);
        }

        let value = if op == "in" || op == "nin" {
            reindex(value)
        } else if op == "elem_match" {
            match value {
                Bson::Document(doc) => Bson::Document(self.compile_merged_doc(&doc)?),
                other => other,
            }
        } else {
            value
        };

        let op = if native.is_none() && op.contains('_') {
            operator::to_camel(&op)
        } else {
            op
        };

        let mut inner = Document::new();
        inner.insert(self.format_cmd(&op), value);
        let mut out = Document::new();
        out.insert(identifier.to_string(), inner);
        Ok(out)
    }
}

/// Membership operators take a dense list: document values are taken in
/// order, a scalar becomes a one-element list.
fn reindex(value: Bson) -> Bson {
    match value {
        v @ Bson::Array(_) => v,
        Bson::Document(doc) => Bson::Array(doc.into_iter().map(|(_, v)| v).collect()),
        other => Bson::Array(vec![other]),
    }
}

/// SQL LIKE to a case-insensitive `/pattern/i` regex string. `%` wildcards
/// at the edges control anchoring; the body is escaped literally. A value
/// with no wildcard at all stays unanchored and matches anywhere.
fn like_to_pattern(value: &str) -> String {
    let starts = value.starts_with('%');
    let ends = value.len() > 1 && value.ends_with('%');
    let body = &value[usize::from(starts)..value.len() - usize::from(ends)];

    let mut pattern = String::with_capacity(body.len() + 6);
    pattern.push('/');
    if !starts && ends {
        pattern.push('^');
    }
    for ch in body.chars() {
        if matches!(
            ch,
            '.' | '\\' | '+' | '*' | '?' | '[' | '^' | ']' | '$' | '(' | ')' | '{' | '}' | '='
                | '!' | '<' | '>' | '|' | ':' | '-' | '#' | '/'
        ) {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    if starts && !ends {
        pattern.push('$');
    }
    pattern.push_str("/i");
    pattern
}
