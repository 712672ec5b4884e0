use bson::{Bson, Document};
use serde::Serialize;

use crate::condition::Condition;
use crate::convert::ValueConverter;
use crate::error::QueryError;
use crate::processor::{QueryProcessor, parse_order_token};

/// Accumulates query state — projection, criteria, grouping, ordering,
/// paging — and builds the final select shape from it.
///
/// Owned by one caller and cloned, never shared. Every mutation bumps the
/// generation counter so owners holding materialized results can tell the
/// state has moved on without being told.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    cmd: char,
    from: String,
    select: Vec<String>,
    distinct: Option<String>,
    conditions: Vec<Condition>,
    order: Document,
    group: Document,
    having: Vec<Condition>,
    aggregate: Document,
    limit: Option<i64>,
    offset: Option<i64>,
    generation: u64,
}

/// Cursor options accompanying a plain (non-pipeline) select.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Document>,
}

/// The built select: a plain find or an aggregation pipeline, depending on
/// whether grouping or aggregate functions are registered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SelectQuery {
    Plain {
        projection: Document,
        criteria: Document,
        options: QueryOptions,
    },
    Pipeline(Vec<Document>),
}

impl QueryBuilder {
    pub fn new(from: impl Into<String>) -> Self {
        Self::with_cmd(from, '$')
    }

    pub fn with_cmd(from: impl Into<String>, cmd: char) -> Self {
        Self {
            cmd,
            from: from.into(),
            select: Vec::new(),
            distinct: None,
            conditions: Vec::new(),
            order: Document::new(),
            group: Document::new(),
            having: Vec::new(),
            aggregate: Document::new(),
            limit: None,
            offset: None,
            generation: 0,
        }
    }

    pub fn from_name(&self) -> &str {
        &self.from
    }

    /// Monotonic counter bumped by every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touched(&mut self) {
        self.generation += 1;
    }

    fn format_cmd(&self, cmd: &str) -> String {
        let mut out = String::with_capacity(cmd.len() + 1);
        out.push(self.cmd);
        out.push_str(cmd);
        out
    }

    // ---- projection ----

    /// Replace the projection with `items`. See [`QueryBuilder::add_select`].
    pub fn select<I, S>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.select.clear();
        self.distinct = None;
        self.touched();
        for item in items {
            self.add_select(item.as_ref());
        }
        self
    }

    /// Add one projection item.
    ///
    /// `func(field)` or `func(field) AS alias` registers an aggregate
    /// function instead; `DISTINCT field` marks a single-field distinct.
    /// Anything else goes to the projection verbatim, including `!field`
    /// exclusions.
    pub fn add_select(&mut self, item: &str) -> &mut Self {
        self.touched();

        if let Some((func, field, alias)) = parse_select_function(item) {
            return self.add_aggregate_inner(func, field, alias);
        }

        if let Some(field) = parse_distinct(item) {
            self.distinct = Some(field.to_string());
            return self;
        }

        self.select.push(item.to_string());
        self
    }

    pub fn select_items(&self) -> &[String] {
        &self.select
    }

    pub fn distinct_field(&self) -> Option<&str> {
        self.distinct.as_deref()
    }

    // ---- conditions ----

    /// Replace the criteria with one condition.
    pub fn where_(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.conditions.clear();
        self.add_where(condition)
    }

    pub fn add_where(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.touched();
        self.conditions.push(condition.into());
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Copy criteria — and nothing else — from another builder.
    pub fn import_conditions(&mut self, other: &QueryBuilder) -> &mut Self {
        self.touched();
        self.conditions = other.conditions.clone();
        self
    }

    pub fn having(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.having.clear();
        self.add_having(condition)
    }

    pub fn add_having(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.touched();
        self.having.push(condition.into());
        self
    }

    // ---- ordering and paging ----

    /// Replace the ordering with `items` of the form `"field ASC|DESC"`.
    pub fn order<I, S>(&mut self, items: I) -> Result<&mut Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.order.clear();
        self.touched();
        for item in items {
            self.add_order(item.as_ref())?;
        }
        Ok(self)
    }

    pub fn add_order(&mut self, item: &str) -> Result<&mut Self, QueryError> {
        self.touched();
        let (field, direction) =
            parse_order_token(item).ok_or_else(|| QueryError::InvalidOrder(item.to_string()))?;
        self.order.insert(field.to_string(), direction);
        Ok(self)
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.touched();
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.touched();
        self.offset = Some(offset);
        self
    }

    // ---- grouping and aggregates ----

    /// Group by `keys`; each key maps to its own field reference.
    pub fn group<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.touched();
        self.group.clear();
        for key in keys {
            let key = key.as_ref();
            self.group.insert(key.to_string(), self.format_cmd(key));
        }
        self
    }

    /// Replace the aggregate registry with a single function.
    pub fn aggregate(&mut self, func: &str, item: &str) -> &mut Self {
        self.aggregate.clear();
        self.add_aggregate(func, item, None)
    }

    /// Register an aggregate function; without `alias` the output field is
    /// named `_<item>_<func>`. `*` counts documents.
    pub fn add_aggregate(&mut self, func: &str, item: &str, alias: Option<&str>) -> &mut Self {
        self.add_aggregate_inner(func, item, alias)
    }

    fn add_aggregate_inner(&mut self, func: &str, item: &str, alias: Option<&str>) -> &mut Self {
        self.touched();

        let func = func.to_ascii_lowercase();
        let name = match alias {
            Some(alias) => alias.to_string(),
            None => format!("_{item}_{func}"),
        };
        let value = if item == "*" {
            Bson::Int32(1)
        } else {
            Bson::String(self.format_cmd(item))
        };

        let mut entry = Document::new();
        entry.insert(self.format_cmd(&func), value);
        self.aggregate.insert(name, entry);
        self
    }

    pub fn is_aggregate(&self) -> bool {
        !self.group.is_empty() || !self.aggregate.is_empty()
    }

    /// The grouping stage body: `_id` from the group keys (null when
    /// ungrouped) followed by the aggregate entries.
    pub fn group_document(&self) -> Option<Document> {
        if !self.is_aggregate() {
            return None;
        }

        let mut out = Document::new();
        if self.group.is_empty() {
            out.insert("_id", Bson::Null);
        } else {
            out.insert("_id", self.group.clone());
        }
        out.extend(self.aggregate.clone());
        Some(out)
    }

    // ---- builders ----

    /// Build the final select: a pipeline when grouping or aggregates are
    /// registered, otherwise a plain (projection, criteria, options) query.
    pub fn build_select_query<C: ValueConverter>(
        &self,
        processor: &QueryProcessor<C>,
    ) -> Result<SelectQuery, QueryError> {
        if self.is_aggregate() {
            return Ok(SelectQuery::Pipeline(self.build_pipeline(processor)?));
        }

        Ok(SelectQuery::Plain {
            projection: processor.process_select(&self.select),
            criteria: processor.process_condition(&self.conditions)?,
            options: QueryOptions {
                limit: self.limit,
                offset: self.offset,
                order: (!self.order.is_empty()).then(|| self.order.clone()),
            },
        })
    }

    /// Pipeline stage order is fixed: project, match, group, sort,
    /// having-match, skip, limit.
    pub fn build_pipeline<C: ValueConverter>(
        &self,
        processor: &QueryProcessor<C>,
    ) -> Result<Vec<Document>, QueryError> {
        let mut pipeline = Vec::new();

        let mut stage = |name: &str, value: Bson| {
            let mut doc = Document::new();
            doc.insert(self.format_cmd(name), value);
            pipeline.push(doc);
        };

        if !self.select.is_empty() {
            stage("project", processor.process_select(&self.select).into());
        }

        if !self.conditions.is_empty() {
            stage("match", processor.process_condition(&self.conditions)?.into());
        }

        if let Some(group) = self.group_document() {
            stage("group", group.into());
        }

        if !self.order.is_empty() {
            stage("sort", self.order.clone().into());
        }

        if !self.having.is_empty() {
            stage("match", processor.process_condition(&self.having)?.into());
        }

        if let Some(offset) = self.offset {
            stage("skip", offset.into());
        }

        if let Some(limit) = self.limit {
            stage("limit", limit.into());
        }

        Ok(pipeline)
    }
}

/// `func(field)` or `func(field) AS alias`; field may be `*`.
fn parse_select_function(item: &str) -> Option<(&str, &str, Option<&str>)> {
    let item = item.trim();
    let open = item.find('(')?;
    let close = item.find(')')?;
    if close < open {
        return None;
    }

    let func = &item[..open];
    if !is_word(func) {
        return None;
    }

    let field = &item[open + 1..close];
    if field != "*" && !is_word(field) {
        return None;
    }

    let rest = item[close + 1..].trim();
    if rest.is_empty() {
        return Some((func, field, None));
    }

    let mut parts = rest.split_whitespace();
    let keyword = parts.next()?;
    let alias = parts.next()?;
    if !keyword.eq_ignore_ascii_case("AS") || parts.next().is_some() || !is_word(alias) {
        return None;
    }
    Some((func, field, Some(alias)))
}

/// `DISTINCT field`, case-insensitive keyword.
fn parse_distinct(item: &str) -> Option<&str> {
    let mut parts = item.trim().split_whitespace();
    let keyword = parts.next()?;
    let field = parts.next()?;
    if keyword.eq_ignore_ascii_case("DISTINCT") && parts.next().is_none() && is_word(field) {
        Some(field)
    } else {
        None
    }
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::convert::MongoConverter;

    fn processor() -> QueryProcessor<MongoConverter> {
        QueryProcessor::new(MongoConverter)
    }

    #[test]
    fn plain_query_with_options() {
        let mut builder = QueryBuilder::new("grades");
        builder.select(["name", "!score"]);
        builder.where_(("score > %i", "80"));
        builder.order(["name ASC"]).unwrap();
        builder.limit(10).offset(5);

        let query = builder.build_select_query(&processor()).unwrap();
        match query {
            SelectQuery::Plain {
                projection,
                criteria,
                options,
            } => {
                assert_eq!(projection, doc! { "name": true, "score": false });
                assert_eq!(criteria, doc! { "score": { "$gt": 80_i64 } });
                assert_eq!(
                    options,
                    QueryOptions {
                        limit: Some(10),
                        offset: Some(5),
                        order: Some(doc! { "name": 1 }),
                    }
                );
            }
            other => panic!("expected plain query, got {other:?}"),
        }
    }

    #[test]
    fn empty_builder_builds_empty_plain_query() {
        let builder = QueryBuilder::new("grades");
        let query = builder.build_select_query(&processor()).unwrap();
        match query {
            SelectQuery::Plain {
                projection,
                criteria,
                options,
            } => {
                assert!(projection.is_empty());
                assert!(criteria.is_empty());
                assert_eq!(options, QueryOptions::default());
            }
            other => panic!("expected plain query, got {other:?}"),
        }
    }

    #[test]
    fn select_function_registers_aggregate() {
        let mut builder = QueryBuilder::new("grades");
        builder.select(["SUM(score)"]);

        assert!(builder.is_aggregate());
        assert_eq!(
            builder.group_document(),
            Some(doc! { "_id": null, "_score_sum": { "$sum": "$score" } })
        );
    }

    #[test]
    fn select_function_with_alias_and_star() {
        let mut builder = QueryBuilder::new("grades");
        builder.select(["COUNT(*) AS total"]);

        assert_eq!(
            builder.group_document(),
            Some(doc! { "_id": null, "total": { "$count": 1 } })
        );
    }

    #[test]
    fn distinct_select_is_routed_aside() {
        let mut builder = QueryBuilder::new("grades");
        builder.select(["DISTINCT kind"]);

        assert_eq!(builder.distinct_field(), Some("kind"));
        assert!(builder.select_items().is_empty());
        assert!(!builder.is_aggregate());
    }

    #[test]
    fn group_keys_become_field_references() {
        let mut builder = QueryBuilder::new("grades");
        builder.group(["kind", "term"]).aggregate("MAX", "score");

        assert_eq!(
            builder.group_document(),
            Some(doc! {
                "_id": { "kind": "$kind", "term": "$term" },
                "_score_max": { "$max": "$score" },
            })
        );
    }

    #[test]
    fn pipeline_stage_order_is_fixed() {
        let mut builder = QueryBuilder::new("grades");
        builder.select(["kind", "score"]);
        builder.where_(("score > %i", "50"));
        builder.group(["kind"]).add_aggregate("sum", "score", Some("total"));
        builder.order(["total DESC"]).unwrap();
        builder.having(("total > %i", "100"));
        builder.offset(2);
        builder.limit(4);

        let pipeline = builder.build_pipeline(&processor()).unwrap();
        assert_eq!(
            pipeline,
            vec![
                doc! { "$project": { "kind": true, "score": true } },
                doc! { "$match": { "score": { "$gt": 50_i64 } } },
                doc! { "$group": { "_id": { "kind": "$kind" }, "total": { "$sum": "$score" } } },
                doc! { "$sort": { "total": -1 } },
                doc! { "$match": { "total": { "$gt": 100_i64 } } },
                doc! { "$skip": 2_i64 },
                doc! { "$limit": 4_i64 },
            ]
        );
    }

    #[test]
    fn grouping_switches_build_to_pipeline() {
        let mut builder = QueryBuilder::new("grades");
        builder.group(["kind"]);

        let query = builder.build_select_query(&processor()).unwrap();
        assert!(matches!(query, SelectQuery::Pipeline(_)));
    }

    #[test]
    fn setters_bump_the_generation() {
        let mut builder = QueryBuilder::new("grades");
        let start = builder.generation();

        builder.add_where(("a", 1));
        assert!(builder.generation() > start);

        let at_where = builder.generation();
        builder.limit(3);
        assert!(builder.generation() > at_where);
    }

    #[test]
    fn import_conditions_copies_only_criteria() {
        let mut source = QueryBuilder::new("grades");
        source.where_(("kind", "exam"));
        source.select(["name"]);
        source.limit(3);

        let mut derived = QueryBuilder::new("grades");
        derived.import_conditions(&source);

        assert_eq!(derived.conditions(), source.conditions());
        assert!(derived.select_items().is_empty());

        let query = derived.build_select_query(&processor()).unwrap();
        match query {
            SelectQuery::Plain { criteria, options, .. } => {
                assert_eq!(criteria, doc! { "kind": "exam" });
                assert_eq!(options.limit, None);
            }
            other => panic!("expected plain query, got {other:?}"),
        }
    }

    #[test]
    fn invalid_order_token_is_rejected() {
        let mut builder = QueryBuilder::new("grades");
        let err = builder.add_order("name SIDEWAYS").unwrap_err();
        assert!(matches!(err, QueryError::InvalidOrder(_)));
    }
}
