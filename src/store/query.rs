//! Query model: equality and array-membership filters, ordering, limits.
//!
//! Matches the query surface the hosted document store exposes: a query is
//! bound to exactly one collection, filters are ANDed, and ordering by a
//! field excludes documents that do not carry that field.

use std::cmp::Ordering;

use serde_json::Value;

use super::document::Document;

/// Sort direction for an ordered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest value first.
    Ascending,
    /// Largest value first.
    Descending,
}

/// A single filter clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field value equals the given value.
    FieldEq(String, Value),
    /// Field is an array containing the given value.
    ArrayContains(String, Value),
}

impl Filter {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::FieldEq(field, expected) => doc.get(field) == Some(expected),
            Filter::ArrayContains(field, expected) => match doc.get(field) {
                Some(Value::Array(items)) => items.contains(expected),
                _ => false,
            },
        }
    }
}

/// A query against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Collection path the query runs over.
    pub collection: String,
    /// Filter clauses, all of which must match.
    pub filters: Vec<Filter>,
    /// Optional ordering field and direction.
    pub order_by: Option<(String, Direction)>,
    /// Optional maximum result count, applied after ordering.
    pub limit: Option<usize>,
}

impl Query {
    /// Start a query over a collection.
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Add an equality filter.
    pub fn field_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::FieldEq(field.into(), value));
        self
    }

    /// Add an array-membership filter.
    pub fn array_contains(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::ArrayContains(field.into(), value));
        self
    }

    /// Order results by a field.
    ///
    /// Documents missing the field are excluded from the result set.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Execute the query over an iterator of candidate documents.
    pub(crate) fn execute<'a>(&self, docs: impl Iterator<Item = &'a Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = docs
            .filter(|doc| self.filters.iter().all(|f| f.matches(doc)))
            .filter(|doc| match &self.order_by {
                Some((field, _)) => doc.get(field).is_some(),
                None => true,
            })
            .cloned()
            .collect();

        if let Some((field, direction)) = &self.order_by {
            matched.sort_by(|a, b| {
                let ordering = compare_values(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                );
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// Total-enough ordering over JSON values for sort fields.
///
/// Only numbers, strings, and bools are meaningful sort keys in this schema;
/// everything else compares equal.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

// ============================================================================
// TESTS
// ============================================================================
