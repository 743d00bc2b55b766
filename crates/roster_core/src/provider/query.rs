//! Collection query descriptors.
//!
//! # Invariants
//! - Filters are equality-only and combined with AND.
//! - Ordering keys apply left to right; ties keep their input order.
//! - Value order: missing < null < bool < number < string < array < object.

use crate::model::document::{Document, Fields};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Equality filter on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

/// Query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl QueryDescriptor {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters
            .iter()
            .all(|filter| document.get(&filter.field) == Some(&filter.value))
    }

    /// Filters, orders and limits documents given in insertion order.
    pub fn apply(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|document| self.matches(document))
            .collect();
        if self.is_ordered() {
            matched.sort_by(|a, b| compare_by_fields(&a.fields, &b.fields, &self.order_by));
        }
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// Compares two field maps by a list of ordering keys.
pub fn compare_by_fields(a: &Fields, b: &Fields, order_by: &[OrderBy]) -> Ordering {
    for key in order_by {
        let ordering = compare_values(a.get(&key.field), b.get(&key.field));
        let ordering = match key.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Total order over optional JSON values.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let rank = type_rank(a).cmp(&type_rank(b));
            if rank != Ordering::Equal {
                return rank;
            }
            match (a, b) {
                (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
                (Value::String(a), Value::String(b)) => a.cmp(b),
                (Value::Array(a), Value::Array(b)) => {
                    for (left, right) in a.iter().zip(b.iter()) {
                        let ordering = compare_values(Some(left), Some(right));
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    a.len().cmp(&b.len())
                }
                _ => Ordering::Equal,
            }
        }
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a.cmp(&b);
    }
    let a = a.as_f64().unwrap_or(f64::NAN);
    let b = b.as_f64().unwrap_or(f64::NAN);
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
