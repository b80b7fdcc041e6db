//! Durable store boundary for interaction and escalation records.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Interactions,
    Escalations,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Interactions => "interactions",
            Table::Escalations => "escalations",
        }
    }
}

/// Column predicate applied by [`DurableStore::select`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(column.into(), value.into())
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(column.into(), value.into())
    }

    /// Whether `record` satisfies the predicate. Missing columns never match.
    pub fn matches(&self, record: &Value) -> bool {
        let (column, expected) = match self {
            Filter::Eq(c, v) | Filter::Gte(c, v) | Filter::Lte(c, v) => (c, v),
        };
        let Some(actual) = record.get(column) else {
            return false;
        };
        match self {
            Filter::Eq(..) => actual == expected,
            Filter::Gte(..) => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lte(..) => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Numbers compare numerically, strings lexically (RFC 3339 timestamps sort correctly).
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected record for {table}: {reason}")]
    Rejected { table: &'static str, reason: String },
    #[error("store call timed out")]
    Timeout,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert one record and return the id the store assigned.
    async fn insert(&self, table: Table, record: Value) -> Result<String, StoreError>;

    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Value>, StoreError>;
}
