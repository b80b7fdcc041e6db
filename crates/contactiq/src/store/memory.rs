use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::{DurableStore, Filter, StoreError, Table};

/// In-process [`DurableStore`].
///
/// Assigns uuid ids, stamps `created_at` when absent, and keeps rows in
/// insertion order. Failure and latency can be injected for tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    failures_remaining: AtomicU32,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every insert by `latency` before it is applied.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `count` inserts fail with `StoreError::Unavailable`.
    pub fn fail_next_inserts(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables.read().get(&table).cloned().unwrap_or_default()
    }

    pub fn count(&self, table: Table) -> usize {
        self.tables.read().get(&table).map_or(0, Vec::len)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn insert(&self, table: Table, mut record: Value) -> Result<String, StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure() {
            return Err(StoreError::Unavailable("injected failure".into()));
        }

        let Some(row) = record.as_object_mut() else {
            return Err(StoreError::Rejected {
                table: table.as_str(),
                reason: "record is not a JSON object".into(),
            });
        };
        let id = Uuid::new_v4().to_string();
        row.insert("id".into(), json!(id));
        row.entry("created_at")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));

        self.tables.write().entry(table).or_default().push(record);
        Ok(id)
    }

    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
