//! Document storage abstraction.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use crate::error::StorageError;

/// A window into a listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    /// Documents skipped before the page starts.
    pub offset: usize,
    /// The most documents returned.
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
        }
    }
}

/// How a listing is ordered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    /// The top-level field documents are compared by.
    pub field: String,
    /// Largest first if set.
    pub descending: bool,
}

impl Order {
    /// Orders by `field`, newest or largest first.
    #[inline]
    pub fn descending<S: Into<String>>(field: S) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Orders by `field`, oldest or smallest first.
    #[inline]
    pub fn ascending<S: Into<String>>(field: S) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Compares two documents by the ordered field. Documents without the
    /// field sort last either way, ties are broken by `id`.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ord = match (a.get(&self.field), b.get(&self.field)) {
            (Some(a), Some(b)) => {
                let ord = compare_values(a, b);
                if self.descending { ord.reverse() } else { ord }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        ord.then_with(|| compare_values(&a["id"], &b["id"]))
    }

    /// Sorts `docs` and returns the requested page of them.
    pub fn paginate(&self, mut docs: Vec<Value>, page: Page) -> Vec<Value> {
        docs.sort_by(|a, b| self.compare(a, b));
        docs.into_iter().skip(page.offset).take(page.limit).collect()
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.total_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => {
            // Timestamps may carry a varying number of fractional digits.
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Returns the `id` of a document, which must be a non-empty string.
pub fn document_id(doc: &Value) -> Result<&str, StorageError> {
    match doc.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(StorageError::MissingId),
    }
}

/// Stores JSON documents in named containers, keyed by their `id` field.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts `doc`, or replaces the document with the same id.
    async fn upsert(&self, container: &str, doc: Value) -> Result<(), StorageError>;

    /// Fetches a document by id.
    async fn get(&self, container: &str, id: &str) -> Result<Value, StorageError>;

    /// Lists the documents of a container.
    async fn list(
        &self,
        container: &str,
        page: Page,
        order: &Order,
    ) -> Result<Vec<Value>, StorageError>;
}

/// A [`Storage`] that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStorage {
    containers: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn containers(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, Value>>> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upsert(&self, container: &str, doc: Value) -> Result<(), StorageError> {
        let id = document_id(&doc)?.to_owned();
        self.containers()
            .entry(container.to_owned())
            .or_default()
            .insert(id, doc);
        Ok(())
    }

    async fn get(&self, container: &str, id: &str) -> Result<Value, StorageError> {
        self.containers()
            .get(container)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_owned()))
    }

    async fn list(
        &self,
        container: &str,
        page: Page,
        order: &Order,
    ) -> Result<Vec<Value>, StorageError> {
        let docs: Vec<_> = self
            .containers()
            .get(container)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        Ok(order.paginate(docs, page))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_upsert_requires_id() {
        let storage = MemoryStorage::new();
        for doc in [json!({}), json!({"id": ""}), json!({"id": 42})] {
            let err = storage.upsert("runs", doc).await.unwrap_err();
            assert!(matches!(err, StorageError::MissingId));
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let storage = MemoryStorage::new();
        storage.upsert("runs", json!({"id": "a", "n": 1})).await.unwrap();
        storage.upsert("runs", json!({"id": "a", "n": 2})).await.unwrap();

        assert_eq!(storage.get("runs", "a").await.unwrap()["n"], 2);
        let err = storage.get("other", "a").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(id) if id == "a"));
    }

    #[tokio::test]
    async fn test_list_orders_and_pages() {
        let storage = MemoryStorage::new();
        for (id, ts) in [
            ("a", "2026-01-02T00:00:00Z"),
            ("b", "2026-01-03T00:00:00Z"),
            ("c", "2026-01-01T00:00:00Z"),
        ] {
            storage
                .upsert("runs", json!({"id": id, "start_time": ts}))
                .await
                .unwrap();
        }
        storage.upsert("runs", json!({"id": "d"})).await.unwrap();

        let ids = |docs: Vec<Value>| -> Vec<String> {
            docs.iter().map(|d| d["id"].as_str().unwrap().to_owned()).collect()
        };

        let newest = Order::descending("start_time");
        let all = storage.list("runs", Page::default(), &newest).await.unwrap();
        assert_eq!(ids(all), ["b", "a", "c", "d"]);

        let page = Page {
            offset: 1,
            limit: 2,
        };
        let docs = storage.list("runs", page, &newest).await.unwrap();
        assert_eq!(ids(docs), ["a", "c"]);

        let oldest = Order::ascending("start_time");
        let docs = storage.list("runs", Page::default(), &oldest).await.unwrap();
        assert_eq!(ids(docs), ["c", "a", "b", "d"]);

        let docs = storage.list("empty", Page::default(), &oldest).await.unwrap();
        assert!(docs.is_empty());
    }
}
