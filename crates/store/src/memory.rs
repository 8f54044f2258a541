use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::{Direction, Document, DocumentStore, FieldFilter, Fields, Query, StoreError};

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, BTreeMap<String, Fields>>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filters(fields: &Fields, filters: &[FieldFilter]) -> bool {
    filters
        .iter()
        .all(|filter| fields.get(&filter.field) == Some(&filter.value))
}

/// Missing values sort after present ones, mirroring `NULLS LAST`.
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        let id = Ulid::new().to_string();
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        existing.extend(fields);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut matched = docs
            .iter()
            .filter(|(_, fields)| matches_filters(fields, &query.filters))
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect::<Vec<_>>();

        if let Some(order_by) = query.order_by.as_ref() {
            matched.sort_by(|a, b| {
                let by_field = compare_field(
                    a.fields.get(&order_by.field),
                    b.fields.get(&order_by.field),
                );
                let ordering = by_field.then_with(|| a.id.cmp(&b.id));
                let a_missing = !a.fields.contains_key(&order_by.field);
                let b_missing = !b.fields.contains_key(&order_by.field);
                match order_by.direction {
                    Direction::Ascending => ordering,
                    // Missing fields stay last in both directions.
                    Direction::Descending if a_missing != b_missing => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .collect())
    }

    async fn count(&self, collection: &str, filters: &[FieldFilter]) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        let total = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|fields| matches_filters(fields, filters))
                    .count()
            })
            .unwrap_or(0);
        Ok(total as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
