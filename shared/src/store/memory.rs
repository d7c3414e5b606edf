use super::{changes, unique_key, unique_keys, with_id, DocumentStore};
use crate::error::StoreError;
use crate::filter::Filter;
use crate::types::{Collection, Document, DocumentId, UpdateResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

type UniqueIndexKey = (Collection, &'static str, String);

/// Process-local store for development and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<Collection, BTreeMap<DocumentId, Document>>,
    unique: HashMap<UniqueIndexKey, DocumentId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn claimed_by_other(&self, key: &UniqueIndexKey, id: DocumentId) -> bool {
        self.unique.get(key).is_some_and(|owner| *owner != id)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.read().await;
        let docs = inner
            .collections
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| filter.matches(doc))
                    .map(|(id, doc)| with_id(*id, doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: Collection,
        id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(&id))
            .map(|doc| with_id(id, doc.clone())))
    }

    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<DocumentId, StoreError> {
        let mut inner = self.inner.write().await;
        // Generated under the lock so identifier order is insertion order
        let id = DocumentId::generate();

        let keys = unique_keys(collection, &doc);
        for (field, value) in &keys {
            if inner.unique.contains_key(&(collection, *field, value.clone())) {
                return Err(StoreError::UniqueViolation {
                    collection: collection.name(),
                    field: *field,
                });
            }
        }

        for (field, value) in keys {
            inner.unique.insert((collection, field, value), id);
        }
        inner.collections.entry(collection).or_default().insert(id, doc);
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: Collection,
        id: DocumentId,
        set: Document,
    ) -> Result<UpdateResult, StoreError> {
        let mut inner = self.inner.write().await;

        let Some(current) = inner
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(&id))
            .cloned()
        else {
            return Ok(UpdateResult::new(false, false));
        };

        // (field, old key, new key) for every unique field the update touches
        let mut moves = Vec::new();
        for field in collection.unique_fields() {
            if !set.contains_key(*field) {
                continue;
            }
            let old_key = unique_key(current.get(*field));
            let new_key = unique_key(set.get(*field));
            if old_key == new_key {
                continue;
            }
            if let Some(key) = &new_key {
                if inner.claimed_by_other(&(collection, *field, key.clone()), id) {
                    return Err(StoreError::UniqueViolation {
                        collection: collection.name(),
                        field: *field,
                    });
                }
            }
            moves.push((*field, old_key, new_key));
        }

        for (field, old_key, new_key) in moves {
            if let Some(key) = old_key {
                inner.unique.remove(&(collection, field, key));
            }
            if let Some(key) = new_key {
                inner.unique.insert((collection, field, key), id);
            }
        }

        let modified = changes(&current, &set);
        if let Some(doc) = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.get_mut(&id))
        {
            doc.extend(set);
        }
        Ok(UpdateResult::new(true, modified))
    }

    async fn delete_one(&self, collection: Collection, id: DocumentId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;

        let Some(removed) = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.remove(&id))
        else {
            return Ok(false);
        };

        for (field, value) in unique_keys(collection, &removed) {
            inner.unique.remove(&(collection, field, value));
        }
        Ok(true)
    }
}
