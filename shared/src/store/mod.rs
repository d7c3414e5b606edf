//! Document store abstraction and its backends.

pub mod dynamo;
pub mod memory;

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::filter::Filter;
use crate::types::{Collection, Document, DocumentId, UpdateResult, ID_FIELD};
use async_trait::async_trait;
use serde_json::Value;

/// One call per operation, no multi-document transactions.
/// Unique fields declared by [`Collection::unique_fields`] are enforced by the
/// backend itself, so concurrent writers cannot both claim a value.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check that the backing store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// All documents matching `filter`, in identifier order
    async fn find(&self, collection: Collection, filter: &Filter)
        -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        collection: Collection,
        id: DocumentId,
    ) -> Result<Option<Document>, StoreError>;

    /// Store a new document under a generated identifier.
    /// Fails with [`StoreError::UniqueViolation`] when a unique value is taken.
    async fn insert_one(&self, collection: Collection, doc: Document)
        -> Result<DocumentId, StoreError>;

    /// Merge `set` into the document, leaving other fields untouched
    async fn update_one(
        &self,
        collection: Collection,
        id: DocumentId,
        set: Document,
    ) -> Result<UpdateResult, StoreError>;

    /// Returns whether a document was removed
    async fn delete_one(&self, collection: Collection, id: DocumentId) -> Result<bool, StoreError>;
}

/// Attach the identifier to a stored document
pub(crate) fn with_id(id: DocumentId, mut doc: Document) -> Document {
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    doc
}

/// Index keys of the unique fields set in `doc`; null values are not indexed
pub(crate) fn unique_keys(collection: Collection, doc: &Document) -> Vec<(&'static str, String)> {
    collection
        .unique_fields()
        .iter()
        .filter_map(|field| unique_key(doc.get(*field)).map(|key| (*field, key)))
        .collect()
}

pub(crate) fn unique_key(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.to_string()),
    }
}

/// Whether applying `set` to `current` changes any value
pub(crate) fn changes(current: &Document, set: &Document) -> bool {
    set.iter().any(|(field, value)| current.get(field) != Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_unique_keys_skip_null_and_absent() {
        let keys = unique_keys(Collection::Users, &doc(json!({"email": "ada@example.com"})));
        assert_eq!(keys, vec![("email", "\"ada@example.com\"".to_string())]);

        assert!(unique_keys(Collection::Users, &doc(json!({"email": null}))).is_empty());
        assert!(unique_keys(Collection::Users, &doc(json!({"name": "Ada"}))).is_empty());
        assert!(unique_keys(Collection::Movies, &doc(json!({"email": "ada@example.com"}))).is_empty());
    }

    #[test]
    fn test_changes() {
        let current = doc(json!({"title": "Heat", "rating": 8}));
        assert!(!changes(&current, &doc(json!({"title": "Heat"}))));
        assert!(changes(&current, &doc(json!({"title": "Ronin"}))));
        assert!(changes(&current, &doc(json!({"director": "Mann"}))));
        assert!(changes(&current, &doc(json!({"rating": null}))));
    }
}
