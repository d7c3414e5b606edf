//! CRUD operations shared by every collection.
//!
//! Each operation is one store call; the collection decides the schema
//! applied to request bodies and which fields are unique.

use crate::error::{ApiError, StoreError};
use crate::filter::Filter;
use crate::response;
use crate::schema::{self, Schema};
use crate::store::DocumentStore;
use crate::types::{
    Collection, DeleteResult, Document, DocumentId, DuplicateNotice, InsertOneResult, UpdateResult,
};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CreateOutcome {
    Inserted(InsertOneResult),
    Duplicate(DuplicateNotice),
}

/// List documents matching `filter`
pub async fn list(
    store: &dyn DocumentStore,
    collection: Collection,
    filter: Filter,
) -> Result<Response<Body>, Error> {
    respond(find(store, collection, &filter).await)
}

/// Get a single document by id
pub async fn get(
    store: &dyn DocumentStore,
    collection: Collection,
    raw_id: &str,
) -> Result<Response<Body>, Error> {
    respond(find_one(store, collection, raw_id).await)
}

/// Create a document from a request body
pub async fn create(
    store: &dyn DocumentStore,
    collection: Collection,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    respond(insert_one(store, collection, body).await)
}

/// Merge the fields of a request body into an existing document
pub async fn update(
    store: &dyn DocumentStore,
    collection: Collection,
    raw_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    respond(update_one(store, collection, raw_id, body).await)
}

/// Delete a document by id
pub async fn delete(
    store: &dyn DocumentStore,
    collection: Collection,
    raw_id: &str,
) -> Result<Response<Body>, Error> {
    respond(delete_one(store, collection, raw_id).await)
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Result<Response<Body>, Error> {
    match result {
        Ok(value) => response::json(StatusCode::OK, &value),
        Err(err) => err.into_response(),
    }
}

fn parse_id(collection: Collection, raw_id: &str) -> Result<DocumentId, ApiError> {
    DocumentId::parse(raw_id).ok_or(ApiError::InvalidId(collection))
}

pub async fn find(
    store: &dyn DocumentStore,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<Document>, ApiError> {
    let docs = store.find(collection, filter).await?;
    tracing::info!(
        "Listed {} {} ({} clauses)",
        docs.len(),
        collection.name(),
        filter.clauses().len()
    );
    Ok(docs)
}

pub async fn find_one(
    store: &dyn DocumentStore,
    collection: Collection,
    raw_id: &str,
) -> Result<Document, ApiError> {
    let id = parse_id(collection, raw_id)?;
    store
        .find_one(collection, id)
        .await?
        .ok_or(ApiError::NotFound(collection))
}

pub async fn insert_one(
    store: &dyn DocumentStore,
    collection: Collection,
    body: &[u8],
) -> Result<CreateOutcome, ApiError> {
    let doc = Schema::for_collection(collection).prepare_insert(schema::parse_body(body)?)?;

    match store.insert_one(collection, doc).await {
        Ok(id) => {
            tracing::info!("Created {} {}", collection.entity(), id);
            Ok(CreateOutcome::Inserted(InsertOneResult::new(id)))
        }
        Err(StoreError::UniqueViolation { field, .. }) => {
            tracing::warn!("{} with this {} already exists", collection.entity(), field);
            Ok(CreateOutcome::Duplicate(DuplicateNotice::new(collection)))
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn update_one(
    store: &dyn DocumentStore,
    collection: Collection,
    raw_id: &str,
    body: &[u8],
) -> Result<UpdateResult, ApiError> {
    let id = parse_id(collection, raw_id)?;
    let set = Schema::for_collection(collection).prepare_update(schema::parse_body(body)?)?;

    match store.update_one(collection, id, set).await {
        Ok(result) => {
            tracing::info!(
                "Updated {} {} (matched {}, modified {})",
                collection.entity(),
                id,
                result.matched_count,
                result.modified_count
            );
            Ok(result)
        }
        Err(StoreError::UniqueViolation { .. }) => Err(ApiError::Duplicate(collection)),
        Err(err) => Err(err.into()),
    }
}

pub async fn delete_one(
    store: &dyn DocumentStore,
    collection: Collection,
    raw_id: &str,
) -> Result<DeleteResult, ApiError> {
    let id = parse_id(collection, raw_id)?;
    let deleted = store.delete_one(collection, id).await?;
    tracing::info!("Delete {} {}: removed={}", collection.entity(), id, deleted);
    Ok(DeleteResult::new(deleted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_then_find_one_returns_input_plus_server_fields() {
        let store = MemoryStore::new();
        let body = json!({"title": "Heat", "director": "Mann", "rating": "8.3"}).to_string();

        let CreateOutcome::Inserted(ack) =
            insert_one(&store, Collection::Movies, body.as_bytes()).await.unwrap()
        else {
            panic!("movie must be inserted");
        };
        assert!(ack.acknowledged);

        let doc = find_one(&store, Collection::Movies, &ack.inserted_id).await.unwrap();
        assert_eq!(doc["_id"], json!(ack.inserted_id));
        assert_eq!(doc["title"], json!("Heat"));
        assert_eq!(doc["director"], json!("Mann"));
        assert_eq!(doc["rating"], json!(8.3));
        assert!(doc["createdAt"].is_string());
        assert_eq!(doc.len(), 5);
    }

    #[tokio::test]
    async fn test_update_never_touches_id() {
        let store = MemoryStore::new();
        let CreateOutcome::Inserted(ack) = insert_one(
            &store,
            Collection::Movies,
            json!({"title": "Heat"}).to_string().as_bytes(),
        )
        .await
        .unwrap() else {
            panic!("movie must be inserted");
        };

        let other = DocumentId::generate().to_string();
        let body = json!({"_id": other, "director": "Mann"}).to_string();
        let result = update_one(&store, Collection::Movies, &ack.inserted_id, body.as_bytes())
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);

        let doc = find_one(&store, Collection::Movies, &ack.inserted_id).await.unwrap();
        assert_eq!(doc["_id"], json!(ack.inserted_id));
        assert_eq!(doc["title"], json!("Heat"));
        assert_eq!(doc["director"], json!("Mann"));
    }

    #[tokio::test]
    async fn test_invalid_and_missing_ids() {
        let store = MemoryStore::new();

        let err = find_one(&store, Collection::Movies, "12345").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidId(Collection::Movies)));

        let missing = DocumentId::generate().to_string();
        let err = find_one(&store, Collection::Users, &missing).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(Collection::Users)));

        let result = delete_one(&store, Collection::Movies, &missing).await.unwrap();
        assert_eq!(result.deleted_count, 0);
    }

    #[tokio::test]
    async fn test_user_email_conflict_on_update() {
        let store = MemoryStore::new();
        for email in ["ada@example.com", "bob@example.com"] {
            insert_one(&store, Collection::Users, json!({"email": email}).to_string().as_bytes())
                .await
                .unwrap();
        }

        let users = find(
            &store,
            Collection::Users,
            &crate::filter::UserQuery {
                email: Some("bob@example.com".to_string()),
            }
            .into_filter(),
        )
        .await
        .unwrap();
        let bob_id = users[0]["_id"].as_str().unwrap().to_string();

        let err = update_one(
            &store,
            Collection::Users,
            &bob_id,
            json!({"email": "ada@example.com"}).to_string().as_bytes(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Duplicate(Collection::Users)));
    }
}
