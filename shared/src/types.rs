use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// A stored document: an arbitrary JSON object.
pub type Document = Map<String, Value>;

/// Field carrying the document identifier in every document returned to clients.
pub const ID_FIELD: &str = "_id";

// ========== IDENTIFIER ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// New time-ordered identifier, so sorting by id follows insertion order
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an identifier taken from a request path.
    /// Returns `None` for anything that is not a UUID.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Always the lowercase hyphenated form
        write!(f, "{}", self.0.hyphenated())
    }
}

// ========== COLLECTION ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Movies,
    Users,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Movies => "movies",
            Collection::Users => "users",
        }
    }

    /// Singular entity label used in client-facing messages
    pub fn entity(&self) -> &'static str {
        match self {
            Collection::Movies => "Movie",
            Collection::Users => "User",
        }
    }

    /// Fields whose values must be unique across the collection
    pub fn unique_fields(&self) -> &'static [&'static str] {
        match self {
            Collection::Movies => &[],
            Collection::Users => &["email"],
        }
    }
}

// ========== ACKNOWLEDGMENTS ==========
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: String,
}

impl InsertOneResult {
    pub fn new(id: DocumentId) -> Self {
        Self {
            acknowledged: true,
            inserted_id: id.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<String>,
    pub upserted_count: u64,
}

impl UpdateResult {
    pub fn new(matched: bool, modified: bool) -> Self {
        Self {
            acknowledged: true,
            matched_count: matched as u64,
            modified_count: (matched && modified) as u64,
            upserted_id: None,
            upserted_count: 0,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl DeleteResult {
    pub fn new(deleted: bool) -> Self {
        Self {
            acknowledged: true,
            deleted_count: deleted as u64,
        }
    }
}

/// Returned instead of an insertion acknowledgment when a unique value is taken
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateNotice {
    pub message: String,
    pub inserted_id: Option<String>,
}

impl DuplicateNotice {
    pub fn new(collection: Collection) -> Self {
        Self {
            message: format!("{} already exists", collection.entity()),
            inserted_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_parse() {
        let id = DocumentId::generate();
        assert_eq!(DocumentId::parse(&id.to_string()), Some(id));

        // Uppercase input normalises to lowercase output
        let upper = id.to_string().to_uppercase();
        assert_eq!(DocumentId::parse(&upper).map(|p| p.to_string()), Some(id.to_string()));

        assert_eq!(DocumentId::parse("not-an-id"), None);
        assert_eq!(DocumentId::parse("507f1f77bcf86cd799439011"), None);
        assert_eq!(DocumentId::parse(""), None);
    }

    #[test]
    fn test_generated_ids_follow_creation_order() {
        let first = DocumentId::generate();
        let second = DocumentId::generate();
        assert!(first.to_string() < second.to_string());
    }

    #[test]
    fn test_acknowledgment_shapes() {
        let update = serde_json::to_value(UpdateResult::new(true, false)).unwrap();
        assert_eq!(
            update,
            serde_json::json!({
                "acknowledged": true,
                "matchedCount": 1,
                "modifiedCount": 0,
                "upsertedId": null,
                "upsertedCount": 0
            })
        );

        let notice = serde_json::to_value(DuplicateNotice::new(Collection::Users)).unwrap();
        assert_eq!(
            notice,
            serde_json::json!({"message": "User already exists", "insertedId": null})
        );
    }
}
