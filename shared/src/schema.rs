//! Per-collection document schemas.
//!
//! Documents stay open-ended: every field is optional and stored as sent.
//! The only conversion is numeric coercion of the movie number fields on
//! insert; updates store their fields unchanged.

use crate::error::ApiError;
use crate::types::{Collection, Document, ID_FIELD};
use serde_json::{Number, Value};

/// Largest integer an f64 represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Magnitude limits of a number the document store can hold. Zero is always storable.
pub const MAX_MAGNITUDE: f64 = 9.9e125;
pub const MIN_MAGNITUDE: f64 = 1e-130;

#[derive(Debug)]
pub struct Schema {
    pub collection: Collection,
    /// Fields converted to numbers when a document is created
    numeric_on_insert: &'static [&'static str],
    /// Field stamped with the server time on insert
    created_at: Option<&'static str>,
}

pub const MOVIES: Schema = Schema {
    collection: Collection::Movies,
    numeric_on_insert: &["rating", "duration", "releaseYear"],
    created_at: Some("createdAt"),
};

pub const USERS: Schema = Schema {
    collection: Collection::Users,
    numeric_on_insert: &[],
    created_at: None,
};

impl Schema {
    pub fn for_collection(collection: Collection) -> &'static Schema {
        match collection {
            Collection::Movies => &MOVIES,
            Collection::Users => &USERS,
        }
    }

    /// Build the document to insert from a request body
    pub fn prepare_insert(&self, mut body: Document) -> Result<Document, ApiError> {
        // Identifiers are always generated by the store
        body.remove(ID_FIELD);
        for field in self.numeric_on_insert {
            if let Some(value) = body.get_mut(*field) {
                *value = coerce_number(value);
            }
        }
        if let Some(field) = self.created_at {
            body.insert(field.to_string(), Value::String(chrono::Utc::now().to_rfc3339()));
        }
        check_storable(&body)?;
        Ok(body)
    }

    /// Build the field set of a partial update from a request body
    pub fn prepare_update(&self, mut body: Document) -> Result<Document, ApiError> {
        body.remove(ID_FIELD);
        check_storable(&body)?;
        Ok(body)
    }
}

/// Parse a request body that must be a JSON object
pub fn parse_body(body: &[u8]) -> Result<Document, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(_) => Err(ApiError::InvalidBody("expected a JSON object".to_string())),
        Err(e) => Err(ApiError::InvalidBody(e.to_string())),
    }
}

/// Whether `n` fits the store's number range
pub fn is_storable(n: f64) -> bool {
    n == 0.0 || (MIN_MAGNITUDE..=MAX_MAGNITUDE).contains(&n.abs())
}

/// Reject documents holding numbers, at any depth, that the store cannot represent
fn check_storable(doc: &Document) -> Result<(), ApiError> {
    fn check(field: &str, value: &Value) -> Result<(), ApiError> {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(f) if is_storable(f) => Ok(()),
                _ => Err(ApiError::InvalidBody(format!(
                    "number {} in field `{}` is out of range",
                    n, field
                ))),
            },
            Value::Array(items) => items.iter().try_for_each(|item| check(field, item)),
            Value::Object(map) => map.values().try_for_each(|item| check(field, item)),
            _ => Ok(()),
        }
    }

    doc.iter().try_for_each(|(field, value)| check(field, value))
}

/// Numeric conversion applied to number-typed fields.
/// Values with no numeric reading become null.
pub fn coerce_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::Null => Value::Null,
        Value::Bool(b) => Value::from(*b as i64),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Value::from(0);
            }
            trimmed.parse::<f64>().map(number_value).unwrap_or(Value::Null)
        }
        Value::Array(_) | Value::Object(_) => Value::Null,
    }
}

fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
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
    fn test_coerce_number() {
        assert_eq!(coerce_number(&json!(8.5)), json!(8.5));
        assert_eq!(coerce_number(&json!("8.5")), json!(8.5));
        assert_eq!(coerce_number(&json!(" 142 ")), json!(142));
        assert_eq!(coerce_number(&json!("")), json!(0));
        assert_eq!(coerce_number(&json!(true)), json!(1));
        assert_eq!(coerce_number(&json!("eight")), Value::Null);
        assert_eq!(coerce_number(&json!("inf")), Value::Null);
        assert_eq!(coerce_number(&json!([1, 2])), Value::Null);
        assert_eq!(coerce_number(&Value::Null), Value::Null);
    }

    #[test]
    fn test_prepare_movie_insert() {
        let body = doc(json!({
            "_id": "client-chosen",
            "title": "Heat",
            "genre": ["Crime", "Drama"],
            "rating": "8.3",
            "duration": "170",
            "releaseYear": 1995,
            "studio": "Warner Bros."
        }));

        let prepared = MOVIES.prepare_insert(body).unwrap();
        assert!(!prepared.contains_key("_id"));
        assert_eq!(prepared["rating"], json!(8.3));
        assert_eq!(prepared["duration"], json!(170));
        assert_eq!(prepared["releaseYear"], json!(1995));
        // Fields outside the schema pass through
        assert_eq!(prepared["studio"], json!("Warner Bros."));

        let created_at = prepared["createdAt"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
    }

    #[test]
    fn test_user_insert_has_no_timestamp() {
        let prepared = USERS
            .prepare_insert(doc(json!({"name": "Ada", "email": "ada@example.com"})))
            .unwrap();
        assert!(!prepared.contains_key("createdAt"));
    }

    #[test]
    fn test_prepare_update_strips_id_and_stores_fields_as_sent() {
        let prepared = MOVIES
            .prepare_update(doc(json!({"_id": "x", "title": null, "rating": "great", "duration": "8.4"})))
            .unwrap();
        assert!(!prepared.contains_key("_id"));
        assert_eq!(prepared["title"], Value::Null);
        assert_eq!(prepared["rating"], json!("great"));
        assert_eq!(prepared["duration"], json!("8.4"));
    }

    #[test]
    fn test_fields_are_stored_as_sent() {
        let prepared = USERS
            .prepare_insert(doc(json!({"email": 42, "age": "old"})))
            .unwrap();
        assert_eq!(prepared["email"], json!(42));
        assert_eq!(prepared["age"], json!("old"));

        let prepared = MOVIES
            .prepare_insert(doc(json!({"director": ["Mann"], "genre": ["Drama", 3]})))
            .unwrap();
        assert_eq!(prepared["director"], json!(["Mann"]));
        assert_eq!(prepared["genre"], json!(["Drama", 3]));
    }

    #[test]
    fn test_unstorable_numbers_are_rejected() {
        assert!(MOVIES.prepare_insert(doc(json!({"rating": 1e200}))).is_err());
        assert!(MOVIES.prepare_insert(doc(json!({"rating": "1e-300"}))).is_err());
        assert!(USERS.prepare_update(doc(json!({"meta": {"score": [-1e130]}}))).is_err());

        assert!(MOVIES.prepare_insert(doc(json!({"rating": 0, "duration": 9e125}))).is_ok());
        assert!(is_storable(-1e-130));
        assert!(!is_storable(1e-131));
    }

    #[test]
    fn test_parse_body() {
        assert!(parse_body(br#"{"title":"Heat"}"#).is_ok());
        assert!(parse_body(b"[1,2,3]").is_err());
        assert!(parse_body(b"").is_err());
        assert!(parse_body(b"{not json").is_err());
    }
}
