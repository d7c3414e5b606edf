use crate::response;
use crate::types::Collection;
use lambda_http::{http::StatusCode, Body, Error, Response};
use thiserror::Error;

/// Failures raised by a document store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("DynamoDB request failed: {0}")]
    Dynamo(#[from] aws_sdk_dynamodb::Error),

    #[error("Failed to build DynamoDB request: {0}")]
    Build(#[from] aws_sdk_dynamodb::error::BuildError),

    #[error("{collection}.{field} value is already taken")]
    UniqueViolation {
        collection: &'static str,
        field: &'static str,
    },

    #[error("Corrupt item in {collection}: {reason}")]
    Corrupt {
        collection: &'static str,
        reason: String,
    },
}

impl StoreError {
    /// Wrap any operation-specific SDK error into the service-wide error
    pub(crate) fn dynamo(err: impl Into<aws_sdk_dynamodb::Error>) -> Self {
        StoreError::Dynamo(err.into())
    }
}

/// Request-level failures, each mapped to one HTTP status
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid {} ID", .0.entity().to_lowercase())]
    InvalidId(Collection),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("{} not found", .0.entity())]
    NotFound(Collection),

    #[error("{} already exists", .0.entity())]
    Duplicate(Collection),

    // Store details are logged, never sent to the client
    #[error("Internal server error")]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidId(_) | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Duplicate(_) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Result<Response<Body>, Error> {
        match &self {
            ApiError::Store(source) => tracing::error!("Document store failure: {}", source),
            other => tracing::warn!("Request rejected: {}", other),
        }
        response::error(self.status(), &self.to_string())
    }
}

/// Startup configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_messages() {
        assert_eq!(ApiError::InvalidId(Collection::Movies).to_string(), "Invalid movie ID");
        assert_eq!(ApiError::NotFound(Collection::Users).to_string(), "User not found");
        assert_eq!(ApiError::Duplicate(Collection::Users).to_string(), "User already exists");

        let store = ApiError::from(StoreError::Corrupt {
            collection: "movies",
            reason: "missing doc".to_string(),
        });
        assert_eq!(store.to_string(), "Internal server error");
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
