use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors raised while resolving, fetching, or translating entities
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Unsupported entity type: {0}")]
    UnknownEntityType(String),

    #[error("No valid attributes found for type: {0}")]
    NoValidAttributes(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid value for parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Failed to retrieve data from upstream API: {0}")]
    UpstreamFetch(String),

    #[error("Failed to load modality catalog: {0}")]
    CatalogLoad(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn missing(name: &str) -> Self {
        BridgeError::MissingParameter(name.to_string())
    }

    pub fn invalid(name: &str, message: impl Into<String>) -> Self {
        BridgeError::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status the error is surfaced with
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::UnknownEntityType(_)
            | BridgeError::NoValidAttributes(_)
            | BridgeError::MissingParameter(_)
            | BridgeError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            BridgeError::UpstreamFetch(_) | BridgeError::CatalogLoad(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::UnknownEntityType(_) => "UNKNOWN_ENTITY_TYPE",
            BridgeError::NoValidAttributes(_) => "NO_VALID_ATTRIBUTES",
            BridgeError::MissingParameter(_) => "MISSING_PARAMETER",
            BridgeError::InvalidParameter { .. } => "INVALID_PARAMETER",
            BridgeError::UpstreamFetch(_) => "UPSTREAM_FETCH_FAILURE",
            BridgeError::CatalogLoad(_) => "CATALOG_ERROR",
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::UpstreamFetch(err.to_string())
    }
}

impl From<QueryRejection> for BridgeError {
    fn from(rejection: QueryRejection) -> Self {
        BridgeError::invalid("query", rejection.body_text())
    }
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}
