//! Error taxonomy for the realtime subsystem
//!
//! Every error produced while handling a client event ends up as an event on
//! the originating connection. Infrastructure details are logged, never sent.

use auth::AuthError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Machine readable error category carried by `error` and `auth_error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotAuthenticated,
    InvalidCredentials,
    NotFound,
    Forbidden,
    Conflict,
    BadRequest,
    RateLimited,
    ServerError,
}

/// Custom error type for the realtime subsystem
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The connection has not completed authentication
    #[error("Not authenticated")]
    Unauthenticated,

    /// Supplied session is unknown, inactive or expired
    #[error("Session is invalid or expired")]
    SessionExpired,

    /// Authentication attempt rejected
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Conversation, message or user does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Actor is not allowed to perform the mutation
    #[error("{0}")]
    Forbidden(String),

    /// Duplicate account or identity
    #[error("{0}")]
    Conflict(String),

    /// Malformed or invalid request payload
    #[error("{0}")]
    BadRequest(String),

    /// Too many failed logins from the same origin
    #[error("Too many login attempts, try again later")]
    RateLimited,

    /// Storage or other infrastructure fault
    #[error("Infrastructure fault: {0}")]
    Infrastructure(String),
}

impl RealtimeError {
    /// Category sent to the client
    pub fn kind(&self) -> ErrorKind {
        match self {
            RealtimeError::Unauthenticated | RealtimeError::SessionExpired => {
                ErrorKind::NotAuthenticated
            }
            RealtimeError::InvalidCredentials => ErrorKind::InvalidCredentials,
            RealtimeError::NotFound(_) => ErrorKind::NotFound,
            RealtimeError::Forbidden(_) => ErrorKind::Forbidden,
            RealtimeError::Conflict(_) => ErrorKind::Conflict,
            RealtimeError::BadRequest(_) => ErrorKind::BadRequest,
            RealtimeError::RateLimited => ErrorKind::RateLimited,
            RealtimeError::Infrastructure(_) => ErrorKind::ServerError,
        }
    }

    /// Message safe to send to the client
    pub fn client_message(&self) -> String {
        match self {
            RealtimeError::Infrastructure(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotAuthenticated | ErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for RealtimeError {
    fn from(err: DatabaseError) -> Self {
        RealtimeError::Infrastructure(err.to_string())
    }
}

impl From<AuthError> for RealtimeError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => RealtimeError::InvalidCredentials,
            AuthError::Conflict => RealtimeError::Conflict(err.to_string()),
            AuthError::Validation(msg) => RealtimeError::BadRequest(msg),
            AuthError::RateLimited => RealtimeError::RateLimited,
            AuthError::Hashing(_) | AuthError::Storage(_) => {
                RealtimeError::Infrastructure(err.to_string())
            }
        }
    }
}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.client_message(),
            "kind": self.kind(),
        }));

        (self.status_code(), body).into_response()
    }
}

/// Type alias for realtime results
pub type RealtimeResult<T> = Result<T, RealtimeError>;
