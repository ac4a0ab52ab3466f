use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dapps_store::StoreError;
use thiserror::Error;

/// Why a message has no usable next hop.  Both cases leave the message
/// pending for a later sweep.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No route to {destination}")]
    NoRoute { destination: String },

    #[error("Route for {destination} names unknown neighbour {next_hop}")]
    UnknownNeighbour { destination: String, next_hop: String },
}

/// Failures while driving the client side of a session against a neighbour.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Timed out after {0:?} waiting for the peer")]
    Timeout(Duration),

    #[error("Unexpected response: expected {expected}, got {got:?}")]
    UnexpectedResponse { expected: String, got: String },

    #[error("Peer closed the connection")]
    Closed,

    #[error("Peer reported payload {0} as bad")]
    PayloadBad(String),

    #[error("Transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Gateway login failed: {0}")]
    Login(String),

    #[error("Connect script failed at {line:?}: {reason}")]
    Script { line: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::Store(e) => {
                tracing::error!(error = %e, "store failure in API handler");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
