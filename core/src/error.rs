//! Error types for the broker client.
//!
//! # Design
//! `Gone` and `Conflict` get dedicated variants because callers act on them
//! differently from every other failure: a 410 completes a delete, a 409 on
//! bind is the caller's decision to make. All other non-2xx responses land in
//! `OperationFailed` with the status and the raw body kept for diagnostics.
//! Transport failures are passed through untouched.

use serde::Deserialize;
use thiserror::Error;

use crate::classify::Operation;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Failure to complete the HTTP round trip itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP transport failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("transport failed: {0}")]
    Other(String),
}

/// Errors returned by `BrokerClient` and the codec's `parse_*` methods.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connection, timeout, TLS or I/O failure. Never interpreted as broker semantics.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The broker answered 410: the instance or binding no longer exists.
    #[error("{operation}: resource is gone")]
    Gone { operation: Operation },

    /// The broker answered 409 on bind: a binding with this id exists with other parameters.
    #[error("{operation}: conflict: {body}")]
    Conflict { operation: Operation, body: String },

    /// Any other non-2xx status.
    #[error("{operation} failed with HTTP {status}: {body}")]
    OperationFailed {
        operation: Operation,
        status: u16,
        body: String,
        error: Option<String>,
        description: Option<String>,
    },

    /// The broker answered with a success status but a body that does not parse.
    #[error("{operation}: malformed response body: {source}")]
    MalformedResponse {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// OSBAPI error object, e.g. `{"error": "AsyncRequired", "description": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    description: Option<String>,
}

impl BrokerError {
    pub(crate) fn operation_failed(operation: Operation, status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorBody>(body).ok();
        let (error, description) = match parsed {
            Some(b) => (b.error, b.description),
            None => (None, None),
        };
        BrokerError::OperationFailed {
            operation,
            status,
            body: body.to_string(),
            error,
            description,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, BrokerError::Gone { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BrokerError::Conflict { .. })
    }

    /// HTTP status the broker answered with, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            BrokerError::Gone { .. } => Some(410),
            BrokerError::Conflict { .. } => Some(409),
            BrokerError::OperationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
