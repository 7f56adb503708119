//! Error types for the route mirror.

use crate::key::IndexKey;
use crate::state::RouteState;
use crate::transport::RouteOp;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the route mirror.
#[derive(Debug, Error)]
pub enum RouteDbError {
    /// Attempted index reservation for a key already held by another route
    /// during a commit-time move. Raised, never retried.
    #[error("route index conflict: {0}")]
    KeyConflict(IndexKey),

    /// Lookup resolution failed and no fallback was enabled.
    #[error("record not found")]
    NotFound,

    /// Malformed input to route creation, key construction or filtering.
    #[error("invalid route spec: {0}")]
    InvalidSpec(String),

    /// Authority transport failure (request or query).
    #[error("transport error: {0}")]
    Transport(String),

    /// Confirmation never arrived within the wait policy window.
    #[error("confirmation wait timed out after {0:?}")]
    WaitTimeout(Duration),

    /// A commit attempt failed. For `Add` this is terminal; for `Set` it is
    /// reported after the rollback pass restored the snapshot.
    #[error("commit ({op:?}) failed: {source}")]
    CommitFailed {
        op: RouteOp,
        #[source]
        source: Box<RouteDbError>,
        /// The transaction that was being committed.
        transaction: Box<RouteState>,
    },

    /// The rollback pass itself failed. Unrecoverable; the transaction has
    /// been discarded.
    #[error("rollback failed: {source}")]
    Fatal {
        #[source]
        source: Box<RouteDbError>,
    },
}

/// Result type alias for route mirror operations.
pub type Result<T> = std::result::Result<T, RouteDbError>;
