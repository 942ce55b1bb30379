//! Typed errors for request persistence.

use thiserror::Error;

use crate::common::{OwnerId, RequestId};
use crate::domains::requests::models::GameSystem;

/// Errors surfaced to whoever submitted a request mutation.
///
/// Geocoding and notification outcomes never show up here: they are not part
/// of the commit contract.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Owner already has an active request for this system
    #[error("owner {owner} already has a request for {system}")]
    Conflict { owner: OwnerId, system: GameSystem },

    /// No request with this id (or not visible to this owner)
    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("travel range must be between 1 and {max} miles, got {got}")]
    InvalidTravelRange { got: u32, max: u32 },

    #[error("unknown game system: {0}")]
    InvalidSystem(String),

    #[error("unknown role: {0}")]
    InvalidRole(String),

    /// Storage backend failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RequestError {
    pub fn storage(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(e.into())
    }
}

impl From<sqlx::Error> for RequestError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

pub type Result<T, E = RequestError> = std::result::Result<T, E>;
