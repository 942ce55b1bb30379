//! Game requests: the records the matching pipeline reads and rewrites.

pub mod error;
pub mod models;
pub mod store;

pub use error::RequestError;
pub use models::{
    Address, ChangedFields, GameRequest, GameSystem, NewRequest, RequestChanges, RequestField,
    RequestPatch, Role, UpdateOutcome,
};
pub use store::{MemoryRequestStore, PostgresRequestStore, RequestStore};
