// Common types and utilities shared across the matching pipeline

pub mod entity_ids;
pub mod geo;
pub mod id;

pub use entity_ids::*;
pub use geo::*;
pub use id::Id;
