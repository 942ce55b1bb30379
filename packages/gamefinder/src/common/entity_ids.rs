//! Typed ID definitions for the entities the matching pipeline touches.

pub use super::id::Id;

/// Marker type for game requests (one per owner per game system).
pub struct GameRequest;

/// Marker type for the opaque account that submitted a request.
pub struct Owner;

/// Typed ID for GameRequest entities.
pub type RequestId = Id<GameRequest>;

/// Typed ID for request owners. Issued by the identity layer, never by this crate.
pub type OwnerId = Id<Owner>;
