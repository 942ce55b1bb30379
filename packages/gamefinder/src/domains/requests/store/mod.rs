//! Storage seam for game requests.
//!
//! The pipeline never shares in-memory request objects between components;
//! everything goes through this trait. Each commit is atomic per record:
//! a reader never sees `candidate_dms` from one commit next to fields from
//! another.

mod memory;
mod postgres;

pub use memory::MemoryRequestStore;
pub use postgres::PostgresRequestStore;

use async_trait::async_trait;

use crate::common::{GeoPoint, OwnerId, RequestId};
use crate::domains::requests::error::{RequestError, Result};
use crate::domains::requests::models::{
    GameRequest, GameSystem, NewRequest, RequestPatch, Role, UpdateOutcome,
};

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Point lookup.
    async fn find(&self, id: RequestId) -> Result<Option<GameRequest>>;

    /// Point lookup that treats absence as an error.
    async fn get(&self, id: RequestId) -> Result<GameRequest> {
        self.find(id).await?.ok_or(RequestError::NotFound(id))
    }

    /// Insert a new request with unresolved coordinates.
    ///
    /// Fails with `Conflict` when the owner already has a request for the system.
    async fn create(&self, new: NewRequest) -> Result<GameRequest>;

    /// Apply a patch and report which fields changed value.
    async fn update(&self, id: RequestId, patch: RequestPatch) -> Result<UpdateOutcome>;

    /// Remove a request and purge its id from every other candidate list.
    async fn delete(&self, id: RequestId) -> Result<()>;

    /// Resolved requests of `system` and `role` within `radius_miles` of
    /// `center` (inclusive), in ascending id order.
    async fn find_within(
        &self,
        system: GameSystem,
        role: Role,
        center: &GeoPoint,
        radius_miles: f64,
    ) -> Result<Vec<GameRequest>>;

    /// Requests whose candidate list currently contains `dm_id`, ascending id.
    async fn find_by_candidate(&self, dm_id: RequestId) -> Result<Vec<GameRequest>>;

    /// All requests submitted by `owner`, ascending id.
    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<GameRequest>>;
}
