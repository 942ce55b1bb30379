//! In-memory request store for tests, simulation and single-process deployments.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use super::RequestStore;
use crate::common::{GeoPoint, OwnerId, RequestId};
use crate::domains::requests::error::{RequestError, Result};
use crate::domains::requests::models::{
    GameRequest, GameSystem, NewRequest, RequestPatch, Role, UpdateOutcome,
};

/// Requests keyed by id. The map is ordered, so every listing comes back in
/// ascending id order without an explicit sort.
pub struct MemoryRequestStore {
    requests: RwLock<BTreeMap<RequestId, GameRequest>>,
}

impl Default for MemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored requests.
    pub fn len(&self) -> usize {
        self.requests.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, keep: impl Fn(&GameRequest) -> bool) -> Result<Vec<GameRequest>> {
        Ok(self
            .requests
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RequestError {
    RequestError::storage("request store lock poisoned")
}

fn ensure_unique(
    requests: &BTreeMap<RequestId, GameRequest>,
    owner: OwnerId,
    system: GameSystem,
    except: Option<RequestId>,
) -> Result<()> {
    let taken = requests
        .values()
        .any(|r| r.owner == owner && r.system == system && Some(r.id) != except);
    if taken {
        return Err(RequestError::Conflict { owner, system });
    }
    Ok(())
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn find(&self, id: RequestId) -> Result<Option<GameRequest>> {
        Ok(self.requests.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn create(&self, new: NewRequest) -> Result<GameRequest> {
        new.validate()?;
        let mut requests = self.requests.write().map_err(poisoned)?;
        ensure_unique(&requests, new.owner, new.system, None)?;

        let request = GameRequest::from_new(new);
        requests.insert(request.id, request.clone());
        debug!(request_id = %request.id, system = %request.system, "Stored new request");
        Ok(request)
    }

    async fn update(&self, id: RequestId, patch: RequestPatch) -> Result<UpdateOutcome> {
        patch.changes.validate()?;
        let mut requests = self.requests.write().map_err(poisoned)?;

        let current = requests.get(&id).ok_or(RequestError::NotFound(id))?;
        if let Some(system) = patch.changes.system {
            ensure_unique(&requests, current.owner, system, Some(id))?;
        }

        // Apply to a copy so a rejected patch leaves the record untouched
        let mut next = current.clone();
        let changed = next.apply(&patch);
        if !changed.is_empty() {
            requests.insert(id, next.clone());
        }
        Ok(UpdateOutcome {
            request: next,
            changed,
        })
    }

    async fn delete(&self, id: RequestId) -> Result<()> {
        let mut requests = self.requests.write().map_err(poisoned)?;
        requests.remove(&id).ok_or(RequestError::NotFound(id))?;

        let mut purged = 0;
        for other in requests.values_mut() {
            if other.candidate_dms.remove(&id) {
                other.updated_at = chrono::Utc::now();
                purged += 1;
            }
        }
        debug!(request_id = %id, purged, "Deleted request");
        Ok(())
    }

    async fn find_within(
        &self,
        system: GameSystem,
        role: Role,
        center: &GeoPoint,
        radius_miles: f64,
    ) -> Result<Vec<GameRequest>> {
        self.select(|r| {
            r.system == system
                && r.role == role
                && r.coordinates
                    .map(|point| center.within_miles(&point, radius_miles))
                    .unwrap_or(false)
        })
    }

    async fn find_by_candidate(&self, dm_id: RequestId) -> Result<Vec<GameRequest>> {
        self.select(|r| r.candidate_dms.contains(&dm_id))
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<GameRequest>> {
        self.select(|r| r.owner == owner)
    }
}
