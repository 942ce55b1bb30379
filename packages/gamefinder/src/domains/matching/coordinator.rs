//! Per-mutation orchestration: classify, resolve, recompute, cascade, assemble.
//!
//! Every create/update/delete runs one full pass, cascade included, while
//! holding the coordinator's pass lock. Passes from concurrent callers queue
//! behind each other, so cascades never interleave and any notification a
//! pass triggers has been attempted by the time the call returns.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::engine::MatchEngine;
use super::groups::{GroupAssembler, GroupEvaluation, NotificationPolicy};
use super::notification::{GroupResult, Notifier};
use crate::common::{OwnerId, RequestId};
use crate::domains::geocoding::GeoResolver;
use crate::domains::requests::error::{RequestError, Result};
use crate::domains::requests::{
    GameRequest, NewRequest, RequestChanges, RequestPatch, RequestStore, Role,
};
use crate::kernel::BaseNotifier;

/// Players strictly closer than this to a changed DM are re-evaluated.
/// No travel range exceeds it, so nobody farther away can be affected.
pub const CASCADE_RADIUS_MILES: f64 = 500.0;

/// A step after the subject's commit that did not complete. The commit
/// itself stands; these are reported, never returned as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStep {
    StoreCoordinates,
    RecomputeSelf,
    CascadeQuery,
    Evaluate(RequestId),
}

/// What one coordinator pass did.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// The subject as committed at the end of the pass
    pub request: GameRequest,
    pub location_changed: bool,
    pub resolved: bool,
    /// Requests recomputed on behalf of the subject, ascending id
    pub cascaded: Vec<RequestId>,
    /// Cascade targets whose recompute failed (e.g. deleted mid-pass)
    pub cascade_failed: Vec<RequestId>,
    pub evaluations: Vec<GroupEvaluation>,
    pub failed_steps: Vec<PassStep>,
}

impl PassReport {
    pub fn groups(&self) -> impl Iterator<Item = &GroupResult> {
        self.evaluations.iter().filter_map(GroupEvaluation::group)
    }

    pub fn notified(&self) -> usize {
        self.evaluations.iter().filter(|e| e.is_notified()).count()
    }

    pub fn failed(&self) -> usize {
        self.evaluations
            .iter()
            .filter(|e| matches!(e, GroupEvaluation::NotifyFailed(_)))
            .count()
    }

    /// Every step after the commit ran to completion.
    pub fn is_complete(&self) -> bool {
        self.cascade_failed.is_empty() && self.failed_steps.is_empty()
    }
}

pub struct ChangeCoordinator {
    store: Arc<dyn RequestStore>,
    resolver: Arc<GeoResolver>,
    engine: MatchEngine,
    groups: GroupAssembler,
    pass_lock: Mutex<()>,
}

impl ChangeCoordinator {
    pub fn new(
        store: Arc<dyn RequestStore>,
        resolver: Arc<GeoResolver>,
        notifier: Arc<dyn BaseNotifier>,
        policy: NotificationPolicy,
    ) -> Self {
        Self {
            engine: MatchEngine::new(store.clone()),
            groups: GroupAssembler::new(store.clone(), Notifier::new(notifier), policy),
            store,
            resolver,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    pub fn resolver(&self) -> &GeoResolver {
        &self.resolver
    }

    pub fn groups(&self) -> &GroupAssembler {
        &self.groups
    }

    /// Submit a new request. A new request always counts as a location change.
    #[instrument(skip(self, new), fields(system = %new.system, role = %new.role))]
    pub async fn create(&self, new: NewRequest) -> Result<PassReport> {
        let _pass = self.pass_lock.lock().await;

        let request = self.store.create(new).await?;
        info!(request_id = %request.id, "Request created");
        self.run_pass(request, true, BTreeSet::new(), false).await
    }

    /// Edit a request and re-run matching for whatever the edit affects.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: RequestId, changes: RequestChanges) -> Result<PassReport> {
        let _pass = self.pass_lock.lock().await;

        let before = self.store.get(id).await?;
        // Players listing this DM before the edit may lose it afterwards
        let prior_pool = if before.is_dm() {
            self.pool_ids(id).await?
        } else {
            BTreeSet::new()
        };

        let outcome = self
            .store
            .update(id, RequestPatch::from_changes(changes))
            .await?;
        debug!(changed = ?outcome.changed.iter().collect::<Vec<_>>(), "Request updated");

        let location_changed = outcome.changed.is_location_change();
        self.run_pass(outcome.request, location_changed, prior_pool, before.is_dm())
            .await
    }

    /// Remove a request. The store purges its id from every candidate list.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: RequestId) -> Result<GameRequest> {
        let _pass = self.pass_lock.lock().await;

        let request = self.store.get(id).await?;
        let affected = if request.is_dm() {
            self.pool_ids(id).await?.len()
        } else {
            0
        };

        self.store.delete(id).await?;
        if request.is_dm() {
            self.groups.forget(id);
        }
        info!(request_id = %id, players_released = affected, "Request deleted");
        Ok(request)
    }

    // =========================================================================
    // Owner-scoped surface
    // =========================================================================

    /// Fetch a request only if `owner` submitted it. Someone else's request
    /// looks exactly like a missing one.
    pub async fn get_owned(&self, owner: OwnerId, id: RequestId) -> Result<GameRequest> {
        match self.store.find(id).await? {
            Some(request) if request.owner == owner => Ok(request),
            _ => Err(RequestError::NotFound(id)),
        }
    }

    pub async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<GameRequest>> {
        self.store.list_by_owner(owner).await
    }

    pub async fn update_owned(
        &self,
        owner: OwnerId,
        id: RequestId,
        changes: RequestChanges,
    ) -> Result<PassReport> {
        self.get_owned(owner, id).await?;
        self.update(id, changes).await
    }

    pub async fn delete_owned(&self, owner: OwnerId, id: RequestId) -> Result<GameRequest> {
        self.get_owned(owner, id).await?;
        self.delete(id).await
    }

    // =========================================================================
    // Pass
    // =========================================================================

    /// Everything after the subject's commit. Store failures here are logged
    /// and recorded in the report; the caller's commit has already landed.
    async fn run_pass(
        &self,
        subject: GameRequest,
        location_changed: bool,
        prior_pool: BTreeSet<RequestId>,
        was_dm: bool,
    ) -> Result<PassReport> {
        let mut request = subject;
        let mut failed_steps = Vec::new();

        if location_changed {
            let coordinates = self.resolver.resolve(&request.address).await;
            match self
                .store
                .update(request.id, RequestPatch::coordinates(coordinates))
                .await
            {
                Ok(outcome) => request = outcome.request,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Failed to store coordinates");
                    failed_steps.push(PassStep::StoreCoordinates);
                }
            }
        }

        // Unresolved requests and DMs come back with an empty list
        match self.engine.recompute_candidates(&request).await {
            Ok(updated) => request = updated,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Failed to recompute candidates");
                failed_steps.push(PassStep::RecomputeSelf);
            }
        }

        let (cascaded, cascade_failed) = if request.is_dm() || was_dm {
            self.cascade(&request, prior_pool, &mut failed_steps).await
        } else {
            (Vec::new(), Vec::new())
        };

        let touched: BTreeSet<RequestId> = match request.role {
            Role::Dm => BTreeSet::from([request.id]),
            Role::Player => request.candidate_dms.clone(),
        };
        let mut evaluations = Vec::with_capacity(touched.len());
        for dm_id in touched {
            match self.groups.evaluate(dm_id).await {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(e) => {
                    warn!(%dm_id, error = %e, "Failed to evaluate group");
                    failed_steps.push(PassStep::Evaluate(dm_id));
                }
            }
        }

        let report = PassReport {
            resolved: request.is_resolved(),
            request,
            location_changed,
            cascaded,
            cascade_failed,
            evaluations,
            failed_steps,
        };
        info!(
            request_id = %report.request.id,
            location_changed = report.location_changed,
            resolved = report.resolved,
            candidates = report.request.candidate_dms.len(),
            cascaded = report.cascaded.len(),
            cascade_failed = report.cascade_failed.len(),
            notified = report.notified(),
            complete = report.is_complete(),
            "Pass complete"
        );
        Ok(report)
    }

    /// Recompute every player the DM's change can reach: those near its
    /// current location plus those that listed it before. One level only;
    /// these recomputations never cascade further.
    ///
    /// Returns (recomputed, failed). A failed target does not stop the rest.
    async fn cascade(
        &self,
        dm: &GameRequest,
        prior_pool: BTreeSet<RequestId>,
        failed_steps: &mut Vec<PassStep>,
    ) -> (Vec<RequestId>, Vec<RequestId>) {
        let mut targets = prior_pool;

        if dm.is_dm() {
            if let Some(center) = dm.coordinates {
                match self
                    .store
                    .find_within(dm.system, Role::Player, &center, CASCADE_RADIUS_MILES)
                    .await
                {
                    Ok(nearby) => targets.extend(
                        nearby
                            .into_iter()
                            .filter(|p| {
                                p.coordinates
                                    .map(|at| center.distance_miles(&at) < CASCADE_RADIUS_MILES)
                                    .unwrap_or(false)
                            })
                            .map(|p| p.id),
                    ),
                    Err(e) => {
                        warn!(dm_id = %dm.id, error = %e, "Cascade query failed");
                        failed_steps.push(PassStep::CascadeQuery);
                    }
                }
            }
        }

        let mut cascaded = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();
        for id in targets {
            match self.recompute_target(id).await {
                Ok(true) => cascaded.push(id),
                Ok(false) => {}
                Err(e) => {
                    warn!(request_id = %id, error = %e, "Cascade recompute failed");
                    failed.push(id);
                }
            }
        }
        debug!(
            dm_id = %dm.id,
            cascaded = cascaded.len(),
            failed = failed.len(),
            "Cascade complete"
        );
        (cascaded, failed)
    }

    /// Re-read so the recompute sees the latest committed record. `false`
    /// when the target is already gone.
    async fn recompute_target(&self, id: RequestId) -> Result<bool> {
        let Some(player) = self.store.find(id).await? else {
            return Ok(false);
        };
        self.engine.recompute_candidates(&player).await?;
        Ok(true)
    }

    async fn pool_ids(&self, dm_id: RequestId) -> Result<BTreeSet<RequestId>> {
        Ok(self
            .store
            .find_by_candidate(dm_id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect())
    }
}
