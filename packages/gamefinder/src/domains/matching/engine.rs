use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::common::RequestId;
use crate::domains::requests::error::Result;
use crate::domains::requests::{GameRequest, RequestPatch, RequestStore, Role};

/// Maintains each request's candidate-DM list.
#[derive(Clone)]
pub struct MatchEngine {
    store: Arc<dyn RequestStore>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    /// DM requests `request` can currently reach: same system, resolved, and
    /// within its travel range. DMs and unresolved requests reach nobody.
    pub async fn candidates_for(&self, request: &GameRequest) -> Result<BTreeSet<RequestId>> {
        let Some(center) = request.coordinates else {
            return Ok(BTreeSet::new());
        };
        if request.is_dm() {
            return Ok(BTreeSet::new());
        }

        let dms = self
            .store
            .find_within(
                request.system,
                Role::Dm,
                &center,
                f64::from(request.travel_range),
            )
            .await?;
        Ok(dms.into_iter().map(|dm| dm.id).collect())
    }

    /// Replace (never merge) the stored candidate list with the current
    /// reachable set, so DMs that moved away or switched system drop out.
    ///
    /// The write is a recompute-only commit and never triggers re-resolution.
    #[instrument(skip(self, request), fields(request_id = %request.id, role = %request.role))]
    pub async fn recompute_candidates(&self, request: &GameRequest) -> Result<GameRequest> {
        let candidates = self.candidates_for(request).await?;
        let outcome = self
            .store
            .update(request.id, RequestPatch::candidates(candidates))
            .await?;

        debug!(
            candidates = outcome.request.candidate_dms.len(),
            changed = !outcome.changed.is_empty(),
            "Recomputed candidate DMs"
        );
        Ok(outcome.request)
    }
}
