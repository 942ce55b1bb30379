//! End-to-end tests for the change coordinator pass: resolve, recompute,
//! cascade and group assembly against the in-memory store.

mod common;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::common::{
    address, dm_request, first_point_at_least, north_of, player_request, TestHarness,
};
use gamefinder_core::common::{GeoPoint, OwnerId, RequestId};
use gamefinder_core::domains::geocoding::{GeoResolver, GeocodeCache, DEFAULT_GEOCODE_TIMEOUT};
use gamefinder_core::domains::matching::{ChangeCoordinator, GroupEvaluation, NotificationPolicy};
use gamefinder_core::domains::requests::{
    GameRequest, GameSystem, MemoryRequestStore, NewRequest, RequestChanges, RequestError,
    RequestPatch, RequestStore, Role, UpdateOutcome,
};
use gamefinder_core::kernel::{MockNotifier, TestDependencies};
use test_context::test_context;

const ORIGIN: GeoPoint = GeoPoint {
    longitude: 0.0,
    latitude: 0.0,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// DM at the origin plus three nearby players, each on its own street.
fn place_table(ctx: &TestHarness) {
    ctx.place("dm street", ORIGIN);
    ctx.place("p1 street", GeoPoint::new(0.0, 0.05));
    ctx.place("p2 street", GeoPoint::new(0.05, 0.0));
    ctx.place("p3 street", GeoPoint::new(-0.05, -0.05));
}

async fn create_dm(ctx: &TestHarness, street: &str) -> RequestId {
    ctx.coordinator
        .create(dm_request(OwnerId::new(), GameSystem::FiveE, 50, street))
        .await
        .unwrap()
        .request
        .id
}

async fn create_player(ctx: &TestHarness, street: &str, range: u32) -> RequestId {
    ctx.coordinator
        .create(player_request(OwnerId::new(), GameSystem::FiveE, range, street))
        .await
        .unwrap()
        .request
        .id
}

/// Store that loses one record right after handing it out, as if another
/// writer deleted it between a read and the following commit.
struct VanishingStore {
    inner: Arc<MemoryRequestStore>,
    doomed: Mutex<Option<RequestId>>,
}

impl VanishingStore {
    fn new(inner: Arc<MemoryRequestStore>) -> Self {
        Self {
            inner,
            doomed: Mutex::new(None),
        }
    }

    fn doom(&self, id: RequestId) {
        *self.doomed.lock().unwrap() = Some(id);
    }
}

#[async_trait]
impl RequestStore for VanishingStore {
    async fn find(&self, id: RequestId) -> Result<Option<GameRequest>, RequestError> {
        let found = self.inner.find(id).await?;
        let hit = {
            let mut doomed = self.doomed.lock().unwrap();
            if *doomed == Some(id) {
                doomed.take()
            } else {
                None
            }
        };
        if hit.is_some() {
            self.inner.delete(id).await?;
        }
        Ok(found)
    }

    async fn create(&self, new: NewRequest) -> Result<GameRequest, RequestError> {
        self.inner.create(new).await
    }

    async fn update(
        &self,
        id: RequestId,
        patch: RequestPatch,
    ) -> Result<UpdateOutcome, RequestError> {
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: RequestId) -> Result<(), RequestError> {
        self.inner.delete(id).await
    }

    async fn find_within(
        &self,
        system: GameSystem,
        role: Role,
        center: &GeoPoint,
        radius_miles: f64,
    ) -> Result<Vec<GameRequest>, RequestError> {
        self.inner.find_within(system, role, center, radius_miles).await
    }

    async fn find_by_candidate(&self, dm_id: RequestId) -> Result<Vec<GameRequest>, RequestError> {
        self.inner.find_by_candidate(dm_id).await
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<GameRequest>, RequestError> {
        self.inner.list_by_owner(owner).await
    }
}

// ============================================================================
// Group assembly
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_third_player_triggers_exactly_one_notification(ctx: &mut TestHarness) {
    place_table(ctx);
    let dm_owner = OwnerId::new();
    let dm = ctx
        .coordinator
        .create(dm_request(dm_owner, GameSystem::FiveE, 50, "dm street"))
        .await
        .unwrap()
        .request;

    let p1 = create_player(ctx, "p1 street", 50).await;
    let p2 = create_player(ctx, "p2 street", 50).await;
    assert_eq!(ctx.sent_count(), 0, "two players is below quorum");

    let report = ctx
        .coordinator
        .create(player_request(OwnerId::new(), GameSystem::FiveE, 50, "p3 street"))
        .await
        .unwrap();
    let p3 = report.request.id;

    assert_eq!(report.notified(), 1);
    let sent = ctx.deps.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, dm_owner);
    assert_eq!(sent[0].data["dm_id"], serde_json::json!(dm.id));
    assert_eq!(
        sent[0].data["player_ids"],
        serde_json::json!([p1, p2, p3])
    );

    let group = report.groups().next().unwrap();
    assert_eq!(group.dm_id, dm.id);
    assert_eq!(group.player_ids, vec![p1, p2, p3]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_mismatched_system_never_joins_pool(ctx: &mut TestHarness) {
    place_table(ctx);
    ctx.place("p4 street", ORIGIN);
    let dm = create_dm(ctx, "dm street").await;
    create_player(ctx, "p1 street", 50).await;
    create_player(ctx, "p2 street", 50).await;

    let p4 = ctx
        .coordinator
        .create(player_request(OwnerId::new(), GameSystem::Pathfinder, 500, "p4 street"))
        .await
        .unwrap();

    assert!(p4.request.candidate_dms.is_empty());
    let pool = ctx.deps.store.find_by_candidate(dm).await.unwrap();
    assert_eq!(pool.len(), 2);
    assert!(pool.iter().all(|p| p.id != p4.request.id));
    assert_eq!(ctx.sent_count(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_default_policy_renotifies_on_every_pass(ctx: &mut TestHarness) {
    place_table(ctx);
    create_dm(ctx, "dm street").await;
    let p1 = create_player(ctx, "p1 street", 50).await;
    create_player(ctx, "p2 street", 50).await;
    create_player(ctx, "p3 street", 50).await;
    assert_eq!(ctx.sent_count(), 1);

    // Renaming is not a location change, but the pass still evaluates the DM
    let report = ctx
        .coordinator
        .update(p1, RequestChanges::default().name("renamed"))
        .await
        .unwrap();

    assert!(!report.location_changed);
    assert_eq!(report.notified(), 1);
    assert_eq!(ctx.sent_count(), 2);
}

#[tokio::test]
async fn test_pool_change_policy_suppresses_repeat_notifications() {
    let ctx = TestHarness::with_policy(NotificationPolicy::OnPoolChange);
    place_table(&ctx);
    ctx.place("p4 street", GeoPoint::new(0.02, 0.02));
    create_dm(&ctx, "dm street").await;
    let p1 = create_player(&ctx, "p1 street", 50).await;
    create_player(&ctx, "p2 street", 50).await;
    create_player(&ctx, "p3 street", 50).await;

    let report = ctx
        .coordinator
        .update(p1, RequestChanges::default().name("renamed"))
        .await
        .unwrap();
    assert!(matches!(
        report.evaluations.as_slice(),
        [GroupEvaluation::Suppressed(_)]
    ));
    assert_eq!(ctx.sent_count(), 1);

    // A fourth player changes the group, so it is announced again
    create_player(&ctx, "p4 street", 50).await;
    assert_eq!(ctx.sent_count(), 2);
}

#[tokio::test]
async fn test_notifier_failure_does_not_fail_commit() {
    let ctx = TestHarness::with_deps(
        TestDependencies::new().mock_notifier(MockNotifier::new().failing()),
    );
    place_table(&ctx);
    create_dm(&ctx, "dm street").await;
    create_player(&ctx, "p1 street", 50).await;
    create_player(&ctx, "p2 street", 50).await;

    let report = ctx
        .coordinator
        .create(player_request(OwnerId::new(), GameSystem::FiveE, 50, "p3 street"))
        .await
        .expect("commit must succeed when the transport fails");

    assert_eq!(report.failed(), 1);
    assert_eq!(report.notified(), 0);
    assert!(ctx.deps.store.find(report.request.id).await.unwrap().is_some());
    assert_eq!(ctx.deps.notifier.sent_count(), 1, "send was attempted");
}

// ============================================================================
// Resolution
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_unresolved_address_is_excluded_everywhere(ctx: &mut TestHarness) {
    ctx.place("dm street", ORIGIN);
    create_dm(ctx, "dm street").await;

    let report = ctx
        .coordinator
        .create(dm_request(OwnerId::new(), GameSystem::FiveE, 50, "nowhere"))
        .await
        .unwrap();
    let player = ctx
        .coordinator
        .create(player_request(OwnerId::new(), GameSystem::FiveE, 500, "also nowhere"))
        .await
        .unwrap();

    assert!(!report.resolved);
    assert!(report.request.coordinates.is_none());
    assert!(player.request.coordinates.is_none());
    assert!(player.request.candidate_dms.is_empty());

    let dms = ctx
        .deps
        .store
        .find_within(GameSystem::FiveE, Role::Dm, &ORIGIN, 500.0)
        .await
        .unwrap();
    assert_eq!(dms.len(), 1);
    assert!(dms.iter().all(|d| d.id != report.request.id));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_fixing_address_resolves_and_matches(ctx: &mut TestHarness) {
    ctx.place("dm street", ORIGIN);
    ctx.place("p1 street", GeoPoint::new(0.0, 0.05));
    let dm = create_dm(ctx, "dm street").await;
    let player = create_player(ctx, "typo street", 50).await;

    let report = ctx
        .coordinator
        .update(player, RequestChanges::default().address(address("p1 street")))
        .await
        .unwrap();

    assert!(report.location_changed);
    assert!(report.resolved);
    assert_eq!(report.request.candidate_dms, BTreeSet::from([dm]));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_travel_range_change_recomputes_without_resolving(ctx: &mut TestHarness) {
    ctx.place("dm street", ORIGIN);
    // ~69 miles from the DM
    ctx.place("p1 street", GeoPoint::new(0.0, 1.0));
    let dm = create_dm(ctx, "dm street").await;
    let player = create_player(ctx, "p1 street", 50).await;
    let calls = ctx.deps.geocoder.call_count();

    let report = ctx
        .coordinator
        .update(player, RequestChanges::default().travel_range(100))
        .await
        .unwrap();

    assert!(!report.location_changed);
    assert_eq!(ctx.deps.geocoder.call_count(), calls);
    assert_eq!(report.request.candidate_dms, BTreeSet::from([dm]));
}

// ============================================================================
// Cascade
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_dm_move_cascades_strictly_inside_500_miles(ctx: &mut TestHarness) {
    // DM starts far from everyone, then moves to the origin
    ctx.place("dm street", GeoPoint::new(120.0, 0.0));
    ctx.place("new dm street", ORIGIN);
    let near = north_of(ORIGIN, 499.999);
    let edge = first_point_at_least(ORIGIN, 500.0);
    assert!(ORIGIN.distance_miles(&near) < 500.0);
    assert!(ORIGIN.distance_miles(&edge) >= 500.0);
    ctx.place("near street", near);
    ctx.place("edge street", edge);

    let dm = create_dm(ctx, "dm street").await;
    let near_player = create_player(ctx, "near street", 500).await;
    let edge_player = create_player(ctx, "edge street", 500).await;

    let report = ctx
        .coordinator
        .update(dm, RequestChanges::default().address(address("new dm street")))
        .await
        .unwrap();

    assert!(report.cascaded.contains(&near_player));
    assert!(!report.cascaded.contains(&edge_player));
    let near_after = ctx.deps.store.get(near_player).await.unwrap();
    assert_eq!(near_after.candidate_dms, BTreeSet::from([dm]));
    let edge_after = ctx.deps.store.get(edge_player).await.unwrap();
    assert!(edge_after.candidate_dms.is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_dm_moving_away_drops_stale_candidates(ctx: &mut TestHarness) {
    place_table(ctx);
    ctx.place("far street", GeoPoint::new(10.0, 10.0));
    let dm = create_dm(ctx, "dm street").await;
    let player = create_player(ctx, "p1 street", 50).await;
    assert_eq!(
        ctx.deps.store.get(player).await.unwrap().candidate_dms,
        BTreeSet::from([dm])
    );

    let report = ctx
        .coordinator
        .update(dm, RequestChanges::default().address(address("far street")))
        .await
        .unwrap();

    assert!(report.cascaded.contains(&player));
    assert!(ctx.deps.store.get(player).await.unwrap().candidate_dms.is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_dm_switching_role_or_system_releases_players(ctx: &mut TestHarness) {
    place_table(ctx);
    let dm = create_dm(ctx, "dm street").await;
    let p1 = create_player(ctx, "p1 street", 50).await;

    ctx.coordinator
        .update(dm, RequestChanges::default().system(GameSystem::Pathfinder))
        .await
        .unwrap();
    assert!(ctx.deps.store.get(p1).await.unwrap().candidate_dms.is_empty());

    ctx.coordinator
        .update(dm, RequestChanges::default().system(GameSystem::FiveE))
        .await
        .unwrap();
    assert_eq!(
        ctx.deps.store.get(p1).await.unwrap().candidate_dms,
        BTreeSet::from([dm])
    );

    let report = ctx
        .coordinator
        .update(dm, RequestChanges::default().role(Role::Player))
        .await
        .unwrap();
    assert_eq!(report.cascaded, vec![p1]);
    assert!(ctx.deps.store.get(p1).await.unwrap().candidate_dms.is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_new_dm_reaches_existing_players(ctx: &mut TestHarness) {
    place_table(ctx);
    let p1 = create_player(ctx, "p1 street", 50).await;
    let p2 = create_player(ctx, "p2 street", 50).await;
    let p3 = create_player(ctx, "p3 street", 50).await;
    assert_eq!(ctx.sent_count(), 0);

    let report = ctx
        .coordinator
        .create(dm_request(OwnerId::new(), GameSystem::FiveE, 1, "dm street"))
        .await
        .unwrap();

    assert_eq!(report.cascaded, vec![p1, p2, p3]);
    assert_eq!(report.notified(), 1);
}

#[tokio::test]
async fn test_cascade_target_deleted_mid_pass_does_not_fail_commit() {
    let ctx = TestHarness::new();
    place_table(&ctx);
    let p1 = create_player(&ctx, "p1 street", 50).await;
    let p2 = create_player(&ctx, "p2 street", 50).await;

    let store = Arc::new(VanishingStore::new(ctx.deps.store.clone()));
    let resolver = GeoResolver::new(
        ctx.deps.geocoder.clone(),
        GeocodeCache::default(),
        DEFAULT_GEOCODE_TIMEOUT,
    );
    let coordinator = ChangeCoordinator::new(
        store.clone(),
        Arc::new(resolver),
        ctx.deps.notifier.clone(),
        NotificationPolicy::default(),
    );
    store.doom(p1);

    let report = coordinator
        .create(dm_request(OwnerId::new(), GameSystem::FiveE, 1, "dm street"))
        .await
        .expect("commit must stand when a cascade target disappears");

    assert_eq!(report.cascade_failed, vec![p1]);
    assert_eq!(report.cascaded, vec![p2]);
    assert!(!report.is_complete());
    assert!(report.resolved);

    let dm = report.request.id;
    assert!(ctx.deps.store.find(dm).await.unwrap().is_some());
    assert!(ctx.deps.store.find(p1).await.unwrap().is_none());
    assert_eq!(
        ctx.deps.store.get(p2).await.unwrap().candidate_dms,
        BTreeSet::from([dm])
    );
    assert_eq!(
        report.evaluations,
        vec![GroupEvaluation::BelowQuorum { dm_id: dm, pool_size: 1 }]
    );
}

// ============================================================================
// Deletion
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_deleting_dm_purges_every_candidate_list(ctx: &mut TestHarness) {
    place_table(ctx);
    let dm = create_dm(ctx, "dm street").await;
    let players = vec![
        create_player(ctx, "p1 street", 50).await,
        create_player(ctx, "p2 street", 50).await,
    ];

    let deleted = ctx.coordinator.delete(dm).await.unwrap();

    assert_eq!(deleted.id, dm);
    for player in players {
        assert!(ctx.deps.store.get(player).await.unwrap().candidate_dms.is_empty());
    }
    assert!(matches!(
        ctx.coordinator.delete(dm).await,
        Err(RequestError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_deleting_dm_clears_notification_memory() {
    let ctx = TestHarness::with_policy(NotificationPolicy::OnPoolChange);
    place_table(&ctx);
    let dm = create_dm(&ctx, "dm street").await;
    let pool = BTreeSet::from([
        create_player(&ctx, "p1 street", 50).await,
        create_player(&ctx, "p2 street", 50).await,
        create_player(&ctx, "p3 street", 50).await,
    ]);
    assert_eq!(ctx.coordinator.groups().last_notified(dm), Some(pool));

    ctx.coordinator.delete(dm).await.unwrap();

    assert_eq!(ctx.coordinator.groups().last_notified(dm), None);
}

// ============================================================================
// Owner scoping and validation
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_owner_scoped_access(ctx: &mut TestHarness) {
    ctx.place("dm street", ORIGIN);
    let owner = OwnerId::new();
    let stranger = OwnerId::new();
    let mine = ctx
        .coordinator
        .create(dm_request(owner, GameSystem::FiveE, 10, "dm street"))
        .await
        .unwrap()
        .request;
    ctx.coordinator
        .create(player_request(owner, GameSystem::FourE, 10, "dm street"))
        .await
        .unwrap();

    assert_eq!(ctx.coordinator.list_for_owner(owner).await.unwrap().len(), 2);
    assert!(ctx.coordinator.list_for_owner(stranger).await.unwrap().is_empty());
    assert_eq!(ctx.coordinator.get_owned(owner, mine.id).await.unwrap().id, mine.id);

    assert!(matches!(
        ctx.coordinator.get_owned(stranger, mine.id).await,
        Err(RequestError::NotFound(_))
    ));
    assert!(matches!(
        ctx.coordinator
            .update_owned(stranger, mine.id, RequestChanges::default().name("mine now"))
            .await,
        Err(RequestError::NotFound(_))
    ));
    assert!(matches!(
        ctx.coordinator.delete_owned(stranger, mine.id).await,
        Err(RequestError::NotFound(_))
    ));

    ctx.coordinator.delete_owned(owner, mine.id).await.unwrap();
    assert_eq!(ctx.coordinator.list_for_owner(owner).await.unwrap().len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_duplicate_system_and_bad_range_are_rejected(ctx: &mut TestHarness) {
    let owner = OwnerId::new();
    ctx.coordinator
        .create(player_request(owner, GameSystem::FiveE, 10, "a street"))
        .await
        .unwrap();

    assert!(matches!(
        ctx.coordinator
            .create(dm_request(owner, GameSystem::FiveE, 10, "b street"))
            .await,
        Err(RequestError::Conflict { .. })
    ));
    assert!(matches!(
        ctx.coordinator
            .create(player_request(owner, GameSystem::FourE, 501, "c street"))
            .await,
        Err(RequestError::InvalidTravelRange { got: 501, .. })
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_leave_consistent_candidates() {
    let ctx = Arc::new(TestHarness::new());
    let mut streets = Vec::new();
    for i in 0..12 {
        let street = format!("{} grid street", i);
        let point = GeoPoint::new(f64::from(i % 4) * 0.3, f64::from(i / 4) * 0.3);
        ctx.place(&street, point);
        streets.push((street, i % 3 == 0));
    }

    let mut handles = Vec::new();
    for (street, is_dm) in streets {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            let new = if is_dm {
                dm_request(OwnerId::new(), GameSystem::FiveE, 1, &street)
            } else {
                player_request(OwnerId::new(), GameSystem::FiveE, 30, &street)
            };
            ctx.coordinator.create(new).await.unwrap().request.id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    let mut all = Vec::new();
    for id in ids {
        all.push(ctx.deps.store.get(id).await.unwrap());
    }
    for player in all.iter().filter(|r| !r.is_dm()) {
        let expected: BTreeSet<RequestId> = all
            .iter()
            .filter(|dm| dm.is_dm())
            .filter(|dm| {
                player.distance_to(dm).unwrap() <= f64::from(player.travel_range)
            })
            .map(|dm| dm.id)
            .collect();
        assert_eq!(player.candidate_dms, expected, "player {}", player.id);
    }
}
