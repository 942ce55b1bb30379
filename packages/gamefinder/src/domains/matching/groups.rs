use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument};

use super::notification::{GroupResult, Notifier};
use crate::common::RequestId;
use crate::domains::requests::error::Result;
use crate::domains::requests::RequestStore;

/// Players needed before a DM's group is worth announcing (DM + 3 = table of 4).
pub const QUORUM_SIZE: usize = 3;

/// When a DM hears about a group that has already been announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPolicy {
    /// Notify on every evaluation that reaches quorum.
    #[default]
    EveryEvaluation,
    /// Notify only when the player set differs from the last one sent.
    OnPoolChange,
}

impl FromStr for NotificationPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every_evaluation" | "always" => Ok(Self::EveryEvaluation),
            "on_pool_change" | "dedup" => Ok(Self::OnPoolChange),
            other => anyhow::bail!("unknown notification policy: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvaluation {
    /// The id is gone or no longer a DM.
    Skipped { dm_id: RequestId },
    BelowQuorum { dm_id: RequestId, pool_size: usize },
    Notified(GroupResult),
    /// Quorum reached, but this exact group was already announced.
    Suppressed(GroupResult),
    /// Quorum reached; the transport failed. The commit stands.
    NotifyFailed(GroupResult),
}

impl GroupEvaluation {
    pub fn dm_id(&self) -> RequestId {
        match self {
            Self::Skipped { dm_id } | Self::BelowQuorum { dm_id, .. } => *dm_id,
            Self::Notified(g) | Self::Suppressed(g) | Self::NotifyFailed(g) => g.dm_id,
        }
    }

    /// The group, if quorum was reached.
    pub fn group(&self) -> Option<&GroupResult> {
        match self {
            Self::Notified(g) | Self::Suppressed(g) | Self::NotifyFailed(g) => Some(g),
            _ => None,
        }
    }

    pub fn is_notified(&self) -> bool {
        matches!(self, Self::Notified(_))
    }
}

/// Checks DM pools for quorum and forwards complete groups to the notifier.
pub struct GroupAssembler {
    store: Arc<dyn RequestStore>,
    notifier: Notifier,
    policy: NotificationPolicy,
    last_notified: Mutex<HashMap<RequestId, BTreeSet<RequestId>>>,
}

impl GroupAssembler {
    pub fn new(store: Arc<dyn RequestStore>, notifier: Notifier, policy: NotificationPolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> NotificationPolicy {
        self.policy
    }

    /// The pool last notified for `dm_id`, if any send is remembered.
    pub fn last_notified(&self, dm_id: RequestId) -> Option<BTreeSet<RequestId>> {
        self.last_notified
            .lock()
            .ok()
            .and_then(|last| last.get(&dm_id).cloned())
    }

    /// Drop dedup memory for a DM that no longer exists.
    pub fn forget(&self, dm_id: RequestId) {
        if let Ok(mut last) = self.last_notified.lock() {
            last.remove(&dm_id);
        }
    }

    /// Only store errors propagate; notifier failures are logged and reported
    /// as `NotifyFailed`.
    #[instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn evaluate(&self, dm_id: RequestId) -> Result<GroupEvaluation> {
        let dm = match self.store.find(dm_id).await? {
            Some(dm) if dm.is_dm() => dm,
            _ => {
                debug!(%dm_id, "DM not found, skipping group evaluation");
                self.forget(dm_id);
                return Ok(GroupEvaluation::Skipped { dm_id });
            }
        };

        let players = self.store.find_by_candidate(dm_id).await?;
        if players.len() < QUORUM_SIZE {
            debug!(pool_size = players.len(), "Below quorum");
            return Ok(GroupEvaluation::BelowQuorum {
                dm_id,
                pool_size: players.len(),
            });
        }

        let group = GroupResult {
            dm_id,
            player_ids: players.iter().map(|p| p.id).collect(),
        };
        let pool: BTreeSet<RequestId> = group.player_ids.iter().copied().collect();

        if self.policy == NotificationPolicy::OnPoolChange && self.already_sent(dm_id, &pool) {
            debug!(pool_size = pool.len(), "Group unchanged since last notification");
            return Ok(GroupEvaluation::Suppressed(group));
        }

        match self.notifier.notify(&dm, &players).await {
            Ok(_) => {
                info!(pool_size = pool.len(), "Group found, DM notified");
                if let Ok(mut last) = self.last_notified.lock() {
                    last.insert(dm_id, pool);
                }
                Ok(GroupEvaluation::Notified(group))
            }
            Err(e) => {
                error!(error = %e, "Failed to send group notification");
                Ok(GroupEvaluation::NotifyFailed(group))
            }
        }
    }

    fn already_sent(&self, dm_id: RequestId, pool: &BTreeSet<RequestId>) -> bool {
        self.last_notified
            .lock()
            .map(|last| last.get(&dm_id) == Some(pool))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{GeoPoint, OwnerId};
    use crate::domains::requests::{
        Address, GameRequest, GameSystem, MemoryRequestStore, NewRequest, RequestPatch, Role,
    };
    use crate::kernel::test_dependencies::MockNotifier;

    struct Fixture {
        store: Arc<MemoryRequestStore>,
        notifier: Arc<MockNotifier>,
        dm: GameRequest,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(MemoryRequestStore::new());
            let dm = store
                .create(NewRequest::new(
                    OwnerId::new(),
                    "Tomb of Annihilation",
                    GameSystem::FiveE,
                    Role::Dm,
                    Address::default(),
                ))
                .await
                .unwrap();
            Self {
                store,
                notifier: Arc::new(MockNotifier::new()),
                dm,
            }
        }

        fn assembler(&self, policy: NotificationPolicy) -> GroupAssembler {
            GroupAssembler::new(
                self.store.clone(),
                Notifier::new(self.notifier.clone()),
                policy,
            )
        }

        async fn join(&self, name: &str) -> GameRequest {
            let player = self
                .store
                .create(NewRequest::new(
                    OwnerId::new(),
                    name,
                    GameSystem::FiveE,
                    Role::Player,
                    Address::default(),
                ))
                .await
                .unwrap();
            let mut patch = RequestPatch::coordinates(Some(GeoPoint::new(0.0, 0.0)));
            patch.candidate_dms = Some(BTreeSet::from([self.dm.id]));
            self.store.update(player.id, patch).await.unwrap().request
        }
    }

    #[tokio::test]
    async fn test_two_players_is_below_quorum() {
        let fx = Fixture::new().await;
        fx.join("a").await;
        fx.join("b").await;

        let result = fx.assembler(NotificationPolicy::default()).evaluate(fx.dm.id).await.unwrap();

        assert_eq!(
            result,
            GroupEvaluation::BelowQuorum {
                dm_id: fx.dm.id,
                pool_size: 2
            }
        );
        assert_eq!(fx.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_third_player_reaches_quorum() {
        let fx = Fixture::new().await;
        let a = fx.join("a").await;
        let b = fx.join("b").await;
        let c = fx.join("c").await;

        let result = fx.assembler(NotificationPolicy::default()).evaluate(fx.dm.id).await.unwrap();

        let group = result.group().unwrap();
        assert!(result.is_notified());
        assert_eq!(group.player_ids, vec![a.id, b.id, c.id]);
        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, fx.dm.owner);
    }

    #[tokio::test]
    async fn test_default_policy_renotifies_every_time() {
        let fx = Fixture::new().await;
        for name in ["a", "b", "c"] {
            fx.join(name).await;
        }
        let assembler = fx.assembler(NotificationPolicy::EveryEvaluation);

        assembler.evaluate(fx.dm.id).await.unwrap();
        assembler.evaluate(fx.dm.id).await.unwrap();

        assert_eq!(fx.notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_dedup_policy_suppresses_unchanged_group() {
        let fx = Fixture::new().await;
        for name in ["a", "b", "c"] {
            fx.join(name).await;
        }
        let assembler = fx.assembler(NotificationPolicy::OnPoolChange);

        assert!(assembler.evaluate(fx.dm.id).await.unwrap().is_notified());
        assert!(matches!(
            assembler.evaluate(fx.dm.id).await.unwrap(),
            GroupEvaluation::Suppressed(_)
        ));

        fx.join("d").await;
        assert!(assembler.evaluate(fx.dm.id).await.unwrap().is_notified());
        assert_eq!(fx.notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_forget_clears_dedup_memory() {
        let fx = Fixture::new().await;
        let mut pool = BTreeSet::new();
        for name in ["a", "b", "c"] {
            pool.insert(fx.join(name).await.id);
        }
        let assembler = fx.assembler(NotificationPolicy::OnPoolChange);

        assert!(assembler.evaluate(fx.dm.id).await.unwrap().is_notified());
        assert_eq!(assembler.last_notified(fx.dm.id), Some(pool));

        assembler.forget(fx.dm.id);
        assert_eq!(assembler.last_notified(fx.dm.id), None);

        // Same pool, but nothing is remembered, so it goes out again
        assert!(assembler.evaluate(fx.dm.id).await.unwrap().is_notified());
        assert_eq!(fx.notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_send_is_reported_not_raised() {
        let fx = Fixture::new().await;
        for name in ["a", "b", "c"] {
            fx.join(name).await;
        }
        let assembler = GroupAssembler::new(
            fx.store.clone(),
            Notifier::new(Arc::new(MockNotifier::new().failing())),
            NotificationPolicy::OnPoolChange,
        );

        let first = assembler.evaluate(fx.dm.id).await.unwrap();
        let second = assembler.evaluate(fx.dm.id).await.unwrap();

        assert!(matches!(first, GroupEvaluation::NotifyFailed(_)));
        // Failed sends are not remembered, so dedup does not swallow the retry
        assert!(matches!(second, GroupEvaluation::NotifyFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_dm_is_skipped() {
        let fx = Fixture::new().await;
        let ghost = RequestId::new();

        let result = fx.assembler(NotificationPolicy::default()).evaluate(ghost).await.unwrap();

        assert_eq!(result, GroupEvaluation::Skipped { dm_id: ghost });
    }

    #[test]
    fn test_policy_parses() {
        assert_eq!(
            "on_pool_change".parse::<NotificationPolicy>().unwrap(),
            NotificationPolicy::OnPoolChange
        );
        assert_eq!(
            "every_evaluation".parse::<NotificationPolicy>().unwrap(),
            NotificationPolicy::EveryEvaluation
        );
        assert!("sometimes".parse::<NotificationPolicy>().is_err());
    }
}
