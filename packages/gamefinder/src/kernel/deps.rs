//! Pipeline dependencies (using traits for testability)
//!
//! Wires the store, resolver and notification transport selected by
//! configuration into a `ChangeCoordinator`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::domains::geocoding::GeoResolver;
use crate::domains::matching::{ChangeCoordinator, NotificationPolicy};
use crate::domains::requests::{MemoryRequestStore, PostgresRequestStore, RequestStore};
use crate::kernel::{BaseNotifier, OutboundMessage};

// =============================================================================
// TracingNotifier (implements BaseNotifier by logging)
// =============================================================================

/// Transport that writes each message to the log. Used when no delivery
/// channel is configured, e.g. by the simulator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl BaseNotifier for TracingNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        info!(
            recipient = %message.recipient,
            subject = %message.subject,
            body = %message.body.join("\n"),
            "Notification"
        );
        Ok(())
    }
}

// =============================================================================
// MatchDeps
// =============================================================================

#[derive(Clone)]
pub struct MatchDeps {
    pub store: Arc<dyn RequestStore>,
    pub resolver: Arc<GeoResolver>,
    pub notifier: Arc<dyn BaseNotifier>,
    pub policy: NotificationPolicy,
}

impl MatchDeps {
    pub fn new(
        store: Arc<dyn RequestStore>,
        resolver: Arc<GeoResolver>,
        notifier: Arc<dyn BaseNotifier>,
        policy: NotificationPolicy,
    ) -> Self {
        Self {
            store,
            resolver,
            notifier,
            policy,
        }
    }

    /// Build dependencies from configuration. Postgres is used when
    /// `DATABASE_URL` is set, otherwise requests live in memory.
    pub async fn from_config(config: &Config, notifier: Arc<dyn BaseNotifier>) -> Result<Self> {
        let store: Arc<dyn RequestStore> = match &config.database_url {
            Some(url) => {
                let store = PostgresRequestStore::connect(url)
                    .await
                    .context("Failed to connect to database")?;
                info!("Using Postgres request store");
                Arc::new(store)
            }
            None => {
                info!("Using in-memory request store");
                Arc::new(MemoryRequestStore::new())
            }
        };

        let resolver =
            GeoResolver::from_config(&config.geocoder).context("Failed to build geocoder")?;

        Ok(Self::new(
            store,
            Arc::new(resolver),
            notifier,
            config.notification_policy,
        ))
    }

    pub fn into_coordinator(self) -> ChangeCoordinator {
        ChangeCoordinator::new(self.store, self.resolver, self.notifier, self.policy)
    }
}
