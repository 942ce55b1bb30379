use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::common::{OwnerId, RequestId};
use crate::domains::requests::{GameRequest, GameSystem};
use crate::kernel::{BaseNotifier, OutboundMessage};

/// A DM plus the players whose candidate lists contain that DM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupResult {
    pub dm_id: RequestId,
    /// Ascending id order
    pub player_ids: Vec<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSummary {
    pub id: RequestId,
    pub name: String,
    pub distance_miles: Option<f64>,
}

/// "Group found" payload addressed to the DM's owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupNotification {
    pub recipient: OwnerId,
    pub dm_id: RequestId,
    pub dm_name: String,
    pub system: GameSystem,
    pub players: Vec<PlayerSummary>,
}

impl GroupNotification {
    pub fn compose(dm: &GameRequest, players: &[GameRequest]) -> Self {
        Self {
            recipient: dm.owner,
            dm_id: dm.id,
            dm_name: dm.name.clone(),
            system: dm.system,
            players: players
                .iter()
                .map(|p| PlayerSummary {
                    id: p.id,
                    name: p.name.clone(),
                    distance_miles: dm.distance_to(p),
                })
                .collect(),
        }
    }

    pub fn subject(&self) -> String {
        format!("GameFinder: your {} group is ready", self.system.label())
    }

    pub fn body(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} players are within range of \"{}\":",
            self.players.len(),
            self.dm_name
        )];
        lines.extend(self.players.iter().map(|p| match p.distance_miles {
            Some(miles) => format!("- {} ({:.1} miles away)", p.name, miles),
            None => format!("- {}", p.name),
        }));
        lines
    }

    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage {
            recipient: self.recipient,
            subject: self.subject(),
            body: self.body(),
            data: serde_json::json!({
                "dm_id": self.dm_id,
                "system": self.system,
                "player_ids": self.players.iter().map(|p| p.id).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Formats group notifications and hands them to the configured transport.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn BaseNotifier>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn BaseNotifier>) -> Self {
        Self { transport }
    }

    #[instrument(skip(self, dm, players), fields(dm_id = %dm.id, players = players.len()))]
    pub async fn notify(&self, dm: &GameRequest, players: &[GameRequest]) -> Result<GroupNotification> {
        let notification = GroupNotification::compose(dm, players);
        self.transport.send(&notification.to_message()).await?;
        debug!("Group notification handed to transport");
        Ok(notification)
    }
}
