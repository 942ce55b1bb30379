pub mod coordinator;
pub mod engine;
pub mod groups;
pub mod notification;

pub use coordinator::{ChangeCoordinator, PassReport, PassStep, CASCADE_RADIUS_MILES};
pub use engine::MatchEngine;
pub use groups::{GroupAssembler, GroupEvaluation, NotificationPolicy, QUORUM_SIZE};
pub use notification::{GroupNotification, GroupResult, Notifier, PlayerSummary};
