// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no matching logic.
// Naming convention: Base* for trait names (e.g., BaseGeocoder, BaseNotifier)

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::common::{GeoPoint, OwnerId};
use crate::domains::geocoding::GeocodeError;
use crate::domains::requests::Address;

// =============================================================================
// Geocoder Trait (Infrastructure - address to coordinates)
// =============================================================================

#[async_trait]
pub trait BaseGeocoder: Send + Sync {
    /// Short strategy name for logs ("nominatim", "synthetic", ...)
    fn name(&self) -> &'static str;

    /// Whether results are stable enough to memoize. Only network-backed
    /// providers benefit; the default is no.
    fn cacheable(&self) -> bool {
        false
    }

    /// Look up an address. `Ok(None)` means the provider has no match.
    async fn geocode(&self, address: &Address) -> Result<Option<GeoPoint>, GeocodeError>;
}

// =============================================================================
// Notification Trait (Infrastructure - outbound message transport)
// =============================================================================

/// Transport-neutral message: who gets it, a subject, and body lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub recipient: OwnerId,
    pub subject: String,
    pub body: Vec<String>,
    /// Structured copy of the payload for transports that can carry it
    pub data: serde_json::Value,
}

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    /// Deliver one message. Errors are reported by the caller, never retried here.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}
