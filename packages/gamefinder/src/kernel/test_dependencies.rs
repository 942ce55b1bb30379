// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into a ChangeCoordinator for tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BaseGeocoder, BaseNotifier, OutboundMessage};
use crate::common::{GeoPoint, OwnerId};
use crate::domains::geocoding::{GeoResolver, GeocodeCache, GeocodeError, DEFAULT_GEOCODE_TIMEOUT};
use crate::domains::matching::{ChangeCoordinator, NotificationPolicy};
use crate::domains::requests::{Address, MemoryRequestStore};

// =============================================================================
// Mock Geocoder
// =============================================================================

/// Resolves addresses by street line only; unknown streets are not found.
pub struct MockGeocoder {
    points: Mutex<HashMap<String, GeoPoint>>,
    cacheable: bool,
    failing: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

fn street_key(street: &str) -> String {
    Address::new(street, "", "", "").normalized().street
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self {
            points: Mutex::new(HashMap::new()),
            cacheable: false,
            failing: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Resolve addresses whose street matches `street` to `point`
    pub fn with_point(self, street: &str, point: GeoPoint) -> Self {
        self.set_point(street, point);
        self
    }

    /// Register a street after construction, e.g. from a shared test harness
    pub fn set_point(&self, street: &str, point: GeoPoint) {
        self.points.lock().unwrap().insert(street_key(street), point);
    }

    /// Report as cacheable, like a network provider
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Fail every call with a provider error
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseGeocoder for MockGeocoder {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    async fn geocode(&self, address: &Address) -> Result<Option<GeoPoint>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(GeocodeError::InvalidResponse("mock provider failure".to_string()));
        }
        let point = self
            .points
            .lock()
            .unwrap()
            .get(&street_key(&address.street))
            .copied();
        Ok(point)
    }
}

// =============================================================================
// Mock Notifier
// =============================================================================

pub struct MockNotifier {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    failing: bool,
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            failing: false,
        }
    }

    /// Reject every send. Attempts are still recorded.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Get all messages handed to the transport
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Messages addressed to one owner
    pub fn sent_to(&self, owner: OwnerId) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.recipient == owner)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BaseNotifier for MockNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        if self.failing {
            anyhow::bail!("mock transport unavailable");
        }
        Ok(())
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Mocks plus an in-memory store, kept around so tests can inspect them
/// after driving the coordinator.
pub struct TestDependencies {
    pub store: Arc<MemoryRequestStore>,
    pub geocoder: Arc<MockGeocoder>,
    pub notifier: Arc<MockNotifier>,
    pub policy: NotificationPolicy,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryRequestStore::new()),
            geocoder: Arc::new(MockGeocoder::new()),
            notifier: Arc::new(MockNotifier::new()),
            policy: NotificationPolicy::default(),
        }
    }

    /// Set a mock geocoder
    pub fn mock_geocoder(mut self, geocoder: MockGeocoder) -> Self {
        self.geocoder = Arc::new(geocoder);
        self
    }

    /// Set a mock notifier
    pub fn mock_notifier(mut self, notifier: MockNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn policy(mut self, policy: NotificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build a coordinator over these mocks
    pub fn coordinator(&self) -> ChangeCoordinator {
        let resolver = GeoResolver::new(
            self.geocoder.clone(),
            GeocodeCache::default(),
            DEFAULT_GEOCODE_TIMEOUT,
        );
        ChangeCoordinator::new(
            self.store.clone(),
            Arc::new(resolver),
            self.notifier.clone(),
            self.policy,
        )
    }
}
