//! Test harness for pipeline integration tests.
//!
//! Each test gets a fresh in-memory store, mock geocoder and recording
//! notifier wired into a real `ChangeCoordinator`.

use gamefinder_core::common::GeoPoint;
use gamefinder_core::domains::matching::{ChangeCoordinator, NotificationPolicy};
use gamefinder_core::kernel::TestDependencies;
use test_context::AsyncTestContext;

/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &mut TestHarness) {
///     ctx.place("1 Main St", GeoPoint::new(0.0, 0.0));
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    pub deps: TestDependencies,
    pub coordinator: ChangeCoordinator,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
    }

    async fn teardown(self) {
        // Everything is in memory and dropped with the harness
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_deps(TestDependencies::new())
    }

    pub fn with_policy(policy: NotificationPolicy) -> Self {
        Self::with_deps(TestDependencies::new().policy(policy))
    }

    pub fn with_deps(deps: TestDependencies) -> Self {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let coordinator = deps.coordinator();
        Self { deps, coordinator }
    }

    /// Make `street` resolve to `point`.
    pub fn place(&self, street: &str, point: GeoPoint) {
        self.deps.geocoder.set_point(street, point);
    }

    pub fn sent_count(&self) -> usize {
        self.deps.notifier.sent_count()
    }
}
