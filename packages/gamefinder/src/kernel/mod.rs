//! Kernel module - pipeline infrastructure and dependencies.

pub mod deps;
pub mod test_dependencies;
pub mod traits;

pub use deps::{MatchDeps, TracingNotifier};
pub use test_dependencies::{MockGeocoder, MockNotifier, TestDependencies};
pub use traits::*;
