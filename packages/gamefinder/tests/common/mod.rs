// Common test utilities
//
// Each test binary compiles this module separately and uses only part of it.
#![allow(dead_code, unused_imports)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
