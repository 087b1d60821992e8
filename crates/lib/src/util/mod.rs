//! Shared utilities.

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;
