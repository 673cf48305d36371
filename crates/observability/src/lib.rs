//! Process-wide tracing setup for jobvault processes and tests.

pub mod tracing;

/// Initialize JSON logging for a worker or server process.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize human-readable logging captured by the test harness.
pub fn init_for_tests() {
    tracing::init_for_tests();
}
