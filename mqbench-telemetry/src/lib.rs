//! Telemetry initialization for mqbench binaries and tests.

pub mod tracing;
