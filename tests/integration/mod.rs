//! Integration test suite for Trestle.
//!
//! These tests exercise the full coordination path from submission to
//! acknowledgement: queues, orchestrators, the bridge, and the health
//! and metrics layers working together.
//!
//! # Test Categories
//!
//! - `cross_domain_flow`: End-to-end task routing and context integrity
//! - `concurrent_workers`: Worker pools, overload detection, live monitoring
//! - `saturation_recovery`: Capacity failures, probe timeouts, recovery
//!
//! # CI Compatibility
//!
//! Everything runs in-process against in-memory queues. No network calls
//! and no filesystem state, making these safe to run in CI environments.

mod fixtures;

mod saturation_recovery;
