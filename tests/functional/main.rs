// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the reshard pipeline.
//!
//! These tests run the real planner, assigner and executor against an
//! in-memory cluster WITHOUT requiring a live Valkey deployment. The mock
//! applies every slot command to shared state so each scenario can check the
//! resulting ownership, keyspace and leftover importing/migrating tags.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_reshard_two_to_three_masters
//! ```
//!
//! ## Test Categories
//!
//! - **Scenario tests**: end-to-end runs of `Resharder` (bootstrap, reshard,
//!   preview, exclusion, orphan claims, pre-flight checks)
//! - **Executor tests**: the per-slot protocol in isolation (call order,
//!   batching, failure residue)

mod mock_cluster;

// Re-export for use in tests
pub use mock_cluster::*;
