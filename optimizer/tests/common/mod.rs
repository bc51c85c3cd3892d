//! Common test utilities and infrastructure
//!
//! Fixtures describe a small tree with known node values; helpers provide an
//! in-memory worker launcher that prices builds from the same table, so every
//! search runs through the real pool and scorer.

#![allow(dead_code)]

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
pub use fixtures::TestFixtures;
pub use helpers::{PoolBuilder, TestHelpers, ValueLauncher};
