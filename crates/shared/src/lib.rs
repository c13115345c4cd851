// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Quickshop Shared Types and Utilities
//!
//! This crate contains types and utilities shared across the Quickshop platform.

pub mod collaborators;
pub mod db;
pub mod types;

pub use collaborators::*;
pub use db::*;
pub use types::*;
