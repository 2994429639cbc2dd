//! # Skirmish Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Determinism and lockstep harnesses
//! - Sample game data and scenarios
//! - Property-based testing strategies for order streams

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;

/// Re-export proptest for convenience.
pub use proptest;
