//! Property-based tests for the dispatch engine's quantified invariants.
//!
//! Run with: cargo test --test property_tests

pub mod dispatch;
