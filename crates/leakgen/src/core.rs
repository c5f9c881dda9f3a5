//! Core leakgen data structures, traits, and routines. The most common entry
//! point is [`Orchestrator::run_batch()`], which turns a [`BatchConfig`] into
//! a labeled dataset on disk.

pub use leakgen_core::*;
