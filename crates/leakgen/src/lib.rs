//! `Leakgen` generates labeled synthetic leak datasets for water distribution
//! networks. Given a base network model and a batch configuration, it samples
//! randomized leak scenarios, simulates each one through a pluggable hydraulic
//! engine, and writes per-scenario time-series partitions together with batch
//! metadata and ground-truth label tables.

#![warn(unreachable_pub, missing_docs)]

pub mod core;
