//! fixsweep library crate
//!
//! Exposes the pattern engine, the failure grouper and the batch suggestion
//! pipeline so the CLI, benchmarks and other tooling share one implementation.

pub mod config;
pub mod error;
pub mod failure;
pub mod grouping;
pub mod patterns;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod suggest;
pub mod util;
