//! Lazarus library crate
//!
//! Black-box equivalence verification and self-correction for program
//! migrations. Exposes the core modules so benchmarks and external tooling can
//! drive a session without going through CLI startup.

pub mod complexity;
pub mod config;
pub mod controller;
pub mod language;
pub mod mirror;
pub mod oracle;
pub mod profile;
pub mod prompt;
pub mod report;
pub mod runner;
pub mod sandbox;
pub mod session;
pub mod truth_table;
pub mod util;
