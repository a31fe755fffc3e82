//! Client network diagnostics: per-target latency sampling, dual-stack and
//! ICE-candidate leak detection, and IP reputation scoring.

pub mod config;
pub mod dual_stack;
pub mod edge;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod fields;
pub mod latency;
pub mod leak;
pub mod logging;
pub mod observability;
pub mod presentation;
pub mod risk;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod scenario_tests;

pub use config::{SentinelConfig, Target};
pub use edge::{EdgeContext, EdgeMetadata};
pub use engine::DiagnosticsEngine;
pub use presentation::DisplaySnapshot;
