//! Nexmark benchmark harness library
//!
//! This crate provides the core functionality for:
//! - Container lifecycle and resource tracking
//! - Readiness probing of brokers and streaming engines
//! - Per-trial resource sampling and output draining
//! - Report writing and observability

pub mod broker;
pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod infra;
pub mod models;
pub mod observability;
pub mod probe;
pub mod report;
pub mod runner;
pub mod runtime;
pub mod sampler;
pub mod settings;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use broker::{KafkaBroker, MessageBroker};
pub use context::BenchContext;
pub use driver::{BenchmarkDriver, BenchmarkPlan};
pub use error::{HarnessError, Result};
pub use infra::Workload;
pub use models::*;
pub use observability::{HarnessMetrics, StructuredLogger};
pub use report::{ReportPaths, ReportWriter};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use settings::{BenchSettings, TopicCase};
