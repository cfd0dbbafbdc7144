//! Streaming engines under test
//!
//! Each engine knows how to start its containers, which readiness checks
//! gate a trial, and how to submit a case's query. The runner drives every
//! engine through the same sequence.

mod flink;
mod ksqldb;
mod timeplus;

pub use flink::FlinkEngine;
pub use ksqldb::KsqldbEngine;
pub use timeplus::TimeplusEngine;

use crate::context::BenchContext;
use crate::error::{HarnessError, Result};
use crate::probe::ReadinessCheck;
use crate::runtime::{async_trait, HealthCheckSpec};
use crate::settings::BenchSettings;
use std::time::Duration;

pub const FLINK: &str = "flink";
pub const TIMEPLUS: &str = "timeplus";
pub const KSQLDB: &str = "ksqldb";

/// Platform names accepted on the command line
pub const PLATFORMS: &[&str] = &[FLINK, TIMEPLUS, KSQLDB];

/// Containers started by an engine, by role
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineHandle {
    pub containers: Vec<(String, String)>,
}

impl EngineHandle {
    pub fn add(&mut self, role: impl Into<String>, id: impl Into<String>) {
        self.containers.push((role.into(), id.into()));
    }

    /// Container id of the first container with this role
    pub fn id(&self, role: &str) -> Option<&str> {
        self.containers
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, id)| id.as_str())
    }

    pub fn ids(&self) -> Vec<String> {
        self.containers.iter().map(|(_, id)| id.clone()).collect()
    }
}

/// A streaming engine the harness can benchmark
#[async_trait]
pub trait Engine: Send + Sync {
    /// Platform label used in results and container case labels
    fn platform(&self) -> &'static str;

    /// Reason this engine cannot run `case`, if any
    fn unsupported_reason(&self, _case: &str, _settings: &BenchSettings) -> Option<String> {
        None
    }

    /// Start every container the engine needs
    async fn start(&self, ctx: &BenchContext) -> Result<EngineHandle>;

    /// Checks that must all pass before the query is submitted
    fn readiness_checks(&self, handle: &EngineHandle, settings: &BenchSettings)
        -> Vec<ReadinessCheck>;

    /// Submit the case's query and wait for the submission step to finish
    async fn submit_query(&self, ctx: &BenchContext, case: &str, handle: &EngineHandle)
        -> Result<()>;

    /// Topics besides the case topic to delete after a trial
    fn extra_topics(&self, _settings: &BenchSettings) -> Vec<String> {
        Vec::new()
    }
}

/// Look up an engine by platform name (`proton` is accepted for Timeplus)
pub fn from_name(name: &str) -> Option<Box<dyn Engine>> {
    match name.trim().to_lowercase().as_str() {
        FLINK => Some(Box::new(FlinkEngine)),
        TIMEPLUS | "proton" => Some(Box::new(TimeplusEngine)),
        KSQLDB => Some(Box::new(KsqldbEngine)),
        _ => None,
    }
}

/// Path of a case's script inside engine containers
pub(crate) fn script_path(case: &str) -> String {
    format!("/home/scripts/{}.sql", case)
}

/// Turn a submission exit code into a trial result
pub(crate) fn check_submission(case: &str, exit_code: i64, output: String) -> Result<()> {
    if exit_code == 0 {
        return Ok(());
    }
    Err(HarnessError::Query {
        case: case.to_string(),
        exit_code,
        output: output.trim_end().to_string(),
    })
}

/// curl-based HEALTHCHECK against a local HTTP endpoint
pub(crate) fn curl_healthcheck(
    url: &str,
    interval: Duration,
    timeout: Duration,
    retries: i64,
    start_period: Duration,
) -> HealthCheckSpec {
    HealthCheckSpec {
        test: vec!["CMD".to_string(), "curl".to_string(), url.to_string()],
        interval,
        timeout,
        retries,
        start_period,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(from_name("flink").unwrap().platform(), FLINK);
        assert_eq!(from_name("Timeplus").unwrap().platform(), TIMEPLUS);
        assert_eq!(from_name("proton").unwrap().platform(), TIMEPLUS);
        assert_eq!(from_name("ksqldb").unwrap().platform(), KSQLDB);
        assert!(from_name("spark").is_none());
    }

    #[test]
    fn test_check_submission() {
        assert!(check_submission("q1", 0, "done".into()).is_ok());

        let err = check_submission("q1", 2, "syntax error\n".into()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "query q1 failed with exit code 2: syntax error"
        );
        assert!(err.is_trial_scoped());
    }

    #[test]
    fn test_handle_roles() {
        let mut handle = EngineHandle::default();
        handle.add("jobmanager", "c1");
        handle.add("taskmanager", "c2");
        handle.add("taskmanager", "c3");

        assert_eq!(handle.id("taskmanager"), Some("c2"));
        assert_eq!(handle.id("client"), None);
        assert_eq!(handle.ids(), vec!["c1", "c2", "c3"]);
    }
}
