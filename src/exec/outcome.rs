/*!
 * Outcomes
 * Experiment results delivered to the external collector
 */

use crate::alloc::ResourceGrant;
use crate::core::types::RequestId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Terminal status of one experiment request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Measurement completed; counts are meaningful
    Normal,
    /// Driver shape does not match the request
    InterfaceMismatch,
    /// Pre-flight check failed before any measurement
    CheckFailed,
    /// Driver raised an error mid-measurement
    RuntimeError,
    /// Workers failed to stop within a generous multiple of the budget
    Timeout,
    /// The worker process died; diagnostics carry its captured output
    WorkerError,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Status::Normal)
    }
}

/// Result record for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub request_id: RequestId,
    pub status: Status,
    /// Distinct-outcome sample counts
    pub counts: HashMap<String, u64>,
    /// Stack traces or captured worker output, present on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl Outcome {
    pub fn normal(request_id: RequestId, counts: HashMap<String, u64>) -> Self {
        Self {
            request_id,
            status: Status::Normal,
            counts,
            diagnostics: None,
        }
    }

    pub fn failed(request_id: RequestId, status: Status, diagnostics: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            counts: HashMap::new(),
            diagnostics: Some(diagnostics.into()),
        }
    }
}

/// Experiment failure surfaced by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub status: Status,
    pub message: String,
}

impl Failure {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// A runnable in-process experiment
///
/// Drivers are produced outside the harness (per-experiment code generation
/// is out of scope); the orchestrator only needs to run them under a grant.
pub trait Experiment: Send + Sync {
    /// Actor count the driver was built for
    fn actors(&self) -> usize;

    /// Execute the measurement loop under an exclusive grant
    fn run(
        &self,
        grant: &ResourceGrant,
        budget: Duration,
    ) -> std::result::Result<HashMap<String, u64>, Failure>;
}

/// External result collector
pub trait ResultSink: Send + Sync {
    fn accept(&self, outcome: Outcome);
}

/// Collecting sink for tests and simple embeddings
#[derive(Debug, Default)]
pub struct VecSink {
    outcomes: Mutex<Vec<Outcome>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }

    pub fn take(&self) -> Vec<Outcome> {
        std::mem::take(&mut *self.outcomes.lock())
    }
}

impl ResultSink for VecSink {
    fn accept(&self, outcome: Outcome) {
        self.outcomes.lock().push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Status::WorkerError).unwrap();
        assert_eq!(json, "\"worker_error\"");
    }

    #[test]
    fn test_failure_flag() {
        assert!(!Status::Normal.is_failure());
        assert!(Status::Timeout.is_failure());
    }

    #[test]
    fn test_outcome_diagnostics_skipped_when_absent() {
        let outcome = Outcome::normal(1, HashMap::new());
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("diagnostics"));
    }

    #[test]
    fn test_vec_sink_collects() {
        let sink = VecSink::new();
        sink.accept(Outcome::failed(7, Status::WorkerError, "boom"));
        let got = sink.take();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].request_id, 7);
        assert!(sink.snapshot().is_empty());
    }
}
