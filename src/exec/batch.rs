/*!
 * Requests and Batching
 * Experiment requests, and grouping of forked requests into batches
 * sharing one worker process
 */

use super::outcome::Experiment;
use crate::alloc::AffinityMode;
use crate::core::types::RequestId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One experiment request
#[derive(Clone)]
pub struct Request {
    pub id: RequestId,
    /// Actor threads the experiment needs; also the thread count used for
    /// admission and batching
    pub actors: usize,
    pub mode: AffinityMode,
    pub time_budget: Duration,
    pub iterations: usize,
    /// Run in an isolated worker process instead of in-process
    pub forked: bool,
    /// Extra process launch arguments (forked mode only)
    pub launch_args: Vec<String>,
    /// In-process driver; forked requests carry none
    pub driver: Option<Arc<dyn Experiment>>,
}

impl Request {
    pub fn in_process(id: RequestId, actors: usize, mode: AffinityMode) -> Self {
        Self {
            id,
            actors,
            mode,
            time_budget: Duration::from_millis(100),
            iterations: 1,
            forked: false,
            launch_args: Vec::new(),
            driver: None,
        }
    }

    pub fn forked(id: RequestId, actors: usize, launch_args: Vec<String>) -> Self {
        Self {
            id,
            actors,
            mode: AffinityMode::None,
            time_budget: Duration::from_millis(100),
            iterations: 1,
            forked: true,
            launch_args,
            driver: None,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_mode(mut self, mode: AffinityMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_driver(mut self, driver: Arc<dyn Experiment>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Batching key: forked requests sharing it can share a worker process
    pub fn batch_key(&self) -> BatchKey {
        BatchKey {
            threads: self.actors,
            launch_args: self.launch_args.clone(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("actors", &self.actors)
            .field("mode", &self.mode)
            .field("time_budget", &self.time_budget)
            .field("iterations", &self.iterations)
            .field("forked", &self.forked)
            .field("launch_args", &self.launch_args)
            .field("driver", &self.driver.as_ref().map(|_| "<driver>"))
            .finish()
    }
}

/// Homogeneity key for batches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub threads: usize,
    pub launch_args: Vec<String>,
}

/// A group of forked requests executed by one worker process
#[derive(Debug, Clone)]
pub struct Batch {
    pub key: BatchKey,
    pub requests: Vec<Request>,
}

impl Batch {
    pub fn new(key: BatchKey, requests: Vec<Request>) -> Self {
        Self { key, requests }
    }

    /// Thread count shared by every request in the batch
    pub fn threads(&self) -> usize {
        self.key.threads
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        self.requests.iter().map(|r| r.id).collect()
    }
}

/// Accumulates forked requests into homogeneous batches
pub struct Batcher {
    size: usize,
    pending: HashMap<BatchKey, Vec<Request>>,
}

impl Batcher {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            pending: HashMap::new(),
        }
    }

    /// Add a request; returns a batch when its key group reaches the
    /// configured size
    pub fn push(&mut self, request: Request) -> Option<Batch> {
        let key = request.batch_key();
        let group = self.pending.entry(key.clone()).or_default();
        group.push(request);
        if group.len() >= self.size {
            let requests = self.pending.remove(&key).unwrap_or_default();
            Some(Batch::new(key, requests))
        } else {
            None
        }
    }

    /// Flush every partial batch at the end of the request stream
    pub fn flush_all(&mut self) -> Vec<Batch> {
        self.pending
            .drain()
            .map(|(key, requests)| Batch::new(key, requests))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
