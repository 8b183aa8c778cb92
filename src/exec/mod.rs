/*!
 * Execution Orchestrator
 * Batches requests, gates total concurrency, manages worker processes,
 * and drives the allocator
 *
 * The orchestrator's own coordination logic is single-threaded by design;
 * only experiment worker threads and forked processes run in parallel, and
 * only after being admitted through the semaphore. Worker completion is
 * detected by non-blocking liveness polling, never a blocking join, so one
 * slow worker cannot stall detection of the others.
 */

use crate::alloc::CpuAllocator;
use crate::core::config::HarnessConfig;
use crate::core::errors::{HarnessError, Result};
use crate::core::types::Token;
use dashmap::DashMap;
use log::{debug, error, info};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub mod batch;
pub mod outcome;
pub mod registry;
pub mod semaphore;
pub mod worker;

pub use batch::{Batch, BatchKey, Batcher, Request};
pub use outcome::{Experiment, Failure, Outcome, ResultSink, Status, VecSink};
pub use registry::{InMemoryRegistry, TaskRegistry};
pub use semaphore::Semaphore;
pub use worker::{WorkerConfig, WorkerProcess};

/// Experiment run orchestrator
pub struct Orchestrator {
    config: HarnessConfig,
    worker_config: WorkerConfig,
    allocator: Arc<CpuAllocator>,
    semaphore: Arc<Semaphore>,
    workers: DashMap<Token, WorkerProcess>,
    registry: Arc<dyn TaskRegistry>,
    sink: Arc<dyn ResultSink>,
}

impl Orchestrator {
    pub fn new(
        config: HarnessConfig,
        worker_config: WorkerConfig,
        allocator: Arc<CpuAllocator>,
        registry: Arc<dyn TaskRegistry>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        info!(
            "orchestrator initialized: {} admission permits, batch size {}",
            config.max_threads, config.batch_size
        );
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_threads)),
            config,
            worker_config,
            allocator,
            workers: DashMap::new(),
            registry,
            sink,
        }
    }

    /// Run a full request stream to completion
    ///
    /// Request order is randomized before scheduling to avoid run-order
    /// bias. Returns once every worker has finished and the registry has
    /// been told to terminate.
    pub fn run_all(&self, mut requests: Vec<Request>) -> Result<()> {
        requests.shuffle(&mut rand::thread_rng());
        info!("scheduling {} requests", requests.len());

        // A dispatch error must not abandon in-flight workers: wind the run
        // down either way, then surface it
        let dispatched = self.dispatch_all(requests);
        self.drain();
        self.registry.terminate();
        dispatched
    }

    fn dispatch_all(&self, requests: Vec<Request>) -> Result<()> {
        let mut batcher = Batcher::new(self.config.batch_size);
        for request in requests {
            if request.forked {
                if let Some(batch) = batcher.push(request) {
                    self.flush_batch(batch)?;
                }
            } else {
                self.submit_in_process(request)?;
            }
        }
        for batch in batcher.flush_all() {
            self.flush_batch(batch)?;
        }
        Ok(())
    }

    /// Number of tracked worker processes
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    /// Block on the admission semaphore with bounded polling, draining
    /// finished workers between waits
    fn acquire_permits(&self, n: usize) {
        loop {
            if self.semaphore.acquire_timeout(n, self.poll_interval()) {
                return;
            }
            self.poll_workers();
        }
    }

    fn submit_in_process(&self, request: Request) -> Result<()> {
        let permits = request.actors.clamp(1, self.semaphore.total());
        self.acquire_permits(permits);

        let Some(driver) = request.driver.clone() else {
            self.sink.accept(Outcome::failed(
                request.id,
                Status::CheckFailed,
                "in-process request carries no driver",
            ));
            self.semaphore.release(permits);
            return Ok(());
        };
        if driver.actors() != request.actors {
            self.sink.accept(Outcome::failed(
                request.id,
                Status::InterfaceMismatch,
                format!(
                    "driver built for {} actors, request asks for {}",
                    driver.actors(),
                    request.actors
                ),
            ));
            self.semaphore.release(permits);
            return Ok(());
        }

        let shapes = self.allocator.candidate_shapes(
            request.actors,
            self.config.max_threads,
            request.mode,
        );
        if shapes.is_empty() {
            self.sink.accept(Outcome::failed(
                request.id,
                Status::CheckFailed,
                "no placeable shape for request",
            ));
            self.semaphore.release(permits);
            return Ok(());
        }

        // Capacity exhaustion is not an error: poll until a candidate fits
        let grant = loop {
            match shapes.iter().find_map(|s| self.allocator.try_acquire(s)) {
                Some(grant) => break grant,
                None => {
                    self.poll_workers();
                    thread::sleep(self.poll_interval());
                }
            }
        };

        let sink = Arc::clone(&self.sink);
        let allocator = Arc::clone(&self.allocator);
        let semaphore = Arc::clone(&self.semaphore);
        let id = request.id;
        let budget = request.time_budget;
        let iterations = request.iterations.max(1);
        thread::Builder::new()
            .name(format!("experiment-{}", id))
            .spawn(move || {
                let mut merged: HashMap<String, u64> = HashMap::new();
                let mut failure = None;
                for _ in 0..iterations {
                    match driver.run(&grant, budget) {
                        Ok(counts) => {
                            for (key, n) in counts {
                                *merged.entry(key).or_insert(0) += n;
                            }
                        }
                        Err(f) => {
                            failure = Some(f);
                            break;
                        }
                    }
                }
                let outcome = match failure {
                    None => Outcome::normal(id, merged),
                    Some(f) => Outcome::failed(id, f.status, f.message),
                };
                sink.accept(outcome);
                allocator.release(grant);
                semaphore.release(permits);
            })
            .map_err(|e| HarnessError::Spawn(e.to_string()))?;
        Ok(())
    }

    /// Launch one worker process for a batch, reporting a launch failure as
    /// a worker-error outcome per request
    pub fn flush_batch(&self, batch: Batch) -> Result<()> {
        if let Err(e) = self.launch_batch(&batch) {
            for request in &batch.requests {
                self.sink
                    .accept(Outcome::failed(request.id, Status::WorkerError, e.to_string()));
            }
            return Err(e);
        }
        Ok(())
    }

    fn launch_batch(&self, batch: &Batch) -> Result<()> {
        let permits = batch.threads().clamp(1, self.semaphore.total());
        self.acquire_permits(permits);

        let token = Token::new_v4();
        self.registry.register(token, batch.request_ids());
        match WorkerProcess::spawn(&self.worker_config, batch, token, permits) {
            Ok(worker) => {
                self.workers.insert(token, worker);
                Ok(())
            }
            Err(e) => {
                // The launch command itself is broken; retrying it cannot help
                self.registry.remove_pending(token);
                self.semaphore.release(permits);
                Err(e)
            }
        }
    }

    /// Non-blocking sweep over tracked workers
    pub fn poll_workers(&self) {
        let mut finished: Vec<(Token, Option<String>)> = Vec::new();
        for mut entry in self.workers.iter_mut() {
            let token = *entry.key();
            match entry.value_mut().poll() {
                Ok(Some(status)) if status.success() => finished.push((token, None)),
                Ok(Some(status)) => {
                    finished.push((token, Some(format!("worker exited with {}", status))))
                }
                Ok(None) => {}
                Err(e) => finished.push((token, Some(format!("worker wait failed: {}", e)))),
            }
        }
        for (token, failure) in finished {
            let Some((_, worker)) = self.workers.remove(&token) else {
                continue;
            };
            match failure {
                None => {
                    self.registry.remove_pending(token);
                    self.semaphore.release(worker.permits());
                    debug!("worker {} finished cleanly", token);
                }
                Some(reason) => self.handle_worker_failure(token, worker, reason),
            }
        }
    }

    fn handle_worker_failure(&self, token: Token, worker: WorkerProcess, reason: String) {
        let (out, err) = worker.captured_output();
        let diagnostics = format!("{}\nstdout:\n{}\nstderr:\n{}", reason, out, err);
        error!("worker {} failed: {}", token, reason);

        // Every uncompleted request gets a distinct worker-error outcome
        let pending = self.registry.remove_pending(token);
        for id in &pending {
            self.sink
                .accept(Outcome::failed(*id, Status::WorkerError, diagnostics.clone()));
        }
        self.semaphore.release(worker.permits());

        // Unconditional retry: still-pending requests become a brand-new
        // batch, with no backoff cap or failure budget
        let requests: Vec<Request> = worker
            .requests()
            .iter()
            .filter(|r| pending.contains(&r.id))
            .cloned()
            .collect();
        if !requests.is_empty() {
            let key = requests[0].batch_key();
            // These requests were just reported above; a failed relaunch
            // must not report them a second time
            if let Err(e) = self.launch_batch(&Batch::new(key, requests)) {
                error!("resubmission after worker {} failure failed: {}", token, e);
            }
        }
    }

    /// Wait for every permit to return, polling workers meanwhile
    fn drain(&self) {
        loop {
            self.poll_workers();
            if self.workers.is_empty() && self.semaphore.available() == self.semaphore.total() {
                return;
            }
            thread::sleep(self.poll_interval());
        }
    }
}
