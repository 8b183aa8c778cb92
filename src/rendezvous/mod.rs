/*!
 * Epoch Rendezvous Protocol
 * Keeps a fixed set of worker threads executing a measurement loop in
 * tight lockstep, with adaptive stride sizing
 *
 * # Protocol
 *
 * Every epoch each worker: decrements the not-started latch, executes its
 * stride of operations over freshly permuted slot indices, flags the round
 * as lagged if a peer had not started by the time it finished, then passes
 * the not-finished latch. Exactly one worker wins the compare-and-swap on
 * the epoch counter; the winner folds result slots into the running tally,
 * resets them, sizes the next stride, and publishes the next buffer through
 * an RCU-style pointer swap. The not-consumed and not-updated latches keep
 * every peer off the new buffer until publication completes and off the old
 * buffer once reset begins.
 *
 * # Ordering
 *
 * Epochs are totally ordered by the single epoch counter: no worker
 * observes epoch K+1's buffer before all workers have finished epoch K.
 */

use crate::core::config::HarnessConfig;
use crate::core::errors::{HarnessError, Result};
use crate::alloc::ResourceGrant;
use crate::exec::{Experiment, Failure, Status};
use arc_swap::ArcSwap;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod buffer;
mod spin;

pub use buffer::EpochBuffer;
pub use spin::SpinStyle;

use spin::wait_until;

/// One actor's measured operation over a (state, result) slot pair
pub type ActorFn<S, R> = Box<dyn FnMut(&mut S, &mut R) + Send>;

/// Stride for the next epoch: grows only after a lagged round, never past
/// the ceiling
fn next_stride(current: usize, lagged: bool, ceiling: usize) -> usize {
    if lagged {
        current.saturating_mul(2).min(ceiling)
    } else {
        current
    }
}

/// Epoch-rendezvous execution engine for one experiment
///
/// One-shot: construct, `run` once, read the tally. The worker count is
/// fixed at construction; the engine is actor-count-agnostic otherwise.
pub struct EpochEngine<S, R> {
    actors: usize,
    max_stride: usize,
    style: SpinStyle,
    timeout_multiplier: u32,
    current: ArcSwap<EpochBuffer<S, R>>,
    epoch: AtomicU64,
    stop: AtomicBool,
    started: AtomicBool,
    live_workers: AtomicUsize,
    tally: Mutex<HashMap<R, u64>>,
    /// Fault injection for the spawn path; `usize::MAX` disables it
    #[cfg(test)]
    spawn_fault_at: AtomicUsize,
}

impl<S, R> EpochEngine<S, R>
where
    S: Default + Send + 'static,
    R: Default + Clone + Eq + Hash + Send + 'static,
{
    pub fn new(actors: usize, config: &HarnessConfig) -> Self {
        let stride = config.initial_stride.max(1);
        Self {
            actors,
            max_stride: config.max_stride.max(stride),
            style: config.spin_style,
            timeout_multiplier: config.timeout_multiplier.max(1),
            current: ArcSwap::from_pointee(EpochBuffer::new(
                actors,
                stride,
                &mut rand::thread_rng(),
            )),
            epoch: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            started: AtomicBool::new(false),
            live_workers: AtomicUsize::new(0),
            tally: Mutex::new(HashMap::new()),
            #[cfg(test)]
            spawn_fault_at: AtomicUsize::new(usize::MAX),
        }
    }

    #[cfg(test)]
    fn fail_spawn_from(&self, actor: usize) {
        self.spawn_fault_at.store(actor, Ordering::Relaxed);
    }

    #[cfg(test)]
    fn should_fail_spawn(&self, actor: usize) -> bool {
        actor >= self.spawn_fault_at.load(Ordering::Relaxed)
    }

    #[cfg(not(test))]
    fn should_fail_spawn(&self, _actor: usize) -> bool {
        false
    }

    /// Epochs completed so far
    pub fn epochs(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Ask workers to exit at the next epoch boundary
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Run the measurement loop for `budget`, then stop the workers and
    /// return the outcome tally
    ///
    /// No thread is forcibly killed: if workers fail to reach the next
    /// epoch boundary within `timeout_multiplier * budget` the run is
    /// abandoned as a timeout and the stuck threads are leaked.
    pub fn run(
        self: &Arc<Self>,
        actions: Vec<ActorFn<S, R>>,
        budget: Duration,
    ) -> Result<HashMap<R, u64>> {
        if actions.len() != self.actors {
            return Err(HarnessError::Config(format!(
                "expected {} actor actions, got {}",
                self.actors,
                actions.len()
            )));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(HarnessError::Config("epoch engine already ran".into()));
        }
        self.live_workers.store(self.actors, Ordering::Release);
        // Workers hold at the gate until every peer thread exists; with
        // fewer than `actors` threads the latch counts can never reach zero
        let gate = Arc::new(AtomicBool::new(false));
        for (actor, mut action) in actions.into_iter().enumerate() {
            let spawned = if self.should_fail_spawn(actor) {
                Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected spawn failure",
                ))
            } else {
                let engine = Arc::clone(self);
                let gate = Arc::clone(&gate);
                thread::Builder::new()
                    .name(format!("epoch-worker-{}", actor))
                    .spawn(move || {
                        wait_until(engine.style, || gate.load(Ordering::Acquire));
                        engine.worker_loop(actor, action.as_mut());
                        engine.live_workers.fetch_sub(1, Ordering::AcqRel);
                    })
            };
            if let Err(e) = spawned {
                // Publish poison before opening the gate so the peers that
                // did spawn exit without ever entering the latch protocol
                self.current.store(Arc::new(EpochBuffer::poison(self.actors)));
                self.live_workers
                    .fetch_sub(self.actors - actor, Ordering::AcqRel);
                gate.store(true, Ordering::Release);
                while self.live_workers.load(Ordering::Acquire) > 0 {
                    thread::sleep(Duration::from_millis(1));
                }
                return Err(HarnessError::Spawn(e.to_string()));
            }
        }
        gate.store(true, Ordering::Release);

        thread::sleep(budget);
        self.request_stop();

        let grace = budget
            .saturating_mul(self.timeout_multiplier)
            .max(Duration::from_millis(100));
        let deadline = Instant::now() + grace;
        while self.live_workers.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return Err(HarnessError::Timeout(format!(
                    "{} worker(s) still running {:?} after stop",
                    self.live_workers.load(Ordering::Acquire),
                    grace
                )));
            }
            thread::sleep(Duration::from_millis(1));
        }
        debug!("epoch engine finished after {} epochs", self.epochs());
        Ok(std::mem::take(&mut *self.tally.lock()))
    }

    fn worker_loop(&self, actor: usize, action: &mut dyn FnMut(&mut S, &mut R)) {
        loop {
            let buf = self.current.load_full();
            if buf.is_poison() {
                return;
            }

            buf.not_started.fetch_sub(1, Ordering::AcqRel);

            for k in 0..buf.stride() {
                let i = buf.perm[k];
                let idx = buf.slot(actor, i);
                // Safety: slot (actor, i) belongs to this worker for this epoch
                unsafe { action(buf.states.get_mut(idx), buf.results.get_mut(idx)) };
            }

            // A peer that has not started yet means this round was uneven
            if buf.not_started.load(Ordering::Acquire) > 0 {
                buf.mark_lagged();
            }

            // Snapshot before the barrier so exactly one CAS can succeed
            let epoch = self.epoch.load(Ordering::Acquire);
            buf.not_finished.fetch_sub(1, Ordering::AcqRel);
            wait_until(self.style, || {
                buf.not_finished.load(Ordering::Acquire) == 0
            });

            if self
                .epoch
                .compare_exchange(epoch, epoch + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.advance(&buf);
            }

            // Nobody re-enters the loop (and reads the new buffer) until the
            // winner has decremented not_consumed, i.e. published
            buf.not_consumed.fetch_sub(1, Ordering::AcqRel);
            wait_until(self.style, || {
                buf.not_consumed.load(Ordering::Acquire) == 0
            });

            buf.not_updated.fetch_sub(1, Ordering::AcqRel);
            wait_until(self.style, || {
                buf.not_updated.load(Ordering::Acquire) == 0
            });
        }
    }

    /// Winner branch: fold results, reset slots, publish the next buffer
    fn advance(&self, buf: &EpochBuffer<S, R>) {
        {
            let mut tally = self.tally.lock();
            for i in 0..buf.results.len() {
                // Safety: every worker is past the not-finished latch and
                // blocked before the next buffer; the winner is alone here
                let r = unsafe { buf.results.get_mut(i) };
                *tally.entry(r.clone()).or_insert(0) += 1;
                *r = R::default();
            }
        }
        let next = if self.stop.load(Ordering::Acquire) {
            EpochBuffer::poison(self.actors)
        } else {
            let stride = next_stride(buf.stride(), buf.was_lagged(), self.max_stride);
            EpochBuffer::new(self.actors, stride, &mut rand::thread_rng())
        };
        self.current.store(Arc::new(next));
    }
}

/// `Experiment` adapter running actor closures under an `EpochEngine`
///
/// The factory is called once per actor per run to produce that actor's
/// operation. With pinning enabled, each worker thread binds itself to its
/// grant-assigned CPU on first invocation.
pub struct EngineExperiment<S, R, F>
where
    F: Fn(usize) -> ActorFn<S, R> + Send + Sync,
{
    actors: usize,
    config: HarnessConfig,
    pin_actors: bool,
    factory: F,
    _marker: PhantomData<fn() -> (S, R)>,
}

impl<S, R, F> EngineExperiment<S, R, F>
where
    F: Fn(usize) -> ActorFn<S, R> + Send + Sync,
{
    pub fn new(actors: usize, config: HarnessConfig, factory: F) -> Self {
        Self {
            actors,
            config,
            pin_actors: false,
            factory,
            _marker: PhantomData,
        }
    }

    pub fn with_pinning(mut self, enabled: bool) -> Self {
        self.pin_actors = enabled;
        self
    }
}

impl<S, R, F> Experiment for EngineExperiment<S, R, F>
where
    S: Default + Send + 'static,
    R: Default + Clone + Eq + Hash + Debug + Send + 'static,
    F: Fn(usize) -> ActorFn<S, R> + Send + Sync,
{
    fn actors(&self) -> usize {
        self.actors
    }

    fn run(
        &self,
        grant: &ResourceGrant,
        budget: Duration,
    ) -> std::result::Result<HashMap<String, u64>, Failure> {
        let engine = Arc::new(EpochEngine::<S, R>::new(self.actors, &self.config));
        let actions: Vec<ActorFn<S, R>> = (0..self.actors)
            .map(|actor| {
                let mut inner = (self.factory)(actor);
                if self.pin_actors {
                    let cpu = grant
                        .actor_thread(actor)
                        .and_then(|t| grant.real_cpu_of(t));
                    let mut pinned = false;
                    Box::new(move |s: &mut S, r: &mut R| {
                        if !pinned {
                            if let Some(cpu) = cpu {
                                crate::alloc::pin_current_thread(cpu);
                            }
                            pinned = true;
                        }
                        inner(s, r)
                    }) as ActorFn<S, R>
                } else {
                    inner
                }
            })
            .collect();
        let counts = engine.run(actions, budget).map_err(|e| match e {
            HarnessError::Timeout(msg) => Failure::new(Status::Timeout, msg),
            other => Failure::new(Status::RuntimeError, other.to_string()),
        })?;
        Ok(counts
            .into_iter()
            .map(|(r, n)| (format!("{:?}", r), n))
            .collect())
    }
}
