/*!
 * Microstress Harness Core
 * Topology-aware exclusive CPU allocation, batched worker-process
 * orchestration, and epoch-rendezvous execution for short, highly
 * concurrent micro-experiments
 */

pub mod alloc;
pub mod core;
pub mod exec;
pub mod rendezvous;
pub mod topology;

// Re-exports
pub use crate::core::config::{Capabilities, HarnessConfig};
pub use crate::core::errors::{HarnessError, Result};
pub use alloc::{
    class_permutation, schedule_classes, AffinityMode, CpuAllocator, ResourceGrant, ResourceShape,
};
pub use exec::{
    Batch, Batcher, Experiment, Failure, InMemoryRegistry, Orchestrator, Outcome, Request,
    ResultSink, Status, TaskRegistry, VecSink, WorkerConfig,
};
pub use rendezvous::{EngineExperiment, EpochEngine, SpinStyle};
pub use topology::Topology;
