/*!
 * Core Types
 * Common identifiers used across the harness
 */

/// Hardware thread id (zero-based, topology-local)
pub type ThreadId = usize;

/// Physical core id
pub type CoreId = usize;

/// NUMA node id
pub type NodeId = usize;

/// Experiment request id
pub type RequestId = u64;

/// Single-use token identifying one worker process
pub type Token = uuid::Uuid;
