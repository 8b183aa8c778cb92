/*!
 * Resource Grants
 * Concrete, exclusive binding of request actors to hardware threads
 */

use crate::core::types::{CoreId, NodeId, ThreadId};
use crate::topology::Topology;
use std::collections::HashMap;

/// Concrete result of a successful allocation
///
/// `allocated` covers every thread taken out of circulation: assigned actor
/// threads, published system threads, and (in NONE mode) the unpublished
/// siblings of claimed cores. A grant is created only by the allocator and
/// consumed exactly once by `CpuAllocator::release`, which takes it by
/// value.
#[derive(Debug)]
pub struct ResourceGrant {
    allocated: Vec<ThreadId>,
    actor_threads: Vec<Option<ThreadId>>,
    system_threads: Vec<ThreadId>,
    thread_core: HashMap<ThreadId, CoreId>,
    thread_node: HashMap<ThreadId, NodeId>,
    thread_real_cpu: HashMap<ThreadId, usize>,
}

impl ResourceGrant {
    pub(crate) fn new(
        topology: &Topology,
        allocated: Vec<ThreadId>,
        actor_threads: Vec<Option<ThreadId>>,
        system_threads: Vec<ThreadId>,
    ) -> Self {
        let thread_core = allocated
            .iter()
            .map(|&t| (t, topology.thread_core(t)))
            .collect();
        let thread_node = allocated
            .iter()
            .map(|&t| (t, topology.thread_node(t)))
            .collect();
        let thread_real_cpu = allocated
            .iter()
            .map(|&t| (t, topology.thread_real_cpu(t)))
            .collect();
        Self {
            allocated,
            actor_threads,
            system_threads,
            thread_core,
            thread_node,
            thread_real_cpu,
        }
    }

    /// Every thread held by this grant
    pub fn allocated_threads(&self) -> &[ThreadId] {
        &self.allocated
    }

    /// Thread assigned to one actor, `None` if unassigned
    pub fn actor_thread(&self, actor: usize) -> Option<ThreadId> {
        self.actor_threads.get(actor).copied().flatten()
    }

    pub fn actor_count(&self) -> usize {
        self.actor_threads.len()
    }

    /// Unused sibling threads published for background sharing
    pub fn system_threads(&self) -> &[ThreadId] {
        &self.system_threads
    }

    /// Core lookup, restricted to allocated threads
    pub fn core_of(&self, thread: ThreadId) -> Option<CoreId> {
        self.thread_core.get(&thread).copied()
    }

    /// Node lookup, restricted to allocated threads
    pub fn node_of(&self, thread: ThreadId) -> Option<NodeId> {
        self.thread_node.get(&thread).copied()
    }

    /// OS CPU id lookup, restricted to allocated threads
    pub fn real_cpu_of(&self, thread: ThreadId) -> Option<usize> {
        self.thread_real_cpu.get(&thread).copied()
    }
}
