/*!
 * Resource Allocator
 * Bitset-based exclusive allocator matching abstract resource shapes
 * against the hardware topology
 *
 * Acquire and release are rare relative to experiment duration, so the
 * whole allocator state sits behind a single coarse lock. Allocation
 * failure is ordinary control flow: callers poll and retry.
 */

use crate::core::bitset::BitSet;
use crate::core::config::Capabilities;
use crate::core::types::{CoreId, NodeId, ThreadId};
use crate::topology::Topology;
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

mod affinity;
mod grant;
mod shape;

pub use affinity::pin_current_thread;
pub use grant::ResourceGrant;
pub use shape::{class_permutation, schedule_classes, AffinityMode, ResourceShape};

/// Mutable allocator state, guarded by one coarse lock
struct AllocState {
    free_threads: BitSet,
    free_cores: BitSet,
    current_use: usize,
    /// Per-node free-core counts, most free first, ties broken by lowest id
    node_free_cores: Vec<(NodeId, usize)>,
}

impl AllocState {
    fn claim_core(&mut self, topology: &Topology, core: CoreId) {
        self.free_cores.clear(core);
        for &t in topology.core_threads(core) {
            self.free_threads.clear(t);
        }
    }

    fn unclaim_core(&mut self, topology: &Topology, core: CoreId) {
        self.free_cores.set(core);
        for &t in topology.core_threads(core) {
            self.free_threads.set(t);
        }
    }

    fn rollback(&mut self, topology: &Topology, claimed: &[CoreId]) {
        for &core in claimed {
            self.unclaim_core(topology, core);
        }
    }

    fn first_free_core(&self) -> Option<CoreId> {
        self.free_cores.first_set()
    }

    fn first_free_core_on(&self, topology: &Topology, node: NodeId) -> Option<CoreId> {
        topology
            .node_cores(node)
            .iter()
            .copied()
            .find(|&c| self.free_cores.test(c))
    }

    /// First free core scanning nodes in least-busy order
    fn first_free_core_least_busy(&self, topology: &Topology) -> Option<CoreId> {
        self.node_free_cores
            .iter()
            .find_map(|&(node, _)| self.first_free_core_on(topology, node))
    }

    fn recompute_node_cache(&mut self, topology: &Topology) {
        self.node_free_cores = (0..topology.nodes())
            .map(|n| {
                let free = topology
                    .node_cores(n)
                    .iter()
                    .filter(|&&c| self.free_cores.test(c))
                    .count();
                (n, free)
            })
            .collect();
        self.node_free_cores
            .sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    }
}

/// Point-in-time allocator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub free_threads: usize,
    pub free_cores: usize,
    pub current_use: usize,
    pub max_use: usize,
}

/// Topology-aware exclusive CPU allocator
pub struct CpuAllocator {
    topology: Arc<Topology>,
    caps: Capabilities,
    max_use: usize,
    debug_checks: bool,
    state: Mutex<AllocState>,
}

impl CpuAllocator {
    /// Create an allocator over a topology
    ///
    /// `max_use` bounds the total number of actors concurrently holding
    /// grants; requests beyond it fail fast.
    pub fn new(
        topology: Arc<Topology>,
        caps: Capabilities,
        max_use: usize,
        debug_checks: bool,
    ) -> Self {
        let mut state = AllocState {
            free_threads: BitSet::filled(topology.threads()),
            free_cores: BitSet::filled(topology.cores()),
            current_use: 0,
            node_free_cores: Vec::new(),
        };
        state.recompute_node_cache(&topology);
        info!(
            "CPU allocator initialized: {} threads, {} cores, {} nodes, max use {}",
            topology.threads(),
            topology.cores(),
            topology.nodes(),
            max_use
        );
        Self {
            topology,
            caps,
            max_use,
            debug_checks,
            state: Mutex::new(state),
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn stats(&self) -> AllocatorStats {
        let st = self.state.lock();
        AllocatorStats {
            free_threads: st.free_threads.count_ones(),
            free_cores: st.free_cores.count_ones(),
            current_use: st.current_use,
            max_use: self.max_use,
        }
    }

    /// Candidate shapes for an actor count and requested mode, honoring
    /// this allocator's capabilities
    pub fn candidate_shapes(
        &self,
        actors: usize,
        thread_limit: usize,
        mode: AffinityMode,
    ) -> Vec<ResourceShape> {
        schedule_classes(actors, thread_limit, mode, &self.topology, &self.caps)
    }

    /// Attempt an exclusive allocation for a shape
    ///
    /// Returns `None` when capacity is exhausted or the shape cannot be
    /// placed; state is left exactly as found in that case.
    pub fn try_acquire(&self, shape: &ResourceShape) -> Option<ResourceGrant> {
        let mut st = self.state.lock();
        if st.current_use + shape.actors() > self.max_use {
            return None;
        }
        let grant = match shape.mode() {
            AffinityMode::None | AffinityMode::Global => self.acquire_whole_cores(&mut st, shape),
            AffinityMode::Local => self.acquire_local(&mut st, shape),
        }?;
        st.current_use += shape.actors();
        st.recompute_node_cache(&self.topology);
        if self.debug_checks {
            self.verify(&st);
        }
        debug!(
            "acquired {} threads for {} actors ({:?})",
            grant.allocated_threads().len(),
            shape.actors(),
            shape.mode()
        );
        Some(grant)
    }

    /// Return every thread held by a grant
    pub fn release(&self, grant: ResourceGrant) {
        let mut st = self.state.lock();
        for &t in grant.allocated_threads() {
            st.free_threads.set(t);
        }
        let mut cores: Vec<CoreId> = grant
            .allocated_threads()
            .iter()
            .map(|&t| self.topology.thread_core(t))
            .collect();
        cores.sort_unstable();
        cores.dedup();
        for core in cores {
            if self
                .topology
                .core_threads(core)
                .iter()
                .all(|&t| st.free_threads.test(t))
            {
                st.free_cores.set(core);
            }
        }
        st.current_use = st.current_use.saturating_sub(grant.actor_count());
        st.recompute_node_cache(&self.topology);
        if self.debug_checks {
            self.verify(&st);
        }
        debug!("released {} threads", grant.allocated_threads().len());
    }

    /// Greedy whole-core placement for NONE and GLOBAL shapes
    ///
    /// One free core per actor, lowest core id first. GLOBAL publishes the
    /// unused siblings as system threads; NONE keeps them unpublished but
    /// still allocated.
    fn acquire_whole_cores(
        &self,
        st: &mut AllocState,
        shape: &ResourceShape,
    ) -> Option<ResourceGrant> {
        let topology = &self.topology;
        let mut claimed: Vec<CoreId> = Vec::with_capacity(shape.actors());
        for _ in 0..shape.actors() {
            match st.first_free_core() {
                Some(core) => {
                    st.claim_core(topology, core);
                    claimed.push(core);
                }
                None => {
                    st.rollback(topology, &claimed);
                    return None;
                }
            }
        }

        let mut allocated = Vec::new();
        let mut actor_threads = Vec::with_capacity(shape.actors());
        let mut system = Vec::new();
        for &core in &claimed {
            let siblings = topology.core_threads(core);
            allocated.extend_from_slice(siblings);
            actor_threads.push(siblings.first().copied());
            if shape.mode() == AffinityMode::Global {
                system.extend(siblings.iter().skip(1).copied());
            }
        }
        Some(ResourceGrant::new(topology, allocated, actor_threads, system))
    }

    /// Three-phase LOCAL placement
    ///
    /// 1. node groups -> distinct real nodes, least busy first
    /// 2. core groups -> first free core on the assigned node
    /// 3. actors -> one sibling thread each; leftover siblings of claimed
    ///    cores go to the system pool
    fn acquire_local(&self, st: &mut AllocState, shape: &ResourceShape) -> Option<ResourceGrant> {
        let topology = &self.topology;
        let actors = shape.actors();

        let node_group_count = (0..actors)
            .filter_map(|i| shape.node_group(i))
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        let core_group_count = (0..actors)
            .filter_map(|i| shape.core_group(i))
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);

        // Phase 1: no claims yet, the node cache is current
        let mut node_for_group: Vec<NodeId> = Vec::with_capacity(node_group_count);
        let mut taken = BitSet::empty(topology.nodes());
        for _ in 0..node_group_count {
            let pick = st
                .node_free_cores
                .iter()
                .find(|&&(node, free)| free > 0 && !taken.test(node))
                .map(|&(node, _)| node)?;
            taken.set(pick);
            node_for_group.push(pick);
        }

        // Phase 2
        let mut claimed: Vec<CoreId> = Vec::new();
        let mut core_for_group: Vec<CoreId> = Vec::with_capacity(core_group_count);
        for label in 0..core_group_count {
            let actor = (0..actors).find(|&i| shape.core_group(i) == Some(label))?;
            let core = match shape.node_group(actor) {
                Some(g) => st.first_free_core_on(topology, node_for_group[g]),
                None => st.first_free_core_least_busy(topology),
            };
            let Some(core) = core else {
                st.rollback(topology, &claimed);
                return None;
            };
            st.claim_core(topology, core);
            claimed.push(core);
            core_for_group.push(core);
        }

        // Unconstrained actors each claim a core of their own
        let mut core_for_actor: Vec<CoreId> = Vec::with_capacity(actors);
        for i in 0..actors {
            match shape.core_group(i) {
                Some(label) => core_for_actor.push(core_for_group[label]),
                None => {
                    let core = match shape.node_group(i) {
                        Some(g) => st.first_free_core_on(topology, node_for_group[g]),
                        None => st.first_free_core_least_busy(topology),
                    };
                    let Some(core) = core else {
                        st.rollback(topology, &claimed);
                        return None;
                    };
                    st.claim_core(topology, core);
                    claimed.push(core);
                    core_for_actor.push(core);
                }
            }
        }

        // Phase 3
        let mut used_per_core: HashMap<CoreId, usize> = HashMap::new();
        let mut actor_threads: Vec<Option<ThreadId>> = Vec::with_capacity(actors);
        for &core in &core_for_actor {
            let siblings = topology.core_threads(core);
            let used = used_per_core.entry(core).or_insert(0);
            if *used >= siblings.len() {
                st.rollback(topology, &claimed);
                return None;
            }
            actor_threads.push(Some(siblings[*used]));
            *used += 1;
        }

        let mut allocated = Vec::new();
        let mut system = Vec::new();
        for &core in &claimed {
            let siblings = topology.core_threads(core);
            allocated.extend_from_slice(siblings);
            let used = used_per_core.get(&core).copied().unwrap_or(0);
            system.extend(siblings[used..].iter().copied());
        }
        Some(ResourceGrant::new(topology, allocated, actor_threads, system))
    }

    /// Invariant verification, fatal on violation; gated by the debug flag
    fn verify(&self, st: &AllocState) {
        for core in 0..self.topology.cores() {
            let siblings = self.topology.core_threads(core);
            let all_free = siblings.iter().all(|&t| st.free_threads.test(t));
            if st.free_cores.test(core) != all_free {
                panic!(
                    "allocator invariant violated: core {} available={} but siblings free={}",
                    core,
                    st.free_cores.test(core),
                    all_free
                );
            }
        }
        if st.current_use > self.max_use {
            panic!(
                "allocator invariant violated: current use {} exceeds max {}",
                st.current_use, self.max_use
            );
        }
    }
}
