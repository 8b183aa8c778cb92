/*!
 * Hardware Topology
 * Immutable description of threads, cores, and NUMA nodes
 *
 * The topology is supplied externally (probing is out of scope) and is
 * validated once at construction. Every allocator decision is made against
 * this static picture of the machine.
 */

use crate::core::errors::{Result, TopologyError};
use crate::core::types::{CoreId, NodeId, ThreadId};
use serde::{Deserialize, Serialize};

/// Static thread/core/node containment mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    core_count: usize,
    node_count: usize,
    thread_core: Vec<CoreId>,
    thread_node: Vec<NodeId>,
    thread_real_cpu: Vec<usize>,
    core_threads: Vec<Vec<ThreadId>>,
    node_cores: Vec<Vec<CoreId>>,
    trusted: bool,
}

impl Topology {
    /// Build and validate a topology from per-thread mappings
    ///
    /// `trusted` indicates whether the mapping came from a reliable source;
    /// untrusted topologies disqualify LOCAL placement.
    pub fn new(
        core_count: usize,
        node_count: usize,
        thread_core: Vec<CoreId>,
        thread_node: Vec<NodeId>,
        thread_real_cpu: Vec<usize>,
        trusted: bool,
    ) -> Result<Self> {
        let threads = thread_core.len();
        if thread_node.len() != threads || thread_real_cpu.len() != threads {
            return Err(TopologyError::LengthMismatch(format!(
                "core map {} vs node map {} vs cpu map {}",
                threads,
                thread_node.len(),
                thread_real_cpu.len()
            ))
            .into());
        }
        if let Some(&c) = thread_core.iter().find(|&&c| c >= core_count) {
            return Err(TopologyError::IdOutOfRange(format!("core {} of {}", c, core_count)).into());
        }
        if let Some(&n) = thread_node.iter().find(|&&n| n >= node_count) {
            return Err(TopologyError::IdOutOfRange(format!("node {} of {}", n, node_count)).into());
        }

        let mut core_threads: Vec<Vec<ThreadId>> = vec![Vec::new(); core_count];
        for (t, &c) in thread_core.iter().enumerate() {
            core_threads[c].push(t);
        }

        // A core belongs to exactly one node, derived from its sibling
        // threads; a declared core no thread maps to would later be handed
        // out as an empty grant
        let mut node_cores: Vec<Vec<CoreId>> = vec![Vec::new(); node_count];
        for (c, siblings) in core_threads.iter().enumerate() {
            let Some(&first) = siblings.first() else {
                return Err(TopologyError::InconsistentContainment(format!(
                    "core {} has no threads",
                    c
                ))
                .into());
            };
            let node = thread_node[first];
            if siblings.iter().any(|&t| thread_node[t] != node) {
                return Err(TopologyError::InconsistentContainment(format!(
                    "core {} spans multiple nodes",
                    c
                ))
                .into());
            }
            node_cores[node].push(c);
        }

        Ok(Self {
            core_count,
            node_count,
            thread_core,
            thread_node,
            thread_real_cpu,
            core_threads,
            node_cores,
            trusted,
        })
    }

    /// Regular topology: `nodes * cores_per_node * threads_per_core` threads
    /// with contiguous ids, trusted
    ///
    /// Useful in tests and as the packing fallback when host probing is not
    /// believed.
    pub fn uniform(nodes: usize, cores_per_node: usize, threads_per_core: usize) -> Self {
        let cores = nodes * cores_per_node;
        let threads = cores * threads_per_core;
        // Regular layout needs no validation; containment is contiguous by
        // construction
        Self {
            core_count: cores,
            node_count: nodes,
            thread_core: (0..threads).map(|t| t / threads_per_core).collect(),
            thread_node: (0..threads)
                .map(|t| (t / threads_per_core) / cores_per_node)
                .collect(),
            thread_real_cpu: (0..threads).collect(),
            core_threads: (0..cores)
                .map(|c| (c * threads_per_core..(c + 1) * threads_per_core).collect())
                .collect(),
            node_cores: (0..nodes)
                .map(|n| (n * cores_per_node..(n + 1) * cores_per_node).collect())
                .collect(),
            trusted: true,
        }
    }

    /// Mark this topology as untrusted (disqualifies LOCAL placement)
    pub fn untrusted(mut self) -> Self {
        self.trusted = false;
        self
    }

    pub fn threads(&self) -> usize {
        self.thread_core.len()
    }

    pub fn cores(&self) -> usize {
        self.core_count
    }

    pub fn nodes(&self) -> usize {
        self.node_count
    }

    pub fn trusted(&self) -> bool {
        self.trusted
    }

    /// Sibling threads of a core, ascending
    pub fn core_threads(&self, core: CoreId) -> &[ThreadId] {
        &self.core_threads[core]
    }

    /// Cores contained in a node, ascending
    pub fn node_cores(&self, node: NodeId) -> &[CoreId] {
        &self.node_cores[node]
    }

    pub fn thread_core(&self, thread: ThreadId) -> CoreId {
        self.thread_core[thread]
    }

    pub fn thread_node(&self, thread: ThreadId) -> NodeId {
        self.thread_node[thread]
    }

    /// OS-level CPU id backing a topology thread
    pub fn thread_real_cpu(&self, thread: ThreadId) -> usize {
        self.thread_real_cpu[thread]
    }

    /// Largest sibling count across cores
    pub fn threads_per_core(&self) -> usize {
        self.core_threads
            .iter()
            .map(|siblings| siblings.len())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::HarnessError;

    #[test]
    fn test_uniform_counts() {
        let topo = Topology::uniform(2, 2, 4);
        assert_eq!(topo.threads(), 16);
        assert_eq!(topo.cores(), 4);
        assert_eq!(topo.nodes(), 2);
        assert_eq!(topo.threads_per_core(), 4);
        assert!(topo.trusted());
    }

    #[test]
    fn test_uniform_containment() {
        let topo = Topology::uniform(2, 2, 2);
        assert_eq!(topo.core_threads(0), &[0, 1]);
        assert_eq!(topo.core_threads(3), &[6, 7]);
        assert_eq!(topo.node_cores(0), &[0, 1]);
        assert_eq!(topo.node_cores(1), &[2, 3]);
        assert_eq!(topo.thread_node(7), 1);
        assert_eq!(topo.thread_core(5), 2);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Topology::new(1, 1, vec![0, 0], vec![0], vec![0, 1], true).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Topology(TopologyError::LengthMismatch(_))
        ));
    }

    #[test]
    fn test_out_of_range_core_rejected() {
        let err = Topology::new(1, 1, vec![0, 1], vec![0, 0], vec![0, 1], true).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Topology(TopologyError::IdOutOfRange(_))
        ));
    }

    #[test]
    fn test_core_spanning_nodes_rejected() {
        // Two threads of one core on different nodes
        let err = Topology::new(1, 2, vec![0, 0], vec![0, 1], vec![0, 1], true).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Topology(TopologyError::InconsistentContainment(_))
        ));
    }

    #[test]
    fn test_core_without_threads_rejected() {
        // Two cores declared, every thread on core 0
        let err = Topology::new(2, 1, vec![0, 0], vec![0, 0], vec![0, 1], true).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Topology(TopologyError::InconsistentContainment(_))
        ));
    }

    #[test]
    fn test_uniform_matches_validated_construction() {
        let uniform = Topology::uniform(2, 2, 2);
        let built = Topology::new(
            4,
            2,
            uniform.thread_core.clone(),
            uniform.thread_node.clone(),
            uniform.thread_real_cpu.clone(),
            true,
        )
        .unwrap();
        assert_eq!(built.core_threads, uniform.core_threads);
        assert_eq!(built.node_cores, uniform.node_cores);
    }

    #[test]
    fn test_untrusted_flag() {
        let topo = Topology::uniform(1, 2, 2).untrusted();
        assert!(!topo.trusted());
    }
}
