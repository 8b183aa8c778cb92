/*!
 * Resource Shapes
 * Abstract affinity structure of a request, and candidate-shape generation
 */

use crate::core::config::Capabilities;
use crate::core::errors::{HarnessError, Result};
use crate::topology::Topology;
use serde::{Deserialize, Serialize};

/// Affinity mode of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityMode {
    /// Exclusive whole cores; sibling threads stay unpublished
    None,
    /// Exclusive whole cores; sibling threads published for background sharing
    Global,
    /// Placement constrained by per-actor node and core grouping
    Local,
}

/// Abstract description of the thread/affinity structure a request needs
///
/// Group labels are zero-based and contiguous. `None` means the actor is
/// unconstrained in that dimension (it claims a core of its own, on any
/// node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    actors: usize,
    mode: AffinityMode,
    node_groups: Vec<Option<usize>>,
    core_groups: Vec<Option<usize>>,
}

impl ResourceShape {
    /// Shape with no per-actor grouping (NONE and GLOBAL modes)
    pub fn unconstrained(actors: usize, mode: AffinityMode) -> Self {
        Self {
            actors,
            mode,
            node_groups: vec![None; actors],
            core_groups: vec![None; actors],
        }
    }

    /// LOCAL shape from per-actor node and core group labels
    ///
    /// Both arrays must cover every actor, labels must be contiguous from
    /// zero, and core groups must refine node groups (actors sharing a core
    /// cannot sit on different nodes).
    pub fn local(node_groups: Vec<Option<usize>>, core_groups: Vec<Option<usize>>) -> Result<Self> {
        if node_groups.len() != core_groups.len() {
            return Err(HarnessError::Config(format!(
                "group arrays must match actor count: {} vs {}",
                node_groups.len(),
                core_groups.len()
            )));
        }
        for groups in [&node_groups, &core_groups] {
            let labels: Vec<usize> = groups.iter().filter_map(|g| *g).collect();
            if let Some(&max) = labels.iter().max() {
                for expect in 0..=max {
                    if !labels.contains(&expect) {
                        return Err(HarnessError::Config(format!(
                            "group labels must be contiguous from zero, missing {}",
                            expect
                        )));
                    }
                }
            }
        }
        // Core groups refine node groups
        for (i, &cg) in core_groups.iter().enumerate() {
            let Some(cg) = cg else { continue };
            for (j, &other) in core_groups.iter().enumerate().skip(i + 1) {
                if other == Some(cg) && node_groups[i] != node_groups[j] {
                    return Err(HarnessError::Config(format!(
                        "actors {} and {} share core group {} across node groups",
                        i, j, cg
                    )));
                }
            }
        }
        Ok(Self {
            actors: node_groups.len(),
            mode: AffinityMode::Local,
            node_groups,
            core_groups,
        })
    }

    pub fn actors(&self) -> usize {
        self.actors
    }

    pub fn mode(&self) -> AffinityMode {
        self.mode
    }

    pub fn node_group(&self, actor: usize) -> Option<usize> {
        self.node_groups[actor]
    }

    pub fn core_group(&self, actor: usize) -> Option<usize> {
        self.core_groups[actor]
    }

    /// Number of whole cores this shape claims
    pub fn claimed_cores(&self) -> usize {
        match self.mode {
            AffinityMode::None | AffinityMode::Global => self.actors,
            AffinityMode::Local => {
                let distinct = self
                    .core_groups
                    .iter()
                    .filter_map(|g| *g)
                    .max()
                    .map(|m| m + 1)
                    .unwrap_or(0);
                let unconstrained = self.core_groups.iter().filter(|g| g.is_none()).count();
                distinct + unconstrained
            }
        }
    }

    /// Largest number of actors packed onto one core
    pub fn max_core_density(&self) -> usize {
        let distinct = self
            .core_groups
            .iter()
            .filter_map(|g| *g)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        (0..distinct)
            .map(|label| {
                self.core_groups
                    .iter()
                    .filter(|&&g| g == Some(label))
                    .count()
            })
            .max()
            .unwrap_or(1)
    }
}

/// Enumerate all partitions of `n` ordered items into at most `limit`
/// contiguous-labeled groups
///
/// Base case: one item forms one group. Each `(n-1)`-item partition extends
/// either by reusing an existing label or by introducing the next unused
/// label, bounded by `limit`.
pub fn class_permutation(n: usize, limit: usize) -> Vec<Vec<usize>> {
    if n == 0 || limit == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![vec![0]];
    }
    let mut out = Vec::new();
    for prefix in class_permutation(n - 1, limit) {
        let next_label = prefix.iter().copied().max().unwrap_or(0) + 1;
        for label in 0..next_label {
            let mut p = prefix.clone();
            p.push(label);
            out.push(p);
        }
        if next_label < limit {
            let mut p = prefix;
            p.push(next_label);
            out.push(p);
        }
    }
    out
}

/// Candidate shapes for an actor count and requested mode
///
/// Falls back LOCAL -> GLOBAL -> NONE when the required capability or
/// topology trust is unavailable. Shapes whose densest core group exceeds
/// the topology's threads-per-core, or whose whole-core footprint exceeds
/// `thread_limit`, are filtered out.
pub fn schedule_classes(
    actors: usize,
    thread_limit: usize,
    mode: AffinityMode,
    topology: &Topology,
    caps: &Capabilities,
) -> Vec<ResourceShape> {
    let mode = effective_mode(mode, topology, caps);
    let tpc = topology.threads_per_core();
    match mode {
        AffinityMode::None | AffinityMode::Global => {
            let shape = ResourceShape::unconstrained(actors, mode);
            if shape.claimed_cores() <= topology.cores()
                && shape.claimed_cores() * tpc <= thread_limit
            {
                vec![shape]
            } else {
                Vec::new()
            }
        }
        AffinityMode::Local => {
            let mut shapes = Vec::new();
            for cores in class_permutation(actors, actors) {
                let core_group_count = cores.iter().copied().max().unwrap_or(0) + 1;
                for nodes in class_permutation(core_group_count, topology.nodes()) {
                    let node_groups: Vec<Option<usize>> =
                        cores.iter().map(|&cg| Some(nodes[cg])).collect();
                    let core_groups: Vec<Option<usize>> = cores.iter().map(|&cg| Some(cg)).collect();
                    // Labels come straight from class_permutation, so they
                    // are contiguous and core groups refine node groups;
                    // validation has nothing left to check here
                    let shape = ResourceShape {
                        actors,
                        mode: AffinityMode::Local,
                        node_groups,
                        core_groups,
                    };
                    if shape.max_core_density() <= tpc
                        && shape.claimed_cores() * tpc <= thread_limit
                    {
                        shapes.push(shape);
                    }
                }
            }
            shapes
        }
    }
}

fn effective_mode(requested: AffinityMode, topology: &Topology, caps: &Capabilities) -> AffinityMode {
    match requested {
        AffinityMode::Local if caps.affinity_supported && topology.trusted() => AffinityMode::Local,
        AffinityMode::Local => effective_mode(AffinityMode::Global, topology, caps),
        AffinityMode::Global if caps.global_pin_supported => AffinityMode::Global,
        AffinityMode::Global => AffinityMode::None,
        AffinityMode::None => AffinityMode::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_class_permutation_two_of_two() {
        assert_eq!(class_permutation(2, 2), vec![vec![0, 0], vec![0, 1]]);
    }

    #[test]
    fn test_class_permutation_limit_one() {
        assert_eq!(class_permutation(3, 1), vec![vec![0, 0, 0]]);
    }

    #[test]
    fn test_class_permutation_labels_contiguous() {
        for p in class_permutation(4, 3) {
            let max = *p.iter().max().unwrap();
            assert!(max < 3);
            for label in 0..=max {
                assert!(p.contains(&label), "partition {:?} skips label {}", p, label);
            }
        }
    }

    #[test]
    fn test_class_permutation_counts_are_bell_like() {
        // Partitions of 3 items into <= 3 groups: {000 001 010 011 012} = 5
        assert_eq!(class_permutation(3, 3).len(), 5);
        // Limiting to 2 groups drops only 012
        assert_eq!(class_permutation(3, 2).len(), 4);
    }

    #[test]
    fn test_local_shape_rejects_length_mismatch() {
        let err = ResourceShape::local(vec![Some(0)], vec![Some(0), Some(0)]);
        assert!(err.is_err());
    }

    #[test]
    fn test_local_shape_rejects_split_core_group() {
        // Same core group, different node groups
        let err = ResourceShape::local(
            vec![Some(0), Some(1)],
            vec![Some(0), Some(0)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_claimed_cores() {
        let shape = ResourceShape::unconstrained(3, AffinityMode::Global);
        assert_eq!(shape.claimed_cores(), 3);

        let local =
            ResourceShape::local(vec![Some(0), Some(0)], vec![Some(0), Some(0)]).unwrap();
        assert_eq!(local.claimed_cores(), 1);
        assert_eq!(local.max_core_density(), 2);
    }

    #[test]
    fn test_schedule_classes_density_filter() {
        // 2 threads per core: no shape may pack 3 actors onto one core
        let topo = Topology::uniform(1, 4, 2);
        let caps = Capabilities::all();
        let shapes = schedule_classes(3, topo.threads(), AffinityMode::Local, &topo, &caps);
        assert!(!shapes.is_empty());
        assert!(shapes.iter().all(|s| s.max_core_density() <= 2));
    }

    #[test]
    fn test_schedule_classes_fallback_without_caps() {
        let topo = Topology::uniform(1, 4, 2);
        let shapes =
            schedule_classes(2, topo.threads(), AffinityMode::Local, &topo, &Capabilities::none());
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].mode(), AffinityMode::None);
    }

    #[test]
    fn test_schedule_classes_fallback_untrusted_topology() {
        let topo = Topology::uniform(1, 4, 2).untrusted();
        let caps = Capabilities::all();
        let shapes = schedule_classes(2, topo.threads(), AffinityMode::Local, &topo, &caps);
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].mode(), AffinityMode::Global);
    }

    #[test]
    fn test_schedule_classes_thread_limit() {
        let topo = Topology::uniform(1, 4, 2);
        let caps = Capabilities::all();
        // Limit of 2 threads allows only single-core shapes
        let shapes = schedule_classes(2, 2, AffinityMode::Local, &topo, &caps);
        assert!(shapes.iter().all(|s| s.claimed_cores() == 1));
    }
}
