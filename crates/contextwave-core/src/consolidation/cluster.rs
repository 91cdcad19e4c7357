//! Node-Overlap Clustering
//!
//! Two contexts are linked when their node sets share at least
//! `min_overlap` entries; clusters are the connected components under that
//! relation. Oversized components split by re-running with a tightened
//! overlap bound; undersized components are discarded.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::memory::Context;

/// Clustering parameters
#[derive(Debug, Clone)]
pub struct ClusterParams {
    /// Minimum shared node entries for a link
    pub min_overlap: usize,
    /// Components smaller than this are discarded
    pub min_cluster: usize,
    /// Components larger than this are split with `min_overlap + 1`
    pub max_cluster: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            min_overlap: 4,
            min_cluster: 3,
            max_cluster: 15,
        }
    }
}

/// Cluster a slice of contexts by node overlap. Returns index sets into the
/// input slice; members ascend within a cluster and clusters are ordered by
/// their smallest member, so the result is deterministic for a given input
/// order.
pub fn cluster_by_node_overlap(contexts: &[Context], params: &ClusterParams) -> Vec<Vec<usize>> {
    let indices: Vec<usize> = (0..contexts.len()).collect();
    let mut clusters = components_within(contexts, &indices, params.min_overlap, params.max_cluster);
    clusters.retain(|c| c.len() >= params.min_cluster);
    clusters.sort_by_key(|c| c[0]);
    clusters
}

/// Connected components over `members`, splitting any component above
/// `max_cluster` by tightening the overlap bound until everything fits.
fn components_within(
    contexts: &[Context],
    members: &[usize],
    min_overlap: usize,
    max_cluster: usize,
) -> Vec<Vec<usize>> {
    let node_sets: HashMap<usize, BTreeSet<&str>> = members
        .iter()
        .map(|&i| (i, contexts[i].node_name_set()))
        .collect();

    // Node name -> member indices; keeps linking near-linear for sparse graphs
    let mut by_node: HashMap<&str, Vec<usize>> = HashMap::new();
    for &i in members {
        for name in &node_sets[&i] {
            by_node.entry(*name).or_default().push(i);
        }
    }

    let linked = |a: usize, b: usize| -> bool {
        node_sets[&a].intersection(&node_sets[&b]).count() >= min_overlap
    };

    let mut seen: BTreeSet<usize> = BTreeSet::new();
    let mut components: Vec<Vec<usize>> = Vec::new();
    for &start in members {
        if seen.contains(&start) {
            continue;
        }
        let mut component = vec![];
        let mut queue = VecDeque::from([start]);
        seen.insert(start);
        while let Some(current) = queue.pop_front() {
            component.push(current);
            let mut neighbors: BTreeSet<usize> = BTreeSet::new();
            for name in &node_sets[&current] {
                if let Some(sharers) = by_node.get(name) {
                    neighbors.extend(sharers.iter().copied());
                }
            }
            for neighbor in neighbors {
                if !seen.contains(&neighbor) && linked(current, neighbor) {
                    seen.insert(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    // Oversized components split under a tightened bound. A component of
    // singletons cannot loop: overlap requirements eventually exceed any
    // node set and everything falls apart into undersized pieces.
    let mut out = Vec::new();
    for component in components {
        if component.len() > max_cluster {
            out.extend(components_within(
                contexts,
                &component,
                min_overlap + 1,
                max_cluster,
            ));
        } else {
            out.push(component);
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
