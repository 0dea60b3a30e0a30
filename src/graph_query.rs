//! Ascent-powered graph view queries.
//!
//! The graph itself is always rebuilt in full from the notes; this module only
//! narrows an already-built `KnowledgeGraph` for the graph view. Reachability
//! and shortest path are expressed as Datalog programs using the `ascent`
//! crate, rebuilt per query.

use crate::graph::compute_stats;
use crate::models::{GraphEdge, GraphQuery, KnowledgeGraph, UNBOUNDED_DEPTH};
use ascent::{ascent_run, Dual};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Helpers
// ============================================================================

/// Bidirectional (source, target) pairs for Ascent.
fn load_edge_pairs(edges: &[GraphEdge]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(edges.len() * 2);
    for e in edges {
        pairs.push((e.source.clone(), e.target.clone()));
        pairs.push((e.target.clone(), e.source.clone()));
    }
    pairs
}

// ============================================================================
// Ascent Queries
// ============================================================================

/// Nodes reachable from `center` within `max_depth` hops over bidirectional
/// edges, including `center` itself.
fn compute_reachable(
    edge_pairs: &[(String, String)],
    center: &str,
    max_depth: usize,
) -> HashSet<String> {
    let edges: Vec<(String, String)> = edge_pairs.to_vec();
    let start = center.to_string();
    let max_d = u32::try_from(max_depth).unwrap_or(u32::MAX);

    let result = ascent_run! {
        relation edge(String, String) = edges;
        relation reachable(String, u32);

        reachable(start.clone(), 0);

        reachable(y.clone(), d + 1) <--
            reachable(x, d),
            edge(x, y),
            if *d < max_d;
    };

    result.reachable.into_iter().map(|(node, _)| node).collect()
}

/// Nodes on one shortest path between `start` and `end`: BFS distances via an
/// Ascent lattice, then greedy backtracking through the distance map. Empty
/// when `end` is unreachable.
fn compute_shortest_path(edge_pairs: &[(String, String)], start: &str, end: &str) -> HashSet<String> {
    let edges: Vec<(String, String, u32)> = edge_pairs
        .iter()
        .map(|(s, t)| (s.clone(), t.clone(), 1u32))
        .collect();
    let origin = start.to_string();

    let result = ascent_run! {
        relation edge(String, String, u32) = edges;
        lattice dist(String, Dual<u32>);

        dist(origin.clone(), Dual(0u32));

        dist(y.clone(), Dual(d + w)) <--
            dist(x, ?Dual(d)),
            edge(x, y, w);
    };

    let dist_map: HashMap<String, u32> = result
        .dist
        .into_iter()
        .map(|(node, Dual(d))| (node, d))
        .collect();

    let end_dist = match dist_map.get(end) {
        Some(&d) => d,
        None => return HashSet::new(),
    };

    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for (s, t) in edge_pairs {
        adj.entry(s.as_str()).or_default().push(t.as_str());
    }

    let mut path = HashSet::new();
    let mut current = end.to_string();
    let mut current_dist = end_dist;
    path.insert(current.clone());

    while current != start && current_dist > 0 {
        let next = adj
            .get(current.as_str())
            .and_then(|neighbors| {
                neighbors
                    .iter()
                    .find(|&&n| dist_map.get(n).copied() == Some(current_dist - 1))
            })
            .map(|&n| n.to_string());

        match next {
            Some(n) => {
                current_dist -= 1;
                current = n;
                path.insert(current.clone());
            }
            None => break,
        }
    }

    path
}

// ============================================================================
// Main Query Entry Point
// ============================================================================

/// Narrow `graph` according to `query`. Degrees on the returned nodes are the
/// full-graph degrees, so filters like `links:>N` do not shift as neighbours
/// are hidden.
pub fn query_graph(query: &GraphQuery, graph: &KnowledgeGraph) -> KnowledgeGraph {
    if query.is_unfiltered() && query.center.is_none() {
        return graph.clone();
    }

    let edge_pairs = load_edge_pairs(&graph.edges);

    let reachable: Option<HashSet<String>> = query.center.as_ref().map(|center| {
        // No shortest path is longer than the node count, so deeper
        // requests only repeat work.
        let depth = if query.depth == UNBOUNDED_DEPTH {
            graph.nodes.len()
        } else {
            query.depth.min(graph.nodes.len())
        };
        compute_reachable(&edge_pairs, center, depth)
    });

    let path_nodes: HashSet<String> = match (&query.path_start, &query.path_end) {
        (Some(a), Some(b)) => compute_shortest_path(&edge_pairs, a, b),
        _ => HashSet::new(),
    };
    let path_query = query.path_start.is_some() && query.path_end.is_some();

    // A window reaching past the representable range keeps everything.
    let cutoff: Option<DateTime<Utc>> = query
        .recent_days
        .and_then(TimeDelta::try_days)
        .and_then(|window| Utc::now().checked_sub_signed(window));
    let nodes: Vec<_> = graph
        .nodes
        .iter()
        .filter(|node| {
            if path_query && !path_nodes.contains(&node.id) {
                return false;
            }
            if let Some(ref r) = reachable {
                if !r.contains(&node.id) {
                    return false;
                }
            }
            if let Some(ref tag) = query.tag_filter {
                if !node.tags.iter().any(|t| t == tag) {
                    return false;
                }
            }

            let total_deg = node.in_degree + node.out_degree;
            if let Some(min) = query.min_links {
                if total_deg <= min {
                    return false;
                }
            }
            if let Some(max) = query.max_links {
                if total_deg >= max {
                    return false;
                }
            }
            if query.orphans_only && total_deg > 0 {
                return false;
            }
            if query.hubs_only && total_deg < graph.stats.hub_threshold.max(1) {
                return false;
            }

            if let (Some(cutoff), Some(updated)) = (cutoff, node.updated_at) {
                if updated < cutoff {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect();

    let included: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let edges: Vec<GraphEdge> = graph
        .edges
        .iter()
        .filter(|e| included.contains(e.source.as_str()) && included.contains(e.target.as_str()))
        .cloned()
        .collect();

    let stats = compute_stats(&nodes, edges.len());
    KnowledgeGraph {
        nodes,
        edges,
        stats,
    }
}
