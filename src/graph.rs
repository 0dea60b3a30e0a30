//! Knowledge graph building.
//!
//! The graph is recomputed from the full note collection on every mutation.
//! It has no state of its own: nodes are the notes, edges are the wiki-links
//! whose titles resolve to some other note.
//!
//! Policies:
//! - Duplicate titles: the first note holding a title (in collection order,
//!   which the store keeps most-recently-updated first) owns it.
//! - Duplicate links: repeated links from one note to the same target collapse
//!   into a single edge whose `weight` counts the occurrences.

use crate::links::extract_links;
use crate::models::{GraphEdge, GraphNode, GraphStats, KnowledgeGraph, Note};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

pub const HUB_THRESHOLD: usize = 5;

// ============================================================================
// Title Resolution
// ============================================================================

/// Lowercased title → note id.
#[derive(Debug, Clone, Default)]
pub struct TitleIndex {
    by_title: HashMap<String, String>,
}

impl TitleIndex {
    pub fn build(notes: &[Note]) -> Self {
        let mut by_title = HashMap::with_capacity(notes.len());
        for note in notes {
            let key = note.title.to_lowercase();
            if key.is_empty() {
                continue;
            }
            // First seen wins
            by_title.entry(key).or_insert_with(|| note.id.clone());
        }
        Self { by_title }
    }

    /// Case-insensitive exact match. Empty titles never resolve.
    pub fn resolve(&self, title: &str) -> Option<&str> {
        if title.is_empty() {
            return None;
        }
        self.by_title.get(&title.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }
}

// ============================================================================
// Graph Building
// ============================================================================

/// Resolved outgoing edges of one note, deduplicated with weights, in order of
/// first occurrence.
fn edges_for_note(note: &Note, raw_links: &[String], index: &TitleIndex) -> Vec<GraphEdge> {
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut slot: HashMap<&str, usize> = HashMap::new();

    for title in raw_links {
        let target = match index.resolve(title) {
            Some(t) if t != note.id => t,
            _ => continue,
        };
        match slot.entry(target) {
            Entry::Occupied(e) => edges[*e.get()].weight += 1,
            Entry::Vacant(e) => {
                e.insert(edges.len());
                edges.push(GraphEdge {
                    source: note.id.clone(),
                    target: target.to_string(),
                    weight: 1,
                });
            }
        }
    }

    edges
}

pub fn build_knowledge_graph(notes: &[Note]) -> KnowledgeGraph {
    use rayon::prelude::*;

    let index = TitleIndex::build(notes);

    // Extraction is the per-note hot path; collect keeps collection order.
    let raw_links: Vec<Vec<String>> = notes.par_iter().map(|n| extract_links(&n.content)).collect();

    let mut graph_edges = Vec::new();
    for (note, links) in notes.iter().zip(&raw_links) {
        graph_edges.extend(edges_for_note(note, links, &index));
    }

    // Calculate degrees
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut out_degree: HashMap<&str, usize> = HashMap::new();
    for e in &graph_edges {
        *out_degree.entry(e.source.as_str()).or_insert(0) += 1;
        *in_degree.entry(e.target.as_str()).or_insert(0) += 1;
    }

    let graph_nodes: Vec<GraphNode> = notes
        .iter()
        .map(|note| GraphNode {
            id: note.id.clone(),
            title: note.title.clone(),
            tags: note.tags.clone(),
            in_degree: *in_degree.get(note.id.as_str()).unwrap_or(&0),
            out_degree: *out_degree.get(note.id.as_str()).unwrap_or(&0),
            updated_at: Some(note.updated_at),
        })
        .collect();

    let stats = compute_stats(&graph_nodes, graph_edges.len());

    KnowledgeGraph {
        nodes: graph_nodes,
        edges: graph_edges,
        stats,
    }
}

pub fn compute_stats(nodes: &[GraphNode], total_edges: usize) -> GraphStats {
    let total_nodes = nodes.len();
    let orphan_count = nodes
        .iter()
        .filter(|n| n.in_degree + n.out_degree == 0)
        .count();
    let hub_count = nodes
        .iter()
        .filter(|n| n.in_degree + n.out_degree >= HUB_THRESHOLD)
        .count();
    let total_degree: usize = nodes.iter().map(|n| n.in_degree + n.out_degree).sum();
    let avg_degree = if total_nodes > 0 {
        total_degree as f64 / total_nodes as f64
    } else {
        0.0
    };
    let max_degree = nodes
        .iter()
        .map(|n| n.in_degree + n.out_degree)
        .max()
        .unwrap_or(0);

    GraphStats {
        total_nodes,
        total_edges,
        orphan_count,
        hub_threshold: HUB_THRESHOLD,
        hub_count,
        avg_degree,
        max_degree,
    }
}

// ============================================================================
// Per-note Link Reports
// ============================================================================

/// Distinct link titles in `note` that resolve to no note, in order of first
/// appearance. Empty titles are skipped; self links resolve and are not
/// reported.
pub fn unresolved_links(note: &Note, index: &TitleIndex) -> Vec<String> {
    let mut seen = HashSet::new();
    extract_links(&note.content)
        .into_iter()
        .filter(|t| !t.is_empty() && index.resolve(t).is_none())
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

/// Ids of notes with an edge into `id`, in graph order.
pub fn backlinks<'a>(graph: &'a KnowledgeGraph, id: &str) -> Vec<&'a str> {
    graph
        .edges
        .iter()
        .filter(|e| e.target == id)
        .map(|e| e.source.as_str())
        .collect()
}
