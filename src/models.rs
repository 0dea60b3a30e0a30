//! Data models for the notes application.
//!
//! This module contains the core data structures shared across the crate:
//! notes and field-scoped patches, the derived knowledge graph, the graph
//! query language, search results, and AI research results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Core Note Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// A fresh note with a random id. Both timestamps are set to now.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    /// Hash of the body text. AI tickets carry it so a replacing response can
    /// tell whether the body moved on while the request was in flight.
    pub fn revision(&self) -> String {
        content_hash(&self.content)
    }
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Trim, drop a leading `#`, lowercase, dedupe and sort.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().trim_start_matches('#').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// A field-scoped update. Only the fields that are `Some` are written, so a
/// background content write never clobbers a concurrent title edit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl NotePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.tags.is_none()
    }

    /// Apply to `note` in place. Returns whether anything changed.
    pub fn apply(&self, note: &mut Note) -> bool {
        let mut changed = false;
        if let Some(ref title) = self.title {
            if note.title != *title {
                note.title = title.clone();
                changed = true;
            }
        }
        if let Some(ref content) = self.content {
            if note.content != *content {
                note.content = content.clone();
                changed = true;
            }
        }
        if let Some(ref tags) = self.tags {
            let tags = normalize_tags(tags);
            if note.tags != tags {
                note.tags = tags;
                changed = true;
            }
        }
        changed
    }
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub note_id: String,
    pub title: String,
    pub matches: Vec<SearchMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub line_number: usize,
    pub line_content: String,
}

// ============================================================================
// Knowledge Graph Data Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub in_degree: usize,  // Incoming links
    pub out_degree: usize, // Outgoing links
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: usize, // Number of times referenced
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub stats: GraphStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub orphan_count: usize,  // Nodes with no connections
    pub hub_threshold: usize, // Degree considered "hub"
    pub hub_count: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
}

// ============================================================================
// Graph Query Language
// ============================================================================
//
// Query syntax (composable, space-separated):
//   from:ID         - Center view on note ID, show its neighborhood
//   depth:N         - Expand N hops from center (default 2)
//   tag:X           - Only notes tagged X
//   links:>N        - Only nodes with more than N connections
//   links:<N        - Only nodes with fewer than N connections
//   orphans         - Show only disconnected nodes
//   hubs            - Show only highly connected nodes (>=5 links)
//   path:A->B       - Shortest path between A and B
//   recent:N        - Only nodes updated in last N days

pub const UNBOUNDED_DEPTH: usize = 99;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphQuery {
    pub center: Option<String>,
    pub depth: usize,
    pub tag_filter: Option<String>,
    pub min_links: Option<usize>,
    pub max_links: Option<usize>,
    pub orphans_only: bool,
    pub hubs_only: bool,
    pub path_start: Option<String>,
    pub path_end: Option<String>,
    pub recent_days: Option<i64>,
}

impl GraphQuery {
    pub fn parse(query: &str) -> Self {
        let mut gq = GraphQuery {
            depth: UNBOUNDED_DEPTH,
            ..Default::default()
        };

        for part in query.split_whitespace() {
            if let Some(id) = part.strip_prefix("from:") {
                gq.center = Some(id.to_string());
                if gq.depth == UNBOUNDED_DEPTH {
                    gq.depth = 2;
                }
            } else if let Some(d) = part.strip_prefix("depth:") {
                gq.depth = d.parse().unwrap_or(2);
            } else if let Some(t) = part.strip_prefix("tag:") {
                gq.tag_filter = normalize_tags([t]).into_iter().next();
            } else if let Some(l) = part.strip_prefix("links:>") {
                gq.min_links = l.parse().ok();
            } else if let Some(l) = part.strip_prefix("links:<") {
                gq.max_links = l.parse().ok();
            } else if part == "orphans" {
                gq.orphans_only = true;
            } else if part == "hubs" {
                gq.hubs_only = true;
            } else if let Some(path) = part.strip_prefix("path:") {
                if let Some((a, b)) = path.split_once("->") {
                    gq.path_start = Some(a.to_string());
                    gq.path_end = Some(b.to_string());
                }
            } else if let Some(days) = part.strip_prefix("recent:") {
                gq.recent_days = days.parse().ok();
            }
        }

        gq
    }

    pub fn is_unfiltered(&self) -> bool {
        *self
            == GraphQuery {
                depth: self.depth,
                ..Default::default()
            }
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();

        if let Some(ref c) = self.center {
            parts.push(format!("centered on {}", c));
        }
        if self.depth < UNBOUNDED_DEPTH {
            parts.push(format!("{} hops", self.depth));
        }
        if let Some(ref t) = self.tag_filter {
            parts.push(format!("tag={}", t));
        }
        if let Some(n) = self.min_links {
            parts.push(format!("links>{}", n));
        }
        if let Some(n) = self.max_links {
            parts.push(format!("links<{}", n));
        }
        if self.orphans_only {
            parts.push("orphans only".to_string());
        }
        if self.hubs_only {
            parts.push("hubs only".to_string());
        }
        if let (Some(a), Some(b)) = (&self.path_start, &self.path_end) {
            parts.push(format!("path {}->{}", a, b));
        }
        if let Some(days) = self.recent_days {
            parts.push(format!("updated in last {} days", days));
        }

        if parts.is_empty() {
            "Full graph".to_string()
        } else {
            parts.join(", ")
        }
    }
}

// ============================================================================
// AI Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchResult {
    pub text: String,
    pub sources: Vec<Source>,
}

impl ResearchResult {
    /// Render as a Markdown block suitable for appending to a note body.
    pub fn to_markdown(&self) -> String {
        let mut out = self.text.trim_end().to_string();
        if !self.sources.is_empty() {
            out.push_str("\n\n**Sources**\n");
            for s in &self.sources {
                let label = if s.title.trim().is_empty() {
                    s.uri.as_str()
                } else {
                    s.title.as_str()
                };
                out.push_str(&format!("- [{}]({})\n", label, s.uri));
            }
        }
        out
    }
}
