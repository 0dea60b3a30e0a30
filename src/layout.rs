//! Force-directed layout of the knowledge graph.
//!
//! The engine follows the d3-force model the graph page has always used:
//! a cooling factor `alpha` scales every force and decays toward
//! `alpha_target` each tick, and velocities are damped by `velocity_decay`.
//! Forces, applied in this order on every tick:
//!
//! 1. link attraction toward `link_distance`
//! 2. many-body repulsion (`charge_strength`, negative repels)
//! 3. centering of the free nodes' mean position on `center`
//! 4. collision avoidance with `collision_radius`
//!
//! Nodes live in an arena (`Vec<NodeState>`) addressed by index; edges are
//! index pairs. Indices are only valid until the next [`LayoutEngine::sync`].

use crate::models::KnowledgeGraph;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    pub link_distance: f64,
    pub charge_strength: f64,
    pub charge_distance_min: f64,
    pub collision_radius: f64,
    pub collision_strength: f64,
    pub center: [f64; 2],
    pub center_strength: f64,
    pub velocity_decay: f64,
    pub alpha_min: f64,
    pub alpha_decay: f64,
    /// Alpha after nodes are added or removed.
    pub reheat_alpha: f64,
    /// Alpha after only the edge set changed.
    pub edge_reheat_alpha: f64,
    /// Alpha target held while any node is being dragged.
    pub drag_alpha_target: f64,
    /// Mean kinetic energy per free node under which the layout is settling.
    pub settle_energy: f64,
    /// Maximum distance a new node with no placed neighbour is seeded from center.
    pub seed_jitter: f64,
    pub seed: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let alpha_min = 0.001;
        Self {
            link_distance: 80.0,
            charge_strength: -200.0,
            charge_distance_min: 1.0,
            collision_radius: 30.0,
            collision_strength: 1.0,
            center: [0.0, 0.0],
            center_strength: 1.0,
            velocity_decay: 0.4,
            alpha_min,
            // ~300 ticks from alpha 1 to alpha_min
            alpha_decay: 1.0 - alpha_min.powf(1.0 / 300.0),
            reheat_alpha: 0.5,
            edge_reheat_alpha: 0.3,
            drag_alpha_target: 0.3,
            settle_energy: 0.01,
            seed_jitter: 30.0,
            seed: 0x5eed,
        }
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationState {
    /// No nodes, or ticking halted.
    Idle,
    Running,
    /// Energy is negligible; ticks still run.
    Settling,
    /// At least one node is pinned under the pointer.
    PinnedInteraction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub pin: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    source: usize,
    target: usize,
    strength: f64,
    bias: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodePosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub pinned: bool,
}

/// What changed in the last [`LayoutEngine::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub edges_changed: bool,
}

impl SyncReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.edges_changed
    }
}

/// Serializable snapshot for the rendering surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutSnapshot {
    pub state: SimulationState,
    pub alpha: f64,
    pub nodes: Vec<NodePosition>,
    pub edges: Vec<(String, String)>,
}

// ============================================================================
// Engine
// ============================================================================

pub struct LayoutEngine {
    config: LayoutConfig,
    nodes: Vec<NodeState>,
    index: HashMap<String, usize>,
    links: Vec<Link>,
    edge_keys: HashSet<(String, String)>,
    alpha: f64,
    alpha_target: f64,
    last_energy: f64,
    stopped: bool,
    rng: StdRng,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            links: Vec::new(),
            edge_keys: HashSet::new(),
            alpha: 1.0,
            alpha_target: 0.0,
            last_energy: f64::INFINITY,
            stopped: false,
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&NodeState> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[NodeState] {
        &self.nodes
    }

    pub fn state(&self) -> SimulationState {
        if self.nodes.is_empty() || self.stopped {
            SimulationState::Idle
        } else if self.nodes.iter().any(|n| n.pin.is_some()) {
            SimulationState::PinnedInteraction
        } else if self.alpha < self.config.alpha_min
            || self.last_energy < self.config.settle_energy
        {
            SimulationState::Settling
        } else {
            SimulationState::Running
        }
    }

    /// Halt ticking, e.g. when the graph view unmounts. State is kept.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn resume(&mut self) {
        self.stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Add energy so the layout rearranges from where it is.
    pub fn reheat(&mut self, alpha: f64) {
        self.alpha = self.alpha.max(alpha);
        self.last_energy = f64::INFINITY;
    }

    // ------------------------------------------------------------------------
    // Topology reconciliation
    // ------------------------------------------------------------------------

    /// Reconcile with a freshly built graph. Surviving nodes keep position and
    /// velocity; new nodes are seeded next to a placed neighbour or near the
    /// center; vanished nodes are dropped. Any change reheats the simulation.
    pub fn sync(&mut self, graph: &KnowledgeGraph) -> SyncReport {
        let mut report = SyncReport::default();

        let mut old: HashMap<String, NodeState> = self
            .nodes
            .drain(..)
            .map(|n| (n.id.clone(), n))
            .collect();

        let mut fresh: Vec<usize> = Vec::new();
        let mut nodes = Vec::with_capacity(graph.nodes.len());
        let mut index = HashMap::with_capacity(graph.nodes.len());
        for gn in &graph.nodes {
            if index.contains_key(&gn.id) {
                continue;
            }
            let state = match old.remove(&gn.id) {
                Some(existing) => existing,
                None => {
                    fresh.push(nodes.len());
                    report.added.push(gn.id.clone());
                    NodeState {
                        id: gn.id.clone(),
                        x: f64::NAN,
                        y: f64::NAN,
                        vx: 0.0,
                        vy: 0.0,
                        pin: None,
                    }
                }
            };
            index.insert(gn.id.clone(), nodes.len());
            nodes.push(state);
        }
        report.removed = old.into_keys().collect();
        report.removed.sort();

        let edge_keys: HashSet<(String, String)> = graph
            .edges
            .iter()
            .filter(|e| index.contains_key(&e.source) && index.contains_key(&e.target))
            .map(|e| (e.source.clone(), e.target.clone()))
            .collect();
        report.edges_changed = edge_keys != self.edge_keys;

        self.nodes = nodes;
        self.index = index;
        self.edge_keys = edge_keys;
        self.rebuild_links(graph);
        self.seed_positions(&fresh);

        if !report.added.is_empty() || !report.removed.is_empty() {
            self.reheat(self.config.reheat_alpha);
        } else if report.edges_changed {
            self.reheat(self.config.edge_reheat_alpha);
        }

        if !report.is_unchanged() {
            tracing::debug!(
                added = report.added.len(),
                removed = report.removed.len(),
                edges_changed = report.edges_changed,
                alpha = self.alpha,
                "layout reconciled"
            );
        }
        report
    }

    fn rebuild_links(&mut self, graph: &KnowledgeGraph) {
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for e in &graph.edges {
            if let (Some(&s), Some(&t)) = (self.index.get(&e.source), self.index.get(&e.target)) {
                if s != t && seen.insert((s, t)) {
                    pairs.push((s, t));
                }
            }
        }

        let mut count = vec![0usize; self.nodes.len()];
        for &(s, t) in &pairs {
            count[s] += 1;
            count[t] += 1;
        }

        self.links = pairs
            .into_iter()
            .map(|(s, t)| Link {
                source: s,
                target: t,
                strength: 1.0 / count[s].min(count[t]) as f64,
                bias: count[s] as f64 / (count[s] + count[t]) as f64,
            })
            .collect();
    }

    fn seed_positions(&mut self, fresh: &[usize]) {
        let mut neighbours: HashMap<usize, Vec<usize>> = HashMap::new();
        for l in &self.links {
            neighbours.entry(l.source).or_default().push(l.target);
            neighbours.entry(l.target).or_default().push(l.source);
        }

        for &i in fresh {
            let anchor = neighbours
                .get(&i)
                .and_then(|ns| ns.iter().find(|&&n| self.nodes[n].x.is_finite()))
                .map(|&n| [self.nodes[n].x, self.nodes[n].y]);

            let angle = self.rng.gen_range(0.0..std::f64::consts::TAU);
            let (origin, radius) = match anchor {
                Some(p) => (p, self.config.link_distance * self.rng.gen_range(0.5..1.0)),
                None => (
                    self.config.center,
                    self.config.seed_jitter * self.rng.gen::<f64>().sqrt(),
                ),
            };
            let node = &mut self.nodes[i];
            node.x = origin[0] + radius * angle.cos();
            node.y = origin[1] + radius * angle.sin();
            node.vx = 0.0;
            node.vy = 0.0;
        }
    }

    // ------------------------------------------------------------------------
    // Ticking
    // ------------------------------------------------------------------------

    /// Advance one step. A stopped or empty engine does nothing.
    pub fn tick(&mut self) -> SimulationState {
        if self.nodes.is_empty() || self.stopped {
            return self.state();
        }

        self.alpha += (self.alpha_target - self.alpha) * self.config.alpha_decay;
        let alpha = self.alpha;

        self.apply_links(alpha);
        self.apply_charge(alpha);
        self.apply_center();
        self.apply_collision();
        self.integrate();

        self.state()
    }

    pub fn tick_n(&mut self, n: usize) -> SimulationState {
        for _ in 0..n {
            self.tick();
        }
        self.state()
    }

    fn jiggle(&mut self) -> f64 {
        (self.rng.gen::<f64>() - 0.5) * 1e-6
    }

    fn apply_links(&mut self, alpha: f64) {
        let distance = self.config.link_distance;
        for k in 0..self.links.len() {
            let link = self.links[k];
            let (s, t) = (&self.nodes[link.source], &self.nodes[link.target]);
            let mut x = t.x + t.vx - s.x - s.vx;
            let mut y = t.y + t.vy - s.y - s.vy;
            if x == 0.0 {
                x = self.jiggle();
            }
            if y == 0.0 {
                y = self.jiggle();
            }
            let l = (x * x + y * y).sqrt();
            let f = (l - distance) / l * alpha * link.strength;
            x *= f;
            y *= f;

            let b = link.bias;
            let t = &mut self.nodes[link.target];
            t.vx -= x * b;
            t.vy -= y * b;
            let s = &mut self.nodes[link.source];
            s.vx += x * (1.0 - b);
            s.vy += y * (1.0 - b);
        }
    }

    fn apply_charge(&mut self, alpha: f64) {
        let strength = self.config.charge_strength;
        let min2 = self.config.charge_distance_min * self.config.charge_distance_min;
        let n = self.nodes.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let mut x = self.nodes[j].x - self.nodes[i].x;
                let mut y = self.nodes[j].y - self.nodes[i].y;
                if x == 0.0 {
                    x = self.jiggle();
                }
                if y == 0.0 {
                    y = self.jiggle();
                }
                let mut l = x * x + y * y;
                if l < min2 {
                    l = (min2 * l).sqrt();
                }
                let w = strength * alpha / l;
                self.nodes[i].vx += x * w;
                self.nodes[i].vy += y * w;
                self.nodes[j].vx -= x * w;
                self.nodes[j].vy -= y * w;
            }
        }
    }

    /// Translate free nodes so their mean sits on `center`. Pinned nodes are
    /// held by the pointer and take no part.
    fn apply_center(&mut self) {
        let (sx, sy, n) = self
            .nodes
            .iter()
            .filter(|node| node.pin.is_none())
            .fold((0.0, 0.0, 0usize), |(sx, sy, n), node| (sx + node.x, sy + node.y, n + 1));
        if n == 0 {
            return;
        }
        let dx = (sx / n as f64 - self.config.center[0]) * self.config.center_strength;
        let dy = (sy / n as f64 - self.config.center[1]) * self.config.center_strength;
        for node in self.nodes.iter_mut().filter(|node| node.pin.is_none()) {
            node.x -= dx;
            node.y -= dy;
        }
    }

    fn apply_collision(&mut self) {
        let r = self.config.collision_radius;
        let reach = 2.0 * r;
        let strength = self.config.collision_strength;
        let n = self.nodes.len();
        for i in 0..n {
            let xi = self.nodes[i].x + self.nodes[i].vx;
            let yi = self.nodes[i].y + self.nodes[i].vy;
            for j in (i + 1)..n {
                let mut x = xi - self.nodes[j].x - self.nodes[j].vx;
                let mut y = yi - self.nodes[j].y - self.nodes[j].vy;
                let mut l = x * x + y * y;
                if l >= reach * reach {
                    continue;
                }
                if x == 0.0 {
                    x = self.jiggle();
                    l += x * x;
                }
                if y == 0.0 {
                    y = self.jiggle();
                    l += y * y;
                }
                let dist = l.sqrt();
                let f = (reach - dist) / dist * strength;
                x *= f;
                y *= f;
                // Equal radii split the correction evenly.
                self.nodes[i].vx += x * 0.5;
                self.nodes[i].vy += y * 0.5;
                self.nodes[j].vx -= x * 0.5;
                self.nodes[j].vy -= y * 0.5;
            }
        }
    }

    fn integrate(&mut self) {
        let keep = 1.0 - self.config.velocity_decay;
        let mut energy = 0.0;
        let mut free = 0usize;
        for node in &mut self.nodes {
            match node.pin {
                Some([px, py]) => {
                    node.x = px;
                    node.y = py;
                    node.vx = 0.0;
                    node.vy = 0.0;
                }
                None => {
                    node.vx *= keep;
                    node.vy *= keep;
                    node.x += node.vx;
                    node.y += node.vy;
                    energy += 0.5 * (node.vx * node.vx + node.vy * node.vy);
                    free += 1;
                }
            }
        }
        self.last_energy = if free > 0 { energy / free as f64 } else { 0.0 };
    }

    // ------------------------------------------------------------------------
    // Pointer interaction
    // ------------------------------------------------------------------------

    /// Pin `id` under the pointer. Returns false for unknown ids.
    pub fn start_drag(&mut self, id: &str, x: f64, y: f64) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        self.nodes[i].pin = Some([x, y]);
        self.alpha_target = self.config.drag_alpha_target;
        self.last_energy = f64::INFINITY;
        self.stopped = false;
        true
    }

    pub fn drag_to(&mut self, id: &str, x: f64, y: f64) -> bool {
        match self.index.get(id) {
            Some(&i) if self.nodes[i].pin.is_some() => {
                self.nodes[i].pin = Some([x, y]);
                true
            }
            _ => false,
        }
    }

    /// Release the pin. The node keeps its position with zero velocity.
    pub fn end_drag(&mut self, id: &str) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        let node = &mut self.nodes[i];
        if node.pin.take().is_none() {
            return false;
        }
        node.vx = 0.0;
        node.vy = 0.0;
        if self.nodes.iter().all(|n| n.pin.is_none()) {
            self.alpha_target = 0.0;
        }
        true
    }

    /// The node whose disc contains the world point, nearest first.
    pub fn node_at(&self, x: f64, y: f64) -> Option<&str> {
        let r2 = self.config.collision_radius * self.config.collision_radius;
        self.nodes
            .iter()
            .map(|n| (n, (n.x - x).powi(2) + (n.y - y).powi(2)))
            .filter(|(_, d2)| *d2 <= r2)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(n, _)| n.id.as_str())
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    pub fn positions(&self) -> Vec<NodePosition> {
        self.nodes
            .iter()
            .map(|n| NodePosition {
                id: n.id.clone(),
                x: n.x,
                y: n.y,
                pinned: n.pin.is_some(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        LayoutSnapshot {
            state: self.state(),
            alpha: self.alpha,
            nodes: self.positions(),
            edges: self
                .links
                .iter()
                .map(|l| (self.nodes[l.source].id.clone(), self.nodes[l.target].id.clone()))
                .collect(),
        }
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}
