use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ir::NodeRole;

use super::{LayoutError, QualityReport, ValidationIssue};

pub type NodeIdx = usize;
pub type EdgeIdx = usize;

/// Node center coordinates keyed by node id.
pub type PositionMap = BTreeMap<String, Point>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Rect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1200.0,
            height: 800.0,
        }
    }
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn empty() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    /// Smallest rect enclosing boxes given as (center, width, height).
    pub fn enclosing(boxes: impl IntoIterator<Item = (Point, f32, f32)>) -> Option<Self> {
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        let mut any = false;
        for (center, width, height) in boxes {
            any = true;
            min_x = min_x.min(center.x - width / 2.0);
            max_x = max_x.max(center.x + width / 2.0);
            min_y = min_y.min(center.y - height / 2.0);
            max_y = max_y.max(center.y + height / 2.0);
        }
        any.then(|| Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }
}

/// Caller-owned part of a real node.
#[derive(Debug, Clone, PartialEq)]
pub struct UserNode {
    pub role: NodeRole,
    pub node_type: Option<String>,
    pub label: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Real(UserNode),
    /// Synthesized hop of a long edge; carries the id of the user edge it
    /// stands in for.
    Virtual { origin: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub width: f32,
    pub height: f32,
    /// Layer index, `None` until ranking.
    pub rank: Option<usize>,
    pub position: Point,
}

impl Node {
    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, NodeKind::Virtual { .. })
    }

    pub fn user(&self) -> Option<&UserNode> {
        match &self.kind {
            NodeKind::Real(user) => Some(user),
            NodeKind::Virtual { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: NodeIdx,
    pub target: NodeIdx,
    pub weight: f32,
    pub is_virtual: bool,
    /// Direction is logically flipped for ranking; identity is unchanged.
    pub reversed: bool,
    /// For virtual chain segments, the id of the user edge being replaced.
    pub original_edge: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: NodeIdx, target: NodeIdx, weight: f32) -> Self {
        Self {
            id: id.into(),
            source,
            target,
            weight,
            is_virtual: false,
            reversed: false,
            original_edge: None,
        }
    }

    /// Endpoints in ranking direction.
    pub fn logical(&self) -> (NodeIdx, NodeIdx) {
        if self.reversed {
            (self.target, self.source)
        } else {
            (self.source, self.target)
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

/// Directed multigraph with per-node adjacency lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: FxHashMap<String, NodeIdx>,
    out_edges: Vec<Vec<EdgeIdx>>,
    in_edges: Vec<Vec<EdgeIdx>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node; an existing id keeps its first definition.
    pub fn add_node(&mut self, node: Node) -> NodeIdx {
        if let Some(&idx) = self.index.get(&node.id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        idx
    }

    /// Inserts an edge. Endpoints must be existing node indices.
    pub fn add_edge(&mut self, edge: Edge) -> Option<EdgeIdx> {
        if edge.source >= self.nodes.len() || edge.target >= self.nodes.len() {
            return None;
        }
        let idx = self.edges.len();
        self.out_edges[edge.source].push(idx);
        self.in_edges[edge.target].push(idx);
        self.edges.push(edge);
        Some(idx)
    }

    /// Swaps in a new edge list and rebuilds adjacency. Edges with unknown
    /// endpoints are dropped.
    pub fn replace_edges(&mut self, edges: Vec<Edge>) {
        self.edges.clear();
        for list in self.out_edges.iter_mut().chain(self.in_edges.iter_mut()) {
            list.clear();
        }
        for edge in edges {
            self.add_edge(edge);
        }
    }

    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[idx]
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIdx> {
        self.index.get(id).copied()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn edge(&self, idx: EdgeIdx) -> &Edge {
        &self.edges[idx]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut [Edge] {
        &mut self.edges
    }

    pub fn out_edges(&self, idx: NodeIdx) -> &[EdgeIdx] {
        &self.out_edges[idx]
    }

    pub fn in_edges(&self, idx: NodeIdx) -> &[EdgeIdx] {
        &self.in_edges[idx]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every edge appears once in its source's out list and once in its
    /// target's in list.
    pub fn adjacency_consistent(&self) -> bool {
        let mut out_seen = vec![0usize; self.edges.len()];
        let mut in_seen = vec![0usize; self.edges.len()];
        for (node, list) in self.out_edges.iter().enumerate() {
            for &e in list {
                if self.edges[e].source != node {
                    return false;
                }
                out_seen[e] += 1;
            }
        }
        for (node, list) in self.in_edges.iter().enumerate() {
            for &e in list {
                if self.edges[e].target != node {
                    return false;
                }
                in_seen[e] += 1;
            }
        }
        out_seen.iter().all(|&c| c == 1) && in_seen.iter().all(|&c| c == 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub rank: usize,
    pub nodes: Vec<NodeIdx>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyStats {
    pub real_nodes: usize,
    pub virtual_nodes: usize,
    pub real_edges: usize,
    pub virtual_edges: usize,
    pub reversed_edges: usize,
    pub layer_count: usize,
    pub max_layer_width: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy {
    pub layers: Vec<Layer>,
    pub graph: Graph,
    /// User edges that were replaced by virtual chains.
    pub replaced_edges: Vec<Edge>,
    pub stats: HierarchyStats,
}

impl Hierarchy {
    /// Buckets nodes by their assigned rank. Nodes without a rank land in
    /// layer 0.
    pub fn from_ranked_graph(graph: Graph, replaced_edges: Vec<Edge>) -> Self {
        let layer_count = graph
            .nodes()
            .iter()
            .filter_map(|node| node.rank)
            .max()
            .map_or(0, |max| max + 1)
            .max(usize::from(!graph.is_empty()));
        let mut layers: Vec<Layer> = (0..layer_count)
            .map(|rank| Layer {
                rank,
                nodes: Vec::new(),
            })
            .collect();
        for (idx, node) in graph.nodes().iter().enumerate() {
            let rank = node.rank.unwrap_or(0);
            layers[rank].nodes.push(idx);
        }
        let mut hierarchy = Self {
            layers,
            graph,
            replaced_edges,
            stats: HierarchyStats::default(),
        };
        hierarchy.refresh_stats();
        hierarchy
    }

    pub fn refresh_stats(&mut self) {
        let virtual_nodes = self.graph.nodes().iter().filter(|n| n.is_virtual()).count();
        let virtual_edges = self.graph.edges().iter().filter(|e| e.is_virtual).count();
        self.stats = HierarchyStats {
            real_nodes: self.graph.node_count() - virtual_nodes,
            virtual_nodes,
            real_edges: self.graph.edge_count() - virtual_edges + self.replaced_edges.len(),
            virtual_edges,
            // User edges, whether kept whole or split into a chain.
            reversed_edges: self
                .graph
                .edges()
                .iter()
                .filter(|e| e.reversed && !e.is_virtual)
                .chain(&self.replaced_edges)
                .filter(|e| e.reversed)
                .count(),
            layer_count: self.layers.len(),
            max_layer_width: self.layers.iter().map(|l| l.nodes.len()).max().unwrap_or(0),
        };
    }

    pub fn rank_of(&self, idx: NodeIdx) -> usize {
        self.graph.node(idx).rank.unwrap_or(0)
    }

    /// Chain segments standing in for the given user edge, in source to
    /// target order.
    pub fn chain_for(&self, original_id: &str) -> Vec<EdgeIdx> {
        let mut chain: Vec<EdgeIdx> = self
            .graph
            .edges()
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.original_edge.as_deref() == Some(original_id))
            .map(|(idx, _)| idx)
            .collect();
        let graph = &self.graph;
        let rank = |e: EdgeIdx| graph.node(graph.edge(e).source).rank.unwrap_or(0);
        match self.replaced_edge(original_id) {
            Some(original) if original.reversed => chain.sort_by_key(|&e| std::cmp::Reverse(rank(e))),
            _ => chain.sort_by_key(|&e| rank(e)),
        }
        chain
    }

    pub fn replaced_edge(&self, original_id: &str) -> Option<&Edge> {
        self.replaced_edges.iter().find(|edge| edge.id == original_id)
    }

    /// Ids per layer, in layer order.
    pub fn layer_ids(&self) -> Vec<Vec<String>> {
        self.layers
            .iter()
            .map(|layer| {
                layer
                    .nodes
                    .iter()
                    .map(|&idx| self.graph.node(idx).id.clone())
                    .collect()
            })
            .collect()
    }

    pub fn apply_positions(&mut self, positions: &[Point]) {
        for (node, point) in self.graph.nodes_mut().iter_mut().zip(positions) {
            node.position = *point;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Preprocess,
    HierarchyBuild,
    FallbackLayering,
    LayerOptimization,
    PositionCalculation,
    GlobalOptimization,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::HierarchyBuild => "hierarchy-build",
            Self::FallbackLayering => "fallback-layering",
            Self::LayerOptimization => "layer-optimization",
            Self::PositionCalculation => "position-calculation",
            Self::GlobalOptimization => "global-optimization",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTiming {
    pub phase: Phase,
    pub duration_ms: f64,
}

/// Output of one engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutResult {
    pub success: bool,
    /// Nothing to lay out, or layout suppressed; positions are untouched.
    pub skipped: bool,
    /// Served from the engine cache.
    pub cached: bool,
    /// Centers of every positioned real node.
    pub positions: PositionMap,
    /// Bend points of user edges routed through virtual nodes.
    pub waypoints: BTreeMap<String, Vec<Point>>,
    pub hierarchy: Option<Hierarchy>,
    pub score: f32,
    pub crossings: usize,
    pub bounds: Rect,
    pub phases: Vec<PhaseTiming>,
    pub issues: Vec<ValidationIssue>,
    pub quality: Option<QualityReport>,
    pub error: Option<LayoutError>,
}

impl LayoutResult {
    pub fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            cached: false,
            positions: PositionMap::new(),
            waypoints: BTreeMap::new(),
            hierarchy: None,
            score: 0.0,
            crossings: 0,
            bounds: Rect::empty(),
            phases: Vec::new(),
            issues: Vec::new(),
            quality: None,
            error: None,
        }
    }

    pub fn failure(error: LayoutError, phases: Vec<PhaseTiming>) -> Self {
        Self {
            success: false,
            skipped: false,
            phases,
            error: Some(error),
            ..Self::skipped()
        }
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.phases.iter().map(|p| p.duration_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real(id: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Real(UserNode {
                role: NodeRole::Ordinary,
                node_type: None,
                label: id.to_string(),
                data: Value::Null,
            }),
            width: 10.0,
            height: 10.0,
            rank: None,
            position: Point::default(),
        }
    }

    #[test]
    fn adjacency_tracks_edges_once() {
        let mut graph = Graph::new();
        let a = graph.add_node(real("a"));
        let b = graph.add_node(real("b"));
        assert_eq!(graph.add_node(real("a")), a);
        graph.add_edge(Edge::new("e1", a, b, 1.0));
        graph.add_edge(Edge::new("e2", a, b, 1.0));
        assert_eq!(graph.out_edges(a).len(), 2);
        assert_eq!(graph.in_edges(b).len(), 2);
        assert!(graph.adjacency_consistent());
        assert!(graph.add_edge(Edge::new("bad", a, 9, 1.0)).is_none());
    }

    #[test]
    fn replace_edges_rebuilds_adjacency() {
        let mut graph = Graph::new();
        let a = graph.add_node(real("a"));
        let b = graph.add_node(real("b"));
        graph.add_edge(Edge::new("e1", a, b, 1.0));
        graph.replace_edges(vec![Edge::new("e2", b, a, 1.0)]);
        assert!(graph.out_edges(a).is_empty());
        assert_eq!(graph.out_edges(b), &[0]);
        assert!(graph.adjacency_consistent());
    }

    #[test]
    fn reversed_edge_flips_logical_direction() {
        let mut edge = Edge::new("e", 0, 1, 1.0);
        assert_eq!(edge.logical(), (0, 1));
        edge.reversed = true;
        assert_eq!(edge.logical(), (1, 0));
    }

    #[test]
    fn enclosing_rect_covers_boxes() {
        let rect = Rect::enclosing([
            (Point::new(0.0, 0.0), 10.0, 10.0),
            (Point::new(100.0, 50.0), 20.0, 10.0),
        ])
        .expect("non-empty");
        assert_eq!(rect.x, -5.0);
        assert_eq!(rect.x + rect.width, 110.0);
        assert_eq!(rect.y + rect.height, 55.0);
        assert_eq!(rect.center_x(), 52.5);
        assert!(Rect::enclosing(Vec::new()).is_none());
    }
}
