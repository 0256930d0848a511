//! Validation, normalization and filtering of host input, plus the
//! diagnostic quality report.
//!
//! Nothing here fails hard: problems become [`ValidationIssue`]s and the
//! usable subset of the input is carried forward. The caller decides whether
//! errors abort the layout.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::PreprocessConfig;
use crate::ir::{GraphInput, NodeRole};

use super::{Edge, Graph, Node, NodeKind, Point, UserNode, ValidationIssue};

static RESERVED_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^__v\d+").unwrap());

/// At most this many cycles are listed in the quality report.
const MAX_REPORTED_CYCLES: usize = 16;
/// Degree above which a node is called out as a hub.
const HUB_DEGREE: usize = 10;
const DENSE_GRAPH_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedNode {
    pub id: String,
    pub role: NodeRole,
    pub node_type: Option<String>,
    pub label: String,
    pub width: f32,
    pub height: f32,
    pub x: f32,
    pub y: f32,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub weight: f32,
}

pub type NodePredicate<'a> = Box<dyn Fn(&NormalizedNode) -> bool + 'a>;
pub type EdgePredicate<'a> = Box<dyn Fn(&NormalizedEdge) -> bool + 'a>;

/// Caller-supplied filters. Predicates return `true` to keep an item.
#[derive(Default)]
pub struct Filters<'a> {
    pub remove_isolated: bool,
    node_predicates: Vec<NodePredicate<'a>>,
    edge_predicates: Vec<EdgePredicate<'a>>,
}

impl<'a> Filters<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_isolated(mut self, remove: bool) -> Self {
        self.remove_isolated = remove;
        self
    }

    pub fn keep_nodes(mut self, predicate: impl Fn(&NormalizedNode) -> bool + 'a) -> Self {
        self.node_predicates.push(Box::new(predicate));
        self
    }

    pub fn keep_edges(mut self, predicate: impl Fn(&NormalizedEdge) -> bool + 'a) -> Self {
        self.edge_predicates.push(Box::new(predicate));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relations {
    pub successors: BTreeMap<String, Vec<String>>,
    pub predecessors: BTreeMap<String, Vec<String>>,
    pub in_degree: BTreeMap<String, usize>,
    pub out_degree: BTreeMap<String, usize>,
    /// Count of nodes per host `type` (`default` when untyped).
    pub type_histogram: BTreeMap<String, usize>,
    pub roots: Vec<String>,
    pub leaves: Vec<String>,
    pub isolated: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegreeStats {
    pub min: usize,
    pub max: usize,
    pub mean: f32,
    /// total degree -> number of nodes
    pub histogram: BTreeMap<usize, usize>,
}

/// Diagnostic side channel; not a layout output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub node_count: usize,
    pub edge_count: usize,
    pub removed_nodes: usize,
    pub removed_edges: usize,
    pub has_cycles: bool,
    pub cycles: Vec<Vec<String>>,
    pub density: f32,
    pub degree: DegreeStats,
    /// 0 to 100.
    pub score: f32,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessedGraph {
    pub nodes: Vec<NormalizedNode>,
    pub edges: Vec<NormalizedEdge>,
    pub relations: Relations,
    pub statistics: QualityReport,
    pub issues: Vec<ValidationIssue>,
}

impl PreprocessedGraph {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_error)
    }

    pub fn errors(&self) -> Vec<ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error()).cloned().collect()
    }

    /// Builds the layout graph. Node and edge order follow the input.
    pub fn build_graph(&self) -> Graph {
        let mut graph = Graph::new();
        for node in &self.nodes {
            graph.add_node(Node {
                id: node.id.clone(),
                kind: NodeKind::Real(UserNode {
                    role: node.role,
                    node_type: node.node_type.clone(),
                    label: node.label.clone(),
                    data: node.data.clone(),
                }),
                width: node.width,
                height: node.height,
                rank: None,
                position: Point::new(node.x, node.y),
            });
        }
        for edge in &self.edges {
            let (Some(source), Some(target)) =
                (graph.node_index(&edge.source), graph.node_index(&edge.target))
            else {
                continue;
            };
            graph.add_edge(Edge::new(edge.id.clone(), source, target, edge.weight));
        }
        graph
    }
}

pub fn preprocess(
    input: &GraphInput,
    filters: &Filters<'_>,
    config: &PreprocessConfig,
) -> PreprocessedGraph {
    let mut issues = Vec::new();
    if input.nodes.is_empty() {
        issues.push(ValidationIssue::EmptyNodeSet);
    }

    let nodes = normalize_nodes(input, config, &mut issues);
    let edges = normalize_edges(input, &nodes, config, &mut issues);
    let input_node_count = nodes.len();
    let input_edge_count = edges.len();

    let (nodes, edges) = apply_filters(nodes, edges, filters, config);

    let relations = build_relations(&nodes, &edges);
    let mut statistics = quality_report(&nodes, &edges, &relations, &issues);
    statistics.removed_nodes = input_node_count - nodes.len();
    statistics.removed_edges = input_edge_count - edges.len();

    tracing::debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        issues = issues.len(),
        quality = statistics.score,
        "preprocessed graph input"
    );

    PreprocessedGraph {
        nodes,
        edges,
        relations,
        statistics,
        issues,
    }
}

fn clamp_or(value: Option<f32>, default: f32, min: f32, max: f32) -> f32 {
    let value = value.filter(|v| v.is_finite()).unwrap_or(default);
    value.max(min).min(max.max(min))
}

fn normalize_nodes(
    input: &GraphInput,
    config: &PreprocessConfig,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<NormalizedNode> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut nodes = Vec::with_capacity(input.nodes.len());
    for (index, node) in input.nodes.iter().enumerate() {
        let id = node.id.trim();
        if id.is_empty() {
            issues.push(ValidationIssue::MissingNodeId { index });
            continue;
        }
        if RESERVED_ID_RE.is_match(id) {
            issues.push(ValidationIssue::ReservedNodeId { id: id.to_string() });
            continue;
        }
        let Some(role) = NodeRole::from_type(node.node_type.as_deref()) else {
            issues.push(ValidationIssue::ReservedNodeType { id: id.to_string() });
            continue;
        };
        if !seen.insert(id) {
            issues.push(ValidationIssue::DuplicateNodeId { id: id.to_string() });
            continue;
        }

        let mut coord = |value: Option<f32>, field: &'static str| match value {
            Some(v) if v.is_finite() => v,
            Some(_) => {
                issues.push(ValidationIssue::CoercedField {
                    id: id.to_string(),
                    field,
                });
                0.0
            }
            None => 0.0,
        };
        let x = coord(node.x, "x");
        let y = coord(node.y, "y");

        nodes.push(NormalizedNode {
            id: id.to_string(),
            role,
            node_type: node.node_type.clone(),
            label: node.label.clone().unwrap_or_else(|| id.to_string()),
            width: clamp_or(node.width, config.default_width, config.min_width, config.max_width),
            height: clamp_or(
                node.height,
                config.default_height,
                config.min_height,
                config.max_height,
            ),
            x,
            y,
            data: node.data.clone(),
        });
    }
    nodes
}

fn normalize_edges(
    input: &GraphInput,
    nodes: &[NormalizedNode],
    config: &PreprocessConfig,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<NormalizedEdge> {
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut used_ids: HashSet<String> = HashSet::new();
    let mut edges = Vec::with_capacity(input.edges.len());
    for (index, edge) in input.edges.iter().enumerate() {
        let base_id = edge
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("e{index}"));
        let mut id = base_id.clone();
        let mut suffix = 1;
        while used_ids.contains(&id) {
            id = format!("{base_id}#{suffix}");
            suffix += 1;
        }

        let source = edge.source.trim();
        let target = edge.target.trim();
        let mut dangling = false;
        if !known.contains(source) {
            issues.push(ValidationIssue::DanglingSource {
                edge: id.clone(),
                node: source.to_string(),
            });
            dangling = true;
        }
        if !known.contains(target) {
            issues.push(ValidationIssue::DanglingTarget {
                edge: id.clone(),
                node: target.to_string(),
            });
            dangling = true;
        }
        if dangling {
            continue;
        }

        used_ids.insert(id.clone());
        edges.push(NormalizedEdge {
            id,
            source: source.to_string(),
            target: target.to_string(),
            weight: clamp_or(
                edge.weight,
                config.default_weight,
                config.min_weight,
                config.max_weight,
            ),
        });
    }
    edges
}

fn apply_filters(
    nodes: Vec<NormalizedNode>,
    edges: Vec<NormalizedEdge>,
    filters: &Filters<'_>,
    config: &PreprocessConfig,
) -> (Vec<NormalizedNode>, Vec<NormalizedEdge>) {
    // An invalid pattern is rejected by config validation; here it is a no-op.
    let id_filter = config.id_filter().ok().flatten();
    let mut nodes: Vec<NormalizedNode> = nodes
        .into_iter()
        .filter(|node| {
            let excluded_type = node
                .node_type
                .as_ref()
                .is_some_and(|t| config.exclude_node_types.contains(t));
            let excluded_id = id_filter.as_ref().is_some_and(|re| re.is_match(&node.id));
            !excluded_type && !excluded_id
        })
        .filter(|node| filters.node_predicates.iter().all(|keep| keep(node)))
        .collect();

    let revalidate = |nodes: &[NormalizedNode], edges: Vec<NormalizedEdge>| {
        let kept: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        edges
            .into_iter()
            .filter(|e| kept.contains(e.source.as_str()) && kept.contains(e.target.as_str()))
            .collect::<Vec<_>>()
    };

    let mut edges: Vec<NormalizedEdge> = revalidate(&nodes, edges)
        .into_iter()
        .filter(|edge| filters.edge_predicates.iter().all(|keep| keep(edge)))
        .collect();

    if filters.remove_isolated || config.remove_isolated {
        let connected: HashSet<&str> = edges
            .iter()
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect();
        nodes.retain(|node| connected.contains(node.id.as_str()));
        edges = revalidate(&nodes, edges);
    }

    (nodes, edges)
}

fn build_relations(nodes: &[NormalizedNode], edges: &[NormalizedEdge]) -> Relations {
    let mut relations = Relations::default();
    for node in nodes {
        relations.successors.insert(node.id.clone(), Vec::new());
        relations.predecessors.insert(node.id.clone(), Vec::new());
        relations.in_degree.insert(node.id.clone(), 0);
        relations.out_degree.insert(node.id.clone(), 0);
        let type_key = node.node_type.clone().unwrap_or_else(|| "default".to_string());
        *relations.type_histogram.entry(type_key).or_insert(0) += 1;
    }
    for edge in edges {
        if let Some(list) = relations.successors.get_mut(&edge.source) {
            list.push(edge.target.clone());
        }
        if let Some(list) = relations.predecessors.get_mut(&edge.target) {
            list.push(edge.source.clone());
        }
        if let Some(deg) = relations.out_degree.get_mut(&edge.source) {
            *deg += 1;
        }
        if let Some(deg) = relations.in_degree.get_mut(&edge.target) {
            *deg += 1;
        }
    }
    for node in nodes {
        let indeg = relations.in_degree.get(&node.id).copied().unwrap_or(0);
        let outdeg = relations.out_degree.get(&node.id).copied().unwrap_or(0);
        match (indeg, outdeg) {
            (0, 0) => relations.isolated.push(node.id.clone()),
            (0, _) => relations.roots.push(node.id.clone()),
            (_, 0) => relations.leaves.push(node.id.clone()),
            _ => {}
        }
    }
    relations
}

/// Cycles found by DFS with an explicit recursion stack. Each cycle is
/// listed from the re-entered node along the current path.
pub fn detect_cycles(nodes: &[NormalizedNode], relations: &Relations) -> Vec<Vec<String>> {
    let index: BTreeMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|n| {
            relations
                .successors
                .get(&n.id)
                .map(|succ| succ.iter().filter_map(|s| index.get(s.as_str()).copied()).collect())
                .unwrap_or_default()
        })
        .collect();

    let mut cycles = Vec::new();
    let mut visited = vec![false; nodes.len()];
    let mut on_stack = vec![false; nodes.len()];
    for start in 0..nodes.len() {
        if visited[start] {
            continue;
        }
        let mut path: Vec<usize> = vec![start];
        let mut cursor: Vec<usize> = vec![0];
        visited[start] = true;
        on_stack[start] = true;
        while let Some(&node) = path.last() {
            let depth = path.len() - 1;
            let next = adjacency[node].get(cursor[depth]).copied();
            cursor[depth] += 1;
            match next {
                Some(succ) if on_stack[succ] => {
                    if cycles.len() < MAX_REPORTED_CYCLES
                        && let Some(pos) = path.iter().position(|&p| p == succ)
                    {
                        cycles.push(path[pos..].iter().map(|&i| nodes[i].id.clone()).collect());
                    }
                }
                Some(succ) if !visited[succ] => {
                    visited[succ] = true;
                    on_stack[succ] = true;
                    path.push(succ);
                    cursor.push(0);
                }
                Some(_) => {}
                None => {
                    on_stack[node] = false;
                    path.pop();
                    cursor.pop();
                }
            }
        }
    }
    cycles
}

fn quality_report(
    nodes: &[NormalizedNode],
    edges: &[NormalizedEdge],
    relations: &Relations,
    issues: &[ValidationIssue],
) -> QualityReport {
    let node_count = nodes.len();
    let edge_count = edges.len();
    let cycles = detect_cycles(nodes, relations);
    let density = if node_count > 1 {
        edge_count as f32 / (node_count * (node_count - 1)) as f32
    } else {
        0.0
    };

    let mut degree = DegreeStats {
        min: usize::MAX,
        ..DegreeStats::default()
    };
    let mut total = 0usize;
    for node in nodes {
        let d = relations.in_degree.get(&node.id).copied().unwrap_or(0)
            + relations.out_degree.get(&node.id).copied().unwrap_or(0);
        degree.min = degree.min.min(d);
        degree.max = degree.max.max(d);
        total += d;
        *degree.histogram.entry(d).or_insert(0) += 1;
    }
    if node_count == 0 {
        degree.min = 0;
    } else {
        degree.mean = total as f32 / node_count as f32;
    }

    let mut score = 100.0f32;
    let mut recommendations = Vec::new();
    if !cycles.is_empty() {
        score -= 20.0;
        recommendations.push(format!(
            "{} cycle(s) detected; back edges will be drawn reversed",
            cycles.len()
        ));
    }
    if node_count > 0 && !relations.isolated.is_empty() {
        let ratio = relations.isolated.len() as f32 / node_count as f32;
        score -= 20.0 * ratio;
        recommendations.push(format!(
            "{} isolated node(s); consider enabling removeIsolated",
            relations.isolated.len()
        ));
    }
    if density > DENSE_GRAPH_THRESHOLD {
        score -= 10.0;
        recommendations.push(format!(
            "graph is dense ({density:.2}); expect edge crossings"
        ));
    }
    if degree.max > HUB_DEGREE {
        score -= 10.0;
        recommendations.push(format!(
            "hub node with degree {} will produce a wide layer",
            degree.max
        ));
    }
    let error_count = issues.iter().filter(|i| i.is_error()).count();
    if error_count > 0 {
        score -= (error_count as f32 * 5.0).min(30.0);
        recommendations.push(format!("fix {error_count} validation error(s) in the input"));
    }

    QualityReport {
        node_count,
        edge_count,
        removed_nodes: 0,
        removed_edges: 0,
        has_cycles: !cycles.is_empty(),
        cycles,
        density,
        degree,
        score: score.clamp(0.0, 100.0),
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InputEdge, InputNode};

    fn config() -> PreprocessConfig {
        PreprocessConfig::default()
    }

    #[test]
    fn fills_defaults_and_clamps_sizes() {
        let mut input = GraphInput::new().node("a").node("b");
        input.nodes[1].width = Some(10_000.0);
        input.nodes[1].height = Some(1.0);
        let out = preprocess(&input, &Filters::new(), &config());
        assert_eq!(out.nodes[0].width, 120.0);
        assert_eq!(out.nodes[0].label, "a");
        assert_eq!(out.nodes[1].width, 400.0);
        assert_eq!(out.nodes[1].height, 16.0);
        assert!(out.issues.is_empty());
    }

    #[test]
    fn reports_duplicates_and_dangling_edges() {
        let mut input = GraphInput::from_pairs(&[("a", "b")]).node("a");
        input.edges.push(InputEdge::new("a", "ghost").with_id("x"));
        let out = preprocess(&input, &Filters::new(), &config());
        assert!(out.issues.contains(&ValidationIssue::DuplicateNodeId { id: "a".into() }));
        assert!(out.issues.contains(&ValidationIssue::DanglingTarget {
            edge: "x".into(),
            node: "ghost".into()
        }));
        assert_eq!(out.nodes.len(), 2);
        assert_eq!(out.edges.len(), 1);
        assert!(out.has_errors());
    }

    #[test]
    fn empty_input_is_an_error() {
        let out = preprocess(&GraphInput::new(), &Filters::new(), &config());
        assert_eq!(out.issues, vec![ValidationIssue::EmptyNodeSet]);
    }

    #[test]
    fn rejects_reserved_virtual_nodes() {
        let mut input = GraphInput::new().node("__v3").node("ok");
        input.nodes.push(InputNode::new("fake").with_type("virtual"));
        let out = preprocess(&input, &Filters::new(), &config());
        assert_eq!(out.nodes.len(), 1);
        assert!(out.issues.contains(&ValidationIssue::ReservedNodeId { id: "__v3".into() }));
        assert!(out.issues.contains(&ValidationIssue::ReservedNodeType { id: "fake".into() }));
    }

    #[test]
    fn synthesizes_unique_edge_ids() {
        let mut input = GraphInput::from_pairs(&[("a", "b"), ("b", "c")]);
        input.edges[0].id = Some("dup".into());
        input.edges[1].id = Some("dup".into());
        let out = preprocess(&input, &Filters::new(), &config());
        assert_eq!(out.edges[0].id, "dup");
        assert_eq!(out.edges[1].id, "dup#1");

        let plain = preprocess(&GraphInput::from_pairs(&[("a", "b")]), &Filters::new(), &config());
        assert_eq!(plain.edges[0].id, "e0");
    }

    #[test]
    fn filters_revalidate_edges() {
        let input = GraphInput::from_pairs(&[("a", "b"), ("b", "c")]).node("lonely");
        let filters = Filters::new()
            .remove_isolated(true)
            .keep_nodes(|node| node.id != "c");
        let out = preprocess(&input, &filters, &config());
        let ids: Vec<&str> = out.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(out.edges.len(), 1);
        assert_eq!(out.statistics.removed_nodes, 2);
        assert_eq!(out.statistics.removed_edges, 1);
    }

    #[test]
    fn config_filters_by_type_and_pattern() {
        let mut input = GraphInput::from_pairs(&[("a", "tmp_1"), ("a", "b")]);
        input.nodes.push(InputNode::new("note").with_type("comment"));
        let mut config = config();
        config.exclude_node_types = vec!["comment".into()];
        config.exclude_id_pattern = Some("^tmp_".into());
        let out = preprocess(&input, &Filters::new(), &config);
        let ids: Vec<&str> = out.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(out.edges.len(), 1);
    }

    #[test]
    fn relations_classify_roots_leaves_isolated() {
        let input = GraphInput::from_pairs(&[("a", "b"), ("b", "c")]).node("z");
        let out = preprocess(&input, &Filters::new(), &config());
        assert_eq!(out.relations.roots, vec!["a"]);
        assert_eq!(out.relations.leaves, vec!["c"]);
        assert_eq!(out.relations.isolated, vec!["z"]);
        assert_eq!(out.relations.out_degree["b"], 1);
        assert_eq!(out.relations.type_histogram["default"], 4);
    }

    #[test]
    fn quality_report_flags_cycles() {
        let input = GraphInput::from_pairs(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let out = preprocess(&input, &Filters::new(), &config());
        assert!(out.statistics.has_cycles);
        assert_eq!(out.statistics.cycles, vec![vec!["a", "b", "c"]]);
        assert!(out.statistics.score < 100.0);
        assert!(!out.statistics.recommendations.is_empty());
    }

    #[test]
    fn acyclic_chain_scores_full_marks() {
        let input = GraphInput::from_pairs(&[("a", "b"), ("b", "c"), ("c", "d")]);
        let out = preprocess(&input, &Filters::new(), &config());
        assert!(!out.statistics.has_cycles);
        assert_eq!(out.statistics.score, 100.0);
        assert_eq!(out.statistics.degree.max, 2);
        assert_eq!(out.statistics.degree.min, 1);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let input = GraphInput::from_pairs(&[("a", "a")]);
        let out = preprocess(&input, &Filters::new(), &config());
        assert_eq!(out.statistics.cycles, vec![vec!["a"]]);
    }

    #[test]
    fn build_graph_preserves_order() {
        let input = GraphInput::from_pairs(&[("b", "a"), ("a", "c")]);
        let graph = preprocess(&input, &Filters::new(), &config()).build_graph();
        assert_eq!(graph.node(0).id, "b");
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.adjacency_consistent());
    }
}
