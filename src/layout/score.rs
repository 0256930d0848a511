//! Layout quality score used to rank candidate positionings.

use serde::Serialize;

use crate::config::LayoutConfig;

use super::ordering::{LayerAdjacency, crossings_for_order};
use super::{Hierarchy, NodeIdx, Point, Rect};

/// Sub-scores are normalized to 0..=100; `crossing_penalty` is subtracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutScore {
    pub total: f32,
    pub symmetry: f32,
    pub spacing: f32,
    pub crossing_penalty: f32,
    pub edge_length: f32,
    pub crossings: usize,
}

fn variance_score(variance: f32, reference: f32) -> f32 {
    let reference = reference.max(1.0);
    100.0 * reference / (reference + variance.max(0.0))
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len().max(1) as f32
}

/// Layer order by current x, ties broken by the optimized layer order.
pub(crate) fn geometric_order(h: &Hierarchy, points: &[Point]) -> Vec<Vec<NodeIdx>> {
    h.layers
        .iter()
        .map(|layer| {
            let mut nodes = layer.nodes.clone();
            nodes.sort_by(|&a, &b| points[a].x.total_cmp(&points[b].x));
            nodes
        })
        .collect()
}

/// Spread of layer centroids around the bounds center.
fn symmetry(h: &Hierarchy, points: &[Point], bounds: Rect, config: &LayoutConfig) -> f32 {
    let offsets: Vec<f32> = h
        .layers
        .iter()
        .filter(|layer| !layer.nodes.is_empty())
        .map(|layer| {
            let centroid =
                layer.nodes.iter().map(|&idx| points[idx].x).sum::<f32>() / layer.nodes.len() as f32;
            (centroid - bounds.center_x()).powi(2)
        })
        .collect();
    if offsets.is_empty() {
        return 100.0;
    }
    variance_score(mean(&offsets), config.min_node_spacing.powi(2))
}

/// Uniformity of the slack between neighbors beyond their required
/// separation.
fn spacing(h: &Hierarchy, order: &[Vec<NodeIdx>], points: &[Point], config: &LayoutConfig) -> f32 {
    let mut slack = Vec::new();
    for layer in order {
        for pair in layer.windows(2) {
            let required = config.separation(h.graph.node(pair[0]).width, h.graph.node(pair[1]).width);
            slack.push(points[pair[1]].x - points[pair[0]].x - required);
        }
    }
    if slack.is_empty() {
        return 100.0;
    }
    let m = mean(&slack);
    let variance = mean(&slack.iter().map(|s| (s - m).powi(2)).collect::<Vec<_>>());
    variance_score(variance, config.node_spacing.powi(2))
}

fn edge_length(h: &Hierarchy, points: &[Point], config: &LayoutConfig) -> f32 {
    let target = config.global.target_edge_length;
    let deviations: Vec<f32> = h
        .graph
        .edges()
        .iter()
        .filter(|edge| !edge.is_self_loop())
        .map(|edge| (points[edge.source].distance(&points[edge.target]) - target).powi(2))
        .collect();
    if deviations.is_empty() {
        return 100.0;
    }
    variance_score(mean(&deviations), target.powi(2))
}

pub fn score_layout(h: &Hierarchy, points: &[Point], bounds: Rect, config: &LayoutConfig) -> LayoutScore {
    let order = geometric_order(h, points);
    let adj = LayerAdjacency::new(h);
    let crossings = crossings_for_order(&order, &adj, h.graph.node_count());
    let edges = h.graph.edge_count().max(1);
    let crossing_penalty = (100.0 * crossings as f32 / edges as f32).min(100.0);

    let symmetry = symmetry(h, points, bounds, config);
    let spacing = spacing(h, &order, points, config);
    let edge_length = edge_length(h, points, config);
    let weights = &config.global;
    let total = 100.0 + weights.symmetry_weight * symmetry + weights.spacing_weight * spacing
        - weights.crossing_weight * crossing_penalty
        + weights.edge_length_weight * edge_length;

    LayoutScore {
        total,
        symmetry,
        spacing,
        crossing_penalty,
        edge_length,
        crossings,
    }
}
