//! Iterative whole-layout refinement. Each round aligns layers, restores
//! spacing and applies damped aesthetic nudges; the best-scoring snapshot
//! wins.

use crate::config::LayoutConfig;

use super::ordering::LayerAdjacency;
use super::position::resolve_layer;
use super::score::{LayoutScore, geometric_order, score_layout};
use super::{Deadline, Hierarchy, LayoutError, NodeIdx, Phase, Point, Rect};

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOutcome {
    pub positions: Vec<Point>,
    pub score: LayoutScore,
    pub initial_score: f32,
    /// `score.total - initial_score`, never negative.
    pub improvement: f32,
    pub iterations: usize,
}

fn centroid(nodes: &[NodeIdx], points: &[Point]) -> Option<f32> {
    if nodes.is_empty() {
        return None;
    }
    Some(nodes.iter().map(|&idx| points[idx].x).sum::<f32>() / nodes.len() as f32)
}

fn align_layers(h: &Hierarchy, points: &mut [Point], bounds: Rect, damping: f32) {
    let target = bounds.center_x();
    for layer in &h.layers {
        let Some(center) = centroid(&layer.nodes, points) else {
            continue;
        };
        let shift = damping * (target - center);
        for &idx in &layer.nodes {
            points[idx].x += shift;
        }
    }
}

/// Restores horizontal separation in x order and vertical clearance
/// between consecutive layers.
fn enforce_spacing(h: &Hierarchy, points: &mut [Point], config: &LayoutConfig) {
    for layer in geometric_order(h, points) {
        resolve_layer(&layer, points, h, config);
    }

    let min_gap = config.global.min_layer_spacing;
    let heights: Vec<f32> = h
        .layers
        .iter()
        .map(|layer| layer.nodes.iter().map(|&idx| h.graph.node(idx).height).fold(0.0, f32::max))
        .collect();
    let layer_y = |rank: usize, points: &[Point]| h.layers[rank].nodes.first().map(|&idx| points[idx].y);
    for rank in 1..h.layers.len() {
        let (Some(above), Some(here)) = (layer_y(rank - 1, points), layer_y(rank, points)) else {
            continue;
        };
        let required = (heights[rank - 1] + heights[rank]) / 2.0 + min_gap;
        let deficit = required - (here - above);
        if deficit > 0.0 {
            for lower in &h.layers[rank..] {
                for &idx in &lower.nodes {
                    points[idx].y += deficit;
                }
            }
        }
    }
}

fn improve_aesthetics(h: &Hierarchy, adj: &LayerAdjacency, points: &mut [Point], config: &LayoutConfig) {
    // Symmetry: the middle node of an odd layer sits on the layer centroid.
    for layer in &h.layers {
        if layer.nodes.len() < 3 || layer.nodes.len() % 2 == 0 {
            continue;
        }
        let order = {
            let mut nodes = layer.nodes.clone();
            nodes.sort_by(|&a, &b| points[a].x.total_cmp(&points[b].x));
            nodes
        };
        if let Some(center) = centroid(&order, points) {
            points[order[order.len() / 2]].x = center;
        }
    }

    let damping = config.global.balance_damping;
    for layer in &h.layers {
        for &idx in &layer.nodes {
            let neighbors: Vec<NodeIdx> = adj.upper[idx].iter().chain(&adj.lower[idx]).copied().collect();
            if let Some(target) = centroid(&neighbors, points) {
                points[idx].x += damping * (target - points[idx].x);
            }
        }
    }

    // Edge length: pull the target end horizontally until the edge is no
    // longer than the target length, as far as the layer gap allows. Pulls
    // on one node are averaged.
    let target_len = config.global.target_edge_length;
    let damping = config.global.edge_length_damping;
    let mut pull = vec![(0.0f32, 0usize); points.len()];
    for edge in h.graph.edges() {
        if edge.is_self_loop() {
            continue;
        }
        let (s, t) = (points[edge.source], points[edge.target]);
        let dx = t.x - s.x;
        let dy = t.y - s.y;
        let reach = (target_len.powi(2) - dy.powi(2)).max(0.0).sqrt();
        if dx.abs() > reach {
            let wanted = s.x + reach * dx.signum();
            let entry = &mut pull[edge.target];
            entry.0 += wanted - t.x;
            entry.1 += 1;
        }
    }
    for (point, (total, count)) in points.iter_mut().zip(pull) {
        if count > 0 {
            point.x += damping * total / count as f32;
        }
    }
}

pub fn optimize(points: &[Point], h: &Hierarchy, bounds: Rect, config: &LayoutConfig) -> OptimizeOutcome {
    match optimize_within(points, h, bounds, config, &Deadline::unbounded()) {
        Ok(outcome) => outcome,
        Err(_) => {
            let score = score_layout(h, points, bounds, config);
            OptimizeOutcome {
                positions: points.to_vec(),
                score,
                initial_score: score.total,
                improvement: 0.0,
                iterations: 0,
            }
        }
    }
}

pub(crate) fn optimize_within(
    points: &[Point],
    h: &Hierarchy,
    bounds: Rect,
    config: &LayoutConfig,
    deadline: &Deadline,
) -> Result<OptimizeOutcome, LayoutError> {
    let adj = LayerAdjacency::new(h);
    let initial = score_layout(h, points, bounds, config);
    let mut best = (initial, points.to_vec());
    let mut current = points.to_vec();
    let mut previous = initial.total;
    let mut iterations = 0usize;

    while iterations < config.max_iterations {
        deadline.check(Phase::GlobalOptimization)?;
        iterations += 1;

        align_layers(h, &mut current, bounds, config.global.alignment_damping);
        enforce_spacing(h, &mut current, config);
        improve_aesthetics(h, &adj, &mut current, config);
        enforce_spacing(h, &mut current, config);

        let score = score_layout(h, &current, bounds, config);
        if score.total > best.0.total {
            best = (score, current.clone());
        }
        if (score.total - previous).abs() < config.convergence_threshold {
            break;
        }
        previous = score.total;
    }

    let (score, positions) = best;
    tracing::debug!(
        initial = initial.total,
        score = score.total,
        iterations,
        "global optimization finished"
    );
    Ok(OptimizeOutcome {
        positions,
        score,
        initial_score: initial.total,
        improvement: score.total - initial.total,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;
    use crate::ir::GraphInput;
    use crate::layout::{Filters, build_hierarchy, calculate_positions, preprocess};

    fn hierarchy(pairs: &[(&str, &str)]) -> Hierarchy {
        let data = preprocess(
            &GraphInput::from_pairs(pairs),
            &Filters::new(),
            &PreprocessConfig::default(),
        );
        build_hierarchy(&data)
    }

    #[test]
    fn never_scores_below_input() {
        let h = hierarchy(&[("a", "b"), ("a", "c"), ("a", "d"), ("b", "e"), ("d", "e"), ("a", "e")]);
        let config = LayoutConfig::default();
        let bounds = Rect::default();
        let points = calculate_positions(&h, bounds, &config);
        let outcome = optimize(&points, &h, bounds, &config);
        assert!(outcome.score.total >= outcome.initial_score);
        assert!(outcome.improvement >= 0.0);
        assert!(outcome.iterations <= config.max_iterations);
    }

    #[test]
    fn recovers_from_shifted_layout() {
        let h = hierarchy(&[("a", "b"), ("b", "c")]);
        let config = LayoutConfig::default();
        let bounds = Rect::default();
        let points: Vec<Point> = calculate_positions(&h, bounds, &config)
            .into_iter()
            .map(|p| Point::new(p.x + 400.0, p.y))
            .collect();
        let outcome = optimize(&points, &h, bounds, &config);
        assert!(outcome.improvement > 0.0);
        let a = h.graph.node_index("a").expect("a");
        assert!((outcome.positions[a].x - bounds.center_x()).abs() < 400.0);
    }

    #[test]
    fn keeps_nodes_apart() {
        let h = hierarchy(&[("r", "a"), ("r", "b"), ("r", "c"), ("a", "z"), ("c", "z")]);
        let config = LayoutConfig::default();
        let bounds = Rect::default();
        let points = calculate_positions(&h, bounds, &config);
        let outcome = optimize(&points, &h, bounds, &config);
        for layer in &h.layers {
            let mut xs: Vec<f32> = layer.nodes.iter().map(|&i| outcome.positions[i].x).collect();
            xs.sort_by(f32::total_cmp);
            for pair in xs.windows(2) {
                assert!(pair[1] - pair[0] >= config.min_node_spacing - 1e-3);
            }
        }
    }

    #[test]
    fn zero_iterations_returns_input() {
        let h = hierarchy(&[("a", "b")]);
        let config = LayoutConfig {
            max_iterations: 0,
            ..LayoutConfig::default()
        };
        let bounds = Rect::default();
        let points = calculate_positions(&h, bounds, &config);
        let outcome = optimize(&points, &h, bounds, &config);
        assert_eq!(outcome.positions, points);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.improvement, 0.0);
    }
}
