//! Bottom-up coordinate assignment. Layers are placed from the deepest one
//! upward so parents settle over their children.

use crate::config::LayoutConfig;

use super::ordering::LayerAdjacency;
use super::{Deadline, Hierarchy, LayoutError, NodeIdx, Phase, Point, PositionMap, Rect};

/// Center y of every layer. Consecutive layer centers are separated by the
/// half heights of both layers plus `layer_spacing`.
pub fn layer_centers_y(h: &Hierarchy, bounds: Rect, layer_spacing: f32) -> Vec<f32> {
    let heights: Vec<f32> = h
        .layers
        .iter()
        .map(|layer| {
            layer
                .nodes
                .iter()
                .map(|&idx| h.graph.node(idx).height)
                .fold(0.0, f32::max)
        })
        .collect();
    let mut ys = Vec::with_capacity(heights.len());
    let mut y = bounds.y;
    for (rank, &height) in heights.iter().enumerate() {
        y = if rank == 0 {
            bounds.y + height / 2.0
        } else {
            y + (heights[rank - 1] + height) / 2.0 + layer_spacing
        };
        ys.push(y);
    }
    ys
}

/// Pushes nodes right, in the given order, until each clears its left
/// neighbor by `config.separation`.
fn push_apart(layer: &[NodeIdx], points: &mut [Point], h: &Hierarchy, config: &LayoutConfig) {
    for pair in layer.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        let gap = config.separation(h.graph.node(left).width, h.graph.node(right).width);
        let min_x = points[left].x + gap;
        if points[right].x < min_x {
            points[right].x = min_x;
        }
    }
}

/// Enforces separation in the given order, then shifts the layer back so
/// its mean x matches the mean of the requested positions.
pub(crate) fn resolve_layer(layer: &[NodeIdx], points: &mut [Point], h: &Hierarchy, config: &LayoutConfig) {
    if layer.len() < 2 {
        return;
    }
    let wanted: f32 = layer.iter().map(|&idx| points[idx].x).sum::<f32>() / layer.len() as f32;
    push_apart(layer, points, h, config);
    let got: f32 = layer.iter().map(|&idx| points[idx].x).sum::<f32>() / layer.len() as f32;
    let shift = wanted - got;
    for &idx in layer {
        points[idx].x += shift;
    }
}

fn mean_x(neighbors: &[NodeIdx], points: &[Point]) -> Option<f32> {
    if neighbors.is_empty() {
        return None;
    }
    Some(neighbors.iter().map(|&nb| points[nb].x).sum::<f32>() / neighbors.len() as f32)
}

/// Node centers indexed by node, for real and virtual nodes alike.
pub fn calculate_positions(h: &Hierarchy, bounds: Rect, config: &LayoutConfig) -> Vec<Point> {
    match calculate_positions_within(h, bounds, config, &Deadline::unbounded()) {
        Ok(points) => points,
        Err(_) => vec![Point::default(); h.graph.node_count()],
    }
}

pub(crate) fn calculate_positions_within(
    h: &Hierarchy,
    bounds: Rect,
    config: &LayoutConfig,
    deadline: &Deadline,
) -> Result<Vec<Point>, LayoutError> {
    let mut points = vec![Point::default(); h.graph.node_count()];
    if h.layers.is_empty() {
        return Ok(points);
    }
    let adj = LayerAdjacency::new(h);
    let ys = layer_centers_y(h, bounds, config.layer_spacing);
    let deepest = h.layers.len() - 1;

    for (rank, layer) in h.layers.iter().enumerate().rev() {
        deadline.check(Phase::PositionCalculation)?;
        let count = layer.nodes.len();
        for (i, &idx) in layer.nodes.iter().enumerate() {
            let x = if rank == deepest {
                bounds.x + bounds.width * (i + 1) as f32 / (count + 1) as f32
            } else {
                mean_x(&adj.lower[idx], &points).unwrap_or_else(|| bounds.center_x())
            };
            points[idx] = Point::new(x, ys[rank]);
        }
        resolve_layer(&layer.nodes, &mut points, h, config);
    }

    let weight = config.position.balance_weight;
    if weight > 0.0 {
        for _ in 0..config.position.balance_passes {
            deadline.check(Phase::PositionCalculation)?;
            for layer in &h.layers {
                for &idx in &layer.nodes {
                    let neighbors: Vec<NodeIdx> =
                        adj.upper[idx].iter().chain(&adj.lower[idx]).copied().collect();
                    if let Some(target) = mean_x(&neighbors, &points) {
                        points[idx].x = (1.0 - weight) * points[idx].x + weight * target;
                    }
                }
                resolve_layer(&layer.nodes, &mut points, h, config);
            }
        }
    }

    let boxes = h.graph.nodes().iter().enumerate().map(|(idx, node)| (points[idx], node.width, node.height));
    if let Some(extent) = Rect::enclosing(boxes) {
        let shift = bounds.center_x() - extent.center_x();
        for point in &mut points {
            point.x += shift;
        }
    }
    Ok(points)
}

/// Real-node centers keyed by id.
pub fn position_map(h: &Hierarchy, points: &[Point]) -> PositionMap {
    h.graph
        .nodes()
        .iter()
        .zip(points)
        .filter(|(node, _)| !node.is_virtual())
        .map(|(node, point)| (node.id.clone(), *point))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;
    use crate::ir::GraphInput;
    use crate::layout::{Filters, build_hierarchy, preprocess};

    fn hierarchy(pairs: &[(&str, &str)]) -> Hierarchy {
        let data = preprocess(
            &GraphInput::from_pairs(pairs),
            &Filters::new(),
            &PreprocessConfig::default(),
        );
        build_hierarchy(&data)
    }

    #[test]
    fn chain_is_vertical_and_centered() {
        let h = hierarchy(&[("start", "A"), ("A", "B"), ("B", "end")]);
        let config = LayoutConfig::default();
        let bounds = Rect::default();
        let map = position_map(&h, &calculate_positions(&h, bounds, &config));
        let ids = ["start", "A", "B", "end"];
        for pair in ids.windows(2) {
            let (upper, lower) = (map[pair[0]], map[pair[1]]);
            assert!(lower.y - upper.y >= config.layer_spacing);
            assert!((lower.x - upper.x).abs() < 1e-3);
        }
        assert!((map["start"].x - bounds.center_x()).abs() < 1e-3);
    }

    #[test]
    fn diamond_branches_share_layer() {
        let h = hierarchy(&[
            ("start", "split"),
            ("split", "A"),
            ("split", "B"),
            ("A", "merge"),
            ("B", "merge"),
            ("merge", "end"),
        ]);
        let config = LayoutConfig::default();
        let bounds = Rect::default();
        let map = position_map(&h, &calculate_positions(&h, bounds, &config));
        assert_eq!(map["A"].y, map["B"].y);
        assert!((map["A"].x - map["B"].x).abs() >= config.node_spacing);
        for id in ["start", "split", "merge", "end"] {
            assert!((map[id].x - bounds.center_x()).abs() < 1.0, "{id} is off center");
        }
    }

    #[test]
    fn layers_never_overlap() {
        let h = hierarchy(&[
            ("r", "a"),
            ("r", "b"),
            ("r", "c"),
            ("r", "d"),
            ("a", "x"),
            ("b", "x"),
            ("r", "x"),
        ]);
        let config = LayoutConfig::default();
        let points = calculate_positions(&h, Rect::new(0.0, 0.0, 100.0, 100.0), &config);
        for layer in &h.layers {
            let mut xs: Vec<f32> = layer.nodes.iter().map(|&i| points[i].x).collect();
            xs.sort_by(f32::total_cmp);
            for pair in xs.windows(2) {
                assert!(pair[1] - pair[0] >= config.min_node_spacing - 1e-3);
            }
        }
    }

    #[test]
    fn tall_layers_push_next_layer_down() {
        let mut input = GraphInput::new().node("a").node("b").edge("a", "b");
        input.nodes[0].height = Some(200.0);
        let data = preprocess(&input, &Filters::new(), &PreprocessConfig::default());
        let h = build_hierarchy(&data);
        let ys = layer_centers_y(&h, Rect::default(), 100.0);
        assert_eq!(ys[0], 100.0);
        assert_eq!(ys[1], 100.0 + (200.0 + 40.0) / 2.0 + 100.0);
    }
}
