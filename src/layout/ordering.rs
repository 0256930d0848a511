use std::cmp::Ordering;

use crate::config::{CrossingReductionMethod, LayoutConfig};

use super::{Deadline, Hierarchy, LayoutError, NodeIdx, Phase, PositionMap};

/// Ranks a node by the positions of its neighbors in the fixed layer.
pub trait CrossingHeuristic {
    fn name(&self) -> &'static str;

    /// `positions` are the neighbor indices in the adjacent layer, unsorted.
    /// Returns `None` when the node has no neighbors there.
    fn key(&self, positions: &mut [f32]) -> Option<f32>;
}

pub struct Barycenter;

impl CrossingHeuristic for Barycenter {
    fn name(&self) -> &'static str {
        "barycenter"
    }

    fn key(&self, positions: &mut [f32]) -> Option<f32> {
        if positions.is_empty() {
            return None;
        }
        Some(positions.iter().sum::<f32>() / positions.len() as f32)
    }
}

pub struct Median;

impl CrossingHeuristic for Median {
    fn name(&self) -> &'static str {
        "median"
    }

    fn key(&self, positions: &mut [f32]) -> Option<f32> {
        if positions.is_empty() {
            return None;
        }
        positions.sort_by(|a, b| a.total_cmp(b));
        let mid = positions.len() / 2;
        if positions.len() % 2 == 1 {
            Some(positions[mid])
        } else {
            Some((positions[mid - 1] + positions[mid]) * 0.5)
        }
    }
}

pub fn heuristic_for(method: CrossingReductionMethod) -> &'static dyn CrossingHeuristic {
    match method {
        CrossingReductionMethod::Barycenter => &Barycenter,
        CrossingReductionMethod::Median => &Median,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrderingReport {
    pub initial_crossings: usize,
    pub crossings: usize,
    /// Fraction of initial crossings removed, 0 to 1.
    pub improvement: f32,
    pub iterations: usize,
}

/// Neighbors of each node in the layer directly above and below. Edges
/// that do not join adjacent layers are ignored.
#[derive(Debug, Clone)]
pub(crate) struct LayerAdjacency {
    pub(crate) upper: Vec<Vec<NodeIdx>>,
    pub(crate) lower: Vec<Vec<NodeIdx>>,
}

impl LayerAdjacency {
    pub(crate) fn new(h: &Hierarchy) -> Self {
        let n = h.graph.node_count();
        let mut upper = vec![Vec::new(); n];
        let mut lower = vec![Vec::new(); n];
        for edge in h.graph.edges() {
            let (s, t) = (edge.source, edge.target);
            let (rs, rt) = (h.rank_of(s), h.rank_of(t));
            if rt == rs + 1 {
                lower[s].push(t);
                upper[t].push(s);
            } else if rs == rt + 1 {
                lower[t].push(s);
                upper[s].push(t);
            }
        }
        Self { upper, lower }
    }
}

fn positions_of(order: &[Vec<NodeIdx>], n: usize) -> Vec<usize> {
    let mut pos = vec![0usize; n];
    for layer in order {
        for (i, &v) in layer.iter().enumerate() {
            pos[v] = i;
        }
    }
    pos
}

/// Crossings between `upper_layer` and the layer below it, counted as
/// inversions of the (upper index, lower index) edge pairs.
fn layer_crossings(upper_layer: &[NodeIdx], adj: &LayerAdjacency, pos: &[usize]) -> usize {
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    let mut width = 0usize;
    for &u in upper_layer {
        for &v in &adj.lower[u] {
            pairs.push((pos[u], pos[v]));
            width = width.max(pos[v] + 1);
        }
    }
    if pairs.len() < 2 {
        return 0;
    }
    pairs.sort_unstable();

    // Fenwick tree over lower-layer indices.
    let mut tree = vec![0usize; width + 1];
    let mut inserted = 0usize;
    let mut crossings = 0usize;
    for &(_, b) in &pairs {
        let mut at_or_below = 0usize;
        let mut i = b + 1;
        while i > 0 {
            at_or_below += tree[i];
            i -= i & i.wrapping_neg();
        }
        crossings += inserted - at_or_below;
        let mut i = b + 1;
        while i <= width {
            tree[i] += 1;
            i += i & i.wrapping_neg();
        }
        inserted += 1;
    }
    crossings
}

fn total_crossings(order: &[Vec<NodeIdx>], adj: &LayerAdjacency, pos: &[usize]) -> usize {
    order
        .iter()
        .take(order.len().saturating_sub(1))
        .map(|layer| layer_crossings(layer, adj, pos))
        .sum()
}

pub(crate) fn crossings_for_order(order: &[Vec<NodeIdx>], adj: &LayerAdjacency, n: usize) -> usize {
    let pos = positions_of(order, n);
    total_crossings(order, adj, &pos)
}

/// Total crossings of the hierarchy's current layer order.
pub fn count_crossings(h: &Hierarchy) -> usize {
    let order: Vec<Vec<NodeIdx>> = h.layers.iter().map(|l| l.nodes.clone()).collect();
    crossings_for_order(&order, &LayerAdjacency::new(h), h.graph.node_count())
}

fn sort_layer(
    layer: &mut [NodeIdx],
    neighbors: &[Vec<NodeIdx>],
    pos: &mut [usize],
    heuristic: &dyn CrossingHeuristic,
) {
    let mut keyed: Vec<(NodeIdx, f32, usize)> = layer
        .iter()
        .map(|&v| {
            let mut values: Vec<f32> = neighbors[v].iter().map(|&nb| pos[nb] as f32).collect();
            let current = pos[v];
            let key = heuristic.key(&mut values).unwrap_or(current as f32);
            (v, key, current)
        })
        .collect();
    keyed.sort_by(|a, b| match a.1.partial_cmp(&b.1) {
        Some(Ordering::Equal) | None => a.2.cmp(&b.2),
        Some(ordering) => ordering,
    });
    for (i, (v, _, _)) in keyed.into_iter().enumerate() {
        layer[i] = v;
        pos[v] = i;
    }
}

/// Crossings between the edges of `left` and `right` when `left` sits to
/// the left of `right`.
fn pair_crossings(left: NodeIdx, right: NodeIdx, adj: &LayerAdjacency, pos: &[usize]) -> usize {
    let mut count = 0;
    for side in [&adj.upper, &adj.lower] {
        for &a in &side[left] {
            for &b in &side[right] {
                if pos[a] > pos[b] {
                    count += 1;
                }
            }
        }
    }
    count
}

/// Adjacent exchanges that strictly reduce local crossings.
fn refine_by_swaps(layer: &mut [NodeIdx], adj: &LayerAdjacency, pos: &mut [usize], passes: usize) {
    for _ in 0..passes {
        let mut improved = false;
        for i in 0..layer.len().saturating_sub(1) {
            let (u, v) = (layer[i], layer[i + 1]);
            if pair_crossings(v, u, adj, pos) < pair_crossings(u, v, adj, pos) {
                layer.swap(i, i + 1);
                pos[u] = i + 1;
                pos[v] = i;
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }
}

fn seed_from_prior(h: &Hierarchy, order: &mut [Vec<NodeIdx>], prior: &PositionMap) {
    for layer in order.iter_mut() {
        layer.sort_by(|&a, &b| {
            let xa = prior.get(&h.graph.node(a).id).map(|p| p.x);
            let xb = prior.get(&h.graph.node(b).id).map(|p| p.x);
            match (xa, xb) {
                (Some(xa), Some(xb)) => xa.total_cmp(&xb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
    }
}

/// Reorders nodes within each layer to reduce crossings. Prior positions,
/// when given, seed the initial order.
pub fn optimize_layers(
    h: &mut Hierarchy,
    prior: Option<&PositionMap>,
    config: &LayoutConfig,
) -> OrderingReport {
    match optimize_layers_within(h, prior, config, &Deadline::unbounded()) {
        Ok(report) => report,
        Err(_) => OrderingReport::default(),
    }
}

pub(crate) fn optimize_layers_within(
    h: &mut Hierarchy,
    prior: Option<&PositionMap>,
    config: &LayoutConfig,
    deadline: &Deadline,
) -> Result<OrderingReport, LayoutError> {
    let n = h.graph.node_count();
    let mut order: Vec<Vec<NodeIdx>> = h.layers.iter().map(|l| l.nodes.clone()).collect();
    if let Some(prior) = prior {
        seed_from_prior(h, &mut order, prior);
    }
    let adj = LayerAdjacency::new(h);
    let heuristic = heuristic_for(config.crossing_reduction_method);
    let mut pos = positions_of(&order, n);

    let initial = total_crossings(&order, &adj, &pos);
    let mut best = initial;
    let mut best_order = order.clone();
    let mut iterations = 0usize;

    while iterations < config.ordering.max_iterations && best > 0 && order.len() > 1 {
        deadline.check(Phase::LayerOptimization)?;
        iterations += 1;
        let before = order.clone();

        for r in 1..order.len() {
            sort_layer(&mut order[r], &adj.upper, &mut pos, heuristic);
        }
        for r in (0..order.len() - 1).rev() {
            sort_layer(&mut order[r], &adj.lower, &mut pos, heuristic);
        }
        for layer in order.iter_mut() {
            refine_by_swaps(layer, &adj, &mut pos, config.ordering.max_swap_passes);
        }

        let crossings = total_crossings(&order, &adj, &pos);
        if crossings < best {
            best = crossings;
            best_order = order.clone();
        }
        if order == before {
            break;
        }
    }

    for (layer, nodes) in h.layers.iter_mut().zip(best_order) {
        layer.nodes = nodes;
    }

    let improvement = if initial == 0 {
        0.0
    } else {
        (initial - best) as f32 / initial as f32
    };
    tracing::debug!(
        heuristic = heuristic.name(),
        initial,
        crossings = best,
        iterations,
        "optimized layer order"
    );
    Ok(OrderingReport {
        initial_crossings: initial,
        crossings: best,
        improvement,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;
    use crate::ir::GraphInput;
    use crate::layout::{Filters, Point, build_hierarchy, preprocess};

    fn hierarchy(pairs: &[(&str, &str)]) -> Hierarchy {
        let data = preprocess(
            &GraphInput::from_pairs(pairs),
            &Filters::new(),
            &PreprocessConfig::default(),
        );
        build_hierarchy(&data)
    }

    fn twisted() -> Hierarchy {
        // a->d and b->c cross when layers keep declaration order.
        let mut h = hierarchy(&[("a", "d"), ("b", "c")]);
        let c = h.graph.node_index("c").expect("c");
        let d = h.graph.node_index("d").expect("d");
        h.layers[1].nodes = vec![c, d];
        h
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(Median.key(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(Median.key(&mut [4.0, 1.0]), Some(2.5));
        assert_eq!(Median.key(&mut []), None);
        assert_eq!(Barycenter.key(&mut [1.0, 2.0, 6.0]), Some(3.0));
    }

    #[test]
    fn counts_inversions_between_layers() {
        let h = twisted();
        assert_eq!(count_crossings(&h), 1);
    }

    #[test]
    fn removes_simple_crossing() {
        for method in [CrossingReductionMethod::Barycenter, CrossingReductionMethod::Median] {
            let mut h = twisted();
            let config = LayoutConfig {
                crossing_reduction_method: method,
                ..LayoutConfig::default()
            };
            let report = optimize_layers(&mut h, None, &config);
            assert_eq!(report.initial_crossings, 1);
            assert_eq!(report.crossings, 0);
            assert_eq!(report.improvement, 1.0);
            assert_eq!(count_crossings(&h), 0);
        }
    }

    #[test]
    fn never_returns_worse_than_initial() {
        let mut h = hierarchy(&[
            ("a", "x"),
            ("a", "y"),
            ("b", "x"),
            ("b", "z"),
            ("c", "y"),
            ("c", "z"),
            ("x", "p"),
            ("z", "p"),
            ("y", "q"),
        ]);
        let initial = count_crossings(&h);
        let report = optimize_layers(&mut h, None, &LayoutConfig::default());
        assert!(report.crossings <= initial);
        assert_eq!(report.crossings, count_crossings(&h));
    }

    #[test]
    fn prior_positions_seed_order() {
        let mut h = hierarchy(&[("r", "a"), ("r", "b")]);
        let mut prior = PositionMap::new();
        prior.insert("a".to_string(), Point::new(500.0, 0.0));
        prior.insert("b".to_string(), Point::new(100.0, 0.0));
        optimize_layers(&mut h, Some(&prior), &LayoutConfig::default());
        assert_eq!(h.layer_ids()[1], vec!["b", "a"]);
    }

    #[test]
    fn swap_refinement_fixes_pair() {
        let mut h = twisted();
        let adj = LayerAdjacency::new(&h);
        let mut order: Vec<Vec<NodeIdx>> = h.layers.iter().map(|l| l.nodes.clone()).collect();
        let mut pos = positions_of(&order, h.graph.node_count());
        refine_by_swaps(&mut order[1], &adj, &mut pos, 1);
        assert_eq!(total_crossings(&order, &adj, &pos), 0);
        h.layers[1].nodes = order[1].clone();
        assert_eq!(count_crossings(&h), 0);
    }
}
