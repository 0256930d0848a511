//! Fallback layering by plain topological batching, used when the
//! hierarchical builder is disabled.

use super::hierarchy::insert_virtual_nodes;
use super::{Graph, Hierarchy, NodeIdx, PreprocessedGraph};

/// Kahn batching over node indices. Each batch is one layer. When no node
/// with zero in-degree remains, up to `max_nodes_per_layer` of the remaining
/// nodes are force-drained (lowest in-degree first) so cycles cannot stall
/// the loop. Layers wider than the limit are split afterwards.
pub fn calculate_layers(graph: &Graph, max_nodes_per_layer: usize) -> Vec<Vec<NodeIdx>> {
    let n = graph.node_count();
    let limit = max_nodes_per_layer.max(1);
    let mut in_degree = vec![0usize; n];
    for edge in graph.edges().iter().filter(|e| !e.is_self_loop()) {
        in_degree[edge.target] += 1;
    }

    let mut placed = vec![false; n];
    let mut remaining = n;
    let mut layers: Vec<Vec<NodeIdx>> = Vec::new();
    while remaining > 0 {
        if layers.len() >= n {
            tracing::warn!(
                layers = layers.len(),
                nodes = n,
                remaining,
                "layer count exceeds node count; aborting fallback layering"
            );
            break;
        }

        let mut batch: Vec<NodeIdx> = (0..n).filter(|&v| !placed[v] && in_degree[v] == 0).collect();
        if batch.is_empty() {
            let mut candidates: Vec<NodeIdx> = (0..n).filter(|&v| !placed[v]).collect();
            candidates.sort_by_key(|&v| in_degree[v]);
            candidates.truncate(limit);
            candidates.sort_unstable();
            tracing::warn!(
                drained = candidates.len(),
                remaining,
                "no zero in-degree node left; force-draining remaining nodes"
            );
            batch = candidates;
        }

        for &v in &batch {
            placed[v] = true;
            for &edge_idx in graph.out_edges(v) {
                let edge = graph.edge(edge_idx);
                if !edge.is_self_loop() && !placed[edge.target] {
                    in_degree[edge.target] = in_degree[edge.target].saturating_sub(1);
                }
            }
        }
        remaining -= batch.len();
        layers.push(batch);
    }

    split_wide_layers(layers, limit)
}

/// Splits any layer wider than `limit` into consecutive layers.
pub fn split_wide_layers(layers: Vec<Vec<NodeIdx>>, limit: usize) -> Vec<Vec<NodeIdx>> {
    let limit = limit.max(1);
    let mut out = Vec::with_capacity(layers.len());
    for layer in layers {
        if layer.len() <= limit {
            out.push(layer);
            continue;
        }
        for chunk in layer.chunks(limit) {
            out.push(chunk.to_vec());
        }
    }
    out
}

/// Splits each layer until no edge other than a self-loop joins two of its
/// nodes. Batch order decides direction: a node sinks one layer below every
/// earlier neighbor in its own batch.
pub fn separate_flat_edges(graph: &Graph, layers: Vec<Vec<NodeIdx>>) -> Vec<Vec<NodeIdx>> {
    let n = graph.node_count();
    let mut batch_of = vec![usize::MAX; n];
    let mut pos = vec![0usize; n];
    for (batch, layer) in layers.iter().enumerate() {
        for (p, &idx) in layer.iter().enumerate() {
            batch_of[idx] = batch;
            pos[idx] = p;
        }
    }

    let mut depth = vec![0usize; n];
    let mut out = Vec::with_capacity(layers.len());
    for (batch, layer) in layers.into_iter().enumerate() {
        let mut deepest = 0;
        for &v in &layer {
            let neighbors = graph
                .in_edges(v)
                .iter()
                .map(|&e| graph.edge(e).source)
                .chain(graph.out_edges(v).iter().map(|&e| graph.edge(e).target));
            let d = neighbors
                .filter(|&u| u != v && batch_of[u] == batch && pos[u] < pos[v])
                .map(|u| depth[u] + 1)
                .max()
                .unwrap_or(0);
            depth[v] = d;
            deepest = deepest.max(d);
        }
        if deepest > 0 {
            tracing::debug!(batch, sublayers = deepest + 1, "splitting layer with flat edges");
        }
        let mut split = vec![Vec::new(); deepest + 1];
        for v in layer {
            split[depth[v]].push(v);
        }
        out.extend(split);
    }
    out
}

/// Builds a hierarchy from fallback layers. Edges pointing to an earlier
/// layer are marked reversed and edges spanning several layers are routed
/// through virtual nodes, as in the hierarchical builder. Nodes left out by
/// an aborted layering join the last layer.
pub fn build_fallback_hierarchy(data: &PreprocessedGraph, max_nodes_per_layer: usize) -> Hierarchy {
    let mut graph = data.build_graph();
    let mut layers = calculate_layers(&graph, max_nodes_per_layer);
    let mut placed = vec![false; graph.node_count()];
    for &idx in layers.iter().flatten() {
        placed[idx] = true;
    }
    let leftover: Vec<NodeIdx> = (0..graph.node_count()).filter(|&idx| !placed[idx]).collect();
    if !leftover.is_empty() {
        match layers.last_mut() {
            Some(last) => last.extend(leftover),
            None => layers.push(leftover),
        }
    }

    let layers = separate_flat_edges(&graph, layers);
    for (rank, layer) in layers.iter().enumerate() {
        for &idx in layer {
            graph.node_mut(idx).rank = Some(rank);
        }
    }
    let ranks: Vec<usize> = graph.nodes().iter().map(|n| n.rank.unwrap_or(0)).collect();
    let mut reversed = 0usize;
    for edge in graph.edges_mut() {
        edge.reversed = ranks[edge.target] < ranks[edge.source] || edge.source == edge.target;
        reversed += usize::from(edge.reversed);
    }
    let replaced = insert_virtual_nodes(&mut graph);
    let hierarchy = Hierarchy::from_ranked_graph(graph, replaced);
    tracing::debug!(
        layers = hierarchy.layers.len(),
        reversed,
        virtual_nodes = hierarchy.stats.virtual_nodes,
        "built fallback hierarchy"
    );
    hierarchy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;
    use crate::ir::GraphInput;
    use crate::layout::{Filters, preprocess};
    use tracing_test::traced_test;

    fn data(pairs: &[(&str, &str)]) -> PreprocessedGraph {
        preprocess(
            &GraphInput::from_pairs(pairs),
            &Filters::new(),
            &PreprocessConfig::default(),
        )
    }

    fn ids(graph: &Graph, layers: &[Vec<NodeIdx>]) -> Vec<Vec<String>> {
        layers
            .iter()
            .map(|l| l.iter().map(|&i| graph.node(i).id.clone()).collect())
            .collect()
    }

    #[test]
    fn batches_topologically() {
        let d = data(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let graph = d.build_graph();
        let layers = calculate_layers(&graph, 20);
        assert_eq!(
            ids(&graph, &layers),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn splits_wide_layers() {
        let d = data(&[("r", "a"), ("r", "b"), ("r", "c"), ("r", "d"), ("r", "e")]);
        let graph = d.build_graph();
        let layers = calculate_layers(&graph, 2);
        assert_eq!(layers.len(), 4);
        assert!(layers.iter().all(|l| l.len() <= 2));
        assert_eq!(layers.iter().map(Vec::len).sum::<usize>(), 6);
    }

    #[traced_test]
    #[test]
    fn cycle_is_force_drained() {
        let d = data(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let graph = d.build_graph();
        let layers = calculate_layers(&graph, 1);
        assert_eq!(layers.iter().map(Vec::len).sum::<usize>(), 3);
        assert_eq!(layers[0].len(), 1);
        assert!(logs_contain("force-draining"));
    }

    #[test]
    fn wide_drain_keeps_cycle_in_one_layer() {
        let d = data(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let graph = d.build_graph();
        let layers = calculate_layers(&graph, 20);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 3);
    }

    fn assert_rank_invariant(h: &Hierarchy) {
        for edge in h.graph.edges() {
            let (s, t) = (h.rank_of(edge.source), h.rank_of(edge.target));
            if edge.reversed {
                assert!(edge.is_self_loop() || s == t + 1, "reversed edge {} spans {s}->{t}", edge.id);
            } else {
                assert_eq!(t, s + 1, "edge {} spans {s}->{t}", edge.id);
            }
        }
    }

    #[test]
    fn fallback_hierarchy_marks_upward_edges() {
        let d = data(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let h = build_fallback_hierarchy(&d, 1);
        assert_eq!(h.layers.len(), 3);
        assert_eq!(h.stats.reversed_edges, 1);
        assert_eq!(h.stats.virtual_nodes, 1);
        assert_eq!(h.replaced_edges.len(), 1);
        assert_eq!(h.stats.real_nodes, 3);
        assert_rank_invariant(&h);
    }

    #[test]
    fn fallback_skip_edge_gets_virtual_node() {
        let d = data(&[("a", "b"), ("b", "c"), ("a", "c")]);
        let h = build_fallback_hierarchy(&d, 20);
        assert_eq!(h.layers.len(), 3);
        assert_eq!(h.stats.virtual_nodes, 1);
        let virtual_node = h.graph.nodes().iter().find(|n| n.is_virtual()).expect("virtual");
        assert_eq!(virtual_node.rank, Some(1));
        let chain = h.chain_for(&h.replaced_edges[0].id);
        assert_eq!(chain.len(), 2);
        assert_rank_invariant(&h);
    }

    #[test]
    fn drained_cycle_is_split_by_flat_edges() {
        let d = data(&[("a", "b"), ("b", "c"), ("c", "a"), ("c", "c")]);
        let h = build_fallback_hierarchy(&d, 20);
        let rank = |id: &str| h.rank_of(h.graph.node_index(id).expect("node"));
        assert_eq!((rank("a"), rank("b"), rank("c")), (0, 1, 2));
        let back = h.replaced_edges.iter().find(|e| e.reversed).expect("c->a routed back");
        assert_eq!(h.graph.node(back.source).id, "c");
        // c->a and the self-loop.
        assert_eq!(h.stats.reversed_edges, 2);
        assert_rank_invariant(&h);
    }

    #[test]
    fn flat_edges_against_batch_order_are_reversed() {
        let d = data(&[("a", "b"), ("b", "a")]);
        let graph = d.build_graph();
        let layers = separate_flat_edges(&graph, vec![vec![0, 1]]);
        assert_eq!(layers, vec![vec![0], vec![1]]);

        let h = build_fallback_hierarchy(&d, 20);
        assert_eq!(h.layers.len(), 2);
        assert_eq!(h.stats.reversed_edges, 1);
        assert_eq!(h.stats.virtual_nodes, 0);
        assert_rank_invariant(&h);
    }
}
