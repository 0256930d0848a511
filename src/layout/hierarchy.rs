//! Hierarchical builder: cycle breaking, rank assignment, virtual node
//! insertion and layer construction.

use std::collections::VecDeque;

use crate::ir::VIRTUAL_ID_PREFIX;

use super::{Edge, Graph, Hierarchy, Node, NodeIdx, NodeKind, Point, PreprocessedGraph};

pub fn build_hierarchy(data: &PreprocessedGraph) -> Hierarchy {
    build_hierarchy_from_graph(data.build_graph())
}

pub fn build_hierarchy_from_graph(mut graph: Graph) -> Hierarchy {
    let reversed = remove_cycles(&mut graph);
    let ranks = assign_ranks(&graph);
    for (node, rank) in graph.nodes_mut().iter_mut().zip(&ranks) {
        node.rank = Some(*rank);
    }
    let replaced = insert_virtual_nodes(&mut graph);
    let hierarchy = Hierarchy::from_ranked_graph(graph, replaced);
    tracing::debug!(
        layers = hierarchy.layers.len(),
        reversed,
        virtual_nodes = hierarchy.stats.virtual_nodes,
        "built hierarchy"
    );
    hierarchy
}

/// Marks every DFS back edge as `reversed`. Returns the number of edges
/// flipped. Self-loops count as back edges.
pub fn remove_cycles(graph: &mut Graph) -> usize {
    let n = graph.node_count();
    let mut visited = vec![false; n];
    let mut on_stack = vec![false; n];
    let mut back_edges = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        on_stack[start] = true;
        let mut frames: Vec<(NodeIdx, usize)> = vec![(start, 0)];
        while let Some(frame) = frames.last_mut() {
            let (node, cursor) = *frame;
            let Some(&edge_idx) = graph.out_edges(node).get(cursor) else {
                on_stack[node] = false;
                frames.pop();
                continue;
            };
            frame.1 += 1;
            let target = graph.edge(edge_idx).target;
            if on_stack[target] {
                back_edges.push(edge_idx);
            } else if !visited[target] {
                visited[target] = true;
                on_stack[target] = true;
                frames.push((target, 0));
            }
        }
    }

    for &edge_idx in &back_edges {
        graph.edges_mut()[edge_idx].reversed = true;
    }
    back_edges.len()
}

/// Kahn relaxation over non-reversed edges: sources start at 0 and each
/// target ends at `max(rank(source) + 1)`.
pub fn assign_ranks(graph: &Graph) -> Vec<usize> {
    let n = graph.node_count();
    let mut ranks = vec![0usize; n];
    let mut in_degree = vec![0usize; n];
    for edge in graph.edges().iter().filter(|e| !e.reversed) {
        in_degree[edge.target] += 1;
    }

    let mut queue: VecDeque<NodeIdx> = (0..n).filter(|&v| in_degree[v] == 0).collect();
    let mut processed = 0usize;
    while let Some(u) = queue.pop_front() {
        processed += 1;
        for &edge_idx in graph.out_edges(u) {
            let edge = graph.edge(edge_idx);
            if edge.reversed {
                continue;
            }
            let v = edge.target;
            ranks[v] = ranks[v].max(ranks[u] + 1);
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                queue.push_back(v);
            }
        }
    }

    if processed < n {
        tracing::warn!(
            unranked = n - processed,
            "rank relaxation left nodes unprocessed; cycle removal missed a back edge"
        );
    }

    let max_rank = ranks.iter().copied().max().unwrap_or(0);
    if n > 0 && max_rank + 1 > n {
        tracing::warn!(
            layers = max_rank + 1,
            nodes = n,
            "layer count exceeds node count; clamping ranks"
        );
        for rank in &mut ranks {
            *rank = (*rank).min(n - 1);
        }
    }
    ranks
}

/// Splits every edge spanning more than one rank into a chain of virtual
/// nodes, one per intermediate rank. Returns the user edges that were
/// replaced. Each chain segment carries `original_edge` and keeps the
/// original's orientation and `reversed` flag.
pub fn insert_virtual_nodes(graph: &mut Graph) -> Vec<Edge> {
    let edges: Vec<Edge> = graph.edges().to_vec();
    let mut kept = Vec::with_capacity(edges.len());
    let mut replaced = Vec::new();
    let mut next_virtual = 0usize;

    for edge in edges {
        let (upper, lower) = edge.logical();
        let upper_rank = graph.node(upper).rank.unwrap_or(0);
        let lower_rank = graph.node(lower).rank.unwrap_or(0);
        if lower_rank <= upper_rank + 1 {
            kept.push(edge);
            continue;
        }

        let mut path: Vec<NodeIdx> = Vec::with_capacity(lower_rank - upper_rank + 1);
        path.push(upper);
        for rank in (upper_rank + 1)..lower_rank {
            let idx = graph.add_node(Node {
                id: format!("{VIRTUAL_ID_PREFIX}{next_virtual}"),
                kind: NodeKind::Virtual {
                    origin: edge.id.clone(),
                },
                width: 0.0,
                height: 0.0,
                rank: Some(rank),
                position: Point::default(),
            });
            next_virtual += 1;
            path.push(idx);
        }
        path.push(lower);
        if edge.reversed {
            path.reverse();
        }

        for (segment, pair) in path.windows(2).enumerate() {
            kept.push(Edge {
                id: format!("{}/{}", edge.id, segment),
                source: pair[0],
                target: pair[1],
                weight: edge.weight,
                is_virtual: true,
                reversed: edge.reversed,
                original_edge: Some(edge.id.clone()),
            });
        }
        replaced.push(edge);
    }

    graph.replace_edges(kept);
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;
    use crate::ir::GraphInput;
    use crate::layout::{Filters, preprocess};

    fn hierarchy(pairs: &[(&str, &str)]) -> Hierarchy {
        let data = preprocess(
            &GraphInput::from_pairs(pairs),
            &Filters::new(),
            &PreprocessConfig::default(),
        );
        build_hierarchy(&data)
    }

    fn rank(h: &Hierarchy, id: &str) -> usize {
        let idx = h.graph.node_index(id).expect("node exists");
        h.rank_of(idx)
    }

    fn assert_rank_invariant(h: &Hierarchy) {
        for edge in h.graph.edges() {
            let s = h.rank_of(edge.source);
            let t = h.rank_of(edge.target);
            if edge.reversed {
                assert!(edge.is_self_loop() || s == t + 1, "reversed edge {} spans {s}->{t}", edge.id);
            } else {
                assert_eq!(t, s + 1, "edge {} spans {s}->{t}", edge.id);
            }
        }
    }

    #[test]
    fn linear_chain_gets_one_layer_per_node() {
        let h = hierarchy(&[("start", "A"), ("A", "B"), ("B", "end")]);
        assert_eq!(h.layers.len(), 4);
        assert_eq!(rank(&h, "start"), 0);
        assert_eq!(rank(&h, "end"), 3);
        assert_eq!(h.stats.virtual_nodes, 0);
        assert_rank_invariant(&h);
    }

    #[test]
    fn skip_edge_gets_one_virtual_node() {
        let h = hierarchy(&[("start", "end"), ("start", "mid"), ("mid", "end")]);
        assert_eq!(h.stats.virtual_nodes, 1);
        assert_eq!(h.replaced_edges.len(), 1);
        let virtual_node = h.graph.nodes().iter().find(|n| n.is_virtual()).expect("virtual");
        assert_eq!(virtual_node.rank, Some(1));
        assert!(virtual_node.id.starts_with(VIRTUAL_ID_PREFIX));
        assert_rank_invariant(&h);
    }

    #[test]
    fn chain_reconstructs_original_edge() {
        let h = hierarchy(&[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")]);
        let original = &h.replaced_edges[0];
        let chain = h.chain_for(&original.id);
        assert_eq!(chain.len(), 3);
        assert_eq!(h.graph.edge(chain[0]).source, original.source);
        assert_eq!(h.graph.edge(*chain.last().expect("chain")).target, original.target);
        for pair in chain.windows(2) {
            assert_eq!(h.graph.edge(pair[0]).target, h.graph.edge(pair[1]).source);
        }
    }

    #[test]
    fn three_cycle_reverses_one_edge() {
        let h = hierarchy(&[("A", "B"), ("B", "C"), ("C", "A")]);
        assert_eq!(h.layers.len(), 3);
        assert_eq!(h.stats.reversed_edges, 1);
        assert_eq!(h.graph.edges().iter().filter(|e| e.reversed).count(), 2);
        assert_eq!(h.replaced_edges.len(), 1);
        assert!(h.replaced_edges[0].reversed);
        assert_eq!(h.stats.virtual_nodes, 1);
        assert_rank_invariant(&h);
    }

    #[test]
    fn reversed_chain_reconstructs_in_original_direction() {
        let h = hierarchy(&[("A", "B"), ("B", "C"), ("C", "A")]);
        let original = h.replaced_edges[0].clone();
        assert_eq!(h.graph.node(original.source).id, "C");
        let chain = h.chain_for(&original.id);
        assert_eq!(h.graph.edge(chain[0]).source, original.source);
        assert_eq!(h.graph.edge(chain[1]).target, original.target);
    }

    #[test]
    fn two_cycle_and_self_loop_complete() {
        let h = hierarchy(&[("a", "b"), ("b", "a"), ("b", "b")]);
        assert_eq!(h.layers.len(), 2);
        assert_eq!(h.stats.reversed_edges, 2);
        assert_rank_invariant(&h);
    }

    #[test]
    fn layers_partition_all_nodes() {
        let h = hierarchy(&[("a", "b"), ("a", "c"), ("c", "d"), ("a", "d"), ("x", "y")]);
        let mut seen = vec![0usize; h.graph.node_count()];
        for layer in &h.layers {
            for &idx in &layer.nodes {
                seen[idx] += 1;
                assert_eq!(h.rank_of(idx), layer.rank);
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
        assert!(h.graph.adjacency_consistent());
    }

    #[test]
    fn disconnected_roots_share_rank_zero() {
        let h = hierarchy(&[("a", "b"), ("x", "y")]);
        assert_eq!(rank(&h, "a"), 0);
        assert_eq!(rank(&h, "x"), 0);
        assert_eq!(h.layers[0].nodes.len(), 2);
    }
}
