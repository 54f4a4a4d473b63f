//! Link and node usage accounting.
//!
//! A routing subgraph counts swaps per node and consumptions per link while the
//! protocol runs. Those counts are normalised by the repetition count and then
//! folded into the persistent grid, which keeps a running repetition total so
//! its fractions stay comparable across requests.

use crate::error::{GraphError, GraphResult};
use crate::graph::RepeaterGraph;

/// Convert counts into per-repetition fractions. Zero repetitions yields zero
/// fractions.
pub fn normalize_usage(graph: &mut RepeaterGraph, repetitions: u64) {
    graph.set_repetitions(repetitions);
    let scale = if repetitions == 0 {
        0.0
    } else {
        1.0 / repetitions as f64
    };
    for node in graph.nodes_mut() {
        node.usage_fraction = node.usage_count as f64 * scale;
    }
    for edge in graph.edges_mut() {
        edge.usage_fraction = edge.usage_count as f64 * scale;
    }
}

/// Add the counts gathered on `subgraph` into `graph` and re-normalise `graph`
/// against its accumulated repetition total.
pub fn fold_usage(graph: &mut RepeaterGraph, subgraph: &RepeaterGraph) -> GraphResult<()> {
    if graph.node_count() != subgraph.node_count() {
        return Err(GraphError::NodeSetMismatch {
            base: graph.node_count(),
            subgraph: subgraph.node_count(),
        });
    }

    let mut link_counts = Vec::with_capacity(subgraph.edge_count());
    for (_, edge) in subgraph.edges() {
        let (u, v) = edge.endpoints;
        let base = graph
            .edge_between(u, v)
            .ok_or(GraphError::UnknownLink(u, v))?;
        link_counts.push((base, edge.usage_count));
    }

    for ((_, source), target) in subgraph.nodes().zip(graph.nodes_mut().iter_mut()) {
        target.usage_count = target.usage_count.saturating_add(source.usage_count);
    }
    for (base, count) in link_counts {
        if let Some(edge) = graph.edge_mut(base) {
            edge.usage_count = edge.usage_count.saturating_add(count);
        }
    }

    let total = graph.repetitions().saturating_add(subgraph.repetitions());
    normalize_usage(graph, total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LinkParams, NodeId};
    use crate::router::build_star;

    #[test]
    fn fractions_follow_repetitions() {
        let mut graph = RepeaterGraph::create(1, 3, LinkParams::new(0.5, 2)).unwrap();
        graph.node_mut(NodeId(1)).unwrap().usage_count = 3;
        normalize_usage(&mut graph, 4);
        assert_eq!(graph.node(NodeId(1)).unwrap().usage_fraction, 0.75);
        normalize_usage(&mut graph, 0);
        assert_eq!(graph.node(NodeId(1)).unwrap().usage_fraction, 0.0);
    }

    #[test]
    fn folding_accumulates_across_subgraphs() {
        let mut graph = RepeaterGraph::create(1, 3, LinkParams::new(0.5, 2)).unwrap();
        let users = [NodeId(0), NodeId(2)];

        for swaps in [2_u64, 4] {
            let mut route = build_star(&graph, &users).unwrap();
            route.subgraph.node_mut(NodeId(1)).unwrap().usage_count = swaps;
            for id in route.subgraph.edges().map(|(id, _)| id).collect::<Vec<_>>() {
                route.subgraph.edge_mut(id).unwrap().usage_count = swaps;
            }
            normalize_usage(&mut route.subgraph, 4);
            fold_usage(&mut graph, &route.subgraph).unwrap();
        }

        assert_eq!(graph.repetitions(), 8);
        let relay = graph.node(NodeId(1)).unwrap();
        assert_eq!(relay.usage_count, 6);
        assert_eq!(relay.usage_fraction, 0.75);
        assert!(graph
            .edges()
            .all(|(_, edge)| edge.usage_count == 6 && edge.usage_fraction == 0.75));
    }

    #[test]
    fn folding_rejects_foreign_subgraphs() {
        let mut graph = RepeaterGraph::create(2, 2, LinkParams::new(0.5, 2)).unwrap();
        let other = RepeaterGraph::create(3, 3, LinkParams::new(0.5, 2)).unwrap();
        assert!(matches!(
            fold_usage(&mut graph, &other),
            Err(GraphError::NodeSetMismatch { .. })
        ));
    }
}
