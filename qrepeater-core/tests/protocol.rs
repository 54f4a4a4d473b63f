use qrepeater_core::{
    build_star, entanglement_rate, DecoherenceModel, EntanglementEngine, LinkParams, NodeId,
    ProtocolConfig, RepeaterGraph, RouteError,
};

fn grid(rows: usize, cols: usize, p: f64, qc: u32) -> RepeaterGraph {
    RepeaterGraph::create(rows, cols, LinkParams::new(p, qc)).unwrap()
}

#[test]
fn adjacent_peers_entangle_in_one_round_with_certain_links() {
    let mut graph = grid(3, 3, 1.0, 10_000);
    let center = graph.node_at(1, 1).unwrap();
    let users = vec![center, graph.node_at(0, 1).unwrap(), graph.node_at(2, 1).unwrap()];
    let mut engine = EntanglementEngine::new(ProtocolConfig::new(1, 1)).unwrap();
    let outcome = engine.serve(&mut graph, &users, 42).unwrap();
    assert!(outcome.route.edge_disjoint);
    assert_eq!(outcome.protocol.generation_times, vec![Some(1)]);
    assert_eq!(outcome.protocol.rate, 1.0);
}

#[test]
fn dead_links_never_entangle_regardless_of_budget() {
    for timesteps in [1, 10, 200] {
        let mut graph = grid(3, 3, 0.0, 5);
        let users: Vec<NodeId> = [(0, 0), (2, 2), (0, 2)]
            .into_iter()
            .map(|(r, c)| graph.node_at(r, c).unwrap())
            .collect();
        let mut engine = EntanglementEngine::new(ProtocolConfig::new(timesteps, 4)).unwrap();
        let outcome = engine.serve(&mut graph, &users, 1).unwrap();
        assert!(!outcome.protocol.succeeded());
        assert_eq!(outcome.protocol.rate, 0.0);
        assert!(graph.edges().all(|(_, edge)| edge.usage_count == 0));
    }
}

#[test]
fn success_ratio_grows_with_budget_under_decoherence() {
    let graph = grid(4, 4, 0.2, 3);
    let users: Vec<NodeId> = [(1, 1), (0, 3), (3, 0), (3, 3)]
        .into_iter()
        .map(|(r, c)| graph.node_at(r, c).unwrap())
        .collect();
    let mut last = 0.0;
    for timesteps in [1, 3, 8, 20, 60, 150] {
        let mut route = build_star(&graph, &users).unwrap();
        let mut engine = EntanglementEngine::new(
            ProtocolConfig::new(timesteps, 12).with_decoherence(DecoherenceModel::Enforced),
        )
        .unwrap();
        let outcome = engine.run(&mut route.subgraph, &users, 2024).unwrap();
        assert!(outcome.success_ratio() >= last);
        assert_eq!(
            outcome.rate,
            entanglement_rate(&outcome.generation_times, timesteps)
        );
        last = outcome.success_ratio();
    }
}

#[test]
fn repeated_serving_accumulates_usage_on_the_grid() {
    let mut graph = grid(2, 3, 1.0, 100);
    let users = vec![graph.node_at(0, 0).unwrap(), graph.node_at(1, 2).unwrap()];
    let mut engine = EntanglementEngine::new(ProtocolConfig::new(3, 2)).unwrap();
    engine.serve(&mut graph, &users, 1).unwrap();
    engine.serve(&mut graph, &users, 2).unwrap();
    assert_eq!(graph.repetitions(), 4);
    let relays: u64 = graph.nodes().map(|(_, node)| node.usage_count).sum();
    // Every repetition swaps at both interior stations of the 3-hop path.
    assert_eq!(relays, 8);
    for (_, node) in graph.nodes() {
        assert!(node.usage_fraction <= 1.0);
    }
}

#[test]
fn disconnected_peer_is_a_routing_error() {
    let graph = grid(2, 2, 0.5, 4);
    let isolated = graph.detached();
    let err = build_star(&isolated, &[NodeId(0), NodeId(3)]).unwrap_err();
    assert_eq!(
        err,
        RouteError::Unreachable {
            center: NodeId(0),
            peer: NodeId(3)
        }
    );
}
