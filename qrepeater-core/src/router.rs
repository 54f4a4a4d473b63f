//! Star routing: connect a designated center to every peer with shortest
//! paths that avoid reusing links where the topology allows it.
//!
//! Peers are routed in list order over a working view of the base graph from
//! which every used link is masked out. When a peer can no longer be reached
//! through the remaining links the router falls back to a shortest path in the
//! full base graph and shares links with earlier peers. Once a peer has been
//! routed that way the disjointness of later peers is not restored; the route
//! degrades gracefully instead of solving an exact Steiner tree.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{RouteError, RouteResult};
use crate::graph::{EdgeId, NodeId, Path, RepeaterGraph};

/// Removable-edge overlay over a graph's link arena. Removal is O(1), and all
/// removals are undone at once by bumping the generation.
#[derive(Clone, Debug)]
pub struct EdgeMask {
    stamps: Vec<u32>,
    generation: u32,
}

impl EdgeMask {
    pub fn new(edge_count: usize) -> Self {
        Self {
            stamps: vec![0; edge_count],
            generation: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn remove(&mut self, edge: EdgeId) {
        if let Some(stamp) = self.stamps.get_mut(edge.index()) {
            *stamp = self.generation;
        }
    }

    pub fn is_removed(&self, edge: EdgeId) -> bool {
        self.stamps
            .get(edge.index())
            .map_or(false, |stamp| *stamp == self.generation)
    }

    pub fn restore_all(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.stamps.fill(0);
            self.generation = 1;
        }
    }
}

/// Routing subgraph for one request.
#[derive(Clone, Debug)]
pub struct StarRoute {
    pub center: NodeId,
    pub peers: Vec<NodeId>,
    /// Same node set as the base graph, carrying only the selected links with
    /// their attributes copied over.
    pub subgraph: RepeaterGraph,
    /// One path per peer, in peer order, expressed in base-graph ids.
    pub paths: Vec<Path>,
    /// Whether every peer was routed without sharing a link.
    pub edge_disjoint: bool,
}

impl StarRoute {
    /// Center followed by the peers, the layout the protocol engine expects.
    pub fn users(&self) -> Vec<NodeId> {
        let mut users = Vec::with_capacity(self.peers.len() + 1);
        users.push(self.center);
        users.extend_from_slice(&self.peers);
        users
    }

    pub fn link_count(&self) -> usize {
        self.subgraph.edge_count()
    }

    pub fn summary(&self) -> RouteSummary {
        RouteSummary {
            center: self.center,
            peers: self.peers.clone(),
            links: self.link_count(),
            path_hops: self.paths.iter().map(Path::hop_count).collect(),
            edge_disjoint: self.edge_disjoint,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub center: NodeId,
    pub peers: Vec<NodeId>,
    pub links: usize,
    pub path_hops: Vec<usize>,
    pub edge_disjoint: bool,
}

/// Reusable star builder. Keeps its edge mask between requests so repeated
/// routing over the same base graph does not reallocate.
#[derive(Clone, Debug, Default)]
pub struct StarRouter {
    mask: Option<EdgeMask>,
}

impl StarRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `users[0]` (the center) to every other entry of `users`.
    pub fn route(&mut self, graph: &RepeaterGraph, users: &[NodeId]) -> RouteResult<StarRoute> {
        let (&center, peers) = match users.split_first() {
            Some((center, peers)) if !peers.is_empty() => (center, peers),
            _ => return Err(RouteError::MissingPeers(users.len())),
        };
        for &user in users {
            graph.check_node(user)?;
        }

        let mask = self
            .mask
            .get_or_insert_with(|| EdgeMask::new(graph.edge_count()));
        if mask.len() == graph.edge_count() {
            mask.restore_all();
        } else {
            *mask = EdgeMask::new(graph.edge_count());
        }

        let mut subgraph = graph.detached();
        let mut paths = Vec::with_capacity(peers.len());
        let mut edge_disjoint = true;

        for &peer in peers {
            let path = match graph.shortest_path(center, peer, |edge| !mask.is_removed(edge)) {
                Some(path) => path,
                None => {
                    let path = graph
                        .shortest_path(center, peer, |_| true)
                        .ok_or(RouteError::Unreachable { center, peer })?;
                    if edge_disjoint {
                        warn!(
                            %center,
                            %peer,
                            hops = path.hop_count(),
                            "no disjoint path left, sharing links"
                        );
                    }
                    edge_disjoint = false;
                    path
                }
            };

            for &edge in &path.edges {
                mask.remove(edge);
                if let Some(state) = graph.edge(edge) {
                    let (u, v) = state.endpoints;
                    subgraph.add_link(u, v, state)?;
                }
            }
            paths.push(path);
        }

        debug!(
            %center,
            peers = peers.len(),
            links = subgraph.edge_count(),
            edge_disjoint,
            "star route built"
        );

        Ok(StarRoute {
            center,
            peers: peers.to_vec(),
            subgraph,
            paths,
            edge_disjoint,
        })
    }
}

/// One-shot convenience over [`StarRouter::route`].
pub fn build_star(graph: &RepeaterGraph, users: &[NodeId]) -> RouteResult<StarRoute> {
    StarRouter::new().route(graph, users)
}
