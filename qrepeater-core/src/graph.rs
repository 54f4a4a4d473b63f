//! Attributed repeater graph.
//!
//! Nodes are repeater stations and edges are physical links. Attributes live in
//! fixed-layout records addressed by [`NodeId`] / [`EdgeId`], and links can also
//! be resolved by their endpoint pair through a normalized index. The same type
//! backs both the persistent grid and the ephemeral routing subgraphs carved
//! out of it, so entanglement bookkeeping is written once.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};

/// Index of a repeater station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Index of a physical link inside one graph. Ids are not portable between a
/// base graph and its routing subgraphs; resolve by endpoints instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub usize);

impl EdgeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoord {
    pub row: usize,
    pub col: usize,
}

/// Channel parameters stamped onto every link (and the decoherence budget onto
/// every node) of a freshly built grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Per-attempt entanglement success probability.
    pub p_edge: f64,
    /// Decoherence budget in timesteps.
    pub qc: u32,
    /// Physical link length in kilometres.
    pub length: f64,
}

impl LinkParams {
    pub fn new(p_edge: f64, qc: u32) -> Self {
        Self {
            p_edge,
            qc,
            length: 1.0,
        }
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = length;
        self
    }

    pub fn validate(&self) -> GraphResult<()> {
        validate_probability(self.p_edge)?;
        validate_qc(self.qc)?;
        if !(self.length.is_finite() && self.length > 0.0) {
            return Err(GraphError::InvalidLength(self.length));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub coord: GridCoord,
    pub entangled: bool,
    /// Timesteps since the node last (re)acquired entanglement.
    pub age: u32,
    /// Entanglement swaps performed at this node.
    pub usage_count: u64,
    pub usage_fraction: f64,
    pub qc: u32,
}

impl NodeState {
    fn fresh(coord: GridCoord, qc: u32) -> Self {
        Self {
            coord,
            entangled: false,
            age: 0,
            usage_count: 0,
            usage_fraction: 0.0,
            qc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeState {
    pub endpoints: (NodeId, NodeId),
    pub entangled: bool,
    pub age: u32,
    pub length: f64,
    pub p_edge: f64,
    pub qc: u32,
    /// Times this link was consumed by a swap.
    pub usage_count: u64,
    pub usage_fraction: f64,
}

impl EdgeState {
    /// The endpoint opposite `node`.
    pub fn opposite(&self, node: NodeId) -> NodeId {
        if self.endpoints.0 == node {
            self.endpoints.1
        } else {
            self.endpoints.0
        }
    }
}

/// A walk through the graph: `nodes[i]` and `nodes[i + 1]` are joined by
/// `edges[i]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
}

impl Path {
    pub fn hop_count(&self) -> usize {
        self.edges.len()
    }

    pub fn destination(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    /// Nodes strictly between the two ends, i.e. the swap stations.
    pub fn interior(&self) -> &[NodeId] {
        if self.nodes.len() < 2 {
            &[]
        } else {
            &self.nodes[1..self.nodes.len() - 1]
        }
    }
}

#[derive(Clone, Debug)]
pub struct RepeaterGraph {
    rows: usize,
    cols: usize,
    nodes: Vec<NodeState>,
    edges: Vec<EdgeState>,
    adjacency: Vec<Vec<(NodeId, EdgeId)>>,
    index: HashMap<(NodeId, NodeId), EdgeId>,
    /// Repetitions already folded into the usage counters.
    repetitions: u64,
}

impl RepeaterGraph {
    /// Build a `rows x cols` grid with every link and node carrying `params`.
    /// Node ids are assigned row-major.
    pub fn create(rows: usize, cols: usize, params: LinkParams) -> GraphResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(GraphError::EmptyGrid { rows, cols });
        }
        params.validate()?;

        let nodes = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| GridCoord { row, col }))
            .map(|coord| NodeState::fresh(coord, params.qc))
            .collect::<Vec<_>>();
        let mut graph = Self {
            rows,
            cols,
            adjacency: vec![Vec::new(); nodes.len()],
            nodes,
            edges: Vec::with_capacity(2 * rows * cols),
            index: HashMap::with_capacity(2 * rows * cols),
            repetitions: 0,
        };

        for row in 0..rows {
            for col in 0..cols {
                let here = NodeId(row * cols + col);
                if col + 1 < cols {
                    graph.insert_link(here, NodeId(here.0 + 1), &params);
                }
                if row + 1 < rows {
                    graph.insert_link(here, NodeId(here.0 + cols), &params);
                }
            }
        }
        Ok(graph)
    }

    /// Same node set and node attributes, no links, clean state and usage.
    pub fn detached(&self) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeState::fresh(node.coord, node.qc))
                .collect(),
            edges: Vec::new(),
            adjacency: vec![Vec::new(); self.nodes.len()],
            index: HashMap::new(),
            repetitions: 0,
        }
    }

    /// Add a link between `u` and `v` copying the channel attributes of
    /// `template`. Adding an existing link returns its id unchanged.
    pub fn add_link(&mut self, u: NodeId, v: NodeId, template: &EdgeState) -> GraphResult<EdgeId> {
        self.check_node(u)?;
        self.check_node(v)?;
        if u == v {
            return Err(GraphError::SelfLoop(u));
        }
        if let Some(existing) = self.edge_between(u, v) {
            return Ok(existing);
        }
        let params = LinkParams {
            p_edge: template.p_edge,
            qc: template.qc,
            length: template.length,
        };
        Ok(self.insert_link(u, v, &params))
    }

    fn insert_link(&mut self, u: NodeId, v: NodeId, params: &LinkParams) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(EdgeState {
            endpoints: (u, v),
            entangled: false,
            age: 0,
            length: params.length,
            p_edge: params.p_edge,
            qc: params.qc,
            usage_count: 0,
            usage_fraction: 0.0,
        });
        self.adjacency[u.0].push((v, id));
        self.adjacency[v.0].push((u, id));
        self.index.insert(normalize(u, v), id);
        id
    }

    /// Clear entanglement flags and ages on every node and link. Usage
    /// counters are untouched.
    pub fn reset_state(&mut self) {
        for node in &mut self.nodes {
            node.entangled = false;
            node.age = 0;
        }
        for edge in &mut self.edges {
            edge.entangled = false;
            edge.age = 0;
        }
    }

    pub fn reset_usage(&mut self) {
        for node in &mut self.nodes {
            node.usage_count = 0;
            node.usage_fraction = 0.0;
        }
        for edge in &mut self.edges {
            edge.usage_count = 0;
            edge.usage_fraction = 0.0;
        }
        self.repetitions = 0;
    }

    /// Re-stamp the success probability and/or decoherence budget on an
    /// existing graph.
    pub fn update_params(&mut self, p_edge: Option<f64>, qc: Option<u32>) -> GraphResult<()> {
        if let Some(p) = p_edge {
            validate_probability(p)?;
        }
        if let Some(qc) = qc {
            validate_qc(qc)?;
        }
        for edge in &mut self.edges {
            if let Some(p) = p_edge {
                edge.p_edge = p;
            }
            if let Some(qc) = qc {
                edge.qc = qc;
            }
        }
        if let Some(qc) = qc {
            for node in &mut self.nodes {
                node.qc = qc;
            }
        }
        Ok(())
    }

    /// Advance the age of every entangled node and link by one timestep.
    /// With `invalidate` set, anything older than its budget loses its
    /// entanglement. Returns the number of invalidated nodes and links.
    pub fn age_entanglement(&mut self, invalidate: bool) -> usize {
        let mut expired = 0;
        for edge in self.edges.iter_mut().filter(|edge| edge.entangled) {
            edge.age = edge.age.saturating_add(1);
            if invalidate && edge.age > edge.qc {
                edge.entangled = false;
                edge.age = 0;
                expired += 1;
            }
        }
        for node in self.nodes.iter_mut().filter(|node| node.entangled) {
            node.age = node.age.saturating_add(1);
            if invalidate && node.age > node.qc {
                node.entangled = false;
                node.age = 0;
                expired += 1;
            }
        }
        expired
    }

    /// Mark `nodes` as entangled and freshly aged (held by a request).
    pub fn reserve(&mut self, nodes: &[NodeId]) -> GraphResult<()> {
        self.set_entangled(nodes, true)
    }

    /// Return `nodes` to the free pool.
    pub fn release(&mut self, nodes: &[NodeId]) -> GraphResult<()> {
        self.set_entangled(nodes, false)
    }

    fn set_entangled(&mut self, nodes: &[NodeId], entangled: bool) -> GraphResult<()> {
        for &id in nodes {
            self.check_node(id)?;
        }
        for &id in nodes {
            let node = &mut self.nodes[id.0];
            node.entangled = entangled;
            node.age = 0;
        }
        Ok(())
    }

    /// BFS hop-count shortest path from `from` to `to`, only crossing links
    /// accepted by `admit`. Ties go to the neighbour discovered first.
    pub fn shortest_path<F>(&self, from: NodeId, to: NodeId, mut admit: F) -> Option<Path>
    where
        F: FnMut(EdgeId) -> bool,
    {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(Path {
                nodes: vec![from],
                edges: Vec::new(),
            });
        }

        let mut parent: Vec<Option<(NodeId, EdgeId)>> = vec![None; self.nodes.len()];
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        seen[from.0] = true;
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for &(next, edge) in &self.adjacency[current.0] {
                if seen[next.0] || !admit(edge) {
                    continue;
                }
                seen[next.0] = true;
                parent[next.0] = Some((current, edge));
                if next == to {
                    return Some(self.unwind(&parent, from, to));
                }
                queue.push_back(next);
            }
        }
        None
    }

    fn unwind(&self, parent: &[Option<(NodeId, EdgeId)>], from: NodeId, to: NodeId) -> Path {
        let mut nodes = vec![to];
        let mut edges = Vec::new();
        let mut cursor = to;
        while cursor != from {
            match parent[cursor.0] {
                Some((prev, edge)) => {
                    edges.push(edge);
                    nodes.push(prev);
                    cursor = prev;
                }
                None => break,
            }
        }
        nodes.reverse();
        edges.reverse();
        Path { nodes, edges }
    }

    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        self.shortest_path(from, to, |_| true).is_some()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    pub fn check_node(&self, node: NodeId) -> GraphResult<()> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(node))
        }
    }

    pub fn node_at(&self, row: usize, col: usize) -> Option<NodeId> {
        (row < self.rows && col < self.cols).then(|| NodeId(row * self.cols + col))
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeState> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeState> {
        self.nodes.get_mut(id.0)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&EdgeState> {
        self.edges.get(id.0)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut EdgeState> {
        self.edges.get_mut(id.0)
    }

    pub fn edge_between(&self, u: NodeId, v: NodeId) -> Option<EdgeId> {
        self.index.get(&normalize(u, v)).copied()
    }

    pub fn link(&self, u: NodeId, v: NodeId) -> Option<&EdgeState> {
        self.edge_between(u, v).and_then(|id| self.edges.get(id.0))
    }

    pub fn link_mut(&mut self, u: NodeId, v: NodeId) -> Option<&mut EdgeState> {
        let id = self.edge_between(u, v)?;
        self.edges.get_mut(id.0)
    }

    pub fn neighbors(&self, id: NodeId) -> &[(NodeId, EdgeId)] {
        self.adjacency.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeState)> + '_ {
        self.nodes.iter().enumerate().map(|(idx, node)| (NodeId(idx), node))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &EdgeState)> + '_ {
        self.edges.iter().enumerate().map(|(idx, edge)| (EdgeId(idx), edge))
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [NodeState] {
        &mut self.nodes
    }

    pub(crate) fn edges_mut(&mut self) -> &mut [EdgeState] {
        &mut self.edges
    }

    pub fn repetitions(&self) -> u64 {
        self.repetitions
    }

    pub(crate) fn set_repetitions(&mut self, repetitions: u64) {
        self.repetitions = repetitions;
    }
}

fn normalize(u: NodeId, v: NodeId) -> (NodeId, NodeId) {
    if u <= v {
        (u, v)
    } else {
        (v, u)
    }
}

fn validate_probability(p: f64) -> GraphResult<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(GraphError::InvalidProbability(p))
    }
}

fn validate_qc(qc: u32) -> GraphResult<()> {
    if qc == 0 {
        Err(GraphError::InvalidDecoherence)
    } else {
        Ok(())
    }
}
