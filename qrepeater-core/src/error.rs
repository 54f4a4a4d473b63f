use thiserror::Error;

use crate::graph::NodeId;

pub type GraphResult<T> = Result<T, GraphError>;
pub type RouteResult<T> = Result<T, RouteError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Invalid construction or lookup against a [`crate::RepeaterGraph`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("grid needs at least one row and one column (rows={rows}, cols={cols})")]
    EmptyGrid { rows: usize, cols: usize },
    #[error("link success probability must lie in [0, 1], got {0}")]
    InvalidProbability(f64),
    #[error("decoherence budget must be at least one timestep")]
    InvalidDecoherence,
    #[error("link length must be positive and finite, got {0}")]
    InvalidLength(f64),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("self-loop on {0} cannot carry a link")]
    SelfLoop(NodeId),
    #[error("no link between {0} and {1} in the base graph")]
    UnknownLink(NodeId, NodeId),
    #[error("node sets differ: base graph has {base} nodes, subgraph has {subgraph}")]
    NodeSetMismatch { base: usize, subgraph: usize },
}

/// Fatal routing failures. Edge sharing is not an error, only disconnection is.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RouteError {
    #[error("a star route needs a center and at least one peer, got {0} users")]
    MissingPeers(usize),
    #[error("peer {peer} is unreachable from center {center} in the base graph")]
    Unreachable { center: NodeId, peer: NodeId },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("the protocol needs a center and at least one peer, got {0} users")]
    TooFewUsers(usize),
    #[error("timestep budget must be at least 1")]
    ZeroTimesteps,
    #[error("repetition count must be at least 1")]
    ZeroRepetitions,
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}
