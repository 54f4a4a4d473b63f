//! Quantum repeater grid model with edge-disjoint star routing and a
//! shortest-path entanglement swapping protocol.
//!
//! A [`RepeaterGraph`] is a rectangular grid of repeater stations joined by
//! elementary links that succeed with probability `p` each round and decohere
//! after `Qc` rounds. [`StarRouter`] carves a routing subgraph connecting one
//! center to its peers, and [`EntanglementEngine`] runs repeated attempts on
//! that subgraph until every peer shares a pair with the center or the round
//! budget runs out.

pub mod error;
pub mod graph;
pub mod link;
pub mod protocol;
pub mod router;
pub mod stats;
pub mod usage;

pub use error::{
    GraphError, GraphResult, ProtocolError, ProtocolResult, RouteError, RouteResult,
};
pub use graph::{EdgeId, EdgeState, GridCoord, LinkParams, NodeId, NodeState, Path, RepeaterGraph};
pub use link::{entangled_view, BernoulliLinks, EntangledView, LinkGenerator};
pub use protocol::{
    DecoherenceModel, EntanglementEngine, ProtocolConfig, ProtocolOutcome, ServeOutcome, UsedPath,
};
pub use router::{build_star, EdgeMask, RouteSummary, StarRoute, StarRouter};
pub use stats::{blocking_rate, entanglement_rate, mean_generation_time};
pub use usage::{fold_usage, normalize_usage};
