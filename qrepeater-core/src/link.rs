//! Per-round link generation and the entangled view the swap step walks.

use rand::{Rng, RngCore};

use crate::graph::{EdgeId, RepeaterGraph};

/// Elementary link generation attempted once per protocol round.
///
/// Implementations must flip `entangled` on (with `age` reset to zero) for the
/// links they succeed on, leave every other link untouched, and return the ids
/// that were newly entangled.
pub trait LinkGenerator {
    /// Telemetry-friendly label.
    fn label(&self) -> &'static str;

    fn attempt_links(
        &mut self,
        graph: &mut RepeaterGraph,
        candidates: &[EdgeId],
        rng: &mut dyn RngCore,
    ) -> Vec<EdgeId>;
}

/// Each candidate succeeds independently with its own `p_edge`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BernoulliLinks;

impl LinkGenerator for BernoulliLinks {
    fn label(&self) -> &'static str {
        "bernoulli"
    }

    fn attempt_links(
        &mut self,
        graph: &mut RepeaterGraph,
        candidates: &[EdgeId],
        rng: &mut dyn RngCore,
    ) -> Vec<EdgeId> {
        let mut entangled = Vec::new();
        for &id in candidates {
            let Some(edge) = graph.edge_mut(id) else {
                continue;
            };
            if edge.entangled {
                continue;
            }
            if rng.gen_bool(edge.p_edge.clamp(0.0, 1.0)) {
                edge.entangled = true;
                edge.age = 0;
                entangled.push(id);
            }
        }
        entangled
    }
}

/// The links of a graph currently holding entanglement. Links consumed by a
/// swap are removed from the view for the rest of the round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntangledView {
    active: Vec<bool>,
    count: usize,
}

impl EntangledView {
    pub fn contains(&self, edge: EdgeId) -> bool {
        self.active.get(edge.index()).copied().unwrap_or(false)
    }

    pub fn remove(&mut self, edge: EdgeId) -> bool {
        match self.active.get_mut(edge.index()) {
            Some(slot) if *slot => {
                *slot = false;
                self.count -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, active)| **active)
            .map(|(idx, _)| EdgeId(idx))
    }
}

pub fn entangled_view(graph: &RepeaterGraph) -> EntangledView {
    let active: Vec<bool> = graph.edges().map(|(_, edge)| edge.entangled).collect();
    let count = active.iter().filter(|active| **active).count();
    EntangledView { active, count }
}
