//! Shortest-path entanglement protocol over a star route.
//!
//! Every round the engine attempts elementary link generation on the links of
//! the route that are not yet entangled, then walks the entangled links from
//! the center toward each peer still waiting. A peer reachable through
//! entangled links receives an end-to-end pair by swapping at every
//! intermediate station, which consumes the elementary links of that path.
//! A repetition succeeds once every peer holds a pair with the center.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{ProtocolError, ProtocolResult};
use crate::graph::{EdgeId, NodeId, RepeaterGraph};
use crate::link::{entangled_view, BernoulliLinks, EntangledView, LinkGenerator};
use crate::router::{RouteSummary, StarRouter};
use crate::stats::entanglement_rate;
use crate::usage::{fold_usage, normalize_usage};

/// How the decoherence budget `Qc` is applied between rounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoherenceModel {
    /// Ages tick every round and entanglement older than `Qc` is dropped.
    #[default]
    Enforced,
    /// Ages tick but entanglement never expires.
    Informational,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProtocolConfig {
    #[serde(default = "default_timesteps")]
    pub timesteps: u32,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default)]
    pub decoherence: DecoherenceModel,
}

const fn default_timesteps() -> u32 {
    1_000
}

const fn default_repetitions() -> u32 {
    1
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timesteps: default_timesteps(),
            repetitions: default_repetitions(),
            decoherence: DecoherenceModel::default(),
        }
    }
}

impl ProtocolConfig {
    pub fn new(timesteps: u32, repetitions: u32) -> Self {
        Self {
            timesteps,
            repetitions,
            decoherence: DecoherenceModel::default(),
        }
    }

    pub fn with_decoherence(mut self, decoherence: DecoherenceModel) -> Self {
        self.decoherence = decoherence;
        self
    }

    pub fn validate(&self) -> ProtocolResult<()> {
        if self.timesteps == 0 {
            return Err(ProtocolError::ZeroTimesteps);
        }
        if self.repetitions == 0 {
            return Err(ProtocolError::ZeroRepetitions);
        }
        Ok(())
    }
}

/// One completed center-to-peer pair inside a repetition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedPath {
    /// Stations that performed a swap, in path order.
    pub swap_nodes: Vec<NodeId>,
    pub edge_count: usize,
    pub destination: NodeId,
    /// Round in which the pair was produced.
    pub round: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProtocolOutcome {
    /// Time-weighted entanglement rate over all repetitions.
    pub rate: f64,
    /// Round of success per repetition, `None` when the budget ran out.
    pub generation_times: Vec<Option<u32>>,
    /// Elementary links consumed by successful repetitions, averaged over all
    /// repetitions.
    pub avg_links_used: f64,
    pub used_paths: Vec<Vec<UsedPath>>,
}

impl ProtocolOutcome {
    pub fn successes(&self) -> usize {
        self.generation_times.iter().flatten().count()
    }

    pub fn succeeded(&self) -> bool {
        self.successes() > 0
    }

    pub fn success_ratio(&self) -> f64 {
        if self.generation_times.is_empty() {
            0.0
        } else {
            self.successes() as f64 / self.generation_times.len() as f64
        }
    }

    pub fn first_generation_time(&self) -> Option<u32> {
        self.generation_times.iter().flatten().next().copied()
    }

    /// Elementary links consumed by the repetitions that succeeded.
    pub fn links_consumed(&self) -> u64 {
        self.generation_times
            .iter()
            .zip(&self.used_paths)
            .filter(|(time, _)| time.is_some())
            .flat_map(|(_, paths)| paths)
            .map(|path| path.edge_count as u64)
            .sum()
    }
}

/// Result of routing and serving one request against the persistent grid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServeOutcome {
    pub route: RouteSummary,
    pub protocol: ProtocolOutcome,
}

pub struct EntanglementEngine<L = BernoulliLinks> {
    config: ProtocolConfig,
    links: L,
    router: StarRouter,
}

impl EntanglementEngine<BernoulliLinks> {
    pub fn new(config: ProtocolConfig) -> ProtocolResult<Self> {
        Self::with_links(config, BernoulliLinks)
    }
}

impl<L: LinkGenerator> EntanglementEngine<L> {
    /// Build an engine around a custom link generator.
    pub fn with_links(config: ProtocolConfig, links: L) -> ProtocolResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            links,
            router: StarRouter::new(),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn links(&self) -> &L {
        &self.links
    }

    /// Route `users` over `graph`, run the protocol on the resulting star and
    /// fold the star's usage back into `graph`.
    pub fn serve(
        &mut self,
        graph: &mut RepeaterGraph,
        users: &[NodeId],
        seed: u64,
    ) -> ProtocolResult<ServeOutcome> {
        let mut route = self.router.route(graph, users)?;
        let protocol = self.run(&mut route.subgraph, users, seed)?;
        fold_usage(graph, &route.subgraph)?;
        Ok(ServeOutcome {
            route: route.summary(),
            protocol,
        })
    }

    /// Run every configured repetition on `subgraph`. `users[0]` is the
    /// center. Each repetition draws from its own stream of `seed`, so a
    /// repetition's randomness does not depend on how long earlier ones ran.
    pub fn run(
        &mut self,
        subgraph: &mut RepeaterGraph,
        users: &[NodeId],
        seed: u64,
    ) -> ProtocolResult<ProtocolOutcome> {
        let (&center, peers) = match users.split_first() {
            Some((center, peers)) if !peers.is_empty() => (center, peers),
            _ => return Err(ProtocolError::TooFewUsers(users.len())),
        };
        for &user in users {
            subgraph.check_node(user)?;
        }

        let repetitions = self.config.repetitions as usize;
        let enforce = self.config.decoherence == DecoherenceModel::Enforced;
        let mut generation_times = vec![None; repetitions];
        let mut used_paths = Vec::with_capacity(repetitions);
        let mut candidates = Vec::with_capacity(subgraph.edge_count());

        subgraph.reset_usage();
        for (rep, generation_time) in generation_times.iter_mut().enumerate() {
            subgraph.reset_state();
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            rng.set_stream(rep as u64);
            let mut used = Vec::new();

            for round in 1..=self.config.timesteps {
                if round > 1 {
                    let expired = subgraph.age_entanglement(enforce);
                    if expired > 0 {
                        trace!(rep, round, expired, "entanglement decohered");
                    }
                }

                candidates.clear();
                candidates.extend(
                    subgraph
                        .edges()
                        .filter(|(_, edge)| !edge.entangled)
                        .map(|(id, _)| id),
                );
                self.links.attempt_links(subgraph, &candidates, &mut rng);

                let mut view = entangled_view(subgraph);
                swap_toward_peers(subgraph, &mut view, center, peers, round, &mut used);

                if all_entangled(subgraph, peers) {
                    *generation_time = Some(round);
                    break;
                }
            }

            debug!(
                rep,
                generation_time = ?*generation_time,
                pairs = used.len(),
                generator = self.links.label(),
                "repetition finished"
            );
            used_paths.push(used);
        }

        normalize_usage(subgraph, repetitions as u64);
        let mut outcome = ProtocolOutcome {
            rate: entanglement_rate(&generation_times, self.config.timesteps),
            avg_links_used: 0.0,
            generation_times,
            used_paths,
        };
        outcome.avg_links_used = outcome.links_consumed() as f64 / repetitions as f64;
        Ok(outcome)
    }
}

fn swap_toward_peers(
    subgraph: &mut RepeaterGraph,
    view: &mut EntangledView,
    center: NodeId,
    peers: &[NodeId],
    round: u32,
    used: &mut Vec<UsedPath>,
) {
    for &peer in peers {
        if is_entangled(subgraph, peer) {
            continue;
        }
        let Some(path) = subgraph.shortest_path(center, peer, |edge| view.contains(edge)) else {
            continue;
        };

        for &edge in &path.edges {
            view.remove(edge);
            consume(subgraph, edge);
        }
        for &station in path.interior() {
            if let Some(node) = subgraph.node_mut(station) {
                node.usage_count += 1;
            }
        }
        if let Some(node) = subgraph.node_mut(peer) {
            node.entangled = true;
            node.age = 0;
        }
        used.push(UsedPath {
            swap_nodes: path.interior().to_vec(),
            edge_count: path.hop_count(),
            destination: peer,
            round,
        });
    }
}

fn consume(subgraph: &mut RepeaterGraph, edge: EdgeId) {
    if let Some(state) = subgraph.edge_mut(edge) {
        state.entangled = false;
        state.age = 0;
        state.usage_count += 1;
    }
}

fn is_entangled(graph: &RepeaterGraph, node: NodeId) -> bool {
    graph.node(node).map_or(false, |state| state.entangled)
}

fn all_entangled(graph: &RepeaterGraph, peers: &[NodeId]) -> bool {
    peers.iter().all(|peer| is_entangled(graph, *peer))
}
