//! Discrete-event request scheduler.
//!
//! Arrivals follow a Poisson process and each one draws a center plus a few
//! distinct peers. A request is admitted only when none of its nodes is held by
//! an active request and the concurrency bound has room; admitted requests run
//! the entanglement protocol on a fresh star route and, on success, hold their
//! nodes until an exponentially distributed departure. Departures due at or
//! before the next arrival are always drained first.
//!
//! # Example
//! ```
//! use qrepeater_sim::config::Config;
//! use qrepeater_sim::scheduler::Simulation;
//! use qrepeater_telemetry::TelemetryHandle;
//!
//! let mut cfg = Config::sample();
//! cfg.traffic.total_arrivals = 20;
//! let telemetry = TelemetryHandle::from_config(cfg.telemetry.clone());
//! let mut sim = Simulation::new(&cfg, telemetry).unwrap();
//! let report = sim.run().unwrap();
//! assert_eq!(report.total_requests, 20);
//! assert!((0.0..=1.0).contains(&report.blocking_rate));
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use qrepeater_core::{
    blocking_rate, entanglement_rate, mean_generation_time, EntanglementEngine, GraphError,
    NodeId, ProtocolError, RepeaterGraph,
};
use qrepeater_telemetry::{TelemetryError, TelemetryHandle};
use rand::{seq::index, Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Exp};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AdmissionSection, Config, ConfigError, TrafficSection};
use crate::report::{BlockedCounts, SimulationReport};

pub type SimResult<T> = Result<T, SimError>;

/// Fatal run errors. Blocking is never an error.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(
        "t={time:.3}: request for {peers} peers plus a center needs {needed} distinct nodes, \
         the grid has {available}"
    )]
    InsufficientNodes {
        time: f64,
        peers: usize,
        needed: usize,
        available: usize,
    },
    #[error("t={time:.3}: malformed request {center} -> {peers:?}: {reason}")]
    MalformedRequest {
        time: f64,
        center: NodeId,
        peers: Vec<NodeId>,
        reason: String,
    },
    #[error("t={time:.3}: request {center} -> {peers:?} could not be served: {source}")]
    Routing {
        time: f64,
        center: NodeId,
        peers: Vec<NodeId>,
        #[source]
        source: ProtocolError,
    },
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntanglementRequest {
    pub id: u64,
    pub center: NodeId,
    pub peers: Vec<NodeId>,
    pub arrival: f64,
    /// Set once the request is admitted and entangled.
    pub departure: Option<f64>,
    pub success: bool,
}

impl EntanglementRequest {
    /// Center first, then peers.
    pub fn users(&self) -> Vec<NodeId> {
        let mut users = Vec::with_capacity(self.peers.len() + 1);
        users.push(self.center);
        users.extend_from_slice(&self.peers);
        users
    }

    fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.center).chain(self.peers.iter().copied())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    NodeContention,
    ConcurrencyLimit,
    ProtocolTimeout,
}

impl BlockReason {
    pub fn metric(self) -> &'static str {
        match self {
            BlockReason::NodeContention => "requests.blocked.contention",
            BlockReason::ConcurrencyLimit => "requests.blocked.concurrency",
            BlockReason::ProtocolTimeout => "requests.blocked.timeout",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Admission {
    Admitted {
        departure: f64,
        generation_time: u32,
        links_used: u64,
    },
    Blocked(BlockReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// What a single [`Simulation::step`] did.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum SimEvent {
    Arrival {
        request: EntanglementRequest,
        admission: Admission,
    },
    Departure {
        time: f64,
        request: EntanglementRequest,
    },
    /// The arrival budget is spent; further steps do nothing.
    Finished,
}

#[derive(Clone, Copy, Debug)]
struct PendingDeparture {
    time: f64,
    request: u64,
}

impl Ord for PendingDeparture {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap by departure time, then by request id.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.request.cmp(&self.request))
    }
}

impl PartialOrd for PendingDeparture {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingDeparture {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingDeparture {}

#[derive(Default)]
struct Counters {
    arrivals: u64,
    successful: u64,
    blocked: BlockedCounts,
    departures: u64,
    links_consumed: u64,
}

pub struct Simulation {
    traffic: TrafficSection,
    admission: AdmissionSection,
    graph: RepeaterGraph,
    engine: EntanglementEngine,
    rng: ChaCha20Rng,
    interarrival: Exp<f64>,
    service: Exp<f64>,
    clock: f64,
    next_arrival: f64,
    departures: BinaryHeap<PendingDeparture>,
    active: BTreeMap<u64, EntanglementRequest>,
    held: HashMap<NodeId, u64>,
    next_request: u64,
    protocol_times: Vec<Option<u32>>,
    timesteps: u32,
    counters: Counters,
    telemetry: TelemetryHandle,
}

impl Simulation {
    pub fn new(config: &Config, telemetry: TelemetryHandle) -> SimResult<Self> {
        config.validate()?;
        let graph = RepeaterGraph::create(
            config.network.rows,
            config.network.cols,
            config.network.link_params(),
        )?;
        let engine = EntanglementEngine::new(config.protocol.clone())
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        let interarrival = exponential("mean-interarrival", config.traffic.mean_interarrival)?;
        let service = exponential("mean-service", config.traffic.mean_service)?;

        let mut rng = ChaCha20Rng::seed_from_u64(config.run.seed);
        let next_arrival = interarrival.sample(&mut rng);

        Ok(Self {
            traffic: config.traffic.clone(),
            admission: config.admission.clone(),
            graph,
            engine,
            rng,
            interarrival,
            service,
            clock: 0.0,
            next_arrival,
            departures: BinaryHeap::new(),
            active: BTreeMap::new(),
            held: HashMap::new(),
            next_request: 0,
            protocol_times: Vec::new(),
            timesteps: config.protocol.timesteps,
            counters: Counters::default(),
            telemetry,
        })
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn next_arrival(&self) -> f64 {
        self.next_arrival
    }

    pub fn graph(&self) -> &RepeaterGraph {
        &self.graph
    }

    pub fn telemetry(&self) -> &TelemetryHandle {
        &self.telemetry
    }

    pub fn arrivals_processed(&self) -> u64 {
        self.counters.arrivals
    }

    pub fn is_finished(&self) -> bool {
        self.counters.arrivals >= self.traffic.total_arrivals
    }

    pub fn active_requests(&self) -> impl Iterator<Item = &EntanglementRequest> + '_ {
        self.active.values()
    }

    /// Nodes currently held by active requests.
    pub fn held_nodes(&self) -> usize {
        self.held.len()
    }

    /// Run until the arrival budget is spent. Departures still pending at
    /// that point are left unprocessed.
    pub fn run(&mut self) -> SimResult<SimulationReport> {
        info!(
            arrivals = self.traffic.total_arrivals,
            rows = self.graph.rows(),
            cols = self.graph.cols(),
            max_concurrent = self.admission.max_concurrent,
            "simulation started"
        );
        while self.step()? != SimEvent::Finished {}
        let report = self.report();
        info!(
            total = report.total_requests,
            successful = report.successful_requests,
            blocking_rate = report.blocking_rate,
            end_time = report.end_time,
            "simulation finished"
        );
        Ok(report)
    }

    /// Process exactly one event: the earliest departure if it is due no later
    /// than the next arrival, otherwise the next arrival.
    pub fn step(&mut self) -> SimResult<SimEvent> {
        if self.is_finished() {
            return Ok(SimEvent::Finished);
        }

        let due = match self.departures.peek() {
            Some(pending) if pending.time <= self.next_arrival => Some(*pending),
            _ => None,
        };
        if let Some(pending) = due {
            self.departures.pop();
            return self.depart(pending);
        }

        self.clock = self.next_arrival;
        self.next_arrival += self.interarrival.sample(&mut self.rng);
        let (center, peers) = self.draw_users()?;
        let (request, admission) = self.admit(center, peers)?;
        Ok(SimEvent::Arrival { request, admission })
    }

    /// Run admission for a caller-chosen request at the current clock. The
    /// request counts as one arrival.
    pub fn submit(&mut self, center: NodeId, peers: Vec<NodeId>) -> SimResult<Admission> {
        let (_, admission) = self.admit(center, peers)?;
        Ok(admission)
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            total_requests: self.counters.arrivals,
            successful_requests: self.counters.successful,
            blocking_rate: blocking_rate(self.counters.arrivals, self.counters.successful),
            blocked: self.counters.blocked,
            departures: self.counters.departures,
            still_active: self.active.len(),
            end_time: self.clock,
            mean_generation_time: mean_generation_time(&self.protocol_times),
            entanglement_rate: entanglement_rate(&self.protocol_times, self.timesteps),
            links_consumed: self.counters.links_consumed,
        }
    }

    fn draw_users(&mut self) -> SimResult<(NodeId, Vec<NodeId>)> {
        let peer_count = self
            .rng
            .gen_range(self.traffic.min_peers..=self.traffic.max_peers);
        let available = self.graph.node_count();
        if peer_count + 1 > available {
            return Err(SimError::InsufficientNodes {
                time: self.clock,
                peers: peer_count,
                needed: peer_count + 1,
                available,
            });
        }

        let center = self.rng.gen_range(0..available);
        let peers = index::sample(&mut self.rng, available - 1, peer_count)
            .into_iter()
            .map(|idx| NodeId(if idx >= center { idx + 1 } else { idx }))
            .collect();
        Ok((NodeId(center), peers))
    }

    fn admit(
        &mut self,
        center: NodeId,
        peers: Vec<NodeId>,
    ) -> SimResult<(EntanglementRequest, Admission)> {
        let mut request = EntanglementRequest {
            id: self.next_request,
            center,
            peers,
            arrival: self.clock,
            departure: None,
            success: false,
        };
        self.check_request(&request)?;
        self.next_request += 1;
        self.counters.arrivals += 1;
        self.telemetry.record_counter("requests.arrived", 1)?;

        let admission = match self.precheck(&request) {
            Some(reason) => Admission::Blocked(reason),
            None => self.serve(&mut request)?,
        };

        match &admission {
            Admission::Blocked(reason) => {
                match reason {
                    BlockReason::NodeContention => self.counters.blocked.contention += 1,
                    BlockReason::ConcurrencyLimit => self.counters.blocked.concurrency += 1,
                    BlockReason::ProtocolTimeout => self.counters.blocked.timeout += 1,
                }
                self.telemetry.record_counter(reason.metric(), 1)?;
            }
            Admission::Admitted { .. } => self.counters.successful += 1,
        }
        debug!(
            id = request.id,
            time = self.clock,
            center = %request.center,
            peers = ?request.peers,
            ?admission,
            "arrival processed"
        );
        Ok((request, admission))
    }

    fn precheck(&self, request: &EntanglementRequest) -> Option<BlockReason> {
        if request.nodes().any(|node| self.held.contains_key(&node)) {
            Some(BlockReason::NodeContention)
        } else if self.active.len() >= self.admission.max_concurrent {
            Some(BlockReason::ConcurrencyLimit)
        } else {
            None
        }
    }

    fn serve(&mut self, request: &mut EntanglementRequest) -> SimResult<Admission> {
        self.telemetry.record_counter("requests.admitted", 1)?;
        let seed = self.rng.gen::<u64>();
        let users = request.users();
        let outcome = self
            .engine
            .serve(&mut self.graph, &users, seed)
            .map_err(|source| SimError::Routing {
                time: self.clock,
                center: request.center,
                peers: request.peers.clone(),
                source,
            })?;

        let generation_time = outcome.protocol.first_generation_time();
        self.protocol_times.push(generation_time);
        let Some(generation_time) = generation_time else {
            return Ok(Admission::Blocked(BlockReason::ProtocolTimeout));
        };

        let links_used = outcome.protocol.links_consumed();
        self.counters.links_consumed += links_used;
        self.telemetry
            .record_sample("protocol.generation_time", u64::from(generation_time));
        self.telemetry.record_sample("protocol.links_used", links_used);

        let departure = self.clock + self.service.sample(&mut self.rng);
        self.graph.reserve(&users)?;
        for node in &users {
            self.held.insert(*node, request.id);
        }
        request.departure = Some(departure);
        request.success = true;
        self.active.insert(request.id, request.clone());
        self.departures.push(PendingDeparture {
            time: departure,
            request: request.id,
        });

        Ok(Admission::Admitted {
            departure,
            generation_time,
            links_used,
        })
    }

    fn depart(&mut self, pending: PendingDeparture) -> SimResult<SimEvent> {
        self.clock = pending.time;
        let Some(request) = self.active.remove(&pending.request) else {
            return self.step();
        };

        let users = request.users();
        self.graph.release(&users)?;
        for node in &users {
            self.held.remove(node);
        }
        self.counters.departures += 1;
        self.telemetry.record_counter("requests.departed", 1)?;
        debug!(
            id = request.id,
            time = self.clock,
            released = users.len(),
            "departure processed"
        );
        Ok(SimEvent::Departure {
            time: pending.time,
            request,
        })
    }

    fn check_request(&self, request: &EntanglementRequest) -> SimResult<()> {
        let malformed = |reason: String| SimError::MalformedRequest {
            time: self.clock,
            center: request.center,
            peers: request.peers.clone(),
            reason,
        };
        if request.peers.is_empty() {
            return Err(malformed("at least one peer is required".into()));
        }
        let mut seen = HashSet::with_capacity(request.peers.len() + 1);
        for node in request.nodes() {
            if !self.graph.contains(node) {
                return Err(malformed(format!("{node} is not part of the grid")));
            }
            if !seen.insert(node) {
                return Err(malformed(format!("{node} appears more than once")));
            }
        }
        Ok(())
    }
}

fn exponential(name: &str, mean: f64) -> Result<Exp<f64>, ConfigError> {
    Exp::new(1.0 / mean).map_err(|err| {
        ConfigError::Validation(format!("{name} {mean} gives no exponential rate: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use qrepeater_telemetry::TelemetryConfig;

    use super::*;

    fn config(arrivals: u64) -> Config {
        let mut config = Config::sample();
        config.traffic.total_arrivals = arrivals;
        config
    }

    fn simulation(config: &Config) -> Simulation {
        Simulation::new(config, TelemetryHandle::from_config(TelemetryConfig::sample("test")))
            .unwrap()
    }

    fn assert_exclusive(sim: &Simulation, bound: usize) {
        let mut claimed = HashSet::new();
        for request in sim.active_requests() {
            for node in request.users() {
                assert!(claimed.insert(node), "{node} claimed twice");
            }
        }
        assert_eq!(claimed.len(), sim.held_nodes());
        assert!(sim.held_nodes() <= bound);
    }

    #[test]
    fn departures_pop_in_time_then_id_order() {
        let mut heap = BinaryHeap::new();
        for (time, request) in [(3.0, 0), (1.0, 2), (1.0, 1), (2.0, 3)] {
            heap.push(PendingDeparture { time, request });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|p| p.request)).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn dead_links_block_every_request() {
        let mut config = config(25);
        config.network.p_edge = 0.0;
        config.protocol.timesteps = 20;
        let report = simulation(&config).run().unwrap();
        assert_eq!(report.total_requests, 25);
        assert_eq!(report.successful_requests, 0);
        assert_eq!(report.blocking_rate, 1.0);
        assert_eq!(report.blocked.timeout, 25);
        assert_eq!(report.mean_generation_time, None);
    }

    #[test]
    fn overlapping_request_is_blocked_by_admission() {
        let mut config = config(10);
        config.network.p_edge = 1.0;
        config.network.qc = 1_000;
        config.admission.max_concurrent = 1;
        let mut sim = simulation(&config);
        let grid = sim.graph().clone();
        let at = |row, col| grid.node_at(row, col).unwrap();

        let first = sim.submit(at(1, 1), vec![at(0, 1), at(1, 0)]).unwrap();
        assert!(first.is_admitted());
        let overlapping = sim.submit(at(0, 1), vec![at(0, 0), at(0, 2)]).unwrap();
        assert_eq!(overlapping, Admission::Blocked(BlockReason::NodeContention));
        let disjoint = sim.submit(at(2, 2), vec![at(2, 1), at(1, 2)]).unwrap();
        assert_eq!(disjoint, Admission::Blocked(BlockReason::ConcurrencyLimit));

        let report = sim.report();
        assert_eq!(report.total_requests, 3);
        assert_eq!(report.successful_requests, 1);
        assert_eq!(report.still_active, 1);
        assert_eq!(sim.held_nodes(), 3);
    }

    #[test]
    fn held_nodes_stay_exclusive_and_bounded() {
        let mut config = config(300);
        config.network.rows = 4;
        config.network.cols = 4;
        config.network.p_edge = 0.6;
        config.traffic.mean_interarrival = 1.0;
        config.traffic.mean_service = 6.0;
        config.protocol.timesteps = 30;
        let bound = config.admission.max_concurrent * (config.traffic.max_peers + 1);
        let mut sim = simulation(&config);

        let mut last_clock = 0.0;
        loop {
            let event = sim.step().unwrap();
            assert!(sim.clock() >= last_clock);
            last_clock = sim.clock();
            assert_exclusive(&sim, bound);
            if event == SimEvent::Finished {
                break;
            }
        }
        let report = sim.report();
        assert!(report.successful_requests > 0);
        assert!(report.departures > 0);
        assert!((0.0..=1.0).contains(&report.blocking_rate));
    }

    #[test]
    fn pending_departures_never_precede_clock() {
        let mut config = config(50);
        config.network.p_edge = 1.0;
        config.traffic.mean_service = 0.5;
        config.traffic.mean_interarrival = 5.0;
        let mut sim = simulation(&config);
        while let SimEvent::Arrival { .. } | SimEvent::Departure { .. } = sim.step().unwrap() {
            if let Some(pending) = sim.departures.peek() {
                assert!(pending.time >= sim.clock());
            }
        }
        let graph = sim.graph();
        let entangled = graph.nodes().filter(|(_, node)| node.entangled).count();
        assert_eq!(entangled, sim.held_nodes());
    }

    #[test]
    fn same_seed_reproduces_run() {
        let config = config(80);
        let first = simulation(&config).run().unwrap();
        let second = simulation(&config).run().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn too_small_grid_is_fatal_with_context() {
        let mut config = config(5);
        config.network.rows = 1;
        config.network.cols = 2;
        let err = simulation(&config).run().unwrap_err();
        match err {
            SimError::InsufficientNodes {
                time,
                needed,
                available,
                ..
            } => {
                assert!(time > 0.0);
                assert!(needed >= 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_submission_is_rejected() {
        let mut sim = simulation(&config(5));
        let err = sim.submit(NodeId(0), vec![NodeId(0), NodeId(1)]).unwrap_err();
        assert!(matches!(err, SimError::MalformedRequest { .. }));
        let err = sim.submit(NodeId(0), vec![NodeId(99)]).unwrap_err();
        assert!(matches!(err, SimError::MalformedRequest { .. }));
        assert_eq!(sim.arrivals_processed(), 0);
    }

    #[test]
    fn telemetry_counts_every_arrival() {
        let mut config = config(40);
        config.network.p_edge = 0.8;
        config.protocol.timesteps = 50;
        let mut sim = simulation(&config);
        let report = sim.run().unwrap();
        let snapshot = sim.telemetry().flush();
        assert_eq!(snapshot.counter("requests.arrived"), 40);
        assert_eq!(
            snapshot.counter("requests.blocked.contention")
                + snapshot.counter("requests.blocked.concurrency")
                + snapshot.counter("requests.blocked.timeout"),
            report.blocked.total()
        );
        assert_eq!(snapshot.counter("requests.departed"), report.departures);
        assert_eq!(
            snapshot.samples.get("protocol.generation_time").map_or(0, Vec::len) as u64,
            report.successful_requests
        );
    }
}
