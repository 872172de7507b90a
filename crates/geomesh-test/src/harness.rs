//! Multi-peer simulation
//!
//! Runs several [`GeoNode`]s over one [`MemoryBus`] with a shared
//! [`ManualClock`]. A [`SessionRelay`] plays the relay server: it drains
//! every peer's session outbox and fans the events back out the way the
//! live relay would. Delivery can be degraded with [`ChaosConfig`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use geomesh_core::{Clock, ManualClock, StoredHazard, Timestamp};
use geomesh_crypto::Identity;
use geomesh_runtime::{GeoNode, MemoryHazardStore, NodeConfig, CORROBORATION_BONUS};
use geomesh_spatial::GeoRegionCache;
use geomesh_transport::{Inbound, MemoryBus, MemoryPeer, OutboundEvent, SessionEvent};

/// Fixed start of simulated time
pub const SIM_START: Timestamp = Timestamp(1_700_000_000_000);

/// Upper bound on delivery rounds per [`GeoSwarm::pump`]
const MAX_ROUNDS: usize = 64;

/// Delivery degradation applied to every inbound event
#[derive(Clone, Debug, PartialEq)]
pub struct ChaosConfig {
    /// Probability an event is lost (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability an event is delivered twice
    pub duplicate_prob: f64,
    /// Probability a peer's batch is delivered in reverse order
    pub reorder_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::perfect()
    }
}

impl ChaosConfig {
    pub fn perfect() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            duplicate_prob: 0.0,
            reorder_prob: 0.0,
        }
    }

    /// Every event arrives, often twice and out of order
    pub fn noisy() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            duplicate_prob: 0.3,
            reorder_prob: 0.5,
        }
    }

    /// Lossy mobile network
    pub fn hostile() -> Self {
        ChaosConfig {
            loss_rate: 0.2,
            duplicate_prob: 0.1,
            reorder_prob: 0.3,
        }
    }
}

/// Delivery counters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub relayed: u64,
    pub rounds: u64,
}

/// In-process stand-in for the session relay server.
///
/// Keeps its own view of live hazards so it can answer nearby queries and
/// hand out authoritative verification counts.
#[derive(Debug, Default)]
pub struct SessionRelay {
    hazards: GeoRegionCache<StoredHazard>,
}

impl SessionRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn one emitted event into deliveries, as `(peer, event)` pairs
    pub fn route(
        &mut self,
        from: &str,
        event: OutboundEvent,
        peers: &[String],
        now: Timestamp,
    ) -> Vec<(String, SessionEvent)> {
        let others = peers.iter().filter(|p| p.as_str() != from).cloned();
        match event {
            OutboundEvent::TrafficReport(report) => others
                .map(|p| (p, SessionEvent::TrafficUpdate(report.clone())))
                .collect(),
            OutboundEvent::HazardReport(hazard) => {
                self.hazards.insert(hazard.clone(), now);
                others
                    .map(|p| (p, SessionEvent::HazardBroadcast(hazard.clone())))
                    .collect()
            }
            OutboundEvent::HazardVerify { hazard_id } => {
                match self
                    .hazards
                    .extend_on_corroboration(&hazard_id, CORROBORATION_BONUS)
                {
                    Some(count) => peers
                        .iter()
                        .map(|p| {
                            let event = SessionEvent::HazardVerified {
                                id: hazard_id.clone(),
                                count,
                            };
                            (p.clone(), event)
                        })
                        .collect(),
                    None => {
                        debug!(id = %hazard_id, "relay has no such hazard");
                        Vec::new()
                    }
                }
            }
            OutboundEvent::GetNearbyHazards { location, radius } => {
                let nearby = self
                    .hazards
                    .query(location.coordinate(), radius, now)
                    .into_iter()
                    .map(|n| n.report)
                    .collect();
                vec![(from.to_string(), SessionEvent::NearbyHazards(nearby))]
            }
        }
    }

    pub fn hazard(&self, id: &str) -> Option<&StoredHazard> {
        self.hazards.get(id)
    }

    pub fn hazard_count(&self) -> usize {
        self.hazards.len()
    }

    pub fn sweep(&mut self, now: Timestamp) -> usize {
        self.hazards.sweep(now)
    }
}

/// One simulated device
pub struct SimPeer {
    pub name: String,
    pub transport: MemoryPeer,
    pub store: MemoryHazardStore,
    pub node: GeoNode,
}

impl SimPeer {
    pub fn identity(&self) -> &Identity {
        self.node.identity()
    }
}

/// A group of peers sharing a bus, a relay and a clock
pub struct GeoSwarm {
    bus: MemoryBus,
    clock: ManualClock,
    relay: SessionRelay,
    peers: Vec<SimPeer>,
    chaos: ChaosConfig,
    rng: StdRng,
    stats: DeliveryStats,
}

impl GeoSwarm {
    /// Swarm of peers named `peer-0`, `peer-1`, ...
    pub fn new(peer_count: usize) -> Self {
        let names: Vec<String> = (0..peer_count).map(|i| format!("peer-{}", i)).collect();
        Self::with_names(&names, NodeConfig::default())
    }

    pub fn with_names<S: AsRef<str>>(names: &[S], config: NodeConfig) -> Self {
        let mut swarm = GeoSwarm {
            bus: MemoryBus::new(),
            clock: ManualClock::new(SIM_START),
            relay: SessionRelay::new(),
            peers: Vec::new(),
            chaos: ChaosConfig::perfect(),
            rng: StdRng::seed_from_u64(0),
            stats: DeliveryStats::default(),
        };
        for name in names {
            swarm.add_peer(name.as_ref(), config.clone());
        }
        swarm
    }

    /// Degrade delivery; `seed` makes the run reproducible
    pub fn with_chaos(mut self, chaos: ChaosConfig, seed: u64) -> Self {
        self.chaos = chaos;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Join a new peer, or restart an existing one from its stored hazards
    pub fn add_peer(&mut self, name: &str, config: NodeConfig) -> usize {
        let store = self
            .peers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.store.clone())
            .unwrap_or_default();
        self.peers.retain(|p| p.name != name);

        let transport = self.bus.join(name);
        let node = GeoNode::with_store(
            Identity::generate(),
            Arc::new(transport.clone()),
            Arc::new(transport.clone()),
            Box::new(store.clone()),
            Arc::new(self.clock.clone()),
            config,
        );
        self.peers.push(SimPeer {
            name: name.to_string(),
            transport,
            store,
            node,
        });
        self.peers.len() - 1
    }

    pub fn peer(&self, index: usize) -> &SimPeer {
        &self.peers[index]
    }

    pub fn peer_mut(&mut self, index: usize) -> &mut SimPeer {
        &mut self.peers[index]
    }

    pub fn peers(&self) -> &[SimPeer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn relay(&self) -> &SessionRelay {
        &self.relay
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn advance(&mut self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Cut a peer off from both the bus and the relay
    pub fn partition(&mut self, index: usize) {
        self.bus.set_online(&self.peers[index].name, false);
    }

    pub fn heal(&mut self, index: usize) {
        self.bus.set_online(&self.peers[index].name, true);
    }

    /// Run sweeps on every peer and the relay
    pub fn sweep_all(&mut self) -> usize {
        let now = self.clock.now();
        let relay = self.relay.sweep(now);
        relay + self.peers.iter_mut().map(|p| p.node.on_sweep()).sum::<usize>()
    }

    /// Relay session events and deliver inboxes until nothing moves
    pub fn pump(&mut self) -> &DeliveryStats {
        for _ in 0..MAX_ROUNDS {
            self.stats.rounds += 1;
            let relayed = self.relay_round();
            let delivered = self.delivery_round();
            if !relayed && !delivered {
                break;
            }
        }
        &self.stats
    }

    fn relay_round(&mut self) -> bool {
        let now = self.clock.now();
        let names: Vec<String> = self.peers.iter().map(|p| p.name.clone()).collect();
        let mut moved = false;
        for peer in &self.peers {
            for event in peer.transport.drain_session_outbox() {
                moved = true;
                for (to, delivery) in self.relay.route(&peer.name, event, &names, now) {
                    if self.bus.deliver_session(&to, delivery) {
                        self.stats.relayed += 1;
                    }
                }
            }
        }
        moved
    }

    fn delivery_round(&mut self) -> bool {
        let mut moved = false;
        for peer in &mut self.peers {
            let mut batch = peer.transport.drain_inbox();
            if batch.is_empty() {
                continue;
            }
            moved = true;
            if self.rng.gen_bool(self.chaos.reorder_prob) {
                batch.reverse();
            }
            for inbound in batch {
                if self.rng.gen_bool(self.chaos.loss_rate) {
                    self.stats.dropped += 1;
                    continue;
                }
                if self.rng.gen_bool(self.chaos.duplicate_prob) {
                    self.stats.duplicated += 1;
                    deliver(&mut peer.node, inbound.clone(), &mut self.stats);
                }
                deliver(&mut peer.node, inbound, &mut self.stats);
            }
        }
        moved
    }

    /// Verification count per peer for one hazard; `None` where unknown
    pub fn verification_counts(&self, hazard_id: &str) -> Vec<Option<u32>> {
        self.peers
            .iter()
            .map(|p| {
                p.node
                    .coordinator()
                    .hazard(hazard_id)
                    .map(|h| h.verification_count)
            })
            .collect()
    }

    /// Hazard ids known per peer, sorted
    pub fn hazard_views(&self) -> HashMap<String, Vec<String>> {
        self.peers
            .iter()
            .map(|p| {
                let mut ids: Vec<String> =
                    p.node.coordinator().hazards().map(|h| h.id.clone()).collect();
                ids.sort();
                (p.name.clone(), ids)
            })
            .collect()
    }

    /// Whether every peer holds the same set of hazards
    pub fn converged(&self) -> bool {
        let views = self.hazard_views();
        let mut sets = views.values();
        match sets.next() {
            Some(first) => sets.all(|s| s == first),
            None => true,
        }
    }
}

fn deliver(node: &mut GeoNode, inbound: Inbound, stats: &mut DeliveryStats) {
    stats.delivered += 1;
    node.handle_inbound(inbound);
}
