//! GeoMesh node - the runtime event loop
//!
//! One tokio task owns the coordinator and the QR service. Inbound
//! transport events, API commands and the two timers are handled one at a
//! time inside a `select!` loop, so the caches are never shared:
//!
//! 1. Shutdown signal (or every handle dropped)
//! 2. Inbound P2P messages and session events
//! 3. Commands from [`NodeHandle`]
//! 4. Hourly sweep of expired reports and replay entries
//! 5. Traffic refresh of the last local sample

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use geomesh_core::{
    BusinessQrData, Clock, Coordinate, GeoError, GeoLocation, GeoResult, ReviewData,
    SignedGeoReport, TrafficReport,
};
use geomesh_crypto::Identity;
use geomesh_transport::{Inbound, P2pTransport, SessionChannel, REVIEW_TOPIC};

use crate::config::{NodeConfig, QrCodeConfig};
use crate::coordinator::{
    HazardInput, Incident, RouteSegmentTraffic, TrafficBroadcastCoordinator, TrafficSample,
};
use crate::qr::QrProofService;
use crate::store::{FileHazardStore, HazardStore, MemoryHazardStore};

type Reply<T> = oneshot::Sender<GeoResult<T>>;

/// Local API requests served by the node task
#[derive(Debug)]
pub enum NodeCommand {
    ReportTraffic {
        sample: TrafficSample,
        reply: Reply<TrafficReport>,
    },
    ReportHazard {
        input: HazardInput,
        reply: Reply<String>,
    },
    NearbyIncidents {
        location: GeoLocation,
        radius_meters: f64,
        reply: Reply<Vec<Incident>>,
    },
    VerifyIncident {
        id: String,
        reply: Reply<Option<u32>>,
    },
    RouteTraffic {
        coordinates: Vec<Coordinate>,
        reply: Reply<Vec<RouteSegmentTraffic>>,
    },
    RegisterBusiness {
        business_id: String,
        name: String,
        location: GeoLocation,
        reply: Reply<Identity>,
    },
    IssueQrCode {
        business_id: String,
        config: QrCodeConfig,
        reply: Reply<BusinessQrData>,
    },
    /// Redeem a QR code with the node's own key and broadcast the review
    SubmitReview {
        qr: BusinessQrData,
        rating: u8,
        comment: Option<String>,
        location: GeoLocation,
        reply: Reply<SignedGeoReport<ReviewData>>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct NodeStats {
    pub inbound_events: u64,
    pub commands: u64,
    pub sweeps: u64,
    pub expired_purged: u64,
    pub traffic_refreshes: u64,
    pub reviews_accepted: u64,
}

/// The runtime entity for one peer
pub struct GeoNode {
    identity: Identity,
    coordinator: TrafficBroadcastCoordinator,
    qr: QrProofService,
    config: NodeConfig,
    stats: NodeStats,
}

impl GeoNode {
    /// Create a node persisting hazards under `config.storage_dir`, or in
    /// memory when no directory is set
    pub fn new(
        identity: Identity,
        p2p: Arc<dyn P2pTransport>,
        session: Arc<dyn SessionChannel>,
        clock: Arc<dyn Clock>,
        config: NodeConfig,
    ) -> Self {
        let store: Box<dyn HazardStore> = match &config.storage_dir {
            Some(dir) => Box::new(FileHazardStore::new(dir)),
            None => Box::new(MemoryHazardStore::new()),
        };
        Self::with_store(identity, p2p, session, store, clock, config)
    }

    pub fn with_store(
        identity: Identity,
        p2p: Arc<dyn P2pTransport>,
        session: Arc<dyn SessionChannel>,
        store: Box<dyn HazardStore>,
        clock: Arc<dyn Clock>,
        config: NodeConfig,
    ) -> Self {
        let coordinator =
            TrafficBroadcastCoordinator::new(identity.clone(), p2p.clone(), session, store, clock.clone())
                .with_config(config.coordinator.clone());
        let qr = QrProofService::new(p2p, clock).with_config(config.qr.clone());
        GeoNode {
            identity,
            coordinator,
            qr,
            config,
            stats: NodeStats::default(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn coordinator(&self) -> &TrafficBroadcastCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut TrafficBroadcastCoordinator {
        &mut self.coordinator
    }

    pub fn qr(&self) -> &QrProofService {
        &self.qr
    }

    pub fn qr_mut(&mut self) -> &mut QrProofService {
        &mut self.qr
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Route one inbound transport event
    pub fn handle_inbound(&mut self, inbound: Inbound) {
        self.stats.inbound_events += 1;
        match inbound {
            Inbound::Session(event) => {
                debug!(event = event.name(), "session event");
                self.coordinator.handle_session_event(event);
            }
            Inbound::P2p(message) if message.topic == REVIEW_TOPIC => {
                match self.qr.accept_remote_review(&message.payload) {
                    Ok(review) => {
                        self.stats.reviews_accepted += 1;
                        debug!(id = %review.id, "review stored");
                    }
                    Err(e) => debug!(from = ?message.from, error = %e, "dropping review"),
                }
            }
            Inbound::P2p(message) => {
                self.coordinator.handle_p2p_message(&message);
            }
        }
    }

    /// Serve one API request. A caller that stopped waiting is ignored.
    pub fn handle_command(&mut self, command: NodeCommand) {
        self.stats.commands += 1;
        match command {
            NodeCommand::ReportTraffic { sample, reply } => {
                let _ = reply.send(self.coordinator.report_traffic(sample));
            }
            NodeCommand::ReportHazard { input, reply } => {
                let _ = reply.send(self.coordinator.report_hazard(input));
            }
            NodeCommand::NearbyIncidents {
                location,
                radius_meters,
                reply,
            } => {
                let incidents = self.coordinator.get_nearby_incidents(&location, radius_meters);
                let _ = reply.send(Ok(incidents));
            }
            NodeCommand::VerifyIncident { id, reply } => {
                let _ = reply.send(Ok(self.coordinator.verify_incident(&id)));
            }
            NodeCommand::RouteTraffic { coordinates, reply } => {
                let _ = reply.send(Ok(self.coordinator.get_route_traffic(&coordinates)));
            }
            NodeCommand::RegisterBusiness {
                business_id,
                name,
                location,
                reply,
            } => {
                let identity = self.qr.register_business(&business_id, &name, location);
                let _ = reply.send(Ok(identity));
            }
            NodeCommand::IssueQrCode {
                business_id,
                config,
                reply,
            } => {
                let _ = reply.send(self.qr.generate_signed_qr_code(&business_id, &config));
            }
            NodeCommand::SubmitReview {
                qr,
                rating,
                comment,
                location,
                reply,
            } => {
                let result = self.qr.validate_qr_code_and_create_review(
                    &qr,
                    rating,
                    comment,
                    &location,
                    &self.identity,
                );
                if let Ok(report) = &result {
                    if !self.qr.broadcast_review(report) {
                        debug!(id = %report.id, "review kept locally only");
                    }
                }
                let _ = reply.send(result);
            }
        }
    }

    /// Purge expired reports and old replay entries
    pub fn on_sweep(&mut self) -> usize {
        let removed = self.coordinator.sweep() + self.qr.sweep();
        self.stats.sweeps += 1;
        self.stats.expired_purged += removed as u64;
        removed
    }

    /// Re-share the last traffic sample, if any
    pub fn on_traffic_refresh(&mut self) {
        if self.coordinator.refresh_traffic().is_some() {
            self.stats.traffic_refreshes += 1;
        }
    }

    /// Drive the node until shutdown. Returns the node so its final state
    /// can be inspected.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut commands: mpsc::Receiver<NodeCommand>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Self {
        let mut sweep = periodic(self.config.sweep_interval);
        let mut refresh = periodic(self.config.traffic_refresh_interval);
        info!(peer = %self.identity.fingerprint(), "node running");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = inbound.recv() => self.handle_inbound(event),
                Some(command) = commands.recv() => self.handle_command(command),
                _ = sweep.tick() => {
                    self.on_sweep();
                }
                _ = refresh.tick() => self.on_traffic_refresh(),
            }
        }

        info!(stats = ?self.stats, "node stopped");
        self
    }

    /// Run the node on its own task
    pub fn spawn(self) -> (NodeHandle, JoinHandle<GeoNode>) {
        let capacity = self.config.queue_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = NodeHandle {
            inbound: inbound_tx,
            commands: command_tx,
            shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
        };
        let task = tokio::spawn(self.run(inbound_rx, command_rx, shutdown_rx));
        (handle, task)
    }
}

/// Interval whose first tick is one period from now
fn periodic(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn node_stopped() -> GeoError {
    GeoError::TransportUnavailable("node stopped".to_string())
}

/// Cloneable handle onto a running [`GeoNode`]. The node stops on
/// [`NodeHandle::shutdown`] or once every handle is dropped.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    inbound: mpsc::Sender<Inbound>,
    commands: mpsc::Sender<NodeCommand>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl NodeHandle {
    /// Feed an event from the network driver
    pub async fn deliver(&self, inbound: Inbound) -> GeoResult<()> {
        self.inbound.send(inbound).await.map_err(|_| node_stopped())
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> NodeCommand) -> GeoResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| node_stopped())?;
        rx.await.map_err(|_| node_stopped())?
    }

    pub async fn report_traffic(&self, sample: TrafficSample) -> GeoResult<TrafficReport> {
        self.request(|reply| NodeCommand::ReportTraffic { sample, reply })
            .await
    }

    pub async fn report_hazard(&self, input: HazardInput) -> GeoResult<String> {
        self.request(|reply| NodeCommand::ReportHazard { input, reply })
            .await
    }

    pub async fn nearby_incidents(
        &self,
        location: GeoLocation,
        radius_meters: f64,
    ) -> GeoResult<Vec<Incident>> {
        self.request(|reply| NodeCommand::NearbyIncidents {
            location,
            radius_meters,
            reply,
        })
        .await
    }

    pub async fn verify_incident(&self, id: impl Into<String>) -> GeoResult<Option<u32>> {
        let id = id.into();
        self.request(|reply| NodeCommand::VerifyIncident { id, reply })
            .await
    }

    pub async fn route_traffic(&self, coordinates: Vec<Coordinate>) -> GeoResult<Vec<RouteSegmentTraffic>> {
        self.request(|reply| NodeCommand::RouteTraffic { coordinates, reply })
            .await
    }

    pub async fn register_business(
        &self,
        business_id: impl Into<String>,
        name: impl Into<String>,
        location: GeoLocation,
    ) -> GeoResult<Identity> {
        let business_id = business_id.into();
        let name = name.into();
        self.request(|reply| NodeCommand::RegisterBusiness {
            business_id,
            name,
            location,
            reply,
        })
        .await
    }

    pub async fn issue_qr_code(
        &self,
        business_id: impl Into<String>,
        config: QrCodeConfig,
    ) -> GeoResult<BusinessQrData> {
        let business_id = business_id.into();
        self.request(|reply| NodeCommand::IssueQrCode {
            business_id,
            config,
            reply,
        })
        .await
    }

    pub async fn submit_review(
        &self,
        qr: BusinessQrData,
        rating: u8,
        comment: Option<String>,
        location: GeoLocation,
    ) -> GeoResult<SignedGeoReport<ReviewData>> {
        self.request(|reply| NodeCommand::SubmitReview {
            qr,
            rating,
            comment,
            location,
            reply,
        })
        .await
    }

    /// Ask the node to stop. False if it was already asked.
    pub fn shutdown(&self) -> bool {
        match self.shutdown.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}
