//! In-memory transport
//!
//! A shared bus connecting any number of peers inside one process. Published
//! messages are queued in the inbox of every other peer subscribed to the
//! topic; session events a peer emits are queued in its outbox for a test
//! relay to pick up. Peers can be taken offline to simulate partitions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    Inbound, OutboundEvent, P2pMessage, P2pTransport, SessionChannel, SessionEvent,
    TransportError, TransportResult,
};

#[derive(Debug)]
struct PeerState {
    subscriptions: HashSet<String>,
    inbox: VecDeque<Inbound>,
    session_outbox: VecDeque<OutboundEvent>,
    online: bool,
}

impl PeerState {
    fn new() -> Self {
        PeerState {
            subscriptions: HashSet::new(),
            inbox: VecDeque::new(),
            session_outbox: VecDeque::new(),
            online: true,
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    peers: HashMap<String, PeerState>,
    published: u64,
}

/// Shared in-process message bus
#[derive(Clone, Debug, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer to the bus
    pub fn join(&self, peer_id: impl Into<String>) -> MemoryPeer {
        let peer_id = peer_id.into();
        self.state
            .lock()
            .peers
            .entry(peer_id.clone())
            .or_insert_with(PeerState::new);
        MemoryPeer {
            peer_id,
            bus: self.clone(),
        }
    }

    /// Take a peer on or offline. Offline peers neither send nor receive.
    pub fn set_online(&self, peer_id: &str, online: bool) {
        if let Some(peer) = self.state.lock().peers.get_mut(peer_id) {
            peer.online = online;
        }
    }

    /// Queue a session event for a peer, as a relay would
    pub fn deliver_session(&self, peer_id: &str, event: SessionEvent) -> bool {
        let mut state = self.state.lock();
        match state.peers.get_mut(peer_id) {
            Some(peer) if peer.online => {
                peer.inbox.push_back(Inbound::Session(event));
                true
            }
            _ => false,
        }
    }

    /// Ids of all attached peers
    pub fn peer_ids(&self) -> Vec<String> {
        self.state.lock().peers.keys().cloned().collect()
    }

    /// Total successful publishes
    pub fn published_count(&self) -> u64 {
        self.state.lock().published
    }
}

/// One peer's handle onto a [`MemoryBus`]
#[derive(Clone, Debug)]
pub struct MemoryPeer {
    peer_id: String,
    bus: MemoryBus,
}

impl MemoryPeer {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Take everything delivered to this peer so far
    pub fn drain_inbox(&self) -> Vec<Inbound> {
        let mut state = self.bus.state.lock();
        state
            .peers
            .get_mut(&self.peer_id)
            .map(|peer| peer.inbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Take every session event this peer emitted so far
    pub fn drain_session_outbox(&self) -> Vec<OutboundEvent> {
        let mut state = self.bus.state.lock();
        state
            .peers
            .get_mut(&self.peer_id)
            .map(|peer| peer.session_outbox.drain(..).collect())
            .unwrap_or_default()
    }

    fn is_online(&self) -> bool {
        self.bus
            .state
            .lock()
            .peers
            .get(&self.peer_id)
            .is_some_and(|peer| peer.online)
    }
}

impl P2pTransport for MemoryPeer {
    fn publish(&self, topic: &str, payload: &[u8]) -> TransportResult<()> {
        let mut state = self.bus.state.lock();
        if !state.peers.get(&self.peer_id).is_some_and(|p| p.online) {
            return Err(TransportError::NotInitialized);
        }

        for (id, peer) in state.peers.iter_mut() {
            if *id == self.peer_id || !peer.online || !peer.subscriptions.contains(topic) {
                continue;
            }
            peer.inbox.push_back(Inbound::P2p(P2pMessage {
                topic: topic.to_string(),
                from: Some(self.peer_id.clone()),
                payload: payload.to_vec(),
            }));
        }
        state.published += 1;
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> TransportResult<()> {
        let mut state = self.bus.state.lock();
        let peer = state
            .peers
            .get_mut(&self.peer_id)
            .ok_or(TransportError::NotInitialized)?;
        peer.subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn send_direct(&self, peer_id: &str, payload: &[u8]) -> TransportResult<()> {
        if !self.is_online() {
            return Err(TransportError::NotInitialized);
        }
        let mut state = self.bus.state.lock();
        match state.peers.get_mut(peer_id) {
            Some(peer) if peer.online => {
                peer.inbox.push_back(Inbound::P2p(P2pMessage {
                    topic: String::new(),
                    from: Some(self.peer_id.clone()),
                    payload: payload.to_vec(),
                }));
                Ok(())
            }
            _ => Err(TransportError::SendFailed(format!("peer {} unreachable", peer_id))),
        }
    }

    fn is_initialized(&self) -> bool {
        self.is_online()
    }
}

impl SessionChannel for MemoryPeer {
    fn emit(&self, event: OutboundEvent) -> TransportResult<()> {
        let mut state = self.bus.state.lock();
        match state.peers.get_mut(&self.peer_id) {
            Some(peer) if peer.online => {
                peer.session_outbox.push_back(event);
                Ok(())
            }
            _ => Err(TransportError::NotInitialized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers_only() {
        let bus = MemoryBus::new();
        let alice = bus.join("alice");
        let bob = bus.join("bob");
        let carol = bus.join("carol");

        bob.subscribe("/t").unwrap();
        alice.subscribe("/t").unwrap();
        alice.publish("/t", b"hello").unwrap();

        // Publisher does not hear itself
        assert!(alice.drain_inbox().is_empty());
        assert!(carol.drain_inbox().is_empty());

        let inbox = bob.drain_inbox();
        assert_eq!(inbox.len(), 1);
        match &inbox[0] {
            Inbound::P2p(msg) => {
                assert_eq!(msg.topic, "/t");
                assert_eq!(msg.from.as_deref(), Some("alice"));
                assert_eq!(msg.payload, b"hello");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(bus.published_count(), 1);
    }

    #[test]
    fn test_offline_peer() {
        let bus = MemoryBus::new();
        let alice = bus.join("alice");
        let bob = bus.join("bob");
        bob.subscribe("/t").unwrap();

        bus.set_online("alice", false);
        assert!(!alice.is_initialized());
        assert_eq!(alice.publish("/t", b"x"), Err(TransportError::NotInitialized));
        assert!(alice
            .emit(OutboundEvent::HazardVerify {
                hazard_id: "h".into()
            })
            .is_err());

        bus.set_online("alice", true);
        bus.set_online("bob", false);
        alice.publish("/t", b"x").unwrap();
        assert!(bob.drain_inbox().is_empty());
    }

    #[test]
    fn test_direct_and_session() {
        let bus = MemoryBus::new();
        let alice = bus.join("alice");
        let bob = bus.join("bob");

        alice.send_direct("bob", b"psst").unwrap();
        assert!(alice.send_direct("nobody", b"psst").is_err());
        assert_eq!(bob.drain_inbox().len(), 1);

        alice
            .emit(OutboundEvent::HazardVerify {
                hazard_id: "h".into(),
            })
            .unwrap();
        assert_eq!(alice.drain_session_outbox().len(), 1);

        assert!(bus.deliver_session(
            "bob",
            SessionEvent::HazardVerified {
                id: "h".into(),
                count: 2
            }
        ));
        assert!(matches!(
            bob.drain_inbox().as_slice(),
            [Inbound::Session(SessionEvent::HazardVerified { count: 2, .. })]
        ));
    }
}
