//! Channel transport
//!
//! Bridges the synchronous transport traits to an async network driver:
//! every outbound call becomes an [`Outbound`] message on an unbounded tokio
//! channel, which the driver task drains and puts on the wire.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{OutboundEvent, P2pTransport, SessionChannel, TransportError, TransportResult};

/// Work handed to the network driver
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Publish { topic: String, payload: Vec<u8> },
    Subscribe { topic: String },
    Direct { peer_id: String, payload: Vec<u8> },
    Session(OutboundEvent),
}

/// Driver side of a [`ChannelTransport`]
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Transport handle backed by a tokio channel
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    initialized: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

/// Create a transport handle and the receiver its driver consumes.
/// The handle starts uninitialized until the driver calls
/// [`ChannelTransport::set_initialized`].
pub fn channel_transport() -> (ChannelTransport, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = ChannelTransport {
        tx,
        initialized: Arc::new(AtomicBool::new(false)),
        subscriptions: Arc::new(Mutex::new(HashSet::new())),
    };
    (transport, rx)
}

impl ChannelTransport {
    /// Mark the underlying network as connected (or not)
    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    /// Topics subscribed so far, for re-subscribing after a reconnect
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    fn send(&self, outbound: Outbound) -> TransportResult<()> {
        self.tx.send(outbound).map_err(|_| TransportError::Closed)
    }

    fn ensure_initialized(&self) -> TransportResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }
}

impl P2pTransport for ChannelTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> TransportResult<()> {
        self.ensure_initialized()?;
        self.send(Outbound::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    fn subscribe(&self, topic: &str) -> TransportResult<()> {
        // Remembered even while disconnected so the driver can replay them
        self.subscriptions.lock().insert(topic.to_string());
        self.send(Outbound::Subscribe {
            topic: topic.to_string(),
        })
    }

    fn send_direct(&self, peer_id: &str, payload: &[u8]) -> TransportResult<()> {
        self.ensure_initialized()?;
        self.send(Outbound::Direct {
            peer_id: peer_id.to_string(),
            payload: payload.to_vec(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

impl SessionChannel for ChannelTransport {
    fn emit(&self, event: OutboundEvent) -> TransportResult<()> {
        self.send(Outbound::Session(event))
    }
}
