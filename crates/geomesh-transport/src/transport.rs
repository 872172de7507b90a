//! P2P pub/sub transport interface

use crate::TransportResult;

/// A message delivered from the P2P layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2pMessage {
    pub topic: String,
    /// Sending peer, when the transport knows it
    pub from: Option<String>,
    pub payload: Vec<u8>,
}

/// Anything delivered to a node from outside
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    P2p(P2pMessage),
    Session(crate::SessionEvent),
}

/// Publish/subscribe transport to other peers.
///
/// Calls enqueue and return immediately; delivery is not guaranteed and
/// nothing waits for confirmation. Inbound messages reach the node as
/// [`P2pMessage`]s through whatever event loop drives it.
pub trait P2pTransport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> TransportResult<()>;
    fn subscribe(&self, topic: &str) -> TransportResult<()>;
    fn send_direct(&self, peer_id: &str, payload: &[u8]) -> TransportResult<()>;
    fn is_initialized(&self) -> bool;
}
