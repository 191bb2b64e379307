//! Host transport primitives.
//!
//! The host environment supplies the physical delivery of bytes. relaywire
//! consumes two capabilities: a fire-and-forget send to a peer or to every
//! peer, and a call/response exchange with one peer where the host matches
//! replies to calls.

use crate::error::TransportError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Identifier of a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Target of a one-way send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Peer(PeerId),
    Broadcast,
}

impl Destination {
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Destination::Peer(peer) => Some(*peer),
            Destination::Broadcast => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Peer(peer) => write!(f, "{}", peer),
            Destination::Broadcast => write!(f, "broadcast"),
        }
    }
}

impl From<PeerId> for Destination {
    fn from(peer: PeerId) -> Self {
        Destination::Peer(peer)
    }
}

/// Fire-and-forget delivery.
pub trait OneWaySender: Send + Sync + 'static {
    fn send_one_way(
        &self,
        channel: &str,
        destination: &Destination,
        bytes: Bytes,
    ) -> Result<(), TransportError>;
}

/// Call/response delivery to a single peer.
pub trait TwoWayInvoker: Send + Sync + 'static {
    fn invoke_two_way(
        &self,
        channel: &str,
        peer: &PeerId,
        bytes: Bytes,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}
