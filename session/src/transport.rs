//! Transport interface consumed by the session core, plus the in-process
//! loopback hub used by tests and the demo binary.
//!
//! The real network transport (reliable/unreliable packet delivery, peer
//! discovery, NAT traversal) is an external collaborator. The core only
//! needs fire-and-forget send/broadcast and a stream of transport events
//! delivered on the same logical loop as frame updates.

use log::debug;
use shared::{Channel, PeerId, AUTHORITY_ID};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Why a connection attempt or an established link failed. Always terminal
/// for the session; there is no automatic reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Timeout,
    Refused,
    Lost,
    ServerFull,
}

impl ConnectFailure {
    /// Human-readable reason surfaced to the user.
    pub fn reason(self) -> &'static str {
        match self {
            ConnectFailure::Timeout => "connection timed out",
            ConnectFailure::Refused => "connection refused",
            ConnectFailure::Lost => "connection to the session lost",
            ConnectFailure::ServerFull => "server full",
        }
    }
}

/// Events delivered by the transport to the session context.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The local connection attempt completed; the transport assigned us an id.
    Connected { local_id: PeerId },
    /// The local connection attempt failed.
    ConnectFailed { failure: ConnectFailure },
    /// A remote peer connected (delivered to the listening authority).
    PeerConnected { peer_id: PeerId },
    /// A remote peer dropped (delivered to the listening authority).
    PeerDisconnected { peer_id: PeerId },
    /// A payload arrived. Deserialization is the receiver's concern.
    Data {
        from: PeerId,
        bytes: Vec<u8>,
        channel: Channel,
    },
    /// Our own link went away (kicked, authority lost, voluntary close).
    LinkLost,
}

/// Fire-and-forget outbound half of the transport. Delivery failures are
/// logged by the implementation, never surfaced to the caller.
pub trait Transport {
    fn send(&self, peer_id: PeerId, bytes: Vec<u8>, channel: Channel);
    /// Send to every connected peer except the local one and `exclude`.
    fn broadcast(&self, bytes: Vec<u8>, channel: Channel, exclude: Option<PeerId>);
    /// Forcibly drop a peer's link (capacity rejection, kick).
    fn disconnect(&self, peer_id: PeerId);
}

struct HubInner {
    next_id: PeerId,
    authority_attached: bool,
    links: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
    drop_unreliable: bool,
}

/// In-process star-topology loopback: one authority endpoint, any number of
/// peer endpoints, per-peer unbounded event queues. Stands in for the real
/// transport in tests and demos; the unreliable channel can be configured
/// to drop everything to exercise loss tolerance.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: AUTHORITY_ID + 1,
                authority_attached: false,
                links: HashMap::new(),
                drop_unreliable: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims the authority id and starts listening.
    pub fn open_authority(
        &self,
    ) -> (MemoryEndpoint, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.lock();
        hub.links.insert(AUTHORITY_ID, tx);
        hub.authority_attached = true;
        (
            MemoryEndpoint {
                id: AUTHORITY_ID,
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Connects a new peer. Without a listening authority the attempt is
    /// refused; otherwise the peer immediately learns its assigned id and
    /// the authority sees the connection.
    pub fn connect(&self) -> (MemoryEndpoint, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.lock();

        if !hub.authority_attached {
            let _ = tx.send(TransportEvent::ConnectFailed {
                failure: ConnectFailure::Refused,
            });
            return (
                MemoryEndpoint {
                    id: 0,
                    hub: self.clone(),
                },
                rx,
            );
        }

        let peer_id = hub.next_id;
        hub.next_id += 1;
        hub.links.insert(peer_id, tx.clone());

        let _ = tx.send(TransportEvent::Connected { local_id: peer_id });
        if let Some(authority) = hub.links.get(&AUTHORITY_ID) {
            let _ = authority.send(TransportEvent::PeerConnected { peer_id });
        }

        (
            MemoryEndpoint {
                id: peer_id,
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Drop every message subsequently sent on the unreliable channel.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.lock().drop_unreliable = drop;
    }

    /// Simulates a link failure from outside either endpoint.
    pub fn sever(&self, peer_id: PeerId) {
        drop_peer(&mut self.lock(), peer_id);
    }
}

fn drop_peer(hub: &mut HubInner, peer_id: PeerId) {
    if peer_id == AUTHORITY_ID {
        // Star topology: losing the authority takes every link down.
        hub.authority_attached = false;
        for (_, link) in hub.links.drain() {
            let _ = link.send(TransportEvent::LinkLost);
        }
        return;
    }

    if let Some(link) = hub.links.remove(&peer_id) {
        let _ = link.send(TransportEvent::LinkLost);
        if let Some(authority) = hub.links.get(&AUTHORITY_ID) {
            let _ = authority.send(TransportEvent::PeerDisconnected { peer_id });
        }
    }
}

/// One attached side of the hub. Cloneable so tests can keep a handle for
/// injecting traffic alongside the session context that owns it.
#[derive(Clone)]
pub struct MemoryEndpoint {
    id: PeerId,
    hub: MemoryHub,
}

impl MemoryEndpoint {
    pub fn id(&self) -> PeerId {
        self.id
    }
}

impl Transport for MemoryEndpoint {
    fn send(&self, peer_id: PeerId, bytes: Vec<u8>, channel: Channel) {
        let hub = self.hub.lock();
        if channel == Channel::Unreliable && hub.drop_unreliable {
            debug!("dropping unreliable message to peer {}", peer_id);
            return;
        }
        match hub.links.get(&peer_id) {
            Some(link) => {
                if link
                    .send(TransportEvent::Data {
                        from: self.id,
                        bytes,
                        channel,
                    })
                    .is_err()
                {
                    debug!("peer {} queue closed, message dropped", peer_id);
                }
            }
            None => debug!("no link to peer {}, message dropped", peer_id),
        }
    }

    fn broadcast(&self, bytes: Vec<u8>, channel: Channel, exclude: Option<PeerId>) {
        let hub = self.hub.lock();
        if channel == Channel::Unreliable && hub.drop_unreliable {
            debug!("dropping unreliable broadcast");
            return;
        }
        for (peer_id, link) in hub.links.iter() {
            if *peer_id == self.id || Some(*peer_id) == exclude {
                continue;
            }
            let _ = link.send(TransportEvent::Data {
                from: self.id,
                bytes: bytes.clone(),
                channel,
            });
        }
    }

    fn disconnect(&self, peer_id: PeerId) {
        drop_peer(&mut self.hub.lock(), peer_id);
    }
}
