use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Peer id of the session authority. The coordinator always claims this id;
/// every other connection gets an id greater than it.
pub const AUTHORITY_ID: PeerId = 1;

pub type PeerId = u32;

/// Wire channel a message travels on. Reliable traffic preserves send order
/// between any two peers; unreliable traffic may be dropped or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Reliable,
    Unreliable,
}

/// Per-participant lifecycle status. Transitions form a single cycle:
/// `Lobby -> Joining -> Active -> Leaving -> Lobby`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Lobby,
    Joining,
    Active,
    Leaving,
}

impl ParticipantStatus {
    /// Returns true when `next` is the legal successor of `self` in the
    /// status cycle. Observers reject every other edge.
    pub fn can_become(self, next: ParticipantStatus) -> bool {
        matches!(
            (self, next),
            (ParticipantStatus::Lobby, ParticipantStatus::Joining)
                | (ParticipantStatus::Joining, ParticipantStatus::Active)
                | (ParticipantStatus::Active, ParticipantStatus::Leaving)
                | (ParticipantStatus::Leaving, ParticipantStatus::Lobby)
        )
    }
}

/// One connected actor in a session, as mirrored by every peer.
///
/// A participant record only exists in a registry once a completed `Register`
/// message for it has been received; collaborators never observe a
/// half-constructed record. `name` is fixed at join time. The custom
/// attribute maps are written by the authority only and replicated through
/// `IntAttrSync`/`FloatAttrSync`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Participant {
    pub id: PeerId,
    pub name: String,
    pub status: ParticipantStatus,
    pub ready_for_session: bool,
    pub custom_ints: HashMap<String, i32>,
    pub custom_floats: HashMap<String, f32>,
}

impl Participant {
    pub fn new(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: ParticipantStatus::Lobby,
            ready_for_session: false,
            custom_ints: HashMap::new(),
            custom_floats: HashMap::new(),
        }
    }

    pub fn is_authority(&self) -> bool {
        self.id == AUTHORITY_ID
    }
}

/// Session configuration established at creation time and replicated
/// verbatim to every joiner via `ServerConfigs`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    /// Maximum number of participants, the locally represented authority
    /// included.
    pub capacity: usize,
    /// Selected activity mode for the shared session.
    pub activity: String,
    /// Port the coordinator listens on.
    pub port: u16,
    /// Seconds between authoritative `TimeSync` pushes.
    pub time_sync_interval: f32,
    /// Seconds between local network-tick events.
    pub network_tick_interval: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capacity: 8,
            activity: "cooperative".to_string(),
            port: 27050,
            time_sync_interval: 1.0,
            network_tick_interval: 0.1,
        }
    }
}

/// Authority's verdict on a registration attempt. `ServerFull` is terminal:
/// the joiner is disconnected and must not retry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Success,
    ServerFull,
}

/// Complete message catalog exchanged between peers.
///
/// All cross-peer consistency flows through the authority: joiners address
/// the authority, the authority relays or fans out to everyone else. The
/// payloads carry the peer id they are about because relayed messages arrive
/// from the authority, not from the originating peer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    /// Joiner -> authority on connect; authority -> peers as roster relay.
    Register { participant: Participant },
    /// Authority -> joiner/all. Unblocks the joiner or triggers disconnect.
    RegistrationResult {
        peer_id: PeerId,
        outcome: RegistrationOutcome,
    },
    /// Authority -> all. Removes the registry entry for a departed peer.
    PlayerDisconnected { peer_id: PeerId },
    /// Authority -> joiner. Establishes the local settings snapshot.
    ServerConfigs { settings: SessionSettings },
    /// Authority -> all. Canonical per-participant status ratification.
    StatusChange {
        peer_id: PeerId,
        status: ParticipantStatus,
    },
    /// Joiner -> authority -> all. Lobby readiness flag.
    ReadyForSessionChange { peer_id: PeerId, ready: bool },
    /// Authority -> target. Forces a local disconnect with a reason.
    Kick { reason: String },
    /// Any -> all, relayed via the authority.
    Chat {
        peer_id: PeerId,
        text: String,
        system: bool,
    },
    /// Lifecycle sequencing, authority originated (see the session crate).
    WorldPreLoad { peer_id: PeerId },
    WorldPostLoad { peer_id: PeerId },
    WorldReady { peer_id: PeerId },
    WorldPreExit { peer_id: PeerId },
    WorldPostExit { peer_id: PeerId },
    /// Authority -> all on the unreliable channel. Elapsed-time mirror.
    TimeSync { minutes: u32, seconds: u32 },
    /// Authority -> all. Custom attribute replication.
    IntAttrSync {
        peer_id: PeerId,
        key: String,
        value: i32,
    },
    FloatAttrSync {
        peer_id: PeerId,
        key: String,
        value: f32,
    },
}

/// Discriminant of `Message`, used by the central dispatch checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    RegistrationResult,
    PlayerDisconnected,
    ServerConfigs,
    StatusChange,
    ReadyForSessionChange,
    Kick,
    Chat,
    WorldPreLoad,
    WorldPostLoad,
    WorldReady,
    WorldPreExit,
    WorldPostExit,
    TimeSync,
    IntAttrSync,
    FloatAttrSync,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Register { .. } => MessageKind::Register,
            Message::RegistrationResult { .. } => MessageKind::RegistrationResult,
            Message::PlayerDisconnected { .. } => MessageKind::PlayerDisconnected,
            Message::ServerConfigs { .. } => MessageKind::ServerConfigs,
            Message::StatusChange { .. } => MessageKind::StatusChange,
            Message::ReadyForSessionChange { .. } => MessageKind::ReadyForSessionChange,
            Message::Kick { .. } => MessageKind::Kick,
            Message::Chat { .. } => MessageKind::Chat,
            Message::WorldPreLoad { .. } => MessageKind::WorldPreLoad,
            Message::WorldPostLoad { .. } => MessageKind::WorldPostLoad,
            Message::WorldReady { .. } => MessageKind::WorldReady,
            Message::WorldPreExit { .. } => MessageKind::WorldPreExit,
            Message::WorldPostExit { .. } => MessageKind::WorldPostExit,
            Message::TimeSync { .. } => MessageKind::TimeSync,
            Message::IntAttrSync { .. } => MessageKind::IntAttrSync,
            Message::FloatAttrSync { .. } => MessageKind::FloatAttrSync,
        }
    }

    /// The peer the payload is about, when it names one. Used to validate
    /// that relayed messages were sent by the peer they claim to concern.
    pub fn subject(&self) -> Option<PeerId> {
        match self {
            Message::Register { participant } => Some(participant.id),
            Message::RegistrationResult { peer_id, .. }
            | Message::PlayerDisconnected { peer_id }
            | Message::StatusChange { peer_id, .. }
            | Message::ReadyForSessionChange { peer_id, .. }
            | Message::Chat { peer_id, .. }
            | Message::WorldPreLoad { peer_id }
            | Message::WorldPostLoad { peer_id }
            | Message::WorldReady { peer_id }
            | Message::WorldPreExit { peer_id }
            | Message::WorldPostExit { peer_id }
            | Message::IntAttrSync { peer_id, .. }
            | Message::FloatAttrSync { peer_id, .. } => Some(*peer_id),
            Message::ServerConfigs { .. } | Message::Kick { .. } | Message::TimeSync { .. } => None,
        }
    }
}

impl MessageKind {
    /// Privileged messages: a receiver only accepts them from the authority.
    /// Anything else arriving from a non-authority sender is rejected and
    /// logged, the connection survives.
    pub fn authority_only(self) -> bool {
        !matches!(
            self,
            MessageKind::Register
                | MessageKind::ReadyForSessionChange
                | MessageKind::Chat
                | MessageKind::WorldReady
        )
    }

    /// Messages the authority re-broadcasts to the other participants when
    /// it receives them from a peer.
    pub fn relayed(self) -> bool {
        matches!(
            self,
            MessageKind::ReadyForSessionChange | MessageKind::Chat | MessageKind::WorldReady
        )
    }

    /// Channel the message is sent on. Only the elapsed-time mirror tolerates
    /// loss; everything else rides the reliable channel.
    pub fn channel(self) -> Channel {
        match self {
            MessageKind::TimeSync => Channel::Unreliable,
            _ => Channel::Reliable,
        }
    }
}
