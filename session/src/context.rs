//! Process-scoped session context: the single mediator every cross-peer
//! effect flows through.
//!
//! One context is constructed at startup (host or join) and driven from a
//! single logical loop: transport events and frame updates are interleaved,
//! never concurrent, so registry mutation from message handlers and
//! frame-driven logic cannot race. The authority's context holds the
//! canonical state; every other context mirrors it through relayed
//! messages.

use crate::events::{EventBus, SessionEvent};
use crate::registry::ParticipantRegistry;
use crate::ticker::SessionClock;
use crate::transport::{ConnectFailure, Transport, TransportEvent};
use log::{debug, error, info, warn};
use shared::{
    Message, Participant, ParticipantStatus, PeerId, RegistrationOutcome, SessionSettings,
    AUTHORITY_ID,
};

pub struct SessionContext {
    pub(crate) name: String,
    pub(crate) peer_id: Option<PeerId>,
    pub(crate) authority: bool,
    pub(crate) dedicated: bool,
    pub(crate) registered: bool,
    pub(crate) settings: SessionSettings,
    pub(crate) registry: ParticipantRegistry,
    pub(crate) in_session: bool,
    pub(crate) terminated: bool,
    pub(crate) clock: SessionClock,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) events: EventBus,
}

impl SessionContext {
    /// Creates the coordinator context. It claims the reserved authority id
    /// immediately; unless dedicated, it also represents a local player and
    /// its own record occupies one capacity slot.
    pub fn host(
        settings: SessionSettings,
        transport: Box<dyn Transport>,
        name: impl Into<String>,
        dedicated: bool,
    ) -> Self {
        let name = name.into();
        let mut registry = ParticipantRegistry::new(settings.capacity);
        if !dedicated {
            registry.insert(Participant::new(AUTHORITY_ID, name.clone()));
        }
        info!(
            "hosting session (capacity {}, dedicated: {})",
            settings.capacity, dedicated
        );
        Self {
            name,
            peer_id: Some(AUTHORITY_ID),
            authority: true,
            dedicated,
            registered: true,
            clock: SessionClock::from_settings(&settings),
            registry,
            settings,
            in_session: false,
            terminated: false,
            transport,
            events: EventBus::new(),
        }
    }

    /// Creates a joining context. The peer id stays unset until the
    /// transport reports the connection; the settings snapshot is replaced
    /// by the authority's `ServerConfigs`.
    pub fn join(transport: Box<dyn Transport>, name: impl Into<String>) -> Self {
        let settings = SessionSettings::default();
        Self {
            name: name.into(),
            peer_id: None,
            authority: false,
            dedicated: false,
            registered: false,
            clock: SessionClock::from_settings(&settings),
            registry: ParticipantRegistry::new(settings.capacity),
            settings,
            in_session: false,
            terminated: false,
            transport,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> tokio::sync::mpsc::UnboundedReceiver<SessionEvent> {
        self.events.subscribe()
    }

    // ---- transport event handling -------------------------------------

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.terminated {
            return;
        }
        match event {
            TransportEvent::Connected { local_id } => self.on_connected(local_id),
            TransportEvent::ConnectFailed { failure } => {
                warn!("connection failed: {}", failure.reason());
                self.events
                    .publish(SessionEvent::ConnectionFailed { failure });
                self.terminated = true;
            }
            TransportEvent::PeerConnected { peer_id } => {
                debug!("peer {} connected, awaiting registration", peer_id);
            }
            TransportEvent::PeerDisconnected { peer_id } => self.on_peer_disconnected(peer_id),
            TransportEvent::Data { from, bytes, .. } => {
                match bincode::deserialize::<Message>(&bytes) {
                    Ok(message) => self.handle_message(from, message),
                    Err(e) => warn!("dropping malformed payload from peer {}: {}", from, e),
                }
            }
            TransportEvent::LinkLost => self.on_link_lost(),
        }
    }

    fn on_connected(&mut self, local_id: PeerId) {
        info!("connected, assigned peer id {}", local_id);
        self.peer_id = Some(local_id);
        self.send_to(
            AUTHORITY_ID,
            &Message::Register {
                participant: Participant::new(local_id, self.name.clone()),
            },
        );
    }

    fn on_peer_disconnected(&mut self, peer_id: PeerId) {
        if self.registry.remove(peer_id).is_some() {
            self.broadcast_msg(&Message::PlayerDisconnected { peer_id }, None);
            self.events.publish(SessionEvent::RosterChanged);
        }
    }

    fn on_link_lost(&mut self) {
        warn!("transport link lost");
        self.events.publish(SessionEvent::ConnectionFailed {
            failure: ConnectFailure::Lost,
        });
        self.teardown();
    }

    /// Clears all registry and session state. Disconnection is always
    /// terminal for the session, whatever caused it.
    pub(crate) fn teardown(&mut self) {
        self.registry.clear();
        self.in_session = false;
        self.clock.reset();
        self.registered = false;
        self.terminated = true;
        if !self.authority {
            self.peer_id = None;
        }
        self.events.publish(SessionEvent::RosterChanged);
    }

    // ---- message dispatch ---------------------------------------------

    /// Central dispatch. Privilege and relay-origin checks run here, once,
    /// before any handler: no per-handler authorization.
    pub fn handle_message(&mut self, from: PeerId, message: Message) {
        if self.terminated {
            return;
        }
        let kind = message.kind();

        if kind.authority_only() && from != AUTHORITY_ID {
            warn!(
                "rejecting privileged {:?} from non-authority peer {}",
                kind, from
            );
            return;
        }
        if kind.relayed() && from != AUTHORITY_ID && message.subject() != Some(from) {
            warn!(
                "rejecting {:?} from peer {} claiming to concern {:?}",
                kind,
                from,
                message.subject()
            );
            return;
        }

        match message {
            Message::Register { participant } => {
                if self.authority {
                    self.register_joiner(from, participant);
                } else if self.registry.insert(participant) {
                    self.events.publish(SessionEvent::RosterChanged);
                }
            }
            Message::RegistrationResult { peer_id, outcome } => {
                self.on_registration_result(peer_id, outcome);
            }
            Message::PlayerDisconnected { peer_id } => {
                if self.registry.remove(peer_id).is_some() {
                    self.events.publish(SessionEvent::RosterChanged);
                }
            }
            Message::ServerConfigs { settings } => {
                info!(
                    "received session settings: capacity {}, activity {}",
                    settings.capacity, settings.activity
                );
                self.clock = SessionClock::from_settings(&settings);
                self.settings = settings;
            }
            Message::StatusChange { peer_id, status } => self.apply_status(peer_id, status),
            Message::ReadyForSessionChange { peer_id, ready } => {
                self.apply_ready(peer_id, ready);
                if self.authority {
                    self.broadcast_msg(
                        &Message::ReadyForSessionChange { peer_id, ready },
                        None,
                    );
                }
            }
            Message::Kick { reason } => {
                warn!("kicked from session: {}", reason);
                self.events.publish(SessionEvent::Kicked { reason });
                self.teardown();
            }
            Message::Chat {
                peer_id,
                text,
                system,
            } => {
                self.publish_chat(peer_id, &text, system);
                if self.authority {
                    self.broadcast_msg(
                        &Message::Chat {
                            peer_id,
                            text,
                            system,
                        },
                        Some(from),
                    );
                }
            }
            Message::WorldPreLoad { peer_id } => self.on_world_pre_load(peer_id),
            Message::WorldPostLoad { peer_id } => self.on_world_post_load(peer_id),
            Message::WorldReady { peer_id } => self.on_world_ready(peer_id),
            Message::WorldPreExit { peer_id } => self.on_world_pre_exit(peer_id),
            Message::WorldPostExit { peer_id } => self.on_world_post_exit(peer_id),
            Message::TimeSync { minutes, seconds } => {
                if !self.authority {
                    self.clock.mirror(minutes, seconds);
                    self.events
                        .publish(SessionEvent::TimeSynced { minutes, seconds });
                }
            }
            Message::IntAttrSync {
                peer_id,
                key,
                value,
            } => {
                if let Some(participant) = self.registry.get_mut(peer_id) {
                    participant.custom_ints.insert(key, value);
                }
            }
            Message::FloatAttrSync {
                peer_id,
                key,
                value,
            } => {
                if let Some(participant) = self.registry.get_mut(peer_id) {
                    participant.custom_floats.insert(key, value);
                }
            }
        }
    }

    // ---- registration protocol (authority side) -----------------------

    /// Brings a newly connected peer and the rest of the session into
    /// mutual knowledge, exactly once per peer. Registrations are processed
    /// one at a time on the single execution context, so concurrent joins
    /// cannot interleave registry mutation.
    fn register_joiner(&mut self, from: PeerId, mut participant: Participant) {
        if participant.id != from {
            warn!(
                "rejecting registration from peer {} describing id {}",
                from, participant.id
            );
            return;
        }

        if self.registry.is_full() && !self.registry.contains(participant.id) {
            info!("registry full, rejecting peer {}", from);
            self.send_to(
                from,
                &Message::RegistrationResult {
                    peer_id: from,
                    outcome: RegistrationOutcome::ServerFull,
                },
            );
            self.transport.disconnect(from);
            return;
        }

        // Fresh records always start from the lobby, whatever the sender
        // put on the wire.
        participant.status = ParticipantStatus::Lobby;
        participant.ready_for_session = false;
        let joiner_id = participant.id;

        if !self.registry.insert(participant) {
            // Re-registration of a known id: no-op beyond this point.
            return;
        }

        // A session already under way pulls the joiner straight into the
        // loading flow instead of leaving it parked in the lobby.
        if self.in_session {
            if self.registry.advance_status(joiner_id, ParticipantStatus::Joining) {
                self.events.publish(SessionEvent::StatusChanged {
                    peer_id: joiner_id,
                    status: ParticipantStatus::Joining,
                });
            }
            self.send_to(joiner_id, &Message::WorldPreLoad { peer_id: joiner_id });
        }

        // The authority's own record, when it is itself a player.
        if !self.dedicated {
            if let Some(own) = self.registry.get(AUTHORITY_ID).cloned() {
                self.send_to(joiner_id, &Message::Register { participant: own });
            }
        }

        // Mesh-consistent knowledge through relay: every existing peer
        // learns the joiner, the joiner learns every existing peer.
        if let Some(joiner_record) = self.registry.get(joiner_id).cloned() {
            for other_id in self.registry.ids_sorted() {
                if other_id == joiner_id || other_id == AUTHORITY_ID {
                    continue;
                }
                self.send_to(
                    other_id,
                    &Message::Register {
                        participant: joiner_record.clone(),
                    },
                );
                if let Some(other) = self.registry.get(other_id).cloned() {
                    self.send_to(joiner_id, &Message::Register { participant: other });
                }
            }

            // Self-registration confirmation and the settings snapshot.
            self.send_to(
                joiner_id,
                &Message::Register {
                    participant: joiner_record,
                },
            );
        }
        self.send_to(
            joiner_id,
            &Message::ServerConfigs {
                settings: self.settings.clone(),
            },
        );

        self.broadcast_msg(
            &Message::RegistrationResult {
                peer_id: joiner_id,
                outcome: RegistrationOutcome::Success,
            },
            None,
        );
        self.events.publish(SessionEvent::RosterChanged);
    }

    fn on_registration_result(&mut self, peer_id: PeerId, outcome: RegistrationOutcome) {
        match outcome {
            RegistrationOutcome::Success => {
                if Some(peer_id) == self.peer_id {
                    info!("registration confirmed");
                    self.registered = true;
                }
            }
            RegistrationOutcome::ServerFull => {
                if Some(peer_id) == self.peer_id {
                    warn!("registration rejected: server full");
                    self.events.publish(SessionEvent::ConnectionFailed {
                        failure: ConnectFailure::ServerFull,
                    });
                    self.teardown();
                }
            }
        }
    }

    // ---- shared state mutation helpers --------------------------------

    pub(crate) fn apply_status(&mut self, peer_id: PeerId, status: ParticipantStatus) {
        if self.registry.advance_status(peer_id, status) {
            self.events
                .publish(SessionEvent::StatusChanged { peer_id, status });
        }
    }

    fn apply_ready(&mut self, peer_id: PeerId, ready: bool) {
        if let Some(participant) = self.registry.get_mut(peer_id) {
            if participant.ready_for_session != ready {
                participant.ready_for_session = ready;
                self.events
                    .publish(SessionEvent::ReadyForSessionChanged { peer_id, ready });
            }
        }
    }

    fn publish_chat(&mut self, peer_id: PeerId, text: &str, system: bool) {
        let line = if system {
            text.to_string()
        } else {
            let name = self
                .registry
                .get(peer_id)
                .map(|p| p.name.as_str())
                .unwrap_or("unknown");
            format!("{}: {}", name, text)
        };
        self.events.publish(SessionEvent::ChatReceived {
            peer_id,
            line,
            system,
        });
    }

    // ---- local operations ---------------------------------------------

    /// Declares the local participant's intent to begin. On a peer this is
    /// a request the authority ratifies by relaying; the local flag only
    /// changes when the echo comes back.
    pub fn set_ready(&mut self, ready: bool) {
        let Some(peer_id) = self.peer_id else {
            return;
        };
        let message = Message::ReadyForSessionChange { peer_id, ready };
        if self.authority {
            self.apply_ready(peer_id, ready);
            self.broadcast_msg(&message, None);
        } else {
            self.send_to(AUTHORITY_ID, &message);
        }
    }

    pub fn send_chat(&mut self, text: impl Into<String>) {
        let Some(peer_id) = self.peer_id else {
            return;
        };
        let text = text.into();
        self.publish_chat(peer_id, &text, false);
        let message = Message::Chat {
            peer_id,
            text,
            system: false,
        };
        if self.authority {
            self.broadcast_msg(&message, None);
        } else {
            self.send_to(AUTHORITY_ID, &message);
        }
    }

    /// Authority-only system line shown to everyone.
    pub fn announce(&mut self, text: impl Into<String>) {
        if !self.authority {
            warn!("only the authority can announce");
            return;
        }
        let text = text.into();
        self.publish_chat(AUTHORITY_ID, &text, true);
        self.broadcast_msg(
            &Message::Chat {
                peer_id: AUTHORITY_ID,
                text,
                system: true,
            },
            None,
        );
    }

    pub fn set_custom_int(&mut self, peer_id: PeerId, key: impl Into<String>, value: i32) -> bool {
        if !self.authority {
            warn!("custom attributes are authority-writable only");
            return false;
        }
        let key = key.into();
        match self.registry.get_mut(peer_id) {
            Some(participant) => {
                participant.custom_ints.insert(key.clone(), value);
                self.broadcast_msg(&Message::IntAttrSync { peer_id, key, value }, None);
                true
            }
            None => false,
        }
    }

    pub fn set_custom_float(
        &mut self,
        peer_id: PeerId,
        key: impl Into<String>,
        value: f32,
    ) -> bool {
        if !self.authority {
            warn!("custom attributes are authority-writable only");
            return false;
        }
        let key = key.into();
        match self.registry.get_mut(peer_id) {
            Some(participant) => {
                participant.custom_floats.insert(key.clone(), value);
                self.broadcast_msg(&Message::FloatAttrSync { peer_id, key, value }, None);
                true
            }
            None => false,
        }
    }

    /// Removes a participant with a human-readable reason and drops its
    /// link. The registry is updated immediately so a lost transport
    /// notification cannot leave a ghost entry.
    pub fn kick(&mut self, peer_id: PeerId, reason: impl Into<String>) -> bool {
        if !self.authority {
            warn!("only the authority can kick");
            return false;
        }
        if peer_id == AUTHORITY_ID || !self.registry.contains(peer_id) {
            return false;
        }
        let reason = reason.into();
        info!("kicking peer {}: {}", peer_id, reason);
        self.send_to(peer_id, &Message::Kick { reason });
        self.transport.disconnect(peer_id);
        if self.registry.remove(peer_id).is_some() {
            self.broadcast_msg(&Message::PlayerDisconnected { peer_id }, None);
            self.events.publish(SessionEvent::RosterChanged);
        }
        true
    }

    /// Voluntary disconnect. Terminal for this session.
    pub fn disconnect(&mut self) {
        if self.authority {
            for peer_id in self.registry.ids_sorted() {
                if Some(peer_id) != self.peer_id {
                    self.transport.disconnect(peer_id);
                }
            }
        } else if let Some(peer_id) = self.peer_id {
            self.transport.disconnect(peer_id);
        }
        self.teardown();
    }

    // ---- frame update -------------------------------------------------

    /// Per-frame driver: advances the clock, replicates elapsed time from
    /// the authority, and raises the local network tick.
    pub fn update(&mut self, dt: f32) {
        if self.terminated {
            return;
        }
        let output = self.clock.advance(dt, self.authority && self.in_session);
        if let Some((minutes, seconds)) = output.time_sync {
            self.broadcast_msg(&Message::TimeSync { minutes, seconds }, None);
        }
        if let Some(delta) = output.network_tick {
            self.events.publish(SessionEvent::NetworkTick { delta });
        }
    }

    // ---- outbound helpers ---------------------------------------------

    pub(crate) fn send_to(&self, peer_id: PeerId, message: &Message) {
        match bincode::serialize(message) {
            Ok(bytes) => self.transport.send(peer_id, bytes, message.kind().channel()),
            Err(e) => error!("failed to encode {:?}: {}", message.kind(), e),
        }
    }

    pub(crate) fn broadcast_msg(&self, message: &Message, exclude: Option<PeerId>) {
        match bincode::serialize(message) {
            Ok(bytes) => self
                .transport
                .broadcast(bytes, message.kind().channel(), exclude),
            Err(e) => error!("failed to encode {:?}: {}", message.kind(), e),
        }
    }

    /// Targets every remote participant whose mirrored status is in
    /// `allowed`. Used by the lifecycle fan-out, which must not re-trigger
    /// peers already in the flow.
    pub(crate) fn send_to_peers_with_status(
        &self,
        message: &Message,
        allowed: &[ParticipantStatus],
    ) {
        for peer_id in self.registry.ids_sorted() {
            if Some(peer_id) == self.peer_id {
                continue;
            }
            if let Some(status) = self.registry.status(peer_id) {
                if allowed.contains(&status) {
                    self.send_to(peer_id, message);
                }
            }
        }
    }

    // ---- accessors ----------------------------------------------------

    pub fn local_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn is_authority(&self) -> bool {
        self.authority
    }

    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_in_session(&self) -> bool {
        self.in_session
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.clock.elapsed_seconds()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn participant(&self, peer_id: PeerId) -> Option<&Participant> {
        self.registry.get(peer_id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.registry.iter()
    }

    pub fn participant_count(&self) -> usize {
        self.registry.len()
    }

    pub fn local_participant(&self) -> Option<&Participant> {
        self.peer_id.and_then(|id| self.registry.get(id))
    }
}
