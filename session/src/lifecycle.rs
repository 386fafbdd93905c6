//! Lifecycle sequencer: the ordered pre-load/post-load/pre-exit/post-exit
//! broadcast sequences wrapping the shared activity.
//!
//! Every step is authority-originated. Peers are pulled into a sequence by
//! targeted step messages, ratified through `StatusChange`, and report
//! their own load completion back with `WorldReady`. Steps arriving out of
//! order are ignored by the status guards; a failed load stalls the
//! sequence with the participant left `Joining`, surfaced to the
//! application rather than auto-recovered.

use crate::context::SessionContext;
use crate::events::SessionEvent;
use log::{debug, info, warn};
use shared::{Message, ParticipantStatus, PeerId, AUTHORITY_ID};
use std::error::Error;

/// The externally supplied shared activity (world, match, level). The core
/// sequences around it and never looks inside.
pub trait Activity {
    fn load(&mut self) -> Result<(), Box<dyn Error>>;
    fn unload(&mut self);
}

/// Statuses that mean "part of the current session flow".
const IN_FLOW: [ParticipantStatus; 3] = [
    ParticipantStatus::Joining,
    ParticipantStatus::Active,
    ParticipantStatus::Leaving,
];

impl SessionContext {
    /// Flips `in_session` on. Guarded: starting an already-started session
    /// is a no-op, not an error.
    pub(crate) fn start_session_flag(&mut self) -> bool {
        if self.in_session {
            debug!("session already started");
            return false;
        }
        info!("session started");
        self.in_session = true;
        true
    }

    /// Symmetric guard for the off direction.
    pub(crate) fn end_session_flag(&mut self) -> bool {
        if !self.in_session {
            debug!("session already ended");
            return false;
        }
        info!("session ended");
        self.in_session = false;
        true
    }

    /// Enter sequence. Marks every lobby participant `Joining`, pulls lobby
    /// peers into the loading flow, runs the externally supplied load and
    /// announces the arrival. The `Active` transition happens separately
    /// when the loaded activity signals readiness via [`activity_ready`].
    ///
    /// [`activity_ready`]: SessionContext::activity_ready
    pub fn enter_session(&mut self, activity: &mut dyn Activity) -> Result<(), Box<dyn Error>> {
        if !self.authority {
            warn!("only the authority can start the session");
            return Ok(());
        }

        if self.start_session_flag() {
            self.events.publish(SessionEvent::SessionStarted);
        }

        let trigger = self.peer_id.unwrap_or(AUTHORITY_ID);

        // Pre-load goes to peers still in the lobby; peers already active
        // are in the flow and are not re-triggered.
        self.send_to_peers_with_status(
            &Message::WorldPreLoad { peer_id: trigger },
            &[ParticipantStatus::Lobby],
        );
        for peer_id in self.registry.ids_sorted() {
            if self.registry.status(peer_id) == Some(ParticipantStatus::Lobby) {
                self.apply_status(peer_id, ParticipantStatus::Joining);
                self.broadcast_msg(
                    &Message::StatusChange {
                        peer_id,
                        status: ParticipantStatus::Joining,
                    },
                    None,
                );
            }
        }
        self.events
            .publish(SessionEvent::WorldLoadStarted { peer_id: trigger });

        // The sequence stalls here on failure: no post-load is ever sent
        // and the participants stay Joining.
        if let Err(e) = activity.load() {
            warn!("activity load failed: {}", e);
            return Err(e);
        }

        self.send_to_peers_with_status(
            &Message::WorldPostLoad { peer_id: trigger },
            &[ParticipantStatus::Joining],
        );
        self.events
            .publish(SessionEvent::ParticipantArrived { peer_id: trigger });
        Ok(())
    }

    /// Signal from the loaded activity that it is ready. On the authority
    /// this completes the local enter sequence; on a peer it asks the
    /// authority to ratify the transition.
    pub fn activity_ready(&mut self) {
        let Some(peer_id) = self.peer_id else {
            return;
        };
        if self.authority {
            self.finish_ready(peer_id);
        } else {
            self.send_to(AUTHORITY_ID, &Message::WorldReady { peer_id });
        }
    }

    /// Authority-side completion of a participant's enter sequence.
    fn finish_ready(&mut self, peer_id: PeerId) {
        if self.registry.status(peer_id) != Some(ParticipantStatus::Joining) {
            debug!(
                "ignoring ready for participant {} outside the joining step",
                peer_id
            );
            return;
        }
        self.send_to_peers_with_status(&Message::WorldReady { peer_id }, &IN_FLOW);
        self.apply_status(peer_id, ParticipantStatus::Active);
        self.broadcast_msg(
            &Message::StatusChange {
                peer_id,
                status: ParticipantStatus::Active,
            },
            None,
        );
    }

    /// Exit sequence. Walks every active participant back to the lobby
    /// around the externally supplied unload and zeroes the replicated
    /// clock exactly at session end.
    pub fn exit_session(&mut self, activity: &mut dyn Activity) {
        if !self.authority {
            warn!("only the authority can end the session");
            return;
        }
        if !self.in_session {
            debug!("session already ended");
            return;
        }

        let trigger = self.peer_id.unwrap_or(AUTHORITY_ID);

        self.send_to_peers_with_status(&Message::WorldPreExit { peer_id: trigger }, &IN_FLOW);
        for peer_id in self.registry.ids_sorted() {
            if self.registry.status(peer_id) == Some(ParticipantStatus::Active) {
                self.apply_status(peer_id, ParticipantStatus::Leaving);
                self.broadcast_msg(
                    &Message::StatusChange {
                        peer_id,
                        status: ParticipantStatus::Leaving,
                    },
                    None,
                );
            }
        }
        self.events
            .publish(SessionEvent::ParticipantLeft { peer_id: trigger });

        activity.unload();

        self.end_session_flag();
        self.send_to_peers_with_status(&Message::WorldPostExit { peer_id: trigger }, &IN_FLOW);
        for peer_id in self.registry.ids_sorted() {
            if self.registry.status(peer_id) == Some(ParticipantStatus::Leaving) {
                self.apply_status(peer_id, ParticipantStatus::Lobby);
                self.broadcast_msg(
                    &Message::StatusChange {
                        peer_id,
                        status: ParticipantStatus::Lobby,
                    },
                    None,
                );
            }
        }

        // Lobby readiness does not survive a completed session.
        let mut cleared = Vec::new();
        for peer_id in self.registry.ids_sorted() {
            if let Some(participant) = self.registry.get_mut(peer_id) {
                if participant.ready_for_session {
                    participant.ready_for_session = false;
                    cleared.push(peer_id);
                }
            }
        }
        for peer_id in cleared {
            self.broadcast_msg(
                &Message::ReadyForSessionChange {
                    peer_id,
                    ready: false,
                },
                None,
            );
            self.events
                .publish(SessionEvent::ReadyForSessionChanged {
                    peer_id,
                    ready: false,
                });
        }

        self.clock.reset();
        self.events.publish(SessionEvent::RosterChanged);
        self.events.publish(SessionEvent::SessionEnded);
    }

    // ---- peer-side step handlers --------------------------------------

    pub(crate) fn on_world_pre_load(&mut self, peer_id: PeerId) {
        // The session is running; start loading locally.
        self.in_session = true;
        self.events
            .publish(SessionEvent::WorldLoadStarted { peer_id });
    }

    pub(crate) fn on_world_post_load(&mut self, peer_id: PeerId) {
        // Post-load can only follow pre-load.
        if self.registry.status(peer_id) != Some(ParticipantStatus::Joining) {
            debug!("ignoring out-of-order post-load for participant {}", peer_id);
            return;
        }
        self.events
            .publish(SessionEvent::ParticipantArrived { peer_id });
    }

    pub(crate) fn on_world_ready(&mut self, peer_id: PeerId) {
        if self.authority {
            // A peer finished loading; ratify and fan out.
            self.finish_ready(peer_id);
        } else {
            // Flow signal only; the status itself arrives as StatusChange.
            debug!("participant {} ready", peer_id);
        }
    }

    pub(crate) fn on_world_pre_exit(&mut self, peer_id: PeerId) {
        if !self.in_session {
            debug!("ignoring pre-exit outside a session");
            return;
        }
        self.events
            .publish(SessionEvent::ParticipantLeft { peer_id });
    }

    pub(crate) fn on_world_post_exit(&mut self, peer_id: PeerId) {
        if !self.in_session {
            debug!("ignoring post-exit outside a session");
            return;
        }
        debug!("participant {} completed the exit sequence", peer_id);
        self.in_session = false;
        self.clock.reset();
        self.events.publish(SessionEvent::RosterChanged);
        self.events.publish(SessionEvent::SessionEnded);
    }
}
