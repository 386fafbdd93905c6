//! Authoritative-per-observer participant bookkeeping.
//!
//! Every process holds one registry: the authority's copy is canonical, the
//! others are mirrors kept consistent through authority relay. The registry
//! is exclusively mutated by the session context on its single execution
//! context; external collaborators read it and subscribe to change events.

use log::{debug, info};
use shared::{Participant, ParticipantStatus, PeerId};
use std::collections::HashMap;

/// Participant records indexed by peer id, with a capacity limit enforced
/// on the authority at registration time.
pub struct ParticipantRegistry {
    participants: HashMap<PeerId, Participant>,
    capacity: usize,
}

impl ParticipantRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            participants: HashMap::new(),
            capacity,
        }
    }

    /// Adds a record. Re-registration of an already-known id is a no-op:
    /// the existing record is kept untouched and `false` is returned, so
    /// callers raise no duplicate events.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if self.participants.contains_key(&participant.id) {
            debug!("participant {} already registered", participant.id);
            return false;
        }
        info!(
            "participant {} ({}) registered",
            participant.id, participant.name
        );
        self.participants.insert(participant.id, participant);
        true
    }

    pub fn remove(&mut self, peer_id: PeerId) -> Option<Participant> {
        let removed = self.participants.remove(&peer_id);
        if let Some(participant) = &removed {
            info!("participant {} ({}) removed", participant.id, participant.name);
        }
        removed
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&Participant> {
        self.participants.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut Participant> {
        self.participants.get_mut(&peer_id)
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.participants.contains_key(&peer_id)
    }

    pub fn status(&self, peer_id: PeerId) -> Option<ParticipantStatus> {
        self.participants.get(&peer_id).map(|p| p.status)
    }

    /// Moves a participant one step along the status cycle. Any other edge
    /// is rejected: the mirror keeps its current value and the caller skips
    /// its event. Out-of-order lifecycle messages land here and die quietly.
    pub fn advance_status(&mut self, peer_id: PeerId, next: ParticipantStatus) -> bool {
        match self.participants.get_mut(&peer_id) {
            Some(participant) if participant.status.can_become(next) => {
                participant.status = next;
                true
            }
            Some(participant) => {
                debug!(
                    "ignoring status {:?} for participant {} currently {:?}",
                    next, peer_id, participant.status
                );
                false
            }
            None => {
                debug!("status change for unknown participant {}", peer_id);
                false
            }
        }
    }

    /// Ids in ascending order, for deterministic fan-out.
    pub fn ids_sorted(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.participants.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wipes every record. Used on disconnect teardown.
    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
