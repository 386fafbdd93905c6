//! Publish/subscribe fan-out for session state changes.
//!
//! External collaborators (UI, world loader, gameplay systems) never mutate
//! the registry; they subscribe here and react to events. Delivery happens
//! in subscription order and subscribers cannot mutate the listener list
//! from inside a handler because they consume events from their own channel.

use crate::transport::ConnectFailure;
use shared::{ParticipantStatus, PeerId};
use tokio::sync::mpsc;

/// State-change notifications raised by the session context.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The participant set changed (join, leave, kick, teardown).
    RosterChanged,
    /// A participant moved through the status cycle.
    StatusChanged {
        peer_id: PeerId,
        status: ParticipantStatus,
    },
    /// A participant toggled its lobby readiness flag.
    ReadyForSessionChanged { peer_id: PeerId, ready: bool },
    /// A formatted chat line arrived.
    ChatReceived {
        peer_id: PeerId,
        line: String,
        system: bool,
    },
    /// Connecting to the coordinator failed, or the link was lost. Terminal.
    ConnectionFailed { failure: ConnectFailure },
    /// The authority removed us from the session. Terminal.
    Kicked { reason: String },
    /// The shared activity was started by the authority.
    SessionStarted,
    /// The shared activity ended; everyone is back in the lobby.
    SessionEnded,
    /// A lifecycle pre-load step: the local process should load the world.
    WorldLoadStarted { peer_id: PeerId },
    /// A participant finished loading and arrived in the world.
    ParticipantArrived { peer_id: PeerId },
    /// A participant started leaving the world.
    ParticipantLeft { peer_id: PeerId },
    /// The authoritative elapsed-time mirror was refreshed.
    TimeSynced { minutes: u32, seconds: u32 },
    /// Fixed-cadence local tick for gameplay systems, never replicated.
    NetworkTick { delta: f32 },
    /// Background port-mapping discovery finished.
    PortMappingCompleted { external_port: Option<u16> },
}

/// Bounded-by-usage listener list. Each subscriber owns an unbounded
/// receiver; publishing clones the event to every live subscriber in
/// registration order and prunes closed ones.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers_in_order() {
        let mut bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(SessionEvent::RosterChanged);
        bus.publish(SessionEvent::SessionStarted);

        assert_eq!(first.try_recv().unwrap(), SessionEvent::RosterChanged);
        assert_eq!(first.try_recv().unwrap(), SessionEvent::SessionStarted);
        assert_eq!(second.try_recv().unwrap(), SessionEvent::RosterChanged);
        assert_eq!(second.try_recv().unwrap(), SessionEvent::SessionStarted);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let mut bus = EventBus::new();
        let first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(first);
        bus.publish(SessionEvent::RosterChanged);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(second.try_recv().unwrap(), SessionEvent::RosterChanged);
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let mut bus = EventBus::new();
        bus.publish(SessionEvent::SessionEnded);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
