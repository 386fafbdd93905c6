//! Integration tests for the lifecycle sequencer and the replicated clock.

use session::{
    Activity, MemoryEndpoint, MemoryHub, SessionContext, SessionEvent, Transport, TransportEvent,
};
use shared::{Channel, Message, ParticipantStatus, SessionSettings, AUTHORITY_ID};
use std::error::Error;
use tokio::sync::mpsc::UnboundedReceiver;

struct TestActivity {
    loaded: bool,
    fail_load: bool,
}

impl TestActivity {
    fn new() -> Self {
        Self {
            loaded: false,
            fail_load: false,
        }
    }
}

impl Activity for TestActivity {
    fn load(&mut self) -> Result<(), Box<dyn Error>> {
        if self.fail_load {
            return Err("load refused".into());
        }
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.loaded = false;
    }
}

struct Node {
    context: SessionContext,
    transport_rx: UnboundedReceiver<TransportEvent>,
    events: UnboundedReceiver<SessionEvent>,
    raw: MemoryEndpoint,
}

impl Node {
    fn host(hub: &MemoryHub, capacity: usize) -> Node {
        let (endpoint, transport_rx) = hub.open_authority();
        let raw = endpoint.clone();
        let settings = SessionSettings {
            capacity,
            ..SessionSettings::default()
        };
        let mut context = SessionContext::host(settings, Box::new(endpoint), "host", false);
        let events = context.subscribe();
        Node {
            context,
            transport_rx,
            events,
            raw,
        }
    }

    fn join(hub: &MemoryHub, name: &str) -> Node {
        let (endpoint, transport_rx) = hub.connect();
        let raw = endpoint.clone();
        let mut context = SessionContext::join(Box::new(endpoint), name);
        let events = context.subscribe();
        Node {
            context,
            transport_rx,
            events,
            raw,
        }
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn status_of(&self, peer_id: u32) -> ParticipantStatus {
        self.context.participant(peer_id).unwrap().status
    }
}

fn pump(nodes: &mut [&mut Node]) {
    loop {
        let mut moved = false;
        for node in nodes.iter_mut() {
            while let Ok(event) = node.transport_rx.try_recv() {
                node.context.handle_transport_event(event);
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

#[test]
fn enter_sequence_is_observed_exactly_once_everywhere() {
    // Scenario: one full enter sequence yields exactly one pre-load, one
    // post-load and one ready transition per observer, final status Active.
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);
    host.drain_events();
    alice.drain_events();

    let mut world = TestActivity::new();
    host.context.enter_session(&mut world).unwrap();
    assert!(world.loaded);
    pump(&mut [&mut host, &mut alice]);

    host.context.activity_ready();
    alice.context.activity_ready();
    pump(&mut [&mut host, &mut alice]);

    for node in [&mut host, &mut alice] {
        let events = node.drain_events();
        let pre_loads = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::WorldLoadStarted { .. }))
            .count();
        let arrivals = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::ParticipantArrived { .. }))
            .count();
        let host_active = events
            .iter()
            .filter(|e| {
                **e == SessionEvent::StatusChanged {
                    peer_id: AUTHORITY_ID,
                    status: ParticipantStatus::Active,
                }
            })
            .count();
        assert_eq!(pre_loads, 1);
        assert_eq!(arrivals, 1);
        assert_eq!(host_active, 1);
    }

    for node in [&host, &alice] {
        assert_eq!(node.status_of(AUTHORITY_ID), ParticipantStatus::Active);
        assert_eq!(node.status_of(2), ParticipantStatus::Active);
        assert!(node.context.is_in_session());
    }
}

#[test]
fn status_follows_the_cycle_on_every_mirror() {
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);

    let mut world = TestActivity::new();
    host.context.enter_session(&mut world).unwrap();
    pump(&mut [&mut host, &mut alice]);
    assert_eq!(alice.status_of(2), ParticipantStatus::Joining);

    alice.context.activity_ready();
    host.context.activity_ready();
    pump(&mut [&mut host, &mut alice]);
    assert_eq!(alice.status_of(2), ParticipantStatus::Active);
    assert_eq!(host.status_of(2), ParticipantStatus::Active);

    host.context.exit_session(&mut world);
    pump(&mut [&mut host, &mut alice]);
    assert_eq!(host.status_of(2), ParticipantStatus::Lobby);
    assert_eq!(alice.status_of(2), ParticipantStatus::Lobby);
    assert!(!host.context.is_in_session());
    assert!(!alice.context.is_in_session());
}

#[test]
fn out_of_order_lifecycle_steps_are_ignored() {
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);
    alice.drain_events();

    // Post-load for a participant that never saw pre-load.
    let out_of_order = Message::WorldPostLoad {
        peer_id: AUTHORITY_ID,
    };
    host.raw.send(
        2,
        bincode::serialize(&out_of_order).unwrap(),
        Channel::Reliable,
    );
    pump(&mut [&mut host, &mut alice]);

    assert!(alice
        .drain_events()
        .iter()
        .all(|e| !matches!(e, SessionEvent::ParticipantArrived { .. })));

    // Ready before pre-load is equally dead on the authority.
    alice.context.activity_ready();
    pump(&mut [&mut host, &mut alice]);
    assert_eq!(host.status_of(2), ParticipantStatus::Lobby);
}

#[test]
fn failed_load_stalls_without_post_load() {
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);
    alice.drain_events();

    let mut world = TestActivity::new();
    world.fail_load = true;
    assert!(host.context.enter_session(&mut world).is_err());
    pump(&mut [&mut host, &mut alice]);

    assert_eq!(host.status_of(AUTHORITY_ID), ParticipantStatus::Joining);
    let events = alice.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::WorldLoadStarted { .. })));
    assert!(events
        .iter()
        .all(|e| !matches!(e, SessionEvent::ParticipantArrived { .. })));
}

#[test]
fn mid_session_joiner_is_pulled_into_the_flow() {
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);

    let mut world = TestActivity::new();
    host.context.enter_session(&mut world).unwrap();
    host.context.activity_ready();
    alice.context.activity_ready();
    pump(&mut [&mut host, &mut alice]);

    let mut bob = Node::join(&hub, "bob");
    pump(&mut [&mut host, &mut alice, &mut bob]);

    // Bob was told to load rather than sitting in the lobby.
    assert!(bob
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::WorldLoadStarted { .. })));
    assert!(bob.context.is_in_session());
    assert_eq!(host.status_of(3), ParticipantStatus::Joining);

    bob.context.activity_ready();
    pump(&mut [&mut host, &mut alice, &mut bob]);
    assert_eq!(host.status_of(3), ParticipantStatus::Active);
    assert_eq!(alice.status_of(3), ParticipantStatus::Active);
}

#[test]
fn elapsed_time_replicates_and_resets_on_exit() {
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);

    let mut world = TestActivity::new();
    host.context.enter_session(&mut world).unwrap();
    host.context.activity_ready();
    alice.context.activity_ready();
    pump(&mut [&mut host, &mut alice]);

    // 90 seconds of session time in one-second frames; the sync interval
    // defaults to one second so pushes flow continuously.
    for _ in 0..90 {
        host.context.update(1.0);
        alice.context.update(1.0);
        pump(&mut [&mut host, &mut alice]);
    }
    assert!(host.context.elapsed_seconds() >= 90.0);
    assert!(alice.context.elapsed_seconds() >= 89.0);
    assert!(alice
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::TimeSynced { .. })));

    host.context.exit_session(&mut world);
    pump(&mut [&mut host, &mut alice]);
    assert_eq!(host.context.elapsed_seconds(), 0.0);
    assert_eq!(alice.context.elapsed_seconds(), 0.0);
}

#[test]
fn time_sync_tolerates_unreliable_drops() {
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);

    let mut world = TestActivity::new();
    host.context.enter_session(&mut world).unwrap();
    host.context.activity_ready();
    alice.context.activity_ready();
    pump(&mut [&mut host, &mut alice]);

    hub.set_drop_unreliable(true);
    for _ in 0..10 {
        host.context.update(1.0);
        pump(&mut [&mut host, &mut alice]);
    }
    // Nothing arrived; the mirror just lags.
    assert_eq!(alice.context.elapsed_seconds(), 0.0);

    hub.set_drop_unreliable(false);
    host.context.update(1.0);
    pump(&mut [&mut host, &mut alice]);
    // The next received push corrects the mirror in one step.
    assert!(alice.context.elapsed_seconds() >= 10.0);
}

#[test]
fn readiness_clears_when_the_session_ends() {
    let hub = MemoryHub::new();
    let mut host = Node::host(&hub, 4);
    let mut alice = Node::join(&hub, "alice");
    pump(&mut [&mut host, &mut alice]);

    alice.context.set_ready(true);
    pump(&mut [&mut host, &mut alice]);
    assert!(host.context.participant(2).unwrap().ready_for_session);

    let mut world = TestActivity::new();
    host.context.enter_session(&mut world).unwrap();
    host.context.activity_ready();
    alice.context.activity_ready();
    pump(&mut [&mut host, &mut alice]);

    host.context.exit_session(&mut world);
    pump(&mut [&mut host, &mut alice]);

    for node in [&host, &alice] {
        assert!(!node.context.participant(2).unwrap().ready_for_session);
        assert!(!node
            .context
            .participant(AUTHORITY_ID)
            .unwrap()
            .ready_for_session);
    }
}
