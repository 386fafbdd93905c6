use clap::Parser;
use log::info;
use session::{Activity, MemoryHub, SessionContext, TransportEvent};
use shared::SessionSettings;
use tokio::sync::mpsc;

/// Local demo world standing in for the externally supplied activity.
struct DemoWorld;

impl Activity for DemoWorld {
    fn load(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("world loaded");
        Ok(())
    }

    fn unload(&mut self) {
        info!("world unloaded");
    }
}

/// Delivers every queued transport event until all contexts are quiescent.
fn pump(
    host: &mut SessionContext,
    host_rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    peers: &mut [(SessionContext, mpsc::UnboundedReceiver<TransportEvent>)],
) {
    loop {
        let mut moved = false;
        while let Ok(event) = host_rx.try_recv() {
            host.handle_transport_event(event);
            moved = true;
        }
        for (peer, rx) in peers.iter_mut() {
            while let Ok(event) = rx.try_recv() {
                peer.handle_transport_event(event);
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

/// Hosts a session over the in-process loopback hub, joins simulated peers
/// and drives a complete lobby -> load -> active -> exit cycle.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Session capacity, the host included
        #[clap(short, long, default_value = "4")]
        capacity: usize,
        /// Number of simulated joining peers
        #[clap(short, long, default_value = "2")]
        peers: usize,
        /// Activity mode to run
        #[clap(short, long, default_value = "cooperative")]
        activity: String,
        /// Seconds of session time to simulate
        #[clap(short, long, default_value = "5.0")]
        seconds: f32,
    }

    env_logger::init();
    let args = Args::parse();

    let settings = SessionSettings {
        capacity: args.capacity,
        activity: args.activity.clone(),
        ..SessionSettings::default()
    };

    let hub = MemoryHub::new();
    let (endpoint, mut host_rx) = hub.open_authority();
    let mut host = SessionContext::host(settings, Box::new(endpoint), "host", false);
    let mut host_events = host.subscribe();

    let mut peers = Vec::new();
    for index in 0..args.peers {
        let (endpoint, rx) = hub.connect();
        let peer = SessionContext::join(Box::new(endpoint), format!("peer-{}", index + 1));
        peers.push((peer, rx));
    }

    // Registration settles; peers past capacity are rejected with
    // "server full" and dropped.
    pump(&mut host, &mut host_rx, &mut peers);
    info!(
        "roster after registration: {} participants",
        host.participant_count()
    );

    for (peer, _) in peers.iter_mut() {
        peer.set_ready(true);
    }
    pump(&mut host, &mut host_rx, &mut peers);

    let mut world = DemoWorld;
    host.announce("session starting");
    host.enter_session(&mut world)?;
    pump(&mut host, &mut host_rx, &mut peers);

    host.activity_ready();
    for (peer, _) in peers.iter_mut() {
        peer.activity_ready();
    }
    pump(&mut host, &mut host_rx, &mut peers);

    // Frame loop: the authority accumulates session time and replicates it.
    let dt = 1.0 / 30.0;
    let frames = (args.seconds / dt).ceil() as usize;
    for _ in 0..frames {
        host.update(dt);
        for (peer, _) in peers.iter_mut() {
            peer.update(dt);
        }
        pump(&mut host, &mut host_rx, &mut peers);
    }
    info!("elapsed on host: {:.1}s", host.elapsed_seconds());
    if let Some((peer, _)) = peers.first() {
        info!("elapsed mirrored on {}: {:.1}s", "peer-1", peer.elapsed_seconds());
    }

    host.exit_session(&mut world);
    pump(&mut host, &mut host_rx, &mut peers);

    while let Ok(event) = host_events.try_recv() {
        info!("host event: {:?}", event);
    }
    for participant in host.participants() {
        info!("final roster: {} ({:?})", participant.name, participant.status);
    }

    Ok(())
}
