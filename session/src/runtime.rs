//! Async driver running a session context on a single logical loop.
//!
//! Transport events and frame ticks are interleaved through one
//! `tokio::select!`, so message handlers and frame-driven logic never race
//! on the registry. The one explicitly asynchronous operation, port-mapping
//! discovery, runs on the blocking pool and its result re-enters this loop
//! as an event instead of touching shared state from the worker.

use crate::context::SessionContext;
use crate::events::SessionEvent;
use crate::transport::{ConnectFailure, TransportEvent};
use log::{info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};

/// External NAT port-mapping collaborator. Implementations may block; the
/// runtime dispatches them to a background worker.
pub trait PortMapper: Send + 'static {
    fn map_port(&self, internal: u16) -> Result<u16, String>;
}

impl<F> PortMapper for F
where
    F: Fn(u16) -> Result<u16, String> + Send + 'static,
{
    fn map_port(&self, internal: u16) -> Result<u16, String> {
        self(internal)
    }
}

pub struct SessionRuntime {
    context: SessionContext,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    frame: Duration,
    connect_timeout: Duration,
    port_mapping: Option<(Box<dyn PortMapper>, u16)>,
}

impl SessionRuntime {
    pub fn new(
        context: SessionContext,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            context,
            transport_rx,
            frame: Duration::from_millis(33),
            connect_timeout: Duration::from_secs(10),
            port_mapping: None,
        }
    }

    pub fn with_frame_interval(mut self, frame: Duration) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_port_mapper<M: PortMapper>(mut self, mapper: M, internal_port: u16) -> Self {
        self.port_mapping = Some((Box::new(mapper), internal_port));
        self
    }

    /// Runs until the context terminates or the transport closes. Returns
    /// the context so the caller can inspect the final state.
    pub async fn run(mut self) -> SessionContext {
        let mut port_rx = None;
        if let Some((mapper, port)) = self.port_mapping.take() {
            let (tx, rx) = oneshot::channel();
            tokio::task::spawn_blocking(move || {
                let _ = tx.send(mapper.map_port(port));
            });
            port_rx = Some(rx);
        }
        let mut port_pending = port_rx.is_some();

        // A joining context must see its connection attempt complete in
        // time; "timed out" and "refused" reach the user as distinct
        // failures.
        if !self.context.is_authority() && self.context.local_id().is_none() {
            match tokio::time::timeout(self.connect_timeout, self.transport_rx.recv()).await {
                Ok(Some(event)) => self.context.handle_transport_event(event),
                Ok(None) => return self.context,
                Err(_) => {
                    warn!("connection attempt timed out");
                    self.context
                        .handle_transport_event(TransportEvent::ConnectFailed {
                            failure: ConnectFailure::Timeout,
                        });
                    return self.context;
                }
            }
        }

        let mut frame_interval = interval(self.frame);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Cap the delta so a hitch cannot flood the clock.
        let max_dt = 0.25_f32;
        let mut last_frame = Instant::now();
        // Skip the first tick since it fires immediately.
        frame_interval.tick().await;

        loop {
            if self.context.is_terminated() {
                break;
            }

            tokio::select! {
                event = self.transport_rx.recv() => match event {
                    Some(event) => self.context.handle_transport_event(event),
                    None => break,
                },

                result = await_port_mapping(&mut port_rx), if port_pending => {
                    port_pending = false;
                    port_rx = None;
                    let external_port = match result {
                        Ok(Ok(port)) => {
                            info!("port mapping established on {}", port);
                            Some(port)
                        }
                        Ok(Err(reason)) => {
                            warn!("port mapping failed: {}", reason);
                            None
                        }
                        Err(_) => {
                            warn!("port mapping worker dropped");
                            None
                        }
                    };
                    self.context
                        .events
                        .publish(SessionEvent::PortMappingCompleted { external_port });
                },

                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_frame).as_secs_f32().min(max_dt);
                    last_frame = now;
                    self.context.update(dt);
                },
            }
        }

        self.context
    }
}

async fn await_port_mapping(
    slot: &mut Option<oneshot::Receiver<Result<u16, String>>>,
) -> Result<Result<u16, String>, oneshot::error::RecvError> {
    match slot.as_mut() {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}
