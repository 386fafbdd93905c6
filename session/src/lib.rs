//! # Session Orchestration Library
//!
//! Distributed session coordination for a variable set of remote
//! participants joining a shared real-time activity through a single
//! authoritative coordinator.
//!
//! ## Architecture
//!
//! One [`SessionContext`] is constructed per process at startup, either
//! hosting (it claims the reserved authority peer id) or joining. The
//! context is the mediator every cross-peer effect flows through: it owns
//! the participant registry, interprets incoming messages, re-broadcasts
//! authoritative state to the other peers and raises events for external
//! collaborators. Peers never mutate each other's state directly; all
//! consistency is achieved by relay through the authority, which processes
//! registrations and status transitions one at a time.
//!
//! Delivery is fire-and-forget over an external transport. The reliable
//! channel preserves per-pair ordering; the unreliable channel (used only
//! for the elapsed-time mirror) may drop or reorder, and the mirror
//! self-corrects on the next received value.
//!
//! ## Module Organization
//!
//! - [`registry`] — per-observer participant records and the status-cycle
//!   guard.
//! - [`context`] — the mediator: central message dispatch, the
//!   registration protocol, chat, attributes, kick and teardown.
//! - [`lifecycle`] — the ordered enter/exit broadcast sequences around the
//!   externally supplied activity.
//! - [`ticker`] — authoritative elapsed time, its periodic replication and
//!   the local network tick.
//! - [`events`] — publish/subscribe fan-out towards UI and gameplay.
//! - [`transport`] — the transport interface plus the in-process loopback
//!   hub used by tests and demos.
//! - [`runtime`] — the `tokio::select!` loop interleaving transport events
//!   with frame updates, and the background port-mapping dispatch.

pub mod context;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod runtime;
pub mod ticker;
pub mod transport;

pub use context::SessionContext;
pub use events::{EventBus, SessionEvent};
pub use lifecycle::Activity;
pub use registry::ParticipantRegistry;
pub use runtime::{PortMapper, SessionRuntime};
pub use ticker::{ClockOutput, SessionClock};
pub use transport::{ConnectFailure, MemoryEndpoint, MemoryHub, Transport, TransportEvent};
