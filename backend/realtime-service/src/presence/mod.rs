//! Who is connected, and which channels each connection has joined.
//!
//! Nothing here is persisted; a restart resets everyone to offline until
//! they reconnect.

mod channel;
mod registry;

pub use channel::{Channel, ConnectionId};
pub use registry::{Departure, InMemoryPresenceRegistry, OutboundSender, PresenceRegistry};
