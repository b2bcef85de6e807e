//! Realm Stream - Getting world state to observers
//!
//! The coordinator decides which chunks each observer needs, rate-limits
//! their delivery, and fans block deltas out in application order. Delivery
//! itself goes through a [`Transport`].

pub mod coordinator;
pub mod messages;
pub mod transport;

pub use coordinator::{PumpStats, StreamConfig, StreamingCoordinator};
pub use messages::{ClientMessage, ServerMessage};
pub use transport::{ChannelTransport, Transport};
