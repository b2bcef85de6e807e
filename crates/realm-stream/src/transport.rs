//! Delivery of server messages to observers

use std::collections::HashMap;

use parking_lot::RwLock;
use realm_core::ActorId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::messages::ServerMessage;

/// Delivers messages to a connected observer
pub trait Transport: Send + Sync {
    /// Queue `message` for `actor`. Returns `false` if the actor is not
    /// connected; the message is then discarded.
    fn send(&self, actor: ActorId, message: ServerMessage) -> bool;
}

/// One unbounded tokio channel per connected actor. The receiving half is
/// drained by that actor's connection task.
#[derive(Default)]
pub struct ChannelTransport {
    senders: RwLock<HashMap<ActorId, UnboundedSender<ServerMessage>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for `actor`, replacing any previous one
    pub fn connect(&self, actor: ActorId) -> UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.senders.write().insert(actor, tx).is_some() {
            debug!("Replaced channel for actor {}", actor);
        }
        rx
    }

    pub fn disconnect(&self, actor: ActorId) -> bool {
        self.senders.write().remove(&actor).is_some()
    }

    pub fn is_connected(&self, actor: ActorId) -> bool {
        self.senders.read().contains_key(&actor)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, actor: ActorId, message: ServerMessage) -> bool {
        match self.senders.read().get(&actor) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}
