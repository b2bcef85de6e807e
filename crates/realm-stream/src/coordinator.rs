//! Streaming coordinator
//!
//! Each subscribed observer has a queue of chunks it still needs, nearest
//! first, and the set of chunks it has already been sent. [`pump`] drains a
//! bounded number of queued chunks per observer and fans out every block
//! delta published since the previous call.
//!
//! The coordinator is also the [`DeltaSink`] handed to world instances.
//! Publishing only appends to a queue, so it is safe to call while the
//! instance's write lock is held, and the queue order is the order in which
//! mutations were applied.
//!
//! [`pump`]: StreamingCoordinator::pump

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;
use realm_core::{ActorId, ChunkCoord, WorldId};
use realm_world::{BlockDelta, DeltaSink, WorldInstance};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::messages::ServerMessage;
use crate::transport::Transport;

/// Streaming parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Chunks within this Chebyshev distance of the observer are sent
    pub view_radius: u32,
    /// Sent chunks beyond this distance are dropped (must be >= view_radius)
    pub unload_radius: u32,
    /// Maximum chunks sent to one observer per pump
    pub max_chunks_per_tick: usize,
    /// Also send a delta back to the actor that caused it
    pub echo_mutations: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            view_radius: 4,
            unload_radius: 5,
            max_chunks_per_tick: 8,
            echo_mutations: false,
        }
    }
}

/// What one call to `pump` delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub chunks_sent: usize,
    pub deltas_sent: usize,
}

struct Subscription {
    world: Arc<WorldInstance>,
    center: ChunkCoord,
    pending: VecDeque<ChunkCoord>,
    sent: HashSet<ChunkCoord>,
}

impl Subscription {
    fn world_id(&self) -> &WorldId {
        self.world.id()
    }

    /// Requeue every in-view chunk not yet sent, nearest first
    fn refill(&mut self, view_radius: u32) {
        let world = &self.world;
        let sent = &self.sent;
        self.pending = self
            .center
            .within_radius(view_radius)
            .into_iter()
            .filter(|coord| world.contains_chunk(*coord) && !sent.contains(coord))
            .collect();
    }
}

/// Chooses and rate-limits chunk delivery, and fans out block deltas
pub struct StreamingCoordinator {
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    subscriptions: Mutex<HashMap<ActorId, Subscription>>,
    deltas: Mutex<VecDeque<BlockDelta>>,
}

impl StreamingCoordinator {
    pub fn new(config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            subscriptions: Mutex::new(HashMap::new()),
            deltas: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start streaming `world` to `actor` from `position`. Replaces any
    /// existing subscription the actor had.
    pub fn subscribe(&self, actor: ActorId, world: Arc<WorldInstance>, position: Vec3) {
        let mut sub = Subscription {
            world,
            center: ChunkCoord::from_world_pos(position),
            pending: VecDeque::new(),
            sent: HashSet::new(),
        };
        sub.refill(self.config.view_radius);
        debug!(
            "Actor {} subscribed to {} at {} ({} chunks queued)",
            actor,
            sub.world_id(),
            sub.center,
            sub.pending.len()
        );
        self.subscriptions.lock().insert(actor, sub);
    }

    /// Stop streaming to `actor`. Returns the world it was subscribed to.
    pub fn unsubscribe(&self, actor: ActorId) -> Option<WorldId> {
        self.subscriptions
            .lock()
            .remove(&actor)
            .map(|sub| sub.world_id().clone())
    }

    /// Re-center `actor`'s view. Chunks newly in range are queued; sent
    /// chunks beyond the unload radius are dropped.
    pub fn on_observer_move(&self, actor: ActorId, position: Vec3) {
        let center = ChunkCoord::from_world_pos(position);
        let mut subs = self.subscriptions.lock();
        let Some(sub) = subs.get_mut(&actor) else {
            return;
        };
        if sub.center == center {
            return;
        }
        sub.center = center;

        let unload_radius = self.config.unload_radius;
        let mut dropped: Vec<ChunkCoord> = sub
            .sent
            .iter()
            .filter(|coord| coord.distance(&center) > unload_radius)
            .copied()
            .collect();
        for coord in &dropped {
            sub.sent.remove(coord);
        }
        sub.refill(self.config.view_radius);

        if !dropped.is_empty() {
            dropped.sort();
            trace!("Dropping {} chunks for actor {}", dropped.len(), actor);
            self.transport
                .send(actor, ServerMessage::DropChunks { chunks: dropped });
        }
    }

    /// Send the current contents of `coord` to `actor` right away. Used to
    /// correct a client after its mutation was rejected.
    pub fn resync_chunk(&self, actor: ActorId, coord: ChunkCoord) -> bool {
        let mut subs = self.subscriptions.lock();
        let Some(sub) = subs.get_mut(&actor) else {
            return false;
        };
        match sub.world.chunk_bytes(coord) {
            Ok(bytes) => {
                sub.pending.retain(|c| *c != coord);
                sub.sent.insert(coord);
                self.transport.send(actor, ServerMessage::chunk(coord, bytes))
            }
            Err(e) => {
                debug!("Cannot resync chunk {} for actor {}: {}", coord, actor, e);
                false
            }
        }
    }

    /// Deliver queued deltas, then up to `max_chunks_per_tick` chunks to
    /// every observer
    pub fn pump(&self) -> PumpStats {
        let deltas: Vec<BlockDelta> = self.deltas.lock().drain(..).collect();
        let mut stats = PumpStats::default();
        let mut subs = self.subscriptions.lock();

        // Deltas first, in application order, to observers holding the chunk
        for delta in &deltas {
            let Some((coord, _)) = delta.pos.split() else {
                continue;
            };
            let message = ServerMessage::from(delta);
            for (actor, sub) in subs.iter() {
                if sub.world_id() != &delta.world_id || !sub.sent.contains(&coord) {
                    continue;
                }
                if *actor == delta.origin && !self.config.echo_mutations {
                    continue;
                }
                if self.transport.send(*actor, message.clone()) {
                    stats.deltas_sent += 1;
                }
            }
        }

        for (actor, sub) in subs.iter_mut() {
            let mut budget = self.config.max_chunks_per_tick;
            while budget > 0 {
                let Some(coord) = sub.pending.pop_front() else {
                    break;
                };
                let bytes = match sub.world.chunk_bytes(coord) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!("Skipping chunk {} for actor {}: {}", coord, actor, e);
                        continue;
                    }
                };
                sub.sent.insert(coord);
                budget -= 1;
                if self.transport.send(*actor, ServerMessage::chunk(coord, bytes)) {
                    stats.chunks_sent += 1;
                }
            }
        }
        stats
    }

    pub fn is_subscribed(&self, actor: ActorId) -> bool {
        self.subscriptions.lock().contains_key(&actor)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Chunks still waiting to be sent to `actor`
    pub fn pending_chunks(&self, actor: ActorId) -> usize {
        self.subscriptions
            .lock()
            .get(&actor)
            .map_or(0, |sub| sub.pending.len())
    }

    pub fn pending_deltas(&self) -> usize {
        self.deltas.lock().len()
    }
}

impl DeltaSink for StreamingCoordinator {
    fn publish(&self, delta: BlockDelta) {
        self.deltas.lock().push_back(delta);
    }
}
