//! Session-level entry point
//!
//! An actor is joined to at most one world at a time. The engine keeps that
//! association, routes client messages to the right world, and keeps the
//! streaming coordinator in step with joins, moves, and leaves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use realm_core::{ActorId, BlockPos, Clock, Vec3, WorldId, CHUNK_HEIGHT, CHUNK_WIDTH};
use realm_store::PersistentStore;
use realm_stream::messages::{block_change, position_of};
use realm_stream::{ClientMessage, ServerMessage, StreamingCoordinator, Transport};
use realm_world::{
    Block, NoiseTerrain, Role, TerrainGenerator, Visibility, WorldError, WorldInstance,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::manager::WorldInstanceManager;

struct Session {
    world: Arc<WorldInstance>,
}

pub struct Engine {
    manager: Arc<WorldInstanceManager>,
    coordinator: Arc<StreamingCoordinator>,
    transport: Arc<dyn Transport>,
    sessions: Mutex<HashMap<ActorId, Session>>,
}

impl Engine {
    /// Build an engine generating terrain with the standard noise generator
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn PersistentStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        Self::with_generator(config, store, Arc::new(NoiseTerrain::default()), transport, clock)
    }

    pub fn with_generator(
        config: &EngineConfig,
        store: Arc<dyn PersistentStore>,
        generator: Arc<dyn TerrainGenerator>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let coordinator = Arc::new(StreamingCoordinator::new(config.stream(), transport.clone()));
        let manager = Arc::new(WorldInstanceManager::new(
            config.manager(),
            store,
            generator,
            coordinator.clone(),
            clock,
        ));
        Ok(Self {
            manager,
            coordinator,
            transport,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn manager(&self) -> &Arc<WorldInstanceManager> {
        &self.manager
    }

    pub fn coordinator(&self) -> &Arc<StreamingCoordinator> {
        &self.coordinator
    }

    /// The world `actor` is joined to
    pub fn current_world(&self, actor: ActorId) -> Option<WorldId> {
        self.sessions
            .lock()
            .get(&actor)
            .map(|s| s.world.id().clone())
    }

    /// Join `world_id`, leaving the actor's current world first
    pub fn join(&self, actor: ActorId, world_id: &WorldId, position: Vec3) -> Result<Role, EngineError> {
        if self.current_world(actor).as_ref() == Some(world_id) {
            let world = self.session_world(actor)?;
            return Ok(world.role_of(actor));
        }
        self.leave(actor);

        let world = self.manager.acquire(world_id, actor)?;
        let role = world.role_of(actor);
        self.coordinator
            .subscribe(actor, world.clone(), self.bounded(position));
        self.sessions.lock().insert(actor, Session { world });
        self.transport.send(
            actor,
            ServerMessage::Joined {
                world_id: world_id.clone(),
                role,
            },
        );
        Ok(role)
    }

    /// Leave the current world, if any
    pub fn leave(&self, actor: ActorId) -> Option<WorldId> {
        let session = self.sessions.lock().remove(&actor)?;
        let world_id = session.world.id().clone();
        self.coordinator.unsubscribe(actor);
        self.manager.release(&world_id, actor);
        self.transport.send(
            actor,
            ServerMessage::Left {
                world_id: world_id.clone(),
            },
        );
        Some(world_id)
    }

    pub fn move_observer(&self, actor: ActorId, position: Vec3) -> Result<(), EngineError> {
        if !self.sessions.lock().contains_key(&actor) {
            return Err(EngineError::NoSession(actor));
        }
        self.coordinator.on_observer_move(actor, self.bounded(position));
        Ok(())
    }

    /// Clamp a client-reported position to just past the world's edge.
    /// Non-finite components become 0.
    fn bounded(&self, position: Vec3) -> Vec3 {
        let edge = ((self.manager.config().world_radius as f32) + 1.0) * CHUNK_WIDTH as f32;
        let clamp = |v: f32, lo: f32, hi: f32| if v.is_finite() { v.clamp(lo, hi) } else { 0.0 };
        Vec3::new(
            clamp(position.x, -edge, edge),
            clamp(position.y, 0.0, CHUNK_HEIGHT as f32),
            clamp(position.z, -edge, edge),
        )
    }

    /// Apply a block change. A change refused for lack of permission sends
    /// the actor a fresh copy of the chunk so it can undo any local edit.
    pub fn mutate(&self, actor: ActorId, world_id: &WorldId, pos: BlockPos, block: Block) -> Result<u64, EngineError> {
        let world = self.session_world(actor)?;
        if world.id() != world_id {
            return Err(WorldError::NotJoined(actor).into());
        }
        match world.mutate_block(actor, pos, block) {
            Ok(sequence) => Ok(sequence),
            Err(e @ WorldError::PermissionDenied { .. }) => {
                if let Some((coord, _)) = pos.split() {
                    self.coordinator.resync_chunk(actor, coord);
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn grant(&self, actor: ActorId, target: ActorId, role: Role) -> Result<(), EngineError> {
        let world = self.session_world(actor)?;
        world.grant_role(actor, target, role)?;
        info!("{} granted {:?} in {} to {}", actor, role, world.id(), target);
        Ok(())
    }

    pub fn set_visibility(&self, actor: ActorId, visibility: Visibility) -> Result<(), EngineError> {
        let world = self.session_world(actor)?;
        world.set_visibility(actor, visibility)?;
        info!("{} made {} {:?}", actor, world.id(), visibility);
        Ok(())
    }

    /// Delete the actor's current world
    pub fn delete_world(&self, actor: ActorId) -> Result<(), EngineError> {
        let world = self.session_world(actor)?;
        self.manager.delete_world(world.id(), actor)?;
        self.sessions.lock().remove(&actor);
        self.coordinator.unsubscribe(actor);
        self.transport.send(
            actor,
            ServerMessage::Left {
                world_id: world.id().clone(),
            },
        );
        Ok(())
    }

    /// Apply one client message
    pub fn handle_message(&self, actor: ActorId, message: ClientMessage) -> Result<(), EngineError> {
        match message {
            ClientMessage::Join { world_id, position } => {
                self.join(actor, &world_id, position_of(position))?;
            }
            ClientMessage::Leave => {
                self.leave(actor);
            }
            ClientMessage::Move { position } => {
                self.move_observer(actor, position_of(position))?;
            }
            ClientMessage::SetBlock {
                world_id,
                coord_x,
                coord_y,
                coord_z,
                block_id,
                metadata,
            } => {
                let (pos, block) = block_change(coord_x, coord_y, coord_z, block_id, metadata);
                self.mutate(actor, &world_id, pos, block)?;
            }
            ClientMessage::Grant { target, role } => self.grant(actor, target, role)?,
            ClientMessage::SetVisibility { visibility } => self.set_visibility(actor, visibility)?,
            ClientMessage::DeleteWorld => self.delete_world(actor)?,
        }
        Ok(())
    }

    /// `handle_message`, reporting any failure back to the actor
    pub fn dispatch(&self, actor: ActorId, message: ClientMessage) {
        if let Err(e) = self.handle_message(actor, message) {
            debug!("Request from {} failed: {}", actor, e);
            self.transport
                .send(actor, ServerMessage::error(e.to_string(), e.is_retryable()));
        }
    }

    /// Drop everything held for a disconnected actor
    pub fn disconnect(&self, actor: ActorId) {
        if let Some(world_id) = self.leave(actor) {
            debug!("Actor {} disconnected from {}", actor, world_id);
        }
    }

    /// Pump the streaming coordinator every `interval` until cancelled
    pub fn run_stream_loop(self: &Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let coordinator = Arc::clone(&coordinator);
                        if let Err(e) = tokio::task::spawn_blocking(move || coordinator.pump()).await {
                            error!("Stream pump panicked: {}", e);
                        }
                    }
                    _ = token.cancelled() => {
                        info!("Stream loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Persist every resident world
    pub fn shutdown(&self) -> Result<usize, EngineError> {
        let actors: Vec<ActorId> = self.sessions.lock().keys().copied().collect();
        for actor in actors {
            self.leave(actor);
        }
        self.manager.persist_all()
    }

    fn session_world(&self, actor: ActorId) -> Result<Arc<WorldInstance>, EngineError> {
        self.sessions
            .lock()
            .get(&actor)
            .map(|s| s.world.clone())
            .ok_or(EngineError::NoSession(actor))
    }
}
