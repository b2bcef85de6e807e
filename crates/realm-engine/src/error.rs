use realm_core::{ActorId, WorldId};
use realm_store::StoreError;
use realm_world::{Capability, WorldError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Every resident slot is held by an observed world
    #[error("Server is at capacity ({max} worlds resident)")]
    Capacity { max: usize },

    #[error("Actor {actor} lacks the {capability:?} capability")]
    PermissionDenied {
        actor: ActorId,
        capability: Capability,
    },

    /// Saving a world failed; its unsaved changes are retained
    #[error("Failed to persist world {world_id}: {source}")]
    Persist {
        world_id: WorldId,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    World(WorldError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("World {0} is not resident")]
    NotResident(WorldId),

    #[error("Actor {0} has not joined a world")]
    NoSession(ActorId),

    #[error("World {world_id} still has {observers} other observers")]
    WorldInUse { world_id: WorldId, observers: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Capacity { .. } | EngineError::Persist { .. } => true,
            EngineError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<WorldError> for EngineError {
    fn from(err: WorldError) -> Self {
        match err {
            WorldError::PermissionDenied { actor, capability } => {
                EngineError::PermissionDenied { actor, capability }
            }
            other => EngineError::World(other),
        }
    }
}
