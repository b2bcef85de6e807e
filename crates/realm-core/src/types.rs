//! Identifiers used throughout the Realm engine

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Unique identifier for an actor (a connected player or automation client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Create a new random actor ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an actor ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a world. Restricted to `[A-Za-z0-9_-]` so it is safe to use
/// as a file stem by the persistent stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorldId(String);

impl WorldId {
    pub const MAX_LEN: usize = 64;

    /// Validate and wrap a world name
    pub fn parse(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::EmptyWorldId);
        }
        if name.len() > Self::MAX_LEN {
            return Err(CoreError::WorldIdTooLong { max: Self::MAX_LEN });
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(CoreError::InvalidWorldIdChar(c));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorldId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<WorldId> for String {
    fn from(id: WorldId) -> Self {
        id.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_id_accepts_simple_names() {
        let id = WorldId::parse("spawn_island-2").unwrap();
        assert_eq!(id.as_str(), "spawn_island-2");
        assert_eq!(id.to_string(), "spawn_island-2");
    }

    #[test]
    fn test_world_id_rejects_bad_names() {
        assert_eq!(WorldId::parse(""), Err(CoreError::EmptyWorldId));
        assert_eq!(
            WorldId::parse("../etc"),
            Err(CoreError::InvalidWorldIdChar('.'))
        );
        assert!(matches!(
            WorldId::parse("x".repeat(65)),
            Err(CoreError::WorldIdTooLong { .. })
        ));
    }

    #[test]
    fn test_world_id_serde_validates() {
        let id: WorldId = serde_json::from_str("\"lobby\"").unwrap();
        assert_eq!(id.as_str(), "lobby");
        assert!(serde_json::from_str::<WorldId>("\"a b\"").is_err());
    }

    #[test]
    fn test_actor_ids_are_unique() {
        assert_ne!(ActorId::new(), ActorId::new());
    }
}
