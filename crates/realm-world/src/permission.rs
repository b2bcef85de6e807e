//! Role-based permissions
//!
//! Capabilities derive from the role alone. The only per-actor state is the
//! role itself, held in a [`PermissionTable`] owned by each world.

use std::collections::HashMap;

use realm_core::ActorId;
use serde::{Deserialize, Serialize};

use crate::error::WorldError;

/// A named permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Read,
    Mutate,
    Administer,
}

/// An actor's standing in one world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Builder,
    Visitor,
    None,
}

impl Role {
    /// Capability set granted by this role
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Role::Owner => &[Capability::Read, Capability::Mutate, Capability::Administer],
            Role::Builder => &[Capability::Read, Capability::Mutate],
            Role::Visitor => &[Capability::Read],
            Role::None => &[],
        }
    }

    pub fn has(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Whether unknown actors may enter a world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Pure capability checks
pub struct PermissionOracle;

impl PermissionOracle {
    pub fn can_join(role: Role) -> bool {
        role.has(Capability::Read)
    }

    pub fn can_mutate(role: Role) -> bool {
        role.has(Capability::Mutate)
    }

    pub fn can_administer(role: Role) -> bool {
        role.has(Capability::Administer)
    }

    /// Fail with `PermissionDenied` unless `role` carries `capability`
    pub fn require(actor: ActorId, role: Role, capability: Capability) -> Result<(), WorldError> {
        if role.has(capability) {
            Ok(())
        } else {
            Err(WorldError::PermissionDenied { actor, capability })
        }
    }
}

/// Owner, visibility, and explicit grants for one world
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTable {
    owner: Option<ActorId>,
    visibility: Visibility,
    grants: HashMap<ActorId, Role>,
}

impl PermissionTable {
    pub fn new(owner: Option<ActorId>, visibility: Visibility, grants: HashMap<ActorId, Role>) -> Self {
        let mut grants = grants;
        // The owner is implicit; a stale grant entry must never shadow it
        if let Some(owner) = owner {
            grants.remove(&owner);
        }
        grants.retain(|_, role| *role != Role::Owner);
        Self {
            owner,
            visibility,
            grants,
        }
    }

    /// Resolve the role of `actor`
    pub fn role_of(&self, actor: ActorId) -> Role {
        if self.owner == Some(actor) {
            return Role::Owner;
        }
        if let Some(role) = self.grants.get(&actor) {
            return *role;
        }
        match self.visibility {
            Visibility::Public => Role::Visitor,
            Visibility::Private => Role::None,
        }
    }

    pub fn owner(&self) -> Option<ActorId> {
        self.owner
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn grants(&self) -> &HashMap<ActorId, Role> {
        &self.grants
    }

    /// Assign the owner of a freshly created world. Returns `false` if the
    /// world already has one.
    pub fn claim_owner(&mut self, actor: ActorId) -> bool {
        if self.owner.is_some() {
            return false;
        }
        self.grants.remove(&actor);
        self.owner = Some(actor);
        true
    }

    /// Set `target`'s role. Requires the administer capability; ownership
    /// cannot be granted and the owner's own role cannot change.
    pub fn grant(&mut self, admin: ActorId, target: ActorId, role: Role) -> Result<(), WorldError> {
        PermissionOracle::require(admin, self.role_of(admin), Capability::Administer)?;
        if role == Role::Owner || self.owner == Some(target) {
            return Err(WorldError::InvalidGrant { target, role });
        }
        self.grants.insert(target, role);
        Ok(())
    }

    /// Change the world's visibility. Requires the administer capability.
    pub fn set_visibility(&mut self, admin: ActorId, visibility: Visibility) -> Result<(), WorldError> {
        PermissionOracle::require(admin, self.role_of(admin), Capability::Administer)?;
        self.visibility = visibility;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_by_role() {
        assert!(PermissionOracle::can_administer(Role::Owner));
        assert!(PermissionOracle::can_mutate(Role::Owner));
        assert!(PermissionOracle::can_mutate(Role::Builder));
        assert!(!PermissionOracle::can_administer(Role::Builder));
        assert!(PermissionOracle::can_join(Role::Visitor));
        assert!(!PermissionOracle::can_mutate(Role::Visitor));
        assert!(!PermissionOracle::can_join(Role::None));
        assert!(Role::None.capabilities().is_empty());
    }

    #[test]
    fn test_default_role_follows_visibility() {
        let stranger = ActorId::new();
        let public = PermissionTable::new(None, Visibility::Public, HashMap::new());
        assert_eq!(public.role_of(stranger), Role::Visitor);

        let private = PermissionTable::new(None, Visibility::Private, HashMap::new());
        assert_eq!(private.role_of(stranger), Role::None);
    }

    #[test]
    fn test_first_claim_wins() {
        let (a, b) = (ActorId::new(), ActorId::new());
        let mut table = PermissionTable::default();
        assert!(table.claim_owner(a));
        assert!(!table.claim_owner(b));
        assert_eq!(table.role_of(a), Role::Owner);
        assert_eq!(table.role_of(b), Role::Visitor);
    }

    #[test]
    fn test_only_owner_grants() {
        let (owner, builder, visitor) = (ActorId::new(), ActorId::new(), ActorId::new());
        let mut table = PermissionTable::default();
        table.claim_owner(owner);

        table.grant(owner, builder, Role::Builder).unwrap();
        assert_eq!(table.role_of(builder), Role::Builder);

        let err = table.grant(builder, visitor, Role::Builder).unwrap_err();
        assert!(matches!(
            err,
            WorldError::PermissionDenied {
                capability: Capability::Administer,
                ..
            }
        ));
        assert_eq!(table.role_of(visitor), Role::Visitor);
    }

    #[test]
    fn test_owner_cannot_be_granted() {
        let (owner, other) = (ActorId::new(), ActorId::new());
        let mut table = PermissionTable::default();
        table.claim_owner(owner);
        assert!(table.grant(owner, other, Role::Owner).is_err());
        assert!(table.grant(owner, owner, Role::Visitor).is_err());
        assert_eq!(table.role_of(owner), Role::Owner);
    }

    #[test]
    fn test_private_world_with_builder_grant() {
        let (owner, friend) = (ActorId::new(), ActorId::new());
        let mut table = PermissionTable::default();
        table.claim_owner(owner);
        table.set_visibility(owner, Visibility::Private).unwrap();
        assert_eq!(table.role_of(friend), Role::None);

        table.grant(owner, friend, Role::Builder).unwrap();
        assert!(PermissionOracle::can_join(table.role_of(friend)));
    }

    #[test]
    fn test_new_drops_owner_grants() {
        let (owner, other) = (ActorId::new(), ActorId::new());
        let grants = HashMap::from([(owner, Role::Visitor), (other, Role::Owner)]);
        let table = PermissionTable::new(Some(owner), Visibility::Public, grants);
        assert_eq!(table.role_of(owner), Role::Owner);
        assert_eq!(table.role_of(other), Role::Visitor);
    }
}
