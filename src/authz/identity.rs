// Identity resolution and the coarse permission gate.
//
// Both are consumed interfaces: the engine and handlers depend on the
// traits, never on a concrete provider. Credential parsing stays outside
// this crate: the shipped provider trusts the actor id the gateway has
// already authenticated.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::RoleCatalog;
use crate::domain::role::Actor;
use crate::errors::{AppError, Result};
use crate::store::AssignmentStore;

/// Resolves an opaque credential into an acting identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_actor(&self, credential: &str) -> Result<Actor>;
}

/// Coarse resource/action gate consulted before any engine operation.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn has_permission(&self, actor: &Actor, resource: &str, action: &str) -> Result<bool>;
}

/// Identity provider backed by the assignment store. The credential is the
/// actor id the upstream gateway authenticated; an actor without a role
/// assignment cannot act here at all.
pub struct StoreIdentityProvider {
    assignments: Arc<dyn AssignmentStore>,
}

impl StoreIdentityProvider {
    pub fn new(assignments: Arc<dyn AssignmentStore>) -> Self {
        Self { assignments }
    }
}

#[async_trait]
impl IdentityProvider for StoreIdentityProvider {
    async fn resolve_actor(&self, credential: &str) -> Result<Actor> {
        let actor_id = Uuid::parse_str(credential.trim()).map_err(|_| AppError::Unauthenticated)?;

        let assignment = self
            .assignments
            .assignment_for_user(actor_id)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        Ok(Actor {
            id: actor_id,
            role_id: assignment.role_id,
        })
    }
}

/// Permission gate derived from hierarchy levels: administration surfaces
/// open up at configured minimum tiers.
pub struct LevelGate {
    catalog: Arc<RoleCatalog>,
    manage_min_level: i32,
    audit_min_level: i32,
}

impl LevelGate {
    pub fn new(catalog: Arc<RoleCatalog>, manage_min_level: i32, audit_min_level: i32) -> Self {
        Self {
            catalog,
            manage_min_level,
            audit_min_level,
        }
    }
}

#[async_trait]
impl PermissionGate for LevelGate {
    async fn has_permission(&self, actor: &Actor, resource: &str, action: &str) -> Result<bool> {
        let role = match self.catalog.find_role(actor.role_id).await? {
            Some(role) => role,
            None => return Ok(false),
        };

        let allowed = match (resource, action) {
            ("roles", "manage") | ("roles", "read") => role.level >= self.manage_min_level,
            ("audit", "read") | ("audit", "export") => role.level >= self.audit_min_level,
            _ => false,
        };
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::role::{Role, RoleAssignment};
    use crate::store::MemoryStore;

    fn tier(name: &str, level: i32) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            level,
        }
    }

    #[tokio::test]
    async fn test_resolve_actor_requires_assignment() {
        let store = Arc::new(MemoryStore::new());
        let provider = StoreIdentityProvider::new(store.clone());

        let stranger = Uuid::new_v4();
        let result = provider.resolve_actor(&stranger.to_string()).await;
        assert!(matches!(result, Err(AppError::Unauthenticated)));

        let role_id = Uuid::new_v4();
        store
            .seed_assignment(RoleAssignment::new(
                stranger,
                role_id,
                Uuid::new_v4(),
                "hire".to_string(),
            ))
            .await;
        let actor = provider.resolve_actor(&stranger.to_string()).await.unwrap();
        assert_eq!(actor.id, stranger);
        assert_eq!(actor.role_id, role_id);
    }

    #[tokio::test]
    async fn test_resolve_actor_rejects_malformed_credential() {
        let provider = StoreIdentityProvider::new(Arc::new(MemoryStore::new()));
        let result = provider.resolve_actor("not-a-uuid").await;
        assert!(matches!(result, Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_level_gate() {
        let viewer = tier("viewer", 0);
        let admin = tier("administrator", 3);
        let store = Arc::new(MemoryStore::with_roles(vec![viewer.clone(), admin.clone()]));
        let catalog = Arc::new(RoleCatalog::new(store));
        let gate = LevelGate::new(catalog, 2, 2);

        let low = Actor {
            id: Uuid::new_v4(),
            role_id: viewer.id,
        };
        let high = Actor {
            id: Uuid::new_v4(),
            role_id: admin.id,
        };

        assert!(!gate.has_permission(&low, "roles", "manage").await.unwrap());
        assert!(gate.has_permission(&high, "roles", "manage").await.unwrap());
        assert!(gate.has_permission(&high, "audit", "read").await.unwrap());
        assert!(!gate.has_permission(&high, "news", "write").await.unwrap());
    }
}
