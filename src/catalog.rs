// Read model over role reference data

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::role::Role;
use crate::errors::{AppError, Result};
use crate::store::RoleStore;

/// Read-only access to role definitions and their hierarchy levels.
///
/// The catalog is presentation and lookup support only: authorization is
/// always re-derived by the privilege validator at assignment time, never
/// from a previously listed set of roles.
#[derive(Clone)]
pub struct RoleCatalog {
    store: Arc<dyn RoleStore>,
}

impl RoleCatalog {
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store }
    }

    /// Look up a role, surfacing `RoleNotFound` when absent.
    pub async fn role(&self, role_id: Uuid) -> Result<Role> {
        self.find_role(role_id).await?.ok_or(AppError::RoleNotFound)
    }

    pub async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>> {
        self.store.role(role_id).await
    }

    /// All roles, ascending by level.
    pub async fn all_roles(&self) -> Result<Vec<Role>> {
        self.store.roles().await
    }

    /// The highest level present in the catalog, i.e. the unrestricted tier.
    pub async fn max_level(&self) -> Result<i32> {
        let roles = self.store.roles().await?;
        roles
            .iter()
            .map(|r| r.level)
            .max()
            .ok_or_else(|| AppError::Internal("role catalog is empty".to_string()))
    }

    /// Roles the given actor may offer for assignment: everything strictly
    /// below the actor's level, or every role except the actor's own when
    /// the actor holds the maximum level.
    pub async fn assignable_roles(&self, actor_role: &Role) -> Result<Vec<Role>> {
        let roles = self.store.roles().await?;
        let max_level = roles.iter().map(|r| r.level).max().unwrap_or(0);

        let assignable = roles
            .into_iter()
            .filter(|r| {
                if actor_role.level >= max_level {
                    r.id != actor_role.id
                } else {
                    r.level < actor_role.level
                }
            })
            .collect();
        Ok(assignable)
    }
}
