//! Role resolution and admin gating.
//!
//! Security boundaries:
//! - Roles form a closed enum; anything the store returns that is not a known
//!   role name becomes `Role::User`.
//! - A failed or empty role lookup also becomes `Role::User`. There is no path
//!   from an ambiguous lookup to an admin role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::principal::Principal;
use super::storage::{bounded, AccountStore};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    /// Lowest privilege; also the role of anyone whose lookup came back empty.
    User,
}

/// Roles allowed through admin-scoped routes.
pub const ADMIN_ROLES: &[Role] = &[Role::SuperAdmin, Role::Admin];

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    /// Map a stored role name onto the closed set. Unknown names are `User`.
    #[must_use]
    pub fn from_stored(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("super_admin" | "superadmin") => Self::SuperAdmin,
            Some("admin") => Self::Admin,
            _ => Self::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow { principal: Principal, role: Role },
    DenyUnauthenticated,
    DenyForbidden,
}

impl AccessDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

pub struct RoleGate {
    accounts: Arc<dyn AccountStore>,
    timeout: std::time::Duration,
}

impl RoleGate {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>, timeout: std::time::Duration) -> Self {
        Self { accounts, timeout }
    }

    /// Resolve the caller's role; every failure mode lands on `Role::User`.
    pub async fn resolve_role(&self, user_id: Uuid) -> Role {
        match bounded(self.timeout, "lookup_role", self.accounts.lookup_role(user_id)).await {
            Ok(stored) => Role::from_stored(stored.as_deref()),
            Err(err) => {
                error!("Role lookup failed, treating as lowest privilege: {err:#}");
                Role::User
            }
        }
    }

    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        required_roles: &[Role],
    ) -> AccessDecision {
        let Some(principal) = principal else {
            return AccessDecision::DenyUnauthenticated;
        };
        let role = self.resolve_role(principal.user_id).await;
        if required_roles.contains(&role) {
            AccessDecision::Allow {
                principal: principal.clone(),
                role,
            }
        } else {
            warn!(user_id = %principal.user_id, role = %role, "access denied");
            AccessDecision::DenyForbidden
        }
    }
}

impl fmt::Debug for RoleGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleGate")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::storage::{MemoryStore, MfaRecord};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

    fn principal(user_id: Uuid) -> Principal {
        Principal {
            user_id,
            email: "staff@example.com".to_string(),
        }
    }

    #[test]
    fn stored_names_map_to_closed_set() {
        assert_eq!(Role::from_stored(Some("admin")), Role::Admin);
        assert_eq!(Role::from_stored(Some(" Super_Admin ")), Role::SuperAdmin);
        assert_eq!(Role::from_stored(Some("guide")), Role::User);
        assert_eq!(Role::from_stored(Some("")), Role::User);
        assert_eq!(Role::from_stored(None), Role::User);
    }

    #[tokio::test]
    async fn no_session_is_unauthenticated() {
        let gate = RoleGate::new(Arc::new(MemoryStore::new()), TIMEOUT);
        assert_eq!(
            gate.authorize(None, ADMIN_ROLES).await,
            AccessDecision::DenyUnauthenticated
        );
    }

    #[tokio::test]
    async fn admin_roles_are_allowed() {
        let store = Arc::new(MemoryStore::new());
        let admin = store.add_user("admin@example.com", Some("admin"));
        let root = store.add_user("root@example.com", Some("super_admin"));
        let gate = RoleGate::new(store, TIMEOUT);

        assert!(gate
            .authorize(Some(&principal(admin)), ADMIN_ROLES)
            .await
            .is_allowed());
        let decision = gate.authorize(Some(&principal(root)), ADMIN_ROLES).await;
        assert!(matches!(
            decision,
            AccessDecision::Allow {
                role: Role::SuperAdmin,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_or_unknown_role_is_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let no_role = store.add_user("a@example.com", None);
        let odd_role = store.add_user("b@example.com", Some("owner"));
        let gate = RoleGate::new(store, TIMEOUT);

        for user_id in [no_role, odd_role, Uuid::new_v4()] {
            assert_eq!(
                gate.authorize(Some(&principal(user_id)), ADMIN_ROLES).await,
                AccessDecision::DenyForbidden
            );
        }
    }

    #[tokio::test]
    async fn user_role_passes_user_scoped_routes() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("u@example.com", Some("user"));
        let gate = RoleGate::new(store, TIMEOUT);
        assert!(gate
            .authorize(Some(&principal(user)), &[Role::User])
            .await
            .is_allowed());
    }

    struct FailingAccounts;

    #[async_trait]
    impl AccountStore for FailingAccounts {
        async fn find_user_by_email(&self, _email: &str) -> Result<Option<Uuid>> {
            Err(anyhow!("down"))
        }

        async fn lookup_role(&self, _user_id: Uuid) -> Result<Option<String>> {
            Err(anyhow!("down"))
        }

        async fn load_mfa_state(&self, _user_id: Uuid) -> Result<Option<MfaRecord>> {
            Err(anyhow!("down"))
        }
    }

    #[tokio::test]
    async fn failed_lookup_fails_closed() {
        let gate = RoleGate::new(Arc::new(FailingAccounts), TIMEOUT);
        assert_eq!(
            gate.authorize(Some(&principal(Uuid::new_v4())), ADMIN_ROLES)
                .await,
            AccessDecision::DenyForbidden
        );
    }
}
