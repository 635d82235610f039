use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::ids::generate_token;
use vigil_core::{ApiError, Role, UserId};

use crate::sessions::Session;
use crate::Store;

/// Identity record with a long-lived bearer token.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(name: impl Into<String>, role: Role, token: String) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            role,
            token,
            created_at: Utc::now(),
            last_login: None,
        }
    }
}

/// Partial user update. A role or token change (including rotation) revokes
/// every outstanding session of the target user.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub token: Option<String>,
    pub rotate_token: bool,
}

impl Store {
    /// Look up a user by long-lived token. No side effects.
    pub fn authenticate(&self, token: &str) -> Option<User> {
        self.state()
            .read()
            .users
            .iter()
            .find(|u| u.token == token)
            .cloned()
    }

    /// Exchange a token for a fresh session, recording the login time.
    pub fn login(&self, token: &str) -> Result<(Session, User), ApiError> {
        let user = {
            let mut state = self.state().write();
            let user = state
                .users
                .iter_mut()
                .find(|u| u.token == token)
                .ok_or(ApiError::Unauthorized)?;
            user.last_login = Some(Utc::now());
            user.clone()
        };
        self.persist();

        let session = self.create_session(&user.id);
        Ok((session, user))
    }

    pub fn get_user(&self, id: &UserId) -> Option<User> {
        self.state().read().users.iter().find(|u| &u.id == id).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        self.state().read().users.clone()
    }

    /// Seed the first admin at boot. Returns the created user, if any.
    ///
    /// The supplied token (from the environment) is used verbatim; without
    /// one a token is generated and must be surfaced to the operator once.
    pub fn ensure_admin(&self, token: Option<String>) -> Option<User> {
        let has_admin = self
            .state()
            .read()
            .users
            .iter()
            .any(|u| u.role == Role::Admin);
        if has_admin {
            return None;
        }

        let token = token.unwrap_or_else(generate_token);
        let user = User::new("admin", Role::Admin, token);
        self.state().write().users.push(user.clone());
        self.persist();
        Some(user)
    }

    /// Create a user, generating a token when none is supplied.
    pub fn create_user(
        &self,
        name: &str,
        role: Role,
        token: Option<String>,
    ) -> Result<User, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidInput("name must not be empty".into()));
        }

        let mut state = self.state().write();

        let token = match token {
            Some(token) => {
                if state.users.iter().any(|u| u.token == token) {
                    return Err(ApiError::Conflict("token already in use".into()));
                }
                token
            }
            None => loop {
                let candidate = generate_token();
                if !state.users.iter().any(|u| u.token == candidate) {
                    break candidate;
                }
            },
        };

        let user = User::new(name, role, token);
        state.users.push(user.clone());
        drop(state);
        self.persist();
        Ok(user)
    }

    /// Update a user, enforcing the self-demotion, last-admin, and token
    /// uniqueness rules before any mutation. Role or token changes revoke
    /// the target's sessions immediately.
    pub fn update_user(
        &self,
        id: &UserId,
        patch: &UserPatch,
        acting: &UserId,
    ) -> Result<User, ApiError> {
        let mut credentials_changed = false;

        let updated = {
            let mut state = self.state().write();

            let admin_count = state.users.iter().filter(|u| u.role == Role::Admin).count();
            let target = state
                .users
                .iter()
                .find(|u| &u.id == id)
                .ok_or_else(|| ApiError::NotFound(format!("user {id}")))?
                .clone();

            if let Some(new_role) = patch.role {
                if target.role == Role::Admin && new_role != Role::Admin {
                    if id == acting {
                        return Err(ApiError::InvariantViolation(
                            "cannot demote your own admin role".into(),
                        ));
                    }
                    if admin_count <= 1 {
                        return Err(ApiError::InvariantViolation(
                            "cannot demote the last admin".into(),
                        ));
                    }
                }
            }

            if let Some(ref name) = patch.name {
                if name.trim().is_empty() {
                    return Err(ApiError::InvalidInput("name must not be empty".into()));
                }
            }

            if let Some(ref token) = patch.token {
                // Uniqueness check excludes the target's own current token
                if state.users.iter().any(|u| &u.id != id && &u.token == token) {
                    return Err(ApiError::Conflict("token already in use".into()));
                }
            }

            let user = state
                .users
                .iter_mut()
                .find(|u| &u.id == id)
                .ok_or_else(|| ApiError::NotFound(format!("user {id}")))?;

            if let Some(ref name) = patch.name {
                user.name = name.trim().to_string();
            }
            if let Some(role) = patch.role {
                if user.role != role {
                    credentials_changed = true;
                }
                user.role = role;
            }
            if let Some(ref token) = patch.token {
                if &user.token != token {
                    credentials_changed = true;
                }
                user.token = token.clone();
            }
            if patch.rotate_token {
                user.token = generate_token();
                credentials_changed = true;
            }

            user.clone()
        };

        if credentials_changed {
            // Privilege changes must invalidate outstanding grants now,
            // not at natural expiry.
            self.revoke_sessions_for(id);
        }
        self.persist();
        Ok(updated)
    }

    /// Delete a user, rejecting self-deletion and dropping below one admin.
    pub fn delete_user(&self, id: &UserId, acting: &UserId) -> Result<(), ApiError> {
        {
            let mut state = self.state().write();

            let target = state
                .users
                .iter()
                .find(|u| &u.id == id)
                .ok_or_else(|| ApiError::NotFound(format!("user {id}")))?;

            if id == acting {
                return Err(ApiError::InvariantViolation(
                    "cannot delete your own user".into(),
                ));
            }

            if target.role == Role::Admin {
                let admin_count = state.users.iter().filter(|u| u.role == Role::Admin).count();
                if admin_count <= 1 {
                    return Err(ApiError::InvariantViolation(
                        "cannot delete the last admin".into(),
                    ));
                }
            }

            state.users.retain(|u| &u.id != id);
        }

        self.revoke_sessions_for(id);
        self.persist();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Store, User) {
        let store = Store::in_memory();
        let admin = store.ensure_admin(Some("admin-token".into())).unwrap();
        (store, admin)
    }

    #[test]
    fn ensure_admin_seeds_once() {
        let store = Store::in_memory();
        let first = store.ensure_admin(None);
        assert!(first.is_some());
        assert_eq!(first.unwrap().role, Role::Admin);
        assert!(store.ensure_admin(None).is_none());
        assert_eq!(store.users().len(), 1);
    }

    #[test]
    fn ensure_admin_uses_supplied_token() {
        let (store, admin) = seeded();
        assert_eq!(admin.token, "admin-token");
        assert!(store.authenticate("admin-token").is_some());
    }

    #[test]
    fn authenticate_unknown_token_is_none() {
        let (store, _) = seeded();
        assert!(store.authenticate("abc").is_none());
    }

    #[test]
    fn login_records_last_login_and_issues_session() {
        let (store, _) = seeded();
        let (session, user) = store.login("admin-token").unwrap();
        assert!(user.last_login.is_some());
        assert!(store.resolve(&session.id).is_some());
    }

    #[test]
    fn login_with_bad_token_is_unauthorized() {
        let (store, _) = seeded();
        let err = store.login("abc").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn create_user_rejects_empty_name_and_duplicate_token() {
        let (store, _) = seeded();
        let err = store.create_user("  ", Role::Viewer, None).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = store
            .create_user("dupe", Role::Viewer, Some("admin-token".into()))
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn create_user_generates_token_when_absent() {
        let (store, _) = seeded();
        let user = store.create_user("watcher", Role::Viewer, None).unwrap();
        assert_eq!(user.token.len(), 32);
        assert!(store.authenticate(&user.token).is_some());
    }

    #[test]
    fn update_rejects_self_demotion() {
        let (store, admin) = seeded();
        let patch = UserPatch {
            role: Some(Role::Viewer),
            ..Default::default()
        };
        let err = store.update_user(&admin.id, &patch, &admin.id).unwrap_err();
        assert!(matches!(err, ApiError::InvariantViolation(_)));
        assert_eq!(store.get_user(&admin.id).unwrap().role, Role::Admin);
    }

    #[test]
    fn update_rejects_demoting_last_admin() {
        let (store, admin) = seeded();
        let other = store.create_user("op", Role::Operator, None).unwrap();
        let patch = UserPatch {
            role: Some(Role::Operator),
            ..Default::default()
        };
        let err = store.update_user(&admin.id, &patch, &other.id).unwrap_err();
        assert!(matches!(err, ApiError::InvariantViolation(_)));
    }

    #[test]
    fn update_allows_demotion_when_another_admin_exists() {
        let (store, admin) = seeded();
        let second = store.create_user("backup", Role::Admin, None).unwrap();
        let patch = UserPatch {
            role: Some(Role::Operator),
            ..Default::default()
        };
        let updated = store.update_user(&admin.id, &patch, &second.id).unwrap();
        assert_eq!(updated.role, Role::Operator);
    }

    #[test]
    fn update_token_uniqueness_excludes_self() {
        let (store, admin) = seeded();
        // Re-submitting the user's own token is not a conflict
        let patch = UserPatch {
            token: Some("admin-token".into()),
            ..Default::default()
        };
        assert!(store.update_user(&admin.id, &patch, &admin.id).is_ok());

        let viewer = store.create_user("v", Role::Viewer, None).unwrap();
        let patch = UserPatch {
            token: Some("admin-token".into()),
            ..Default::default()
        };
        let err = store.update_user(&viewer.id, &patch, &admin.id).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn role_change_revokes_sessions() {
        let (store, admin) = seeded();
        let viewer = store.create_user("v", Role::Viewer, None).unwrap();
        let (session, _) = store.login(&viewer.token).unwrap();
        assert!(store.resolve(&session.id).is_some());

        let patch = UserPatch {
            role: Some(Role::Operator),
            ..Default::default()
        };
        store.update_user(&viewer.id, &patch, &admin.id).unwrap();
        assert!(store.resolve(&session.id).is_none());
    }

    #[test]
    fn token_rotation_revokes_sessions_and_changes_token() {
        let (store, admin) = seeded();
        let viewer = store.create_user("v", Role::Viewer, None).unwrap();
        let (session, _) = store.login(&viewer.token).unwrap();

        let patch = UserPatch {
            rotate_token: true,
            ..Default::default()
        };
        let updated = store.update_user(&viewer.id, &patch, &admin.id).unwrap();
        assert_ne!(updated.token, viewer.token);
        assert!(store.resolve(&session.id).is_none());
        assert!(store.authenticate(&viewer.token).is_none());
        assert!(store.authenticate(&updated.token).is_some());
    }

    #[test]
    fn name_only_update_keeps_sessions() {
        let (store, admin) = seeded();
        let viewer = store.create_user("v", Role::Viewer, None).unwrap();
        let (session, _) = store.login(&viewer.token).unwrap();

        let patch = UserPatch {
            name: Some("renamed".into()),
            ..Default::default()
        };
        store.update_user(&viewer.id, &patch, &admin.id).unwrap();
        assert!(store.resolve(&session.id).is_some());
    }

    #[test]
    fn delete_rejects_self_and_last_admin() {
        let (store, admin) = seeded();
        let err = store.delete_user(&admin.id, &admin.id).unwrap_err();
        assert!(matches!(err, ApiError::InvariantViolation(_)));

        let other = store.create_user("op", Role::Operator, None).unwrap();
        let err = store.delete_user(&admin.id, &other.id).unwrap_err();
        assert!(matches!(err, ApiError::InvariantViolation(_)));
    }

    #[test]
    fn delete_revokes_sessions() {
        let (store, admin) = seeded();
        let viewer = store.create_user("v", Role::Viewer, None).unwrap();
        let (session, _) = store.login(&viewer.token).unwrap();

        store.delete_user(&viewer.id, &admin.id).unwrap();
        assert!(store.get_user(&viewer.id).is_none());
        assert!(store.resolve(&session.id).is_none());
    }

    #[test]
    fn delete_unknown_user_is_not_found() {
        let (store, admin) = seeded();
        let err = store.delete_user(&UserId::new(), &admin.id).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
