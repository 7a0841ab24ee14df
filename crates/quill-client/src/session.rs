use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

use quill_types::api::AuthResponse;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: AuthUser,
}

impl From<AuthResponse> for Session {
    fn from(resp: AuthResponse) -> Self {
        Self {
            token: resp.token,
            user: AuthUser {
                id: resp.user_id,
                email: resp.email,
            },
        }
    }
}

/// The signed-in user, shared between the store, the cache and the
/// collaboration channel.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Session> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.get().map(|s| s.user)
    }

    pub fn set(&self, session: Session) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn clear(&self) {
        self.current.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn require(&self) -> Result<Session> {
        self.get().ok_or(ClientError::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_fails_without_session() {
        let store = SessionStore::new();
        assert!(matches!(store.require(), Err(ClientError::NotAuthenticated)));

        let user = AuthUser { id: Uuid::new_v4(), email: "a@example.com".into() };
        store.set(Session { token: "t".into(), user: user.clone() });
        assert_eq!(store.user(), Some(user));

        store.clear();
        assert!(store.get().is_none());
    }
}
