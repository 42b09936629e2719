//! In-process store backends.
//!
//! Both maps lock per shard, so every operation on a single key is atomic.
//! Data does not survive a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::types::Json;
use uuid::Uuid;

use super::{
    sessions::{Session, SessionCache, SessionCacheError},
    users::{CredentialStore, UpsertUser, User, UserStoreError},
};

#[derive(Default)]
pub struct MemoryCredentialStore {
    users: DashMap<Uuid, User>,
    identities: DashMap<(String, String), Uuid>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn upsert_by_provider_identity(
        &self,
        user: UpsertUser<'_>,
        session_token: &str,
    ) -> Result<Uuid, UserStoreError> {
        let identity = (user.provider.to_string(), user.provider_user_id.to_string());
        let user_id = *self.identities.entry(identity).or_insert_with(Uuid::new_v4);
        let now = Utc::now();

        self.users
            .entry(user_id)
            .and_modify(|existing| {
                for (key, value) in user.profile {
                    existing.profile.insert(key.clone(), value.clone());
                }
                existing.access_token = user.access_token.to_string();
                existing.token_type = user.token_type.to_string();
                existing.token_scope = user.token_scope.map(str::to_string);
                existing.token_expires_in = user.token_expires_in;
                existing.sessions.push(session_token.to_string());
                existing.updated_at = now;
            })
            .or_insert_with(|| User {
                id: user_id,
                provider: user.provider.to_string(),
                provider_user_id: user.provider_user_id.to_string(),
                profile: Json(user.profile.clone()),
                access_token: user.access_token.to_string(),
                token_type: user.token_type.to_string(),
                token_scope: user.token_scope.map(str::to_string),
                token_expires_in: user.token_expires_in,
                sessions: vec![session_token.to_string()],
                created_at: now,
                updated_at: now,
            });

        Ok(user_id)
    }

    async fn remove_session_reference(
        &self,
        user_id: Uuid,
        session_token: &str,
    ) -> Result<(), UserStoreError> {
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.sessions.retain(|token| token != session_token);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, UserStoreError> {
        Ok(self.users.get(&user_id).map(|user| user.clone()))
    }
}

#[derive(Default)]
pub struct MemorySessionCache {
    sessions: DashMap<String, Session>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn put(&self, session: &Session) -> Result<(), SessionCacheError> {
        self.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<Session>, SessionCacheError> {
        Ok(self.sessions.get(token).map(|session| session.clone()))
    }

    async fn touch(&self, token: &str, now: DateTime<Utc>) -> Result<(), SessionCacheError> {
        if let Some(mut session) = self.sessions.get_mut(token)
            && session.last_activity < now
        {
            session.last_activity = now;
        }
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), SessionCacheError> {
        self.sessions.remove(token);
        Ok(())
    }
}
