use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{PgPool, types::Json};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A user document, keyed by provider identity.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub profile: Json<Map<String, Value>>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub token_type: String,
    pub token_scope: Option<String>,
    pub token_expires_in: Option<i64>,
    #[serde(skip_serializing)]
    pub sessions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertUser<'a> {
    pub provider: &'a str,
    pub provider_user_id: &'a str,
    pub profile: &'a Map<String, Value>,
    pub access_token: &'a str,
    pub token_type: &'a str,
    pub token_scope: Option<&'a str>,
    pub token_expires_in: Option<i64>,
}

/// Durable user documents.
///
/// `upsert_by_provider_identity` must be atomic per `(provider, provider_user_id)`:
/// concurrent logins for the same identity end up in one document, profile
/// fields are last-writer-wins and no appended session token is lost.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn upsert_by_provider_identity(
        &self,
        user: UpsertUser<'_>,
        session_token: &str,
    ) -> Result<Uuid, UserStoreError>;

    async fn remove_session_reference(
        &self,
        user_id: Uuid,
        session_token: &str,
    ) -> Result<(), UserStoreError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, UserStoreError>;
}

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for UserRepository {
    async fn upsert_by_provider_identity(
        &self,
        user: UpsertUser<'_>,
        session_token: &str,
    ) -> Result<Uuid, UserStoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (
                provider,
                provider_user_id,
                profile,
                access_token,
                token_type,
                token_scope,
                token_expires_in,
                sessions
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, ARRAY[$8::text])
            ON CONFLICT (provider, provider_user_id) DO UPDATE
            SET
                profile = users.profile || EXCLUDED.profile,
                access_token = EXCLUDED.access_token,
                token_type = EXCLUDED.token_type,
                token_scope = EXCLUDED.token_scope,
                token_expires_in = EXCLUDED.token_expires_in,
                sessions = array_append(users.sessions, $8::text),
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(user.provider)
        .bind(user.provider_user_id)
        .bind(Json(user.profile))
        .bind(user.access_token)
        .bind(user.token_type)
        .bind(user.token_scope)
        .bind(user.token_expires_in)
        .bind(session_token)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn remove_session_reference(
        &self,
        user_id: Uuid,
        session_token: &str,
    ) -> Result<(), UserStoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET sessions = array_remove(sessions, $2::text),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(session_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, UserStoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT
                id,
                provider,
                provider_user_id,
                profile,
                access_token,
                token_type,
                token_scope,
                token_expires_in,
                sessions,
                created_at,
                updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::task::JoinSet;

    use super::*;
    use crate::db::test_pool;

    fn profile(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn upsert<'a>(identity: &'a str, profile: &'a Map<String, Value>) -> UpsertUser<'a> {
        UpsertUser {
            provider: "github",
            provider_user_id: identity,
            profile,
            access_token: "gho_token",
            token_type: "bearer",
            token_scope: Some("user:email"),
            token_expires_in: None,
        }
    }

    #[tokio::test]
    async fn concurrent_upserts_share_one_document() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let repo = UserRepository::new(pool);
        let identity = Uuid::new_v4().to_string();

        let mut tasks = JoinSet::new();
        for n in 0..8 {
            let repo = repo.clone();
            let identity = identity.clone();
            tasks.spawn(async move {
                let profile = profile(json!({ "login": "mona" }));
                repo.upsert_by_provider_identity(upsert(&identity, &profile), &format!("s-{n}"))
                    .await
                    .unwrap()
            });
        }

        let mut ids = Vec::new();
        while let Some(id) = tasks.join_next().await {
            ids.push(id.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let user = repo.find_by_id(ids[0]).await.unwrap().unwrap();
        let mut sessions = user.sessions.clone();
        sessions.sort();
        let mut expected: Vec<String> = (0..8).map(|n| format!("s-{n}")).collect();
        expected.sort();
        assert_eq!(sessions, expected);
    }

    #[tokio::test]
    async fn repeat_login_merges_profile_fields() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let repo = UserRepository::new(pool);
        let identity = Uuid::new_v4().to_string();

        let first = profile(json!({ "login": "mona", "name": "Mona Lisa" }));
        let id = repo
            .upsert_by_provider_identity(upsert(&identity, &first), "s-1")
            .await
            .unwrap();

        let second = profile(json!({ "login": "monalisa", "blog": "https://mona.dev" }));
        let again = repo
            .upsert_by_provider_identity(
                UpsertUser {
                    access_token: "gho_rotated",
                    ..upsert(&identity, &second)
                },
                "s-2",
            )
            .await
            .unwrap();
        assert_eq!(id, again);

        let user = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.profile["login"], "monalisa");
        assert_eq!(user.profile["name"], "Mona Lisa");
        assert_eq!(user.profile["blog"], "https://mona.dev");
        assert_eq!(user.access_token, "gho_rotated");
        assert_eq!(user.sessions, vec!["s-1".to_string(), "s-2".to_string()]);
    }

    #[tokio::test]
    async fn removing_a_session_reference_keeps_the_others() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let repo = UserRepository::new(pool);
        let identity = Uuid::new_v4().to_string();
        let profile = profile(json!({ "login": "mona" }));

        let id = repo
            .upsert_by_provider_identity(upsert(&identity, &profile), "keep")
            .await
            .unwrap();
        repo.upsert_by_provider_identity(upsert(&identity, &profile), "drop")
            .await
            .unwrap();

        repo.remove_session_reference(id, "drop").await.unwrap();
        repo.remove_session_reference(Uuid::new_v4(), "keep")
            .await
            .unwrap();

        let user = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.sessions, vec!["keep".to_string()]);
        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
