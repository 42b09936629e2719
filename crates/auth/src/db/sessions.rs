use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionCacheError {
    #[error("session cache unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    pub fn inactivity_duration(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_activity)
    }
}

/// Ephemeral session bindings. Stores raw timestamps only; expiry is decided
/// by the caller.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn put(&self, session: &Session) -> Result<(), SessionCacheError>;

    async fn get(&self, token: &str) -> Result<Option<Session>, SessionCacheError>;

    async fn touch(&self, token: &str, now: DateTime<Utc>) -> Result<(), SessionCacheError>;

    async fn delete(&self, token: &str) -> Result<(), SessionCacheError>;
}

#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionCache for SessionRepository {
    async fn put(&self, session: &Session) -> Result<(), SessionCacheError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, user_id, created_at, last_activity, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                last_activity = EXCLUDED.last_activity
            "#,
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.ip.as_deref())
        .bind(session.user_agent.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<Session>, SessionCacheError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT token, user_id, created_at, last_activity, ip, user_agent
            FROM sessions
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn touch(&self, token: &str, now: DateTime<Utc>) -> Result<(), SessionCacheError> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET last_activity = GREATEST(last_activity, $2)
            WHERE token = $1
            "#,
        )
        .bind(token)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), SessionCacheError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::test_pool;

    fn session_at(token: &str, at: DateTime<Utc>) -> Session {
        Session {
            token: token.to_string(),
            user_id: Uuid::new_v4(),
            created_at: at,
            last_activity: at,
            ip: Some("203.0.113.7".into()),
            user_agent: Some("test-agent".into()),
        }
    }

    #[test]
    fn inactivity_is_measured_from_last_activity() {
        let created = Utc::now() - Duration::hours(3);
        let session = Session {
            token: "abc".into(),
            user_id: Uuid::new_v4(),
            created_at: created,
            last_activity: created + Duration::hours(2),
            ip: None,
            user_agent: None,
        };

        let now = created + Duration::hours(3);
        assert_eq!(session.inactivity_duration(now), Duration::hours(1));
    }

    #[tokio::test]
    async fn postgres_sessions_round_trip_and_never_move_backwards() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let repo = SessionRepository::new(pool);
        let token = Uuid::new_v4().simple().to_string();
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let session = session_at(&token, start);

        repo.put(&session).await.unwrap();
        let stored = repo.get(&token).await.unwrap().unwrap();
        assert_eq!(stored.user_id, session.user_id);
        assert_eq!(stored.last_activity, start);
        assert_eq!(stored.ip.as_deref(), Some("203.0.113.7"));

        let later = start + Duration::minutes(30);
        repo.touch(&token, later).await.unwrap();
        repo.touch(&token, start + Duration::minutes(10)).await.unwrap();
        let stored = repo.get(&token).await.unwrap().unwrap();
        assert_eq!(stored.last_activity, later);
        assert_eq!(stored.created_at, start);

        repo.delete(&token).await.unwrap();
        assert!(repo.get(&token).await.unwrap().is_none());
        repo.delete(&token).await.unwrap();
        repo.touch(&token, later).await.unwrap();
    }
}
