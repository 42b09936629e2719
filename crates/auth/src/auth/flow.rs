use std::sync::Arc;

use rand::RngCore;
use secrecy::ExposeSecret;
use serde_json::Value;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::provider::{
    AuthorizationProvider, ExchangeError, ProfileFetchError, ProviderProfile, ProviderRegistry,
};
use crate::{
    clock::Clock,
    config::{ExpiredSessionPolicy, SessionConfig},
    configure_user_scope,
    db::{
        sessions::{Session, SessionCache, SessionCacheError},
        users::{CredentialStore, UpsertUser, User, UserStoreError},
    },
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unsupported provider `{0}`")]
    UnsupportedProvider(String),
    #[error("oauth state does not match")]
    StateMismatch,
    #[error("authorization code missing: {}", .provider_error.as_deref().unwrap_or("no code in callback"))]
    MissingCode { provider_error: Option<String> },
    #[error("token exchange with {provider} failed: {source}")]
    ProviderExchangeFailed {
        provider: String,
        #[source]
        source: ExchangeError,
    },
    #[error("profile fetch from {provider} failed: {source}")]
    ProviderProfileFailed {
        provider: String,
        #[source]
        source: ProfileFetchError,
    },
    #[error(transparent)]
    Store(#[from] UserStoreError),
    #[error(transparent)]
    Cache(#[from] SessionCacheError),
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("user `{0}` not found")]
    UserNotFound(Uuid),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UnsupportedProvider(_) => "unsupported_provider",
            AuthError::StateMismatch => "state_mismatch",
            AuthError::MissingCode { .. } => "missing_code",
            AuthError::ProviderExchangeFailed { .. } => "provider_exchange_failed",
            AuthError::ProviderProfileFailed { .. } => "provider_profile_failed",
            AuthError::Store(_) => "store_error",
            AuthError::Cache(_) => "cache_error",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::SessionExpired => "session_expired",
            AuthError::UserNotFound(_) => "user_not_found",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginStart {
    pub authorize_url: Url,
    pub state: String,
}

/// Audit details recorded with a new session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub provider: String,
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub cookie_state: Option<String>,
    pub client: ClientInfo,
}

#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub session_token: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active { user_id: Uuid },
    NotFound,
    Expired,
}

/// Drives the login, callback, session check and logout pipelines over the
/// provider registry and the two stores.
pub struct AuthService {
    providers: Arc<ProviderRegistry>,
    users: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionCache>,
    clock: Arc<dyn Clock>,
    settings: SessionConfig,
    public_origin: String,
}

impl AuthService {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        users: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionCache>,
        clock: Arc<dyn Clock>,
        settings: SessionConfig,
        public_origin: String,
    ) -> Self {
        let trimmed_origin = public_origin.trim_end_matches('/').to_string();
        Self {
            providers,
            users,
            sessions,
            clock,
            settings,
            public_origin: trimmed_origin,
        }
    }

    pub fn public_origin(&self) -> &str {
        &self.public_origin
    }

    pub fn redirect_uri(&self, provider: &str) -> String {
        format!(
            "{}/auth/providers/{}/callback",
            self.public_origin, provider
        )
    }

    pub fn login(&self, provider: &str) -> Result<LoginStart, AuthError> {
        let provider = self.provider(provider)?;
        let state = generate_token(self.settings.state_token_bytes);
        let authorize_url = provider.authorize_url(&state, &self.redirect_uri(provider.name()));

        Ok(LoginStart {
            authorize_url,
            state,
        })
    }

    pub async fn callback(&self, request: CallbackRequest) -> Result<LoginSuccess, AuthError> {
        if !states_match(request.state.as_deref(), request.cookie_state.as_deref()) {
            warn!(provider = %request.provider, "oauth state mismatch");
            return Err(AuthError::StateMismatch);
        }

        let Some(code) = request.code.filter(|code| !code.is_empty()) else {
            warn!(
                provider = %request.provider,
                provider_error = request.error.as_deref(),
                "oauth callback without code"
            );
            return Err(AuthError::MissingCode {
                provider_error: request.error,
            });
        };

        let provider = self.provider(&request.provider)?;
        let name = provider.name();
        let redirect_uri = self.redirect_uri(name);

        let grant = provider
            .exchange_code(&code, &redirect_uri)
            .await
            .map_err(|source| {
                warn!(provider = name, error = %source, "token exchange failed");
                AuthError::ProviderExchangeFailed {
                    provider: name.to_string(),
                    source,
                }
            })?;

        let profile_failed = |source: ProfileFetchError| {
            warn!(provider = name, error = %source, "profile fetch failed");
            AuthError::ProviderProfileFailed {
                provider: name.to_string(),
                source,
            }
        };
        let ProviderProfile {
            id: provider_user_id,
            raw: mut profile,
        } = provider
            .fetch_profile(&grant.access_token)
            .await
            .map_err(profile_failed)?;
        if let Some(emails) = provider
            .fetch_emails(&grant.access_token)
            .await
            .map_err(profile_failed)?
        {
            profile.insert("emails".to_string(), Value::Array(emails));
        }

        let session_token = generate_token(self.settings.session_token_bytes);

        let user_id = self
            .users
            .upsert_by_provider_identity(
                UpsertUser {
                    provider: name,
                    provider_user_id: &provider_user_id,
                    profile: &profile,
                    access_token: grant.access_token.expose_secret(),
                    token_type: &grant.token_type,
                    token_scope: grant.scope.as_deref(),
                    token_expires_in: grant.expires_in,
                },
                &session_token,
            )
            .await
            .inspect_err(|error| warn!(provider = name, ?error, "failed to upsert user"))?;

        let now = self.clock.now();
        let session = Session {
            token: session_token.clone(),
            user_id,
            created_at: now,
            last_activity: now,
            ip: request.client.ip,
            user_agent: request.client.user_agent,
        };

        if let Err(error) = self.sessions.put(&session).await {
            warn!(%user_id, ?error, "failed to register session");
            if let Err(cleanup) = self
                .users
                .remove_session_reference(user_id, &session_token)
                .await
            {
                warn!(%user_id, error = ?cleanup, "failed to drop unregistered session reference");
            }
            return Err(AuthError::Cache(error));
        }

        configure_user_scope(user_id, name);
        info!(%user_id, provider = name, "user logged in");

        Ok(LoginSuccess {
            session_token,
            user_id,
        })
    }

    /// Resolves a session token and slides its window forward when it is
    /// still fresh.
    pub async fn check_session(&self, token: Option<&str>) -> Result<SessionStatus, AuthError> {
        let Some(token) = token else {
            return Ok(SessionStatus::NotFound);
        };

        let Some(session) = self.sessions.get(token).await? else {
            return Ok(SessionStatus::NotFound);
        };

        let now = self.clock.now();
        if session.inactivity_duration(now) > self.settings.refresh_interval {
            if self.settings.expired_policy == ExpiredSessionPolicy::Remove {
                if let Err(error) = self.revoke(token, Some(session.user_id)).await {
                    warn!(user_id = %session.user_id, ?error, "failed to remove expired session");
                }
            }
            return Ok(SessionStatus::Expired);
        }

        // A session whose user document is gone cannot be resumed.
        if self.users.find_by_id(session.user_id).await?.is_none() {
            warn!(user_id = %session.user_id, "session refers to a missing user");
            if let Err(error) = self.sessions.delete(token).await {
                warn!(user_id = %session.user_id, ?error, "failed to drop orphaned session");
            }
            return Ok(SessionStatus::NotFound);
        }

        self.sessions.touch(token, now).await?;
        Ok(SessionStatus::Active {
            user_id: session.user_id,
        })
    }

    pub async fn require_session(&self, token: Option<&str>) -> Result<Uuid, AuthError> {
        match self.check_session(token).await? {
            SessionStatus::Active { user_id } => Ok(user_id),
            SessionStatus::NotFound => Err(AuthError::SessionNotFound),
            SessionStatus::Expired => Err(AuthError::SessionExpired),
        }
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound(user_id))
    }

    /// Best-effort teardown. Every cleanup step runs even when an earlier one
    /// fails; the first failure is returned.
    pub async fn logout(&self, token: Option<&str>) -> Result<(), AuthError> {
        let Some(token) = token else {
            return Ok(());
        };

        let (user_id, lookup) = match self.sessions.get(token).await {
            Ok(session) => (session.map(|session| session.user_id), Ok(())),
            Err(error) => (None, Err(AuthError::Cache(error))),
        };

        let revoked = self.revoke(token, user_id).await;
        lookup.and(revoked)?;

        if let Some(user_id) = user_id {
            info!(%user_id, "user logged out");
        }
        Ok(())
    }

    async fn revoke(&self, token: &str, user_id: Option<Uuid>) -> Result<(), AuthError> {
        let (cache, store) = tokio::join!(self.sessions.delete(token), async {
            match user_id {
                Some(user_id) => self.users.remove_session_reference(user_id, token).await,
                None => Ok(()),
            }
        });

        if let Err(error) = &cache {
            warn!(?error, "failed to delete session from cache");
        }
        if let Err(error) = &store {
            warn!(?user_id, ?error, "failed to remove session reference from user");
        }

        cache?;
        store?;
        Ok(())
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn AuthorizationProvider>, AuthError> {
        self.providers
            .get(name)
            .ok_or_else(|| AuthError::UnsupportedProvider(name.to_string()))
    }
}

fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn states_match(query: Option<&str>, cookie: Option<&str>) -> bool {
    match (query, cookie) {
        (Some(query), Some(cookie)) if !query.is_empty() && !cookie.is_empty() => {
            query.as_bytes().ct_eq(cookie.as_bytes()).into()
        }
        _ => false,
    }
}
