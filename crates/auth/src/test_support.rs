//! Fakes shared by the orchestrator and router tests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use secrecy::SecretString;
use sentry::{ClientOptions, Hub, Scope, test::TestTransport};
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{
        AuthService, AuthorizationGrant, AuthorizationProvider, CallbackRequest, ClientInfo,
        CookieIssuer, ExchangeError, LoginSuccess, ProfileFetchError, ProviderProfile,
        ProviderRegistry,
    },
    clock::ManualClock,
    config::{CookieConfig, SessionConfig},
    db::{
        memory::{MemoryCredentialStore, MemorySessionCache},
        sessions::{Session, SessionCache, SessionCacheError},
        users::{CredentialStore, UpsertUser, User, UserStoreError},
    },
};

pub const PUBLIC_ORIGIN: &str = "http://localhost:8090";

#[derive(Default)]
pub struct ProviderCalls {
    pub exchanges: AtomicUsize,
    pub profiles: AtomicUsize,
    pub fail_exchange: AtomicBool,
    pub fail_profile: AtomicBool,
}

/// Scripted provider: always returns the same identity unless told to fail.
pub struct FakeProvider {
    name: &'static str,
    calls: Arc<ProviderCalls>,
}

impl FakeProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<ProviderCalls> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl AuthorizationProvider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Url {
        Url::parse_with_params(
            "https://provider.test/authorize",
            &[("state", state), ("redirect_uri", redirect_uri)],
        )
        .unwrap()
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _redirect_uri: &str,
    ) -> Result<AuthorizationGrant, ExchangeError> {
        self.calls.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.calls.fail_exchange.load(Ordering::SeqCst) {
            return Err(ExchangeError::Status {
                status: StatusCode::BAD_GATEWAY,
                body: "upstream unavailable".into(),
            });
        }

        Ok(AuthorizationGrant {
            access_token: SecretString::new("fake-access-token".into()),
            token_type: "bearer".into(),
            scope: Some("user:email".into()),
            expires_in: None,
        })
    }

    async fn fetch_profile(
        &self,
        _access_token: &SecretString,
    ) -> Result<ProviderProfile, ProfileFetchError> {
        self.calls.profiles.fetch_add(1, Ordering::SeqCst);
        if self.calls.fail_profile.load(Ordering::SeqCst) {
            return Err(ProfileFetchError::Malformed("no profile".into()));
        }

        let raw = json!({ "id": 4242, "login": "mona", "name": "Mona Lisa" });
        Ok(ProviderProfile {
            id: "4242".into(),
            raw: raw.as_object().cloned().unwrap(),
        })
    }

    async fn fetch_emails(
        &self,
        _access_token: &SecretString,
    ) -> Result<Option<Vec<Value>>, ProfileFetchError> {
        if self.name != "github" {
            return Ok(None);
        }
        Ok(Some(vec![
            json!({ "email": "mona@example.com", "primary": true, "verified": true }),
        ]))
    }
}

#[derive(Default)]
pub struct FlakyCredentialStore {
    pub inner: MemoryCredentialStore,
    pub fail_upsert: AtomicBool,
    pub fail_remove: AtomicBool,
}

fn store_offline() -> UserStoreError {
    UserStoreError::Unavailable("credential store offline".into())
}

#[async_trait]
impl CredentialStore for FlakyCredentialStore {
    async fn upsert_by_provider_identity(
        &self,
        user: UpsertUser<'_>,
        session_token: &str,
    ) -> Result<Uuid, UserStoreError> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(store_offline());
        }
        self.inner
            .upsert_by_provider_identity(user, session_token)
            .await
    }

    async fn remove_session_reference(
        &self,
        user_id: Uuid,
        session_token: &str,
    ) -> Result<(), UserStoreError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(store_offline());
        }
        self.inner
            .remove_session_reference(user_id, session_token)
            .await
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, UserStoreError> {
        self.inner.find_by_id(user_id).await
    }
}

#[derive(Default)]
pub struct FlakySessionCache {
    pub inner: MemorySessionCache,
    pub fail_put: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
}

fn cache_offline() -> SessionCacheError {
    SessionCacheError::Unavailable("session cache offline".into())
}

#[async_trait]
impl SessionCache for FlakySessionCache {
    async fn put(&self, session: &Session) -> Result<(), SessionCacheError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(cache_offline());
        }
        self.inner.put(session).await
    }

    async fn get(&self, token: &str) -> Result<Option<Session>, SessionCacheError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(cache_offline());
        }
        self.inner.get(token).await
    }

    async fn touch(&self, token: &str, now: DateTime<Utc>) -> Result<(), SessionCacheError> {
        self.inner.touch(token, now).await
    }

    async fn delete(&self, token: &str) -> Result<(), SessionCacheError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(cache_offline());
        }
        self.inner.delete(token).await
    }
}

pub struct Harness {
    pub service: Arc<AuthService>,
    pub users: Arc<FlakyCredentialStore>,
    pub sessions: Arc<FlakySessionCache>,
    pub clock: Arc<ManualClock>,
    pub github: Arc<ProviderCalls>,
    pub google: Arc<ProviderCalls>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SessionConfig::default())
    }

    pub fn with_settings(settings: SessionConfig) -> Self {
        let github = FakeProvider::new("github");
        let google = FakeProvider::new("google");
        let github_calls = github.calls();
        let google_calls = google.calls();

        let mut registry = ProviderRegistry::new();
        registry.register(github);
        registry.register(google);

        let users = Arc::new(FlakyCredentialStore::default());
        let sessions = Arc::new(FlakySessionCache::default());
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));

        let service = Arc::new(AuthService::new(
            Arc::new(registry),
            users.clone(),
            sessions.clone(),
            clock.clone(),
            settings,
            format!("{PUBLIC_ORIGIN}/"),
        ));

        Self {
            service,
            users,
            sessions,
            clock,
            github: github_calls,
            google: google_calls,
        }
    }

    pub async fn login(&self, provider: &str) -> LoginSuccess {
        self.service
            .callback(matching_callback(provider, "state-token"))
            .await
            .unwrap()
    }

    pub fn app_state(&self) -> AppState {
        self.app_state_with_proxy(false)
    }

    pub fn app_state_with_proxy(&self, trust_forwarded_for: bool) -> AppState {
        AppState::new(
            Arc::clone(&self.service),
            Arc::new(CookieIssuer::new(CookieConfig::default())),
            trust_forwarded_for,
        )
    }
}

pub fn matching_callback(provider: &str, state: &str) -> CallbackRequest {
    CallbackRequest {
        provider: provider.to_string(),
        code: Some("code-123".into()),
        state: Some(state.to_string()),
        error: None,
        cookie_state: Some(state.to_string()),
        client: ClientInfo {
            ip: Some("203.0.113.7".into()),
            user_agent: Some("test-agent".into()),
        },
    }
}

/// A hub with an enabled client, so scope changes are not skipped.
pub fn sentry_hub() -> Arc<Hub> {
    let options = ClientOptions {
        dsn: Some("https://public@sentry.invalid/1".parse().unwrap()),
        transport: Some(Arc::new(TestTransport::new())),
        ..Default::default()
    };
    Arc::new(Hub::new(
        Some(Arc::new(options.into())),
        Arc::new(Scope::default()),
    ))
}

pub fn scope_user_id(hub: &Hub) -> Option<String> {
    hub.configure_scope(|scope| scope.user().and_then(|user| user.id.clone()))
}
