use std::{env, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use secrecy::SecretString;
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8090";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8090";
const DEFAULT_USER_AGENT: &str = "Twizio/1.0";
const MIN_TOKEN_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(&'static str),
    #[error("invalid value for environment variable `{0}`")]
    InvalidVar(&'static str),
    #[error("no OAuth providers configured")]
    NoOAuthProviders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// What `isLoggedIn` does with a session whose sliding window has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiredSessionPolicy {
    /// Report the session as expired and leave it in the cache.
    #[default]
    Keep,
    /// Report the session as expired, drop it from the cache and prune it
    /// from the owning user.
    Remove,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub listen_addr: String,
    pub public_base_url: String,
    /// Take the client IP from `X-Forwarded-For`. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_forwarded_for: bool,
    pub credential_store: StoreBackend,
    pub session_cache: StoreBackend,
    pub auth: AuthConfig,
    pub cookies: CookieConfig,
    pub sessions: SessionConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let credential_store = vars.backend("CREDENTIAL_STORE_BACKEND")?;
        let session_cache = vars.backend("SESSION_CACHE_BACKEND")?;

        let database_url = vars
            .get("SERVER_DATABASE_URL")
            .or_else(|| vars.get("DATABASE_URL"));
        let needs_database =
            credential_store == StoreBackend::Postgres || session_cache == StoreBackend::Postgres;
        if needs_database && database_url.is_none() {
            return Err(ConfigError::MissingVar("SERVER_DATABASE_URL"));
        }

        let listen_addr = vars
            .get("SERVER_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let public_base_url = vars
            .get("SERVER_PUBLIC_BASE_URL")
            .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let trust_forwarded_for = vars.parse_or("SERVER_TRUST_FORWARDED_FOR", false)?;

        Ok(Self {
            database_url,
            listen_addr,
            public_base_url,
            trust_forwarded_for,
            credential_store,
            session_cache,
            auth: AuthConfig::from_vars(&vars)?,
            cookies: CookieConfig::from_vars(&vars)?,
            sessions: SessionConfig::from_vars(&vars)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: String,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub emails_url: Option<String>,
}

impl OAuthProviderConfig {
    pub fn github(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            scope: String::new(),
            authorize_url: "https://github.com/login/oauth/authorize".into(),
            token_url: "https://github.com/login/oauth/access_token".into(),
            profile_url: "https://api.github.com/user".into(),
            emails_url: Some("https://api.github.com/user/emails".into()),
        }
    }

    pub fn google(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            scope: "openid email profile".into(),
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            profile_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
            emails_url: None,
        }
    }

    /// Reads `{prefix}_OAUTH_*` variables. Returns `None` when the client id is absent.
    fn from_vars(
        vars: &Vars<'_>,
        names: &ProviderVarNames,
        defaults: fn(String, SecretString) -> Self,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(client_id) = vars.get(names.client_id) else {
            return Ok(None);
        };
        let client_secret = vars
            .get(names.client_secret)
            .ok_or(ConfigError::MissingVar(names.client_secret))?;

        let mut config = defaults(client_id, SecretString::new(client_secret.into()));
        if let Some(scope) = vars.get(names.scope) {
            config.scope = scope;
        }
        if let Some(url) = vars.get(names.authorize_url) {
            config.authorize_url = url;
        }
        if let Some(url) = vars.get(names.token_url) {
            config.token_url = url;
        }
        if let Some(url) = vars.get(names.profile_url) {
            config.profile_url = url;
        }
        if let Some(var) = names.emails_url
            && let Some(url) = vars.get(var)
        {
            config.emails_url = Some(url);
        }
        Ok(Some(config))
    }
}

struct ProviderVarNames {
    client_id: &'static str,
    client_secret: &'static str,
    scope: &'static str,
    authorize_url: &'static str,
    token_url: &'static str,
    profile_url: &'static str,
    emails_url: Option<&'static str>,
}

const GITHUB_VARS: ProviderVarNames = ProviderVarNames {
    client_id: "GITHUB_OAUTH_CLIENT_ID",
    client_secret: "GITHUB_OAUTH_CLIENT_SECRET",
    scope: "GITHUB_OAUTH_SCOPE",
    authorize_url: "GITHUB_OAUTH_AUTHORIZE_URL",
    token_url: "GITHUB_OAUTH_TOKEN_URL",
    profile_url: "GITHUB_OAUTH_PROFILE_URL",
    emails_url: Some("GITHUB_OAUTH_EMAILS_URL"),
};

const GOOGLE_VARS: ProviderVarNames = ProviderVarNames {
    client_id: "GOOGLE_OAUTH_CLIENT_ID",
    client_secret: "GOOGLE_OAUTH_CLIENT_SECRET",
    scope: "GOOGLE_OAUTH_SCOPE",
    authorize_url: "GOOGLE_OAUTH_AUTHORIZE_URL",
    token_url: "GOOGLE_OAUTH_TOKEN_URL",
    profile_url: "GOOGLE_OAUTH_PROFILE_URL",
    emails_url: None,
};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    github: Option<OAuthProviderConfig>,
    google: Option<OAuthProviderConfig>,
    user_agent: String,
    http_timeout: StdDuration,
}

impl AuthConfig {
    fn from_vars(vars: &Vars<'_>) -> Result<Self, ConfigError> {
        let github = OAuthProviderConfig::from_vars(vars, &GITHUB_VARS, |id, secret| {
            OAuthProviderConfig::github(id, secret)
        })?;
        let google = OAuthProviderConfig::from_vars(vars, &GOOGLE_VARS, |id, secret| {
            OAuthProviderConfig::google(id, secret)
        })?;

        if github.is_none() && google.is_none() {
            return Err(ConfigError::NoOAuthProviders);
        }

        let user_agent = vars
            .get("OAUTH_USER_AGENT")
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let timeout_secs: u64 = vars.parse_or("OAUTH_HTTP_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidVar("OAUTH_HTTP_TIMEOUT_SECS"));
        }

        Ok(Self {
            github,
            google,
            user_agent,
            http_timeout: StdDuration::from_secs(timeout_secs),
        })
    }

    pub fn github(&self) -> Option<&OAuthProviderConfig> {
        self.github.as_ref()
    }

    pub fn google(&self) -> Option<&OAuthProviderConfig> {
        self.google.as_ref()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn http_timeout(&self) -> StdDuration {
        self.http_timeout
    }
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub domain: Option<String>,
    pub secure: bool,
    pub state_cookie_name: String,
    pub state_timeout: Duration,
    pub session_cookie_name: String,
    pub session_max_age: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            domain: None,
            secure: false,
            state_cookie_name: "twizioState".into(),
            state_timeout: Duration::minutes(5),
            session_cookie_name: "twizioSessionKey".into(),
            session_max_age: Duration::days(365),
        }
    }
}

impl CookieConfig {
    fn from_vars(vars: &Vars<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let state_timeout_secs: i64 = vars.parse_or(
            "STATE_TIMEOUT_SECS",
            defaults.state_timeout.num_seconds(),
        )?;
        let session_max_age_secs: i64 = vars.parse_or(
            "SESSION_COOKIE_MAX_AGE_SECS",
            defaults.session_max_age.num_seconds(),
        )?;
        if state_timeout_secs <= 0 {
            return Err(ConfigError::InvalidVar("STATE_TIMEOUT_SECS"));
        }
        if session_max_age_secs <= 0 {
            return Err(ConfigError::InvalidVar("SESSION_COOKIE_MAX_AGE_SECS"));
        }

        Ok(Self {
            domain: vars.get("COOKIE_DOMAIN").filter(|d| !d.is_empty()),
            secure: vars.parse_or("COOKIE_SECURE", defaults.secure)?,
            state_cookie_name: vars
                .get("STATE_COOKIE_NAME")
                .unwrap_or(defaults.state_cookie_name),
            state_timeout: Duration::seconds(state_timeout_secs),
            session_cookie_name: vars
                .get("SESSION_COOKIE_NAME")
                .unwrap_or(defaults.session_cookie_name),
            session_max_age: Duration::seconds(session_max_age_secs),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub state_token_bytes: usize,
    pub session_token_bytes: usize,
    pub refresh_interval: Duration,
    pub expired_policy: ExpiredSessionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_token_bytes: 20,
            session_token_bytes: 20,
            refresh_interval: Duration::hours(1),
            expired_policy: ExpiredSessionPolicy::Keep,
        }
    }
}

impl SessionConfig {
    fn from_vars(vars: &Vars<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let state_token_bytes = vars.parse_or("STATE_TOKEN_BYTES", defaults.state_token_bytes)?;
        if state_token_bytes < MIN_TOKEN_BYTES {
            return Err(ConfigError::InvalidVar("STATE_TOKEN_BYTES"));
        }
        let session_token_bytes =
            vars.parse_or("SESSION_TOKEN_BYTES", defaults.session_token_bytes)?;
        if session_token_bytes < MIN_TOKEN_BYTES {
            return Err(ConfigError::InvalidVar("SESSION_TOKEN_BYTES"));
        }

        let refresh_secs: i64 = vars.parse_or(
            "SESSION_REFRESH_INTERVAL_SECS",
            defaults.refresh_interval.num_seconds(),
        )?;
        if refresh_secs <= 0 {
            return Err(ConfigError::InvalidVar("SESSION_REFRESH_INTERVAL_SECS"));
        }

        let expired_policy = match vars.get("SESSION_EXPIRED_POLICY") {
            None => defaults.expired_policy,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "keep" => ExpiredSessionPolicy::Keep,
                "remove" => ExpiredSessionPolicy::Remove,
                _ => return Err(ConfigError::InvalidVar("SESSION_EXPIRED_POLICY")),
            },
        };

        Ok(Self {
            state_token_bytes,
            session_token_bytes,
            refresh_interval: Duration::seconds(refresh_secs),
            expired_policy,
        })
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar(key)),
            None => Ok(default),
        }
    }

    fn backend(&self, key: &'static str) -> Result<StoreBackend, ConfigError> {
        match self.get(key) {
            None => Ok(StoreBackend::Postgres),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "postgres" => Ok(StoreBackend::Postgres),
                "memory" => Ok(StoreBackend::Memory),
                _ => Err(ConfigError::InvalidVar(key)),
            },
        }
    }
}
