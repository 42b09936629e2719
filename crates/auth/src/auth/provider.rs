use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use url::Url;

use crate::config::OAuthProviderConfig;

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Builds the client shared by the provider implementations. Every request
/// made through it is bounded by `timeout`.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
}

#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub access_token: SecretString,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_in: Option<i64>,
}

/// Provider profile. `raw` is the provider's JSON object, passed through as-is.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub id: String,
    pub raw: Map<String, Value>,
}

impl ProviderProfile {
    fn from_value(value: Value, id_fields: &[&str]) -> Result<Self, ProfileFetchError> {
        let Value::Object(raw) = value else {
            return Err(ProfileFetchError::Malformed(
                "profile is not a JSON object".into(),
            ));
        };

        let id = id_fields
            .iter()
            .find_map(|field| match raw.get(*field) {
                Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                ProfileFetchError::Malformed(format!(
                    "profile has no `{}` field",
                    id_fields.join("`/`")
                ))
            })?;

        Ok(Self { id, raw })
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("token endpoint responded {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("provider rejected the authorization code: {error}")]
    Rejected {
        error: String,
        description: Option<String>,
    },
    #[error("unreadable token response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ProfileFetchError {
    #[error("profile request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("profile endpoint responded {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unreadable profile response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Url;
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationGrant, ExchangeError>;
    async fn fetch_profile(
        &self,
        access_token: &SecretString,
    ) -> Result<ProviderProfile, ProfileFetchError>;

    /// Verified email addresses, for providers that keep them out of the profile.
    async fn fetch_emails(
        &self,
        _access_token: &SecretString,
    ) -> Result<Option<Vec<Value>>, ProfileFetchError> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AuthorizationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P>(&mut self, provider: P)
    where
        P: AuthorizationProvider + 'static,
    {
        let key = provider.name().to_lowercase();
        self.providers.insert(key, Arc::new(provider));
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn AuthorizationProvider>> {
        let key = provider.to_lowercase();
        self.providers.get(&key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

struct Endpoints {
    authorize: Url,
    token: Url,
    profile: Url,
    emails: Option<Url>,
}

impl Endpoints {
    fn parse(provider: &str, config: &OAuthProviderConfig) -> Result<Self> {
        let parse = |value: &str, what: &str| {
            Url::parse(value).with_context(|| format!("invalid {provider} {what} url `{value}`"))
        };
        Ok(Self {
            authorize: parse(&config.authorize_url, "authorize")?,
            token: parse(&config.token_url, "token")?,
            profile: parse(&config.profile_url, "profile")?,
            emails: config
                .emails_url
                .as_deref()
                .map(|value| parse(value, "emails"))
                .transpose()?,
        })
    }
}

async fn error_body(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        body.chars().take(MAX_ERROR_BODY_CHARS).collect()
    } else {
        body
    }
}

async fn read_token_response<T>(response: Response) -> Result<T, ExchangeError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if status != StatusCode::OK {
        return Err(ExchangeError::Status {
            status,
            body: error_body(response).await,
        });
    }

    let body = response.bytes().await.map_err(ExchangeError::Transport)?;
    serde_json::from_slice(&body).map_err(|err| ExchangeError::Malformed(err.to_string()))
}

async fn fetch_json(request: RequestBuilder) -> Result<Value, ProfileFetchError> {
    let response = request.send().await.map_err(ProfileFetchError::Transport)?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(ProfileFetchError::Status {
            status,
            body: error_body(response).await,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(ProfileFetchError::Transport)?;
    serde_json::from_slice(&body).map_err(|err| ProfileFetchError::Malformed(err.to_string()))
}

pub struct GitHubOAuthProvider {
    client: Client,
    client_id: String,
    client_secret: SecretString,
    scope: String,
    endpoints: Endpoints,
}

impl GitHubOAuthProvider {
    pub fn new(client: Client, config: &OAuthProviderConfig) -> Result<Self> {
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            endpoints: Endpoints::parse("github", config)?,
        })
    }

    fn authorized(&self, url: Url, access_token: &SecretString) -> RequestBuilder {
        // GitHub's REST API takes the `token` scheme and rejects requests without a User-Agent,
        // which the shared client always sets.
        self.client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(
                AUTHORIZATION,
                format!("token {}", access_token.expose_secret()),
            )
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GitHubTokenResponse {
    Success {
        access_token: String,
        scope: Option<String>,
        token_type: Option<String>,
    },
    Error {
        error: String,
        error_description: Option<String>,
    },
}

#[async_trait]
impl AuthorizationProvider for GitHubOAuthProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Url {
        let mut url = self.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", state);
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationGrant, ExchangeError> {
        let response = self
            .client
            .post(self.endpoints.token.clone())
            .header(ACCEPT, "application/json")
            .json(&json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret.expose_secret(),
                "code": code,
                "redirect_uri": redirect_uri,
            }))
            .send()
            .await
            .map_err(ExchangeError::Transport)?;

        match read_token_response::<GitHubTokenResponse>(response).await? {
            GitHubTokenResponse::Success {
                access_token,
                scope,
                token_type,
            } => Ok(AuthorizationGrant {
                access_token: SecretString::new(access_token.into()),
                token_type: token_type.unwrap_or_else(|| "bearer".to_string()),
                scope,
                expires_in: None,
            }),
            GitHubTokenResponse::Error {
                error,
                error_description,
            } => Err(ExchangeError::Rejected {
                error,
                description: error_description,
            }),
        }
    }

    async fn fetch_profile(
        &self,
        access_token: &SecretString,
    ) -> Result<ProviderProfile, ProfileFetchError> {
        let value = fetch_json(self.authorized(self.endpoints.profile.clone(), access_token)).await?;
        ProviderProfile::from_value(value, &["id"])
    }

    async fn fetch_emails(
        &self,
        access_token: &SecretString,
    ) -> Result<Option<Vec<Value>>, ProfileFetchError> {
        let Some(url) = self.endpoints.emails.clone() else {
            return Ok(None);
        };

        let Value::Array(entries) = fetch_json(self.authorized(url, access_token)).await? else {
            return Err(ProfileFetchError::Malformed(
                "email list is not a JSON array".into(),
            ));
        };

        let verified = entries
            .into_iter()
            .filter(|entry| entry.get("verified").and_then(Value::as_bool) == Some(true))
            .collect();
        Ok(Some(verified))
    }
}

pub struct GoogleOAuthProvider {
    client: Client,
    client_id: String,
    client_secret: SecretString,
    scope: String,
    endpoints: Endpoints,
}

impl GoogleOAuthProvider {
    pub fn new(client: Client, config: &OAuthProviderConfig) -> Result<Self> {
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            endpoints: Endpoints::parse("google", config)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GoogleTokenResponse {
    Success {
        access_token: String,
        token_type: String,
        scope: Option<String>,
        expires_in: Option<i64>,
    },
    Error {
        error: String,
        error_description: Option<String>,
    },
}

#[async_trait]
impl AuthorizationProvider for GoogleOAuthProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Url {
        let mut url = self.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", state);
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationGrant, ExchangeError> {
        let response = self
            .client
            .post(self.endpoints.token.clone())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(ExchangeError::Transport)?;

        match read_token_response::<GoogleTokenResponse>(response).await? {
            GoogleTokenResponse::Success {
                access_token,
                token_type,
                scope,
                expires_in,
            } => Ok(AuthorizationGrant {
                access_token: SecretString::new(access_token.into()),
                token_type,
                scope,
                expires_in,
            }),
            GoogleTokenResponse::Error {
                error,
                error_description,
            } => Err(ExchangeError::Rejected {
                error,
                description: error_description,
            }),
        }
    }

    async fn fetch_profile(
        &self,
        access_token: &SecretString,
    ) -> Result<ProviderProfile, ProfileFetchError> {
        let request = self
            .client
            .get(self.endpoints.profile.clone())
            .bearer_auth(access_token.expose_secret());
        let value = fetch_json(request).await?;
        ProviderProfile::from_value(value, &["sub", "id"])
    }
}
