mod cookies;
mod flow;
mod middleware;
mod provider;

pub use cookies::CookieIssuer;
pub use flow::{
    AuthError, AuthService, CallbackRequest, ClientInfo, LoginStart, LoginSuccess, SessionStatus,
};
pub use middleware::{RequestContext, require_session};
pub use provider::{
    AuthorizationGrant, AuthorizationProvider, ExchangeError, GitHubOAuthProvider,
    GoogleOAuthProvider, ProfileFetchError, ProviderProfile, ProviderRegistry, build_http_client,
};
