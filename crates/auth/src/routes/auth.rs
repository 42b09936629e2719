use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{StatusCode, header::USER_AGENT, request::Parts},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use sentry::{Hub, SentryFutureExt};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::error::ErrorResponse;
use crate::{
    AppState,
    auth::{CallbackRequest, ClientInfo, SessionStatus},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/providers/{provider}/callback", get(callback))
        .route("/auth/isLoggedIn", get(is_logged_in))
        .route("/auth/logout", get(logout))
}

impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let forwarded = state
            .trust_forwarded_for()
            .then(|| {
                parts
                    .headers
                    .get("x-forwarded-for")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.split(',').next())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            })
            .flatten();

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(ClientInfo {
            ip: forwarded.or(peer),
            user_agent,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    provider: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    next: String,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ErrorResponse> {
    let start = state
        .auth()
        .login(&payload.provider)
        .inspect_err(|error| warn!(?error, provider = %payload.provider, "login rejected"))?;

    let jar = jar.add(state.cookies().state_cookie(start.state));
    Ok((
        jar,
        Json(LoginResponse {
            next: start.authorize_url.into(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    client: ClientInfo,
    jar: CookieJar,
) -> Response {
    let cookies = state.cookies();
    let request = CallbackRequest {
        provider,
        code: query.code,
        state: query.state,
        error: query.error,
        cookie_state: cookies.read_state(&jar),
        client,
    };
    let jar = jar.add(cookies.clear_state_cookie());

    // Runs detached: a client disconnect must not cancel the pipeline between
    // the user upsert and the session registration. The task gets its own hub
    // so the Sentry user set on login stays with this request.
    let auth = state.auth();
    let hub = Arc::new(Hub::new_from_top(Hub::current()));
    let outcome = tokio::spawn(async move { auth.callback(request).await }.bind_hub(hub)).await;

    match outcome {
        Ok(Ok(success)) => (
            jar.add(cookies.session_cookie(success.session_token)),
            Redirect::to("/"),
        )
            .into_response(),
        Ok(Err(error)) => (jar, ErrorResponse::from(error)).into_response(),
        Err(join_error) => {
            error!(?join_error, "oauth callback task failed");
            (
                jar,
                ErrorResponse::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "login could not be completed",
                ),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginStatusResponse {
    success: bool,
    #[serde(rename = "loggedIn")]
    logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

pub async fn is_logged_in(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<LoginStatusResponse>, ErrorResponse> {
    let token = state.cookies().read_session(&jar);
    let status = state
        .auth()
        .check_session(token.as_deref())
        .await
        .inspect_err(|error| warn!(?error, "session check failed"))?;

    let (logged_in, reason) = match status {
        SessionStatus::Active { .. } => (true, None),
        SessionStatus::NotFound => (false, Some("not found")),
        SessionStatus::Expired => (false, Some("expired")),
    };

    Ok(Json(LoginStatusResponse {
        success: true,
        logged_in,
        reason,
    }))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    let cookies = state.cookies();
    let token = cookies.read_session(&jar);

    if let Err(error) = state.auth().logout(token.as_deref()).await {
        warn!(?error, "logout cleanup incomplete");
    }

    (jar.add(cookies.clear_session_cookie()), Redirect::to("/"))
}
