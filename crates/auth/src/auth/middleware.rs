use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::{AppState, routes::error::ErrorResponse};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
}

/// Rejects requests without a live session cookie. A successful check also
/// slides the session's activity window.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(session_token) = state.cookies().read_session(&jar) else {
        return ErrorResponse::from(super::AuthError::SessionNotFound).into_response();
    };

    let user_id = match state.auth().require_session(Some(&session_token)).await {
        Ok(user_id) => user_id,
        Err(error) => {
            tracing::debug!(?error, "rejected request without a valid session");
            return ErrorResponse::from(error).into_response();
        }
    };

    req.extensions_mut().insert(RequestContext { user_id });

    next.run(req).await
}
