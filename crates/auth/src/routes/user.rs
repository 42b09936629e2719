use axum::{
    Json, Router,
    extract::{Extension, State},
    routing::get,
};

use super::error::ErrorResponse;
use crate::{AppState, auth::RequestContext, db::users::User};

pub fn router() -> Router<AppState> {
    Router::new().route("/user/get", get(get_user))
}

async fn get_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<User>, ErrorResponse> {
    let user = state.auth().current_user(ctx.user_id).await?;
    Ok(Json(user))
}
