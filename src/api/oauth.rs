//! OAuth login, signup and linking
//!
//! The same two routes serve all three: a logged-in caller links the
//! provider account, anyone else logs in or signs up.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::user::establish_session;
use crate::AppState;
use crate::auth::{MaybeUser, ProviderConfig, oauth::parse_provider};
use crate::error::AppError;

/// Routes:
/// - GET /oauth/:provider - Redirect to the provider
/// - GET /oauth/:provider/callback - Provider redirect target
pub fn oauth_router() -> Router<AppState> {
    Router::new()
        .route("/oauth/:provider", get(authorize))
        .route("/oauth/:provider/callback", get(callback))
}

/// GET /oauth/:provider
async fn authorize(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    Path(provider): Path<String>,
) -> Result<Redirect, AppError> {
    let auth_type = parse_provider(&provider)?;
    let config = ProviderConfig::load(&state.settings, auth_type).await?;
    let nonce = state
        .oauth_states
        .issue(auth_type, caller.map(|user| user.id))
        .await;
    let url = state.oauth.authorize_url(&config, &nonce)?;
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// GET /oauth/:provider/callback
///
/// # Errors
/// - `InvalidInput` for an unknown state or a provider error
/// - `Conflict` when linking an account bound to another user
/// - `PolicyDisabled` when no user is bound and signup is off
async fn callback(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    jar: CookieJar,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    let auth_type = parse_provider(&provider)?;
    let pending = state.oauth_states.consume(&query.state, auth_type).await?;
    if let Some(error) = query.error {
        return Err(AppError::InvalidInput(format!(
            "{auth_type} authorization failed: {error}"
        )));
    }
    let code = query
        .code
        .ok_or_else(|| AppError::InvalidInput("missing authorization code".to_string()))?;

    let config = ProviderConfig::load(&state.settings, auth_type).await?;
    let grant = state.oauth.exchange(&config, &code).await?;

    if let Some(link_user) = pending.link_user {
        let caller = caller
            .filter(|user| user.id == link_user)
            .ok_or(AppError::Unauthorized)?;
        let user = state.accounts.link_oauth(&caller, auth_type, &grant).await?;
        let jar = establish_session(&state, jar, &user)?;
        return Ok((jar, Redirect::to("/user")).into_response());
    }

    let user = match state.accounts.login_oauth(auth_type, &grant).await {
        Ok(user) => user,
        Err(AppError::NotFound) => state.accounts.signup_oauth(auth_type, &grant).await?,
        Err(error) => return Err(error),
    };
    tracing::info!(user_id = user.id, provider = %auth_type, "OAuth login");

    let jar = establish_session(&state, jar, &user)?;
    Ok((jar, Redirect::to("/")).into_response())
}
