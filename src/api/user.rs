//! Account pages
//!
//! Profile, local login and signup, logout, login method removal and
//! redemption of single-use `/auth/` keys.

use axum::{
    Form, Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::dto::{MovieResponse, UserResponse};
use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser, ProviderConfig, Session, removal_cookie};
use crate::data::{AuthType, User};
use crate::error::AppError;
use crate::security::UrlKeyKind;
use crate::service::ProfileUpdate;

/// Routes:
/// - GET/POST /user - Profile and profile actions
/// - GET/POST /user/login - Local login
/// - GET /user/logout - Drop the session
/// - GET/POST /user/new - Local signup
/// - GET /user/remove/local - Remove the LOCAL login
/// - GET/POST /auth/:url - Redeem a password reset or admin claim key
pub fn user_router() -> Router<AppState> {
    Router::new()
        .route("/user", get(profile).post(profile_action))
        .route("/user/login", get(login_page).post(login))
        .route("/user/logout", get(logout))
        .route("/user/new", get(signup_page).post(signup))
        .route("/user/remove/local", get(remove_local))
        .route("/auth/:url", get(url_key_page).post(redeem_url_key))
}

/// Bind a fresh session cookie to the user's preferred login method.
pub(crate) fn establish_session(
    state: &AppState,
    jar: CookieJar,
    user: &User,
) -> Result<CookieJar, AppError> {
    let session = Session::for_user(user).ok_or(AppError::Unauthorized)?;
    Ok(jar.add(state.sessions.cookie(&session)?))
}

/// Which login channels the site offers
async fn login_channels(state: &AppState) -> Result<serde_json::Value, AppError> {
    let mut providers = serde_json::Map::new();
    for auth_type in [AuthType::Twitch, AuthType::Discord, AuthType::Patreon] {
        providers.insert(
            auth_type.as_str().to_lowercase(),
            serde_json::json!({
                "login": ProviderConfig::load(&state.settings, auth_type).await.is_ok(),
                "signup": state.settings.signup_enabled(auth_type).await?,
            }),
        );
    }
    Ok(serde_json::json!({
        "local_signup": state.settings.signup_enabled(AuthType::Local).await?,
        "oauth": providers,
    }))
}

// =============================================================================
// Profile
// =============================================================================

/// GET /user
///
/// The caller's account, active votes, nominations and remaining votes.
async fn profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let votes: Vec<_> = state
        .db
        .get_user_votes(user.id)
        .await?
        .into_iter()
        .filter(|movie| movie.is_active())
        .collect();
    let movies = state.db.get_user_movies(user.id).await?;

    Ok(Json(serde_json::json!({
        "user": UserResponse::from(&user),
        "votes": MovieResponse::list(&votes, Some(&user)),
        "movies": MovieResponse::list(&movies, Some(&user)),
        "available_votes": state.voting.available_votes(user.id).await?,
        "channels": login_channels(&state).await?,
    })))
}

/// Fields of every profile action; `Action` selects which ones are read.
#[derive(Debug, Default, Deserialize)]
pub struct ProfileForm {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "CurrentPassword", default)]
    current_password: Option<String>,
    #[serde(rename = "Password", default)]
    password: String,
    #[serde(rename = "PasswordConfirm", default)]
    password_confirm: Option<String>,
    #[serde(rename = "Email", default)]
    email: Option<String>,
    #[serde(rename = "NotifyCycleEnd", default)]
    notify_cycle_end: Option<String>,
    #[serde(rename = "NotifyVoteSelection", default)]
    notify_vote_selection: Option<String>,
    #[serde(rename = "Method", default)]
    method: String,
}

/// POST /user
///
/// Actions: `password`, `profile`, `remove` (an OAuth login), `refresh`
/// (OAuth tokens).
async fn profile_action(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Form(form): Form<ProfileForm>,
) -> Result<Response, AppError> {
    let (user, jar) = match form.action.as_str() {
        "password" => {
            if form
                .password_confirm
                .as_deref()
                .is_some_and(|confirm| confirm != form.password)
            {
                let mut errors = crate::error::FormErrors::new();
                errors.add("PasswordConfirm", "passwords do not match");
                return Err(AppError::Form(errors));
            }
            let user = state
                .accounts
                .change_password(&user, form.current_password.as_deref(), &form.password)
                .await?;
            let jar = establish_session(&state, jar, &user)?;
            (user, jar)
        }
        "profile" => {
            let update = ProfileUpdate {
                email: form.email,
                notify_cycle_end: Some(form.notify_cycle_end.is_some()),
                notify_vote_selection: Some(form.notify_vote_selection.is_some()),
            };
            (state.accounts.update_profile(&user, &update).await?, jar)
        }
        "remove" => {
            let auth_type = AuthType::parse(&form.method)
                .filter(|auth_type| auth_type.is_oauth())
                .ok_or_else(|| AppError::InvalidInput("unknown login method".to_string()))?;
            let user = state.accounts.remove_auth_method(&user, auth_type).await?;
            let jar = establish_session(&state, jar, &user)?;
            (user, jar)
        }
        "refresh" => {
            let auth_type = AuthType::parse(&form.method)
                .filter(|auth_type| auth_type.is_oauth())
                .ok_or_else(|| AppError::InvalidInput("unknown login method".to_string()))?;
            let method = user.auth_method(auth_type).ok_or(AppError::NotFound)?;
            let refresh_token = method
                .refresh_token
                .clone()
                .ok_or_else(|| AppError::Conflict("no refresh token stored".to_string()))?;
            let provider = ProviderConfig::load(&state.settings, auth_type).await?;
            let grant = state.oauth.refresh(&provider, &refresh_token).await?;
            state.accounts.update_tokens(method, &grant).await?;
            let user = state.accounts.get_user(user.id).await?;
            let jar = establish_session(&state, jar, &user)?;
            (user, jar)
        }
        other => {
            return Err(AppError::InvalidInput(format!("unknown action {other:?}")));
        }
    };

    Ok((jar, Json(serde_json::json!({ "user": UserResponse::from(&user) }))).into_response())
}

/// GET /user/remove/local
async fn remove_local(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let user = state
        .accounts
        .remove_auth_method(&user, AuthType::Local)
        .await?;
    let jar = establish_session(&state, jar, &user)?;
    Ok((jar, Redirect::to("/user")).into_response())
}

// =============================================================================
// Login, logout, signup
// =============================================================================

/// GET /user/login
async fn login_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> Result<Response, AppError> {
    if user.is_some() {
        return Ok(Redirect::to("/user").into_response());
    }
    Ok(Json(login_channels(&state).await?).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Password")]
    password: String,
}

/// POST /user/login
///
/// Wrong credentials bounce back to the login page.
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let user = state
        .accounts
        .login_local(&form.username, &form.password)
        .await?;
    tracing::info!(user_id = user.id, "User logged in");
    let jar = establish_session(&state, jar, &user)?;
    Ok((jar, Redirect::to("/")).into_response())
}

/// GET /user/logout
async fn logout(jar: CookieJar) -> Response {
    (jar.remove(removal_cookie()), Redirect::to("/")).into_response()
}

/// GET /user/new
async fn signup_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> Result<Response, AppError> {
    if user.is_some() {
        return Ok(Redirect::to("/user").into_response());
    }
    Ok(Json(login_channels(&state).await?).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "PasswordConfirm", default)]
    password_confirm: Option<String>,
    #[serde(rename = "Email", default)]
    email: String,
}

/// POST /user/new
///
/// Creates the account and logs it in.
async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> Result<Response, AppError> {
    if form
        .password_confirm
        .as_deref()
        .is_some_and(|confirm| confirm != form.password)
    {
        let mut errors = crate::error::FormErrors::new();
        errors.add("PasswordConfirm", "passwords do not match");
        return Err(AppError::Form(errors));
    }

    let user = state
        .accounts
        .signup_local(&form.username, &form.password, &form.email)
        .await?;
    let jar = establish_session(&state, jar, &user)?;
    Ok((jar, Redirect::to("/")).into_response())
}

// =============================================================================
// URL keys
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UrlKeyQuery {
    #[serde(default)]
    key: String,
}

/// GET /auth/:url
///
/// Shows what a key grants. Unknown keys answer 404.
async fn url_key_page(
    State(state): State<AppState>,
    Path(url): Path<String>,
    Query(query): Query<UrlKeyQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let kind = match state.accounts.inspect_url_key(&url, &query.key).await? {
        UrlKeyKind::AdminAuth => "admin",
        UrlKeyKind::PasswordReset { .. } => "password_reset",
    };
    Ok(Json(serde_json::json!({ "kind": kind })))
}

#[derive(Debug, Deserialize)]
pub struct RedeemForm {
    #[serde(rename = "Key", default)]
    key: String,
    #[serde(rename = "Password", default)]
    password: String,
}

/// POST /auth/:url
///
/// Password reset keys set a new password and log the user in. The admin
/// claim key elevates the logged-in caller.
async fn redeem_url_key(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    jar: CookieJar,
    Path(url): Path<String>,
    Query(query): Query<UrlKeyQuery>,
    Form(form): Form<RedeemForm>,
) -> Result<Response, AppError> {
    let key = if form.key.is_empty() {
        query.key
    } else {
        form.key
    };

    match state.accounts.inspect_url_key(&url, &key).await? {
        UrlKeyKind::PasswordReset { .. } => {
            let user = state
                .accounts
                .reset_password(&url, &key, &form.password)
                .await?;
            let jar = establish_session(&state, jar, &user)?;
            Ok((jar, Redirect::to("/user")).into_response())
        }
        UrlKeyKind::AdminAuth => {
            let caller = caller.ok_or(AppError::Unauthorized)?;
            state.accounts.claim_admin(&caller, &url, &key).await?;
            Ok(Redirect::to("/admin").into_response())
        }
    }
}
