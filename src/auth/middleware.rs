//! Authentication extractors
//!
//! Resolve the session cookie to a [`User`] for handlers.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::CookieJar;

use super::session::SESSION_COOKIE;
use crate::AppState;
use crate::data::User;
use crate::error::AppError;

/// Load the user behind the request's session cookie.
///
/// Any failure, including a stale credential marker, is `Unauthorized`.
async fn authenticate(parts: &Parts, state: &AppState) -> Result<User, AppError> {
    let jar = CookieJar::from_headers(&parts.headers);
    let token = jar.get(SESSION_COOKIE).ok_or(AppError::Unauthorized)?;
    let session = state
        .sessions
        .decode(token.value())
        .ok_or(AppError::Unauthorized)?;

    let user = match state.db.get_user(session.user_id).await {
        Ok(user) => user,
        Err(AppError::NotFound) => return Err(AppError::Unauthorized),
        Err(error) => return Err(error),
    };
    if !session.matches(&user) {
        tracing::debug!(user_id = user.id, "Stale session rejected");
        return Err(AppError::Unauthorized);
    }
    Ok(user)
}

async fn cached_user(parts: &mut Parts, state: &AppState) -> Result<User, AppError> {
    if let Some(user) = parts.extensions.get::<User>().cloned() {
        return Ok(user);
    }
    let user = authenticate(parts, state).await?;
    parts.extensions.insert(user.clone());
    Ok(user)
}

/// Extractor for the logged-in user
///
/// Rejects with `Unauthorized`, which redirects to the login page.
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> impl IntoResponse {
///     format!("Hello, {}", user.name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        Ok(CurrentUser(cached_user(parts, &state).await?))
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        Ok(MaybeUser(cached_user(parts, &state).await.ok()))
    }
}

/// Extractor for a logged-in admin
///
/// Everything short of an admin session answers 404, hiding the admin pages.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let user = match cached_user(parts, &state).await {
            Ok(user) => user,
            Err(AppError::Unauthorized) => return Err(AppError::NotFound),
            Err(error) => return Err(error),
        };
        crate::service::AccountService::check_admin_rights(&user)?;
        Ok(AdminUser(user))
    }
}
