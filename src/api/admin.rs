//! Admin pages
//!
//! Site configuration, cycle management, user and movie moderation.
//! Every route answers 404 to anyone but an admin.

use std::collections::BTreeMap;

use axum::{
    Form, Router,
    extract::{Path, Query, State},
    response::Json,
    routing::get,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::dto::{MovieResponse, UserResponse};
use crate::AppState;
use crate::auth::AdminUser;
use crate::data::{Movie, sort_by_votes};
use crate::error::{AppError, FormErrors};
use crate::service::MovieEdit;
use crate::settings::keys;

/// Users shown per admin page
pub const USERS_PAGE_SIZE: i64 = 50;

/// Routes:
/// - GET /admin - Overview
/// - GET/POST /admin/config - Site configuration
/// - GET/POST /admin/cycles - Start, begin closing or cancel closing a cycle
/// - GET/POST /admin/cyclepost - Finish closing with the selected winners
/// - GET /admin/users - User list
/// - GET/POST /admin/user/:id - One user and its actions
/// - GET /admin/movies - Movie list
/// - GET/POST /admin/movie/:id - One movie and its actions
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin", get(overview))
        .route("/admin/config", get(config_page).post(update_config))
        .route("/admin/cycles", get(cycles_page).post(cycle_action))
        .route("/admin/cyclepost", get(cyclepost_page).post(finish_cycle))
        .route("/admin/users", get(users_page))
        .route("/admin/user/:id", get(user_page).post(user_action))
        .route("/admin/movies", get(movies_page))
        .route("/admin/movie/:id", get(movie_page).post(movie_action))
}

/// Parse an optional date field: RFC 3339 or `YYYY-MM-DD` (midnight UTC).
fn parse_date(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| Some(at.and_utc()))
        .ok_or_else(|| {
            let mut errors = FormErrors::new();
            errors.add(field, format!("invalid date {value:?}"));
            AppError::Form(errors)
        })
}

/// Parse a list of movie ids separated by commas or whitespace.
fn parse_ids(value: &str) -> Result<Vec<i64>, AppError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<i64>()
                .map_err(|_| AppError::InvalidInput(format!("invalid movie id {id:?}")))
        })
        .collect()
}

// =============================================================================
// Overview and configuration
// =============================================================================

/// GET /admin
async fn overview(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let movies = state.db.get_active_movies().await?;
    let pending_approval = movies.iter().filter(|movie| !movie.approved).count();

    Ok(Json(serde_json::json!({
        "admin": UserResponse::from(&admin),
        "cycle": state.cycles.current().await?,
        "voting_enabled": state.settings.flag(keys::VOTING_ENABLED).await?,
        "active_movies": movies.len(),
        "pending_approval": pending_approval,
    })))
}

/// GET /admin/config
async fn config_page(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({
        "config": state.settings.site_config().await?,
    })))
}

/// POST /admin/config
///
/// Every posted key is validated before any is written.
async fn update_config(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Form(form): Form<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let config = state.settings.apply_form(&form).await?;
    tracing::info!(admin_id = admin.id, keys = form.len(), "Site config updated");
    Ok(Json(serde_json::json!({ "config": config })))
}

// =============================================================================
// Cycles
// =============================================================================

/// GET /admin/cycles
async fn cycles_page(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let ranking = state.cycles.ranking().await?;
    Ok(Json(serde_json::json!({
        "cycle": state.cycles.current().await?,
        "voting_enabled": state.settings.flag(keys::VOTING_ENABLED).await?,
        "ranking": MovieResponse::list(&ranking, None),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CycleForm {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "PlannedEnd", default)]
    planned_end: Option<String>,
}

/// POST /admin/cycles
///
/// Actions: `start` (optional `PlannedEnd`), `close` (stops voting and
/// returns the ranking), `cancel` (reopens voting).
async fn cycle_action(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Form(form): Form<CycleForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    match form.action.as_str() {
        "start" => {
            let planned_end = parse_date("PlannedEnd", form.planned_end.as_deref())?;
            let cycle = state.cycles.start(planned_end).await?;
            tracing::info!(admin_id = admin.id, cycle_id = cycle.id, "Cycle started");
            Ok(Json(serde_json::json!({ "cycle": cycle })))
        }
        "close" => {
            let ranking = state.cycles.begin_close().await?;
            Ok(Json(serde_json::json!({
                "cycle": state.cycles.current().await?,
                "ranking": MovieResponse::list(&ranking, None),
            })))
        }
        "cancel" => {
            state.cycles.cancel_close().await?;
            Ok(Json(serde_json::json!({
                "cycle": state.cycles.current().await?,
                "voting_enabled": true,
            })))
        }
        other => Err(AppError::InvalidInput(format!("unknown action {other:?}"))),
    }
}

/// GET /admin/cyclepost
///
/// Ranking to pick winners from.
async fn cyclepost_page(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let ranking = state.cycles.ranking().await?;
    Ok(Json(serde_json::json!({
        "cycle": state.cycles.current().await?,
        "ranking": MovieResponse::list(&ranking, None),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CyclePostForm {
    /// Winner movie ids
    #[serde(rename = "Winners", default)]
    winners: String,
    #[serde(rename = "Ended", default)]
    ended: Option<String>,
}

/// POST /admin/cyclepost
async fn finish_cycle(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Form(form): Form<CyclePostForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    let winners = parse_ids(&form.winners)?;
    let ended = parse_date("Ended", form.ended.as_deref())?;
    let cycle = state.cycles.finish_close(&winners, ended).await?;
    tracing::info!(admin_id = admin.id, cycle_id = cycle.id, "Cycle finished");
    Ok(Json(serde_json::json!({ "cycle": cycle })))
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    page: i64,
}

/// GET /admin/users
async fn users_page(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let page = query.page.max(0);
    let users = match page.checked_mul(USERS_PAGE_SIZE) {
        Some(offset) => state.accounts.list_users(offset, USERS_PAGE_SIZE).await?,
        None => Vec::new(),
    };
    Ok(Json(serde_json::json!({
        "page": page,
        "users": users.iter().map(UserResponse::from).collect::<Vec<_>>(),
    })))
}

/// GET /admin/user/:id
async fn user_page(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = state.accounts.get_user(id).await?;
    let votes = state.db.get_user_votes(id).await?;
    let movies = state.db.get_user_movies(id).await?;
    Ok(Json(serde_json::json!({
        "user": UserResponse::from(&user),
        "votes": MovieResponse::list(&votes, Some(&user)),
        "movies": MovieResponse::list(&movies, Some(&user)),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UserActionForm {
    #[serde(rename = "Action")]
    action: String,
}

/// POST /admin/user/:id
///
/// Actions: `delete`, `purge`, `ban`, `password` (issues a reset URL).
async fn user_action(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Form(form): Form<UserActionForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    if id == admin.id && matches!(form.action.as_str(), "delete" | "purge" | "ban") {
        return Err(AppError::Conflict(
            "admins cannot remove themselves".to_string(),
        ));
    }

    match form.action.as_str() {
        "delete" => state.accounts.soft_delete(id).await?,
        "purge" => state.accounts.purge(id).await?,
        "ban" => state.accounts.ban(id).await?,
        "password" => {
            let key = state.accounts.request_password_reset(id).await?;
            let host = state.settings.string(keys::HOST_ADDRESS).await?;
            return Ok(Json(serde_json::json!({
                "reset_url": format!("{}{}", host.trim_end_matches('/'), key.path()),
            })));
        }
        other => {
            return Err(AppError::InvalidInput(format!("unknown action {other:?}")));
        }
    }
    tracing::info!(admin_id = admin.id, user_id = id, action = %form.action, "User moderated");
    Ok(Json(serde_json::json!({ "ok": true })))
}

// =============================================================================
// Movies
// =============================================================================

/// GET /admin/movies
///
/// Active movies, unapproved ones listed separately.
async fn movies_page(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut movies = state.db.get_active_movies().await?;
    sort_by_votes(&mut movies);
    let (approved, pending): (Vec<Movie>, Vec<Movie>) =
        movies.into_iter().partition(|movie| movie.approved);
    Ok(Json(serde_json::json!({
        "movies": MovieResponse::list(&approved, None),
        "pending": MovieResponse::list(&pending, None),
    })))
}

/// GET /admin/movie/:id
async fn movie_page(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let movie = state.db.get_movie(id).await?;
    Ok(Json(serde_json::json!({
        "movie": MovieResponse::new(&movie, None),
    })))
}

#[derive(Debug, Deserialize)]
pub struct MovieActionForm {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "Remarks", default)]
    remarks: Option<String>,
    #[serde(rename = "Duration", default)]
    duration: Option<String>,
    #[serde(rename = "Rating", default)]
    rating: Option<String>,
}

/// POST /admin/movie/:id
///
/// Actions: `approve`, `remove`, `edit`.
async fn movie_action(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Form(form): Form<MovieActionForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    let movie = match form.action.as_str() {
        "approve" => Some(state.nominations.approve(id).await?),
        "remove" => {
            state.nominations.remove(id).await?;
            None
        }
        "edit" => {
            let rating = match form.rating.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(value) => Some(value.parse::<f32>().map_err(|_| {
                    AppError::InvalidInput(format!("invalid rating {value:?}"))
                })?),
            };
            let edit = MovieEdit {
                name: form.name,
                description: form.description,
                remarks: form.remarks,
                duration: form.duration,
                rating,
            };
            Some(state.nominations.edit(id, &edit).await?)
        }
        other => {
            return Err(AppError::InvalidInput(format!("unknown action {other:?}")));
        }
    };
    tracing::info!(admin_id = admin.id, movie_id = id, action = %form.action, "Movie moderated");
    Ok(Json(serde_json::json!({
        "movie": movie.as_ref().map(|movie| MovieResponse::new(movie, None)),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_accept_rfc3339_and_plain_days() {
        assert_eq!(parse_date("Ended", None).unwrap(), None);
        assert_eq!(parse_date("Ended", Some("  ")).unwrap(), None);

        let day = parse_date("Ended", Some("2024-05-01")).unwrap().unwrap();
        assert_eq!(day.to_rfc3339(), "2024-05-01T00:00:00+00:00");

        let at = parse_date("Ended", Some("2024-05-01T20:00:00+02:00"))
            .unwrap()
            .unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-01T18:00:00+00:00");

        match parse_date("PlannedEnd", Some("next friday")) {
            Err(AppError::Form(errors)) => assert!(errors.get("PlannedEnd").is_some()),
            other => panic!("expected form error, got {other:?}"),
        }
    }

    #[test]
    fn winner_ids_split_on_commas_and_spaces() {
        assert_eq!(parse_ids("1, 2 3").unwrap(), vec![1, 2, 3]);
        assert!(parse_ids("").unwrap().is_empty());
        assert!(parse_ids("1,x").is_err());
    }
}
