//! Public poll pages
//!
//! Index, movie details, voting, nominations and cycle history.

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::header::CONTENT_TYPE,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;

use super::dto::{MovieResponse, PastCycleResponse, UserResponse};
use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser};
use crate::data::{Movie, User, sort_by_votes};
use crate::error::AppError;
use crate::metadata::MAX_POSTER_BYTES;
use crate::service::{NominationForm, PosterUpload, VoteOutcome};
use crate::settings::keys;

/// Cycles shown per history page
pub const HISTORY_PAGE_SIZE: i64 = 5;

/// Routes:
/// - GET / - Active movies, optionally filtered by `?search=`
/// - GET /movie/:id - One movie
/// - POST /vote/:id - Toggle the caller's vote
/// - GET/POST /add - Nomination form
/// - GET /history - Past cycles
pub fn polls_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/movie/:id", get(movie_details))
        .route("/vote/:id", post(toggle_vote))
        .route(
            "/add",
            get(add_form)
                .post(add_movie)
                .layer(DefaultBodyLimit::max(MAX_POSTER_BYTES + 64 * 1024)),
        )
        .route("/history", get(history))
}

/// Whether `viewer` may see `movie` while approval is required.
fn visible_to(movie: &Movie, viewer: Option<&User>, approval_required: bool) -> bool {
    !approval_required
        || movie.approved
        || viewer.is_some_and(|user| user.is_admin() || user.id == movie.added_by)
}

// =============================================================================
// Index
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    search: Option<String>,
}

/// GET /
///
/// Active movies ordered by votes, then name.
async fn index(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<IndexQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|search| !search.is_empty());

    let mut movies = match search {
        Some(search) => state
            .db
            .search_movie_titles(search)
            .await?
            .into_iter()
            .filter(Movie::is_active)
            .collect(),
        None => state.db.get_active_movies().await?,
    };
    let approval_required = state.settings.flag(keys::ENTRIES_REQUIRE_APPROVAL).await?;
    movies.retain(|movie| visible_to(movie, viewer.as_ref(), approval_required));
    sort_by_votes(&mut movies);

    let available_votes = match &viewer {
        Some(user) => Some(state.voting.available_votes(user.id).await?),
        None => None,
    };

    Ok(Json(serde_json::json!({
        "cycle": state.cycles.current().await?,
        "movies": MovieResponse::list(&movies, viewer.as_ref()),
        "search": search,
        "voting_enabled": state.settings.flag(keys::VOTING_ENABLED).await?,
        "available_votes": available_votes,
        "notice_banner": state.settings.string(keys::NOTICE_BANNER).await?,
        "user": viewer.as_ref().map(UserResponse::from),
    })))
}

/// GET /movie/:id
async fn movie_details(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let movie = state.db.get_movie(id).await?;
    let approval_required = state.settings.flag(keys::ENTRIES_REQUIRE_APPROVAL).await?;
    if !visible_to(&movie, viewer.as_ref(), approval_required) {
        return Err(AppError::NotFound);
    }

    let added_by = match state.db.get_user(movie.added_by).await {
        Ok(user) => Some(user.name),
        Err(AppError::NotFound) => None,
        Err(error) => return Err(error),
    };

    Ok(Json(serde_json::json!({
        "movie": MovieResponse::new(&movie, viewer.as_ref()),
        "added_by": added_by,
        "voting_enabled": state.settings.flag(keys::VOTING_ENABLED).await?,
    })))
}

/// POST /vote/:id
///
/// Casts a vote, or retracts it when the caller already voted.
async fn toggle_vote(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome: VoteOutcome = state.voting.toggle(&user, id).await?;
    let movie = state.db.get_movie(id).await?;

    Ok(Json(serde_json::json!({
        "outcome": outcome,
        "movie": MovieResponse::new(&movie, Some(&user)),
        "available_votes": state.voting.available_votes(user.id).await?,
    })))
}

// =============================================================================
// Nominations
// =============================================================================

/// GET /add
///
/// Which entry modes the nomination form offers.
async fn add_form(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let settings = &state.settings;
    Ok(Json(serde_json::json!({
        "formfill_enabled": settings.flag(keys::FORMFILL_ENABLED).await?,
        "jikan_enabled": settings.flag(keys::JIKAN_ENABLED).await?,
        "tmdb_enabled": settings.flag(keys::TMDB_ENABLED).await?,
        "max_title_length": settings.int(keys::MAX_TITLE_LENGTH).await?,
        "max_description_length": settings.int(keys::MAX_DESCRIPTION_LENGTH).await?,
        "max_remarks_length": settings.int(keys::MAX_REMARKS_LENGTH).await?,
        "max_poster_bytes": MAX_POSTER_BYTES,
    })))
}

/// Nomination fields as posted by the urlencoded form
#[derive(Debug, Default, Deserialize)]
pub struct AddMovieForm {
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Links", default)]
    links: String,
    #[serde(rename = "Remarks", default)]
    remarks: String,
    #[serde(rename = "AutofillBox", default)]
    autofill: Option<String>,
}

fn checkbox(value: Option<&str>) -> bool {
    matches!(value, Some("on" | "true" | "1"))
}

impl From<AddMovieForm> for NominationForm {
    fn from(form: AddMovieForm) -> Self {
        Self {
            title: form.title,
            description: form.description,
            links: form.links,
            remarks: form.remarks,
            autofill: checkbox(form.autofill.as_deref()),
            poster: None,
        }
    }
}

/// Read the multipart variant of the nomination form.
async fn read_multipart(mut multipart: Multipart) -> Result<NominationForm, AppError> {
    let mut form = NominationForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to parse multipart: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "PosterFile" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidInput(format!("Failed to read poster: {e}")))?;
            if bytes.len() > MAX_POSTER_BYTES {
                return Err(AppError::InvalidInput(format!(
                    "Poster too large: exceeds {MAX_POSTER_BYTES} bytes"
                )));
            }
            if !bytes.is_empty() {
                form.poster = Some(PosterUpload {
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::InvalidInput(format!("Failed to read {name}: {e}")))?;
        match name.as_str() {
            "Title" => form.title = text,
            "Description" => form.description = text,
            "Links" => form.links = text,
            "Remarks" => form.remarks = text,
            "AutofillBox" => form.autofill = checkbox(Some(text.as_str())),
            _ => {}
        }
    }
    Ok(form)
}

/// POST /add
///
/// Accepts `application/x-www-form-urlencoded`, or `multipart/form-data`
/// when a poster file is attached.
async fn add_movie(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    request: Request,
) -> Result<Json<serde_json::Value>, AppError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let form = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::InvalidInput(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let axum::Form(form) = axum::Form::<AddMovieForm>::from_request(request, &state)
            .await
            .map_err(|e| AppError::InvalidInput(e.body_text()))?;
        form.into()
    };

    let movie = state.nominations.submit(&user, form).await?;
    Ok(Json(serde_json::json!({
        "movie": MovieResponse::new(&movie, Some(&user)),
    })))
}

// =============================================================================
// History
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    page: i64,
}

/// GET /history
async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let page = query.page.max(0);
    let cycles = state.cycles.past_cycles(page, HISTORY_PAGE_SIZE).await?;
    let next_page = (cycles.len() as i64 == HISTORY_PAGE_SIZE).then_some(page.saturating_add(1));

    Ok(Json(serde_json::json!({
        "page": page,
        "previous_page": page.checked_sub(1).filter(|previous| *previous >= 0),
        "next_page": next_page,
        "cycles": cycles.iter().map(PastCycleResponse::from).collect::<Vec<_>>(),
    })))
}
