//! SQLite backend
//!
//! Every operation runs its statements on one pooled connection; compound
//! writes run inside a transaction that rolls back when dropped, so a
//! cancelled request never leaves a partial write behind.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::models::*;
use super::{DataConnector, search_tokens, title_matches};
use crate::error::{AppError, Result};

const BACKEND: &str = "sqlite";

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct CycleRow {
    id: i64,
    planned_end: Option<String>,
    ended: Option<String>,
}

#[derive(sqlx::FromRow)]
struct MovieRow {
    id: i64,
    name: String,
    description: String,
    remarks: String,
    duration: String,
    rating: f64,
    poster: String,
    added_by: i64,
    cycle_added: i64,
    cycle_watched: Option<i64>,
    removed: bool,
    approved: bool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    notify_cycle_end: bool,
    notify_vote_selection: bool,
    privilege: i64,
}

#[derive(sqlx::FromRow)]
struct AuthMethodRow {
    id: i64,
    auth_type: String,
    ext_id: Option<String>,
    password: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    date: String,
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: i64,
    url: String,
    link_type: String,
}

fn format_time(at: DateTime<Utc>) -> String {
    round_to_second(at).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid stored timestamp {value:?}: {e}")))
}

fn parse_time_opt(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_time).transpose()
}

/// Turn a unique-index violation into a user-facing conflict.
fn conflict_on_unique(error: sqlx::Error, message: impl FnOnce() -> String) -> AppError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message()),
        _ => AppError::Database(error),
    }
}

impl AuthMethodRow {
    fn into_model(self) -> Result<AuthMethod> {
        let auth_type = AuthType::parse(&self.auth_type).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "unknown stored auth type {:?}",
                self.auth_type
            ))
        })?;
        Ok(AuthMethod {
            id: self.id,
            auth_type,
            ext_id: self.ext_id,
            password: self.password,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            date: parse_time(&self.date)?,
        })
    }
}

// =============================================================================
// Loaders (shared by pooled and transactional callers)
// =============================================================================

async fn current_cycle_id(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM cycles WHERE ended IS NULL LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

async fn hydrate_cycle(conn: &mut SqliteConnection, row: CycleRow) -> Result<Cycle> {
    let watched = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM movies WHERE cycle_watched = ? ORDER BY id",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Cycle {
        id: row.id,
        planned_end: parse_time_opt(row.planned_end.as_deref())?,
        ended: parse_time_opt(row.ended.as_deref())?,
        watched,
    })
}

async fn load_cycle(conn: &mut SqliteConnection, id: i64) -> Result<Cycle> {
    let row = sqlx::query_as::<_, CycleRow>("SELECT * FROM cycles WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound)?;
    hydrate_cycle(conn, row).await
}

async fn hydrate_movie(conn: &mut SqliteConnection, row: MovieRow) -> Result<Movie> {
    let link_rows = sqlx::query_as::<_, LinkRow>(
        r#"
        SELECT l.id, l.url, l.link_type
        FROM movie_links ml
        JOIN links l ON l.id = ml.link_id
        WHERE ml.movie_id = ?
        ORDER BY ml.position
        "#,
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;
    let links = link_rows
        .into_iter()
        .enumerate()
        .map(|(position, link)| Link {
            id: link.id,
            url: link.url,
            link_type: LinkType::parse(&link.link_type),
            is_source: position == 0,
        })
        .collect();

    let tags = sqlx::query_as::<_, (i64, String)>(
        r#"
        SELECT t.id, t.name
        FROM movie_tags mt
        JOIN tags t ON t.id = mt.tag_id
        WHERE mt.movie_id = ?
        ORDER BY t.id
        "#,
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|(id, name)| Tag { id, name })
    .collect();

    let votes = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT user_id, movie_id, cycle_added FROM votes WHERE movie_id = ? ORDER BY user_id",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|(user_id, movie_id, cycle_added)| Vote {
        user_id,
        movie_id,
        cycle_added,
    })
    .collect();

    Ok(Movie {
        id: row.id,
        name: row.name,
        description: row.description,
        remarks: row.remarks,
        duration: row.duration,
        rating: row.rating as f32,
        poster: row.poster,
        links,
        tags,
        added_by: row.added_by,
        cycle_added: row.cycle_added,
        cycle_watched: row.cycle_watched,
        removed: row.removed,
        approved: row.approved,
        votes,
    })
}

async fn hydrate_movies(conn: &mut SqliteConnection, rows: Vec<MovieRow>) -> Result<Vec<Movie>> {
    let mut movies = Vec::with_capacity(rows.len());
    for row in rows {
        movies.push(hydrate_movie(conn, row).await?);
    }
    Ok(movies)
}

async fn load_movie(conn: &mut SqliteConnection, id: i64) -> Result<Movie> {
    let row = sqlx::query_as::<_, MovieRow>("SELECT * FROM movies WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound)?;
    hydrate_movie(conn, row).await
}

async fn hydrate_user(conn: &mut SqliteConnection, row: UserRow) -> Result<User> {
    let auth_methods = sqlx::query_as::<_, AuthMethodRow>(
        "SELECT * FROM auth_methods WHERE user_id = ? ORDER BY id",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(AuthMethodRow::into_model)
    .collect::<Result<Vec<_>>>()?;

    Ok(User {
        id: row.id,
        name: row.name,
        email: row.email,
        notify_cycle_end: row.notify_cycle_end,
        notify_vote_selection: row.notify_vote_selection,
        privilege: Privilege::from_i64(row.privilege),
        auth_methods,
    })
}

async fn hydrate_users(conn: &mut SqliteConnection, rows: Vec<UserRow>) -> Result<Vec<User>> {
    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        users.push(hydrate_user(conn, row).await?);
    }
    Ok(users)
}

async fn load_user(conn: &mut SqliteConnection, id: i64) -> Result<User> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound)?;
    hydrate_user(conn, row).await
}

// =============================================================================
// Writers (always called inside a transaction)
// =============================================================================

async fn find_tag_id(conn: &mut SqliteConnection, name: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM tags WHERE name = ? COLLATE NOCASE")
        .bind(name.trim())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

async fn find_link_id(conn: &mut SqliteConnection, url: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM links WHERE url = ? COLLATE NOCASE")
        .bind(url.trim())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

async fn insert_tag(conn: &mut SqliteConnection, tag: &Tag) -> Result<i64> {
    let name = tag.name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("tag name is empty".to_string()));
    }
    if let Some(id) = find_tag_id(conn, name).await? {
        return Ok(id);
    }
    let result = sqlx::query("INSERT INTO tags (name) VALUES (?)")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_link(conn: &mut SqliteConnection, link: &Link) -> Result<i64> {
    let url = link.url.trim();
    if url.is_empty() {
        return Err(AppError::InvalidInput("link url is empty".to_string()));
    }
    if let Some(id) = find_link_id(conn, url).await? {
        return Ok(id);
    }
    let result = sqlx::query("INSERT INTO links (url, link_type) VALUES (?, ?)")
        .bind(url)
        .bind(link.link_type.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Replace the link and tag associations of `movie_id`.
async fn bind_movie_refs(conn: &mut SqliteConnection, movie_id: i64, movie: &Movie) -> Result<()> {
    sqlx::query("DELETE FROM movie_links WHERE movie_id = ?")
        .bind(movie_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM movie_tags WHERE movie_id = ?")
        .bind(movie_id)
        .execute(&mut *conn)
        .await?;

    let mut link_ids: Vec<i64> = Vec::with_capacity(movie.links.len());
    for link in &movie.links {
        let id = match link.id {
            id if id > 0 && link_exists(conn, id).await? => id,
            _ => insert_link(conn, link).await?,
        };
        if link_ids.contains(&id) {
            continue;
        }
        sqlx::query("INSERT INTO movie_links (movie_id, link_id, position) VALUES (?, ?, ?)")
            .bind(movie_id)
            .bind(id)
            .bind(link_ids.len() as i64)
            .execute(&mut *conn)
            .await?;
        link_ids.push(id);
    }

    for tag in &movie.tags {
        let id = match tag.id {
            id if id > 0 && tag_exists(conn, id).await? => id,
            _ => insert_tag(conn, tag).await?,
        };
        sqlx::query("INSERT OR IGNORE INTO movie_tags (movie_id, tag_id) VALUES (?, ?)")
            .bind(movie_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn link_exists(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM links WHERE id = ?)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn tag_exists(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn ext_id_taken(
    conn: &mut SqliteConnection,
    auth_type: AuthType,
    ext_id: &str,
    except: Option<i64>,
) -> Result<bool> {
    let taken = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM auth_methods
            WHERE auth_type = ? AND ext_id = ? AND id != ?
        )
        "#,
    )
    .bind(auth_type.as_str())
    .bind(ext_id)
    .bind(except.unwrap_or(0))
    .fetch_one(&mut *conn)
    .await?;
    Ok(taken)
}

async fn insert_auth_method(
    conn: &mut SqliteConnection,
    auth: &AuthMethod,
    user_id: Option<i64>,
) -> Result<i64> {
    if let Some(ext_id) = auth.ext_id.as_deref() {
        if ext_id_taken(conn, auth.auth_type, ext_id, None).await? {
            return Err(AppError::Conflict(format!(
                "{} account is already in use",
                auth.auth_type
            )));
        }
    }
    let result = sqlx::query(
        r#"
        INSERT INTO auth_methods (
            user_id, auth_type, ext_id, password, access_token, refresh_token, date
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(auth.auth_type.as_str())
    .bind(&auth.ext_id)
    .bind(&auth.password)
    .bind(&auth.access_token)
    .bind(&auth.refresh_token)
    .bind(format_time(auth.date))
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, || format!("user already has a {} login", auth.auth_type)))?;
    Ok(result.last_insert_rowid())
}

async fn bind_auth_methods(conn: &mut SqliteConnection, user_id: i64, user: &User) -> Result<()> {
    let mut seen_types = Vec::with_capacity(user.auth_methods.len());
    for method in &user.auth_methods {
        if seen_types.contains(&method.auth_type) {
            return Err(AppError::Conflict(format!(
                "user already has a {} login",
                method.auth_type
            )));
        }
        seen_types.push(method.auth_type);

        if method.id > 0 {
            let owner = sqlx::query_scalar::<_, Option<i64>>(
                "SELECT user_id FROM auth_methods WHERE id = ?",
            )
            .bind(method.id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(AppError::NotFound)?;
            if owner.is_some_and(|owner| owner != user_id) {
                return Err(AppError::Conflict(
                    "auth method belongs to another user".to_string(),
                ));
            }
            sqlx::query("UPDATE auth_methods SET user_id = ? WHERE id = ?")
                .bind(user_id)
                .bind(method.id)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    conflict_on_unique(e, || {
                        format!("user already has a {} login", method.auth_type)
                    })
                })?;
        } else {
            insert_auth_method(conn, method, Some(user_id)).await?;
        }
    }
    Ok(())
}

async fn user_name_taken(
    conn: &mut SqliteConnection,
    name: &str,
    except: Option<i64>,
) -> Result<bool> {
    let taken = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE name = ? COLLATE NOCASE AND id != ?)",
    )
    .bind(name)
    .bind(except.unwrap_or(0))
    .fetch_one(&mut *conn)
    .await?;
    Ok(taken)
}

async fn movie_name_taken(
    conn: &mut SqliteConnection,
    normalized: &str,
    except: Option<i64>,
) -> Result<bool> {
    let taken = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM movies WHERE normalized_name = ? AND id != ?)",
    )
    .bind(normalized)
    .bind(except.unwrap_or(0))
    .fetch_one(&mut *conn)
    .await?;
    Ok(taken)
}

async fn check_watched_cycle(conn: &mut SqliteConnection, cycle_watched: Option<i64>) -> Result<()> {
    let Some(cycle_id) = cycle_watched else {
        return Ok(());
    };
    let ended = sqlx::query_scalar::<_, Option<String>>("SELECT ended FROM cycles WHERE id = ?")
        .bind(cycle_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::InvalidInput(format!("cycle {cycle_id} does not exist")))?;
    if ended.is_none() {
        return Err(AppError::InvalidInput(format!(
            "cycle {cycle_id} has not ended"
        )));
    }
    Ok(())
}

/// Point `watched` movies at `cycle_id` and clear movies no longer listed.
async fn apply_watched(conn: &mut SqliteConnection, cycle_id: i64, watched: &[i64]) -> Result<()> {
    for movie_id in watched {
        let current = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT cycle_watched FROM movies WHERE id = ?",
        )
        .bind(movie_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound)?;
        if current.is_some_and(|other| other != cycle_id) {
            return Err(AppError::Conflict(format!(
                "movie {movie_id} was already watched in another cycle"
            )));
        }
    }

    sqlx::query("UPDATE movies SET cycle_watched = NULL WHERE cycle_watched = ?")
        .bind(cycle_id)
        .execute(&mut *conn)
        .await?;
    for movie_id in watched {
        sqlx::query("UPDATE movies SET cycle_watched = ? WHERE id = ?")
            .bind(cycle_id)
            .bind(movie_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// SQLite store
pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        // A single connection serializes writers, which keeps the
        // read-then-write checks inside each transaction race free.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::from(e)
        })?;

        tracing::info!("Database connected and migrated successfully");
        Ok(Self { pool })
    }
}

#[async_trait]
impl DataConnector for RelationalStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    // =========================================================================
    // Create
    // =========================================================================

    async fn add_cycle(&self, planned_end: Option<DateTime<Utc>>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        if current_cycle_id(&mut tx).await?.is_some() {
            return Err(AppError::Conflict("a cycle is already open".to_string()));
        }
        let result = sqlx::query("INSERT INTO cycles (planned_end, ended) VALUES (?, NULL)")
            .bind(planned_end.map(format_time))
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, || "a cycle is already open".to_string()))?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_cycle");
        Ok(result.last_insert_rowid())
    }

    async fn add_old_cycle(&self, cycle: &Cycle) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        if cycle.ended.is_none() {
            if current_cycle_id(&mut tx).await?.is_some() {
                return Err(AppError::Conflict("a cycle is already open".to_string()));
            }
            if !cycle.watched.is_empty() {
                return Err(AppError::InvalidInput(
                    "an open cycle cannot have watched movies".to_string(),
                ));
            }
        }
        let result = sqlx::query("INSERT INTO cycles (planned_end, ended) VALUES (?, ?)")
            .bind(cycle.planned_end.map(format_time))
            .bind(cycle.ended.map(format_time))
            .execute(&mut *tx)
            .await?;
        let id = result.last_insert_rowid();
        apply_watched(&mut tx, id, &cycle.watched).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_old_cycle");
        Ok(id)
    }

    async fn add_movie(&self, movie: &Movie) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let cycle_id = current_cycle_id(&mut tx)
            .await?
            .ok_or_else(|| AppError::Conflict("no cycle is open".to_string()))?;
        let normalized = movie.normalized_name();
        if normalized.is_empty() {
            return Err(AppError::InvalidInput("movie name is empty".to_string()));
        }
        if movie_name_taken(&mut tx, &normalized, None).await? {
            return Err(AppError::Conflict(format!(
                "movie {:?} already exists",
                movie.name
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO movies (
                name, normalized_name, description, remarks, duration, rating, poster,
                added_by, cycle_added, cycle_watched, removed, approved
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, ?)
            "#,
        )
        .bind(movie.name.trim())
        .bind(&normalized)
        .bind(&movie.description)
        .bind(&movie.remarks)
        .bind(&movie.duration)
        .bind(f64::from(movie.rating))
        .bind(&movie.poster)
        .bind(movie.added_by)
        .bind(cycle_id)
        .bind(movie.approved)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("movie {:?} already exists", movie.name)))?;
        let id = result.last_insert_rowid();
        bind_movie_refs(&mut tx, id, movie).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_movie");
        Ok(id)
    }

    async fn add_user(&self, user: &User) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        if user_name_taken(&mut tx, &user.name, None).await? {
            return Err(AppError::Conflict(format!(
                "name {:?} is already taken",
                user.name
            )));
        }
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, email, notify_cycle_end, notify_vote_selection, privilege)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.notify_cycle_end)
        .bind(user.notify_vote_selection)
        .bind(user.privilege.as_i64())
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();
        bind_auth_methods(&mut tx, id, user).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_user");
        Ok(id)
    }

    async fn add_tag(&self, tag: &Tag) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_tag(&mut tx, tag).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_tag");
        Ok(id)
    }

    async fn add_auth_method(&self, auth: &AuthMethod) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_auth_method(&mut tx, auth, None).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_auth_method");
        Ok(id)
    }

    async fn add_link(&self, link: &Link) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_link(&mut tx, link).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_link");
        Ok(id)
    }

    async fn add_vote(&self, user_id: i64, movie_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let cycle_id = current_cycle_id(&mut tx)
            .await?
            .ok_or_else(|| AppError::Conflict("no cycle is open".to_string()))?;
        let (removed, cycle_watched) = sqlx::query_as::<_, (bool, Option<i64>)>(
            "SELECT removed, cycle_watched FROM movies WHERE id = ?",
        )
        .bind(movie_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        if removed || cycle_watched.is_some() {
            return Err(AppError::Conflict(
                "movie is not open for voting".to_string(),
            ));
        }

        sqlx::query("INSERT INTO votes (user_id, movie_id, cycle_added) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(movie_id)
            .bind(cycle_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, || "vote already recorded".to_string()))?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_vote");
        Ok(())
    }

    // =========================================================================
    // Read
    // =========================================================================

    async fn get_cycle(&self, id: i64) -> Result<Cycle> {
        let mut conn = self.pool.acquire().await?;
        load_cycle(&mut conn, id).await
    }

    async fn get_current_cycle(&self) -> Result<Option<Cycle>> {
        let mut conn = self.pool.acquire().await?;
        match current_cycle_id(&mut conn).await? {
            Some(id) => Ok(Some(load_cycle(&mut conn, id).await?)),
            None => Ok(None),
        }
    }

    async fn get_movie(&self, id: i64) -> Result<Movie> {
        let mut conn = self.pool.acquire().await?;
        load_movie(&mut conn, id).await
    }

    async fn get_active_movies(&self) -> Result<Vec<Movie>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, MovieRow>(
            "SELECT * FROM movies WHERE removed = 0 AND cycle_watched IS NULL ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;
        hydrate_movies(&mut tx, rows).await
    }

    async fn get_user(&self, id: i64) -> Result<User> {
        let mut conn = self.pool.acquire().await?;
        load_user(&mut conn, id).await
    }

    async fn get_users(&self, offset: i64, count: i64) -> Result<Vec<User>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY id LIMIT ? OFFSET ?")
            .bind(count.max(0))
            .bind(offset.max(0))
            .fetch_all(&mut *conn)
            .await?;
        hydrate_users(&mut conn, rows).await
    }

    async fn get_user_votes(&self, user_id: i64) -> Result<Vec<Movie>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, MovieRow>(
            r#"
            SELECT m.* FROM movies m
            JOIN votes v ON v.movie_id = m.id
            WHERE v.user_id = ?
            ORDER BY m.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
        hydrate_movies(&mut conn, rows).await
    }

    async fn get_user_movies(&self, user_id: i64) -> Result<Vec<Movie>> {
        let mut conn = self.pool.acquire().await?;
        let rows =
            sqlx::query_as::<_, MovieRow>("SELECT * FROM movies WHERE added_by = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&mut *conn)
                .await?;
        hydrate_movies(&mut conn, rows).await
    }

    async fn get_users_with_auth(
        &self,
        auth_type: AuthType,
        exclusive: bool,
    ) -> Result<Vec<User>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.* FROM users u
            WHERE EXISTS (
                SELECT 1 FROM auth_methods a WHERE a.user_id = u.id AND a.auth_type = ?
            )
            AND (? = 0 OR (SELECT COUNT(*) FROM auth_methods a WHERE a.user_id = u.id) = 1)
            ORDER BY u.id
            "#,
        )
        .bind(auth_type.as_str())
        .bind(exclusive)
        .fetch_all(&mut *conn)
        .await?;
        hydrate_users(&mut conn, rows).await
    }

    async fn get_tag(&self, id: i64) -> Result<Tag> {
        let (id, name) = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM tags WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(Tag { id, name })
    }

    async fn get_auth_method(&self, id: i64) -> Result<AuthMethod> {
        sqlx::query_as::<_, AuthMethodRow>("SELECT * FROM auth_methods WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)?
            .into_model()
    }

    async fn get_link(&self, id: i64) -> Result<Link> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, LinkRow>("SELECT id, url, link_type FROM links WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(AppError::NotFound)?;
        let is_source = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM movie_links ml
                WHERE ml.link_id = ?
                AND ml.position = (SELECT MIN(position) FROM movie_links WHERE movie_id = ml.movie_id)
            )
            "#,
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Link {
            id: row.id,
            url: row.url,
            link_type: LinkType::parse(&row.link_type),
            is_source,
        })
    }

    async fn get_past_cycles(&self, start: i64, count: i64) -> Result<Vec<Cycle>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, CycleRow>(
            "SELECT * FROM cycles WHERE ended IS NOT NULL ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(count.max(0))
        .bind(start.max(0))
        .fetch_all(&mut *conn)
        .await?;

        let mut cycles = Vec::with_capacity(rows.len());
        for row in rows {
            cycles.push(hydrate_cycle(&mut conn, row).await?);
        }
        Ok(cycles)
    }

    async fn get_movies_from_cycle(&self, id: i64) -> Result<Vec<Movie>> {
        let mut conn = self.pool.acquire().await?;
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM cycles WHERE id = ?)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        if !exists {
            return Err(AppError::NotFound);
        }
        let rows =
            sqlx::query_as::<_, MovieRow>("SELECT * FROM movies WHERE cycle_watched = ? ORDER BY id")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;
        hydrate_movies(&mut conn, rows).await
    }

    // =========================================================================
    // Find
    // =========================================================================

    async fn find_tag(&self, name: &str) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        find_tag_id(&mut conn, name).await?.ok_or(AppError::NotFound)
    }

    async fn find_link(&self, url: &str) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        find_link_id(&mut conn, url).await?.ok_or(AppError::NotFound)
    }

    // =========================================================================
    // Update
    // =========================================================================

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if user.name != DELETED_USER_NAME && user_name_taken(&mut tx, &user.name, Some(user.id)).await?
        {
            return Err(AppError::Conflict(format!(
                "name {:?} is already taken",
                user.name
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, notify_cycle_end, notify_vote_selection, privilege)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                notify_cycle_end = excluded.notify_cycle_end,
                notify_vote_selection = excluded.notify_vote_selection,
                privilege = excluded.privilege
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.notify_cycle_end)
        .bind(user.notify_vote_selection)
        .bind(user.privilege.as_i64())
        .execute(&mut *tx)
        .await?;

        let listed: Vec<i64> = user.auth_methods.iter().map(|m| m.id).collect();
        let previous = sqlx::query_scalar::<_, i64>("SELECT id FROM auth_methods WHERE user_id = ?")
            .bind(user.id)
            .fetch_all(&mut *tx)
            .await?;
        for stale in previous.iter().filter(|id| !listed.contains(id)) {
            sqlx::query("DELETE FROM auth_methods WHERE id = ?")
                .bind(stale)
                .execute(&mut *tx)
                .await?;
        }
        bind_auth_methods(&mut tx, user.id, user).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "update_user");
        Ok(())
    }

    async fn update_user_fields(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if user.name != DELETED_USER_NAME && user_name_taken(&mut tx, &user.name, Some(user.id)).await?
        {
            return Err(AppError::Conflict(format!(
                "name {:?} is already taken",
                user.name
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE users SET
                name = ?,
                email = ?,
                notify_cycle_end = ?,
                notify_vote_selection = ?,
                privilege = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.notify_cycle_end)
        .bind(user.notify_vote_selection)
        .bind(user.privilege.as_i64())
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "update_user_fields");
        Ok(())
    }

    async fn add_user_auth_method(&self, user_id: i64, auth: &AuthMethod) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        if load_user(&mut tx, user_id).await?.has_auth(auth.auth_type) {
            return Err(AppError::Conflict(format!(
                "user already has a {} login",
                auth.auth_type
            )));
        }
        let id = insert_auth_method(&mut tx, auth, Some(user_id)).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "add_user_auth_method");
        Ok(id)
    }

    async fn remove_user_auth_method(&self, user_id: i64, auth_type: AuthType) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let user = load_user(&mut tx, user_id).await?;
        let method = user.auth_method(auth_type).ok_or(AppError::NotFound)?.id;
        if user.auth_methods.len() <= 1 {
            return Err(AppError::Conflict(
                "cannot remove the last login method".to_string(),
            ));
        }
        sqlx::query("DELETE FROM auth_methods WHERE id = ?")
            .bind(method)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "remove_user_auth_method");
        Ok(())
    }

    async fn update_movie(&self, movie: &Movie) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let cycle_exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM cycles WHERE id = ?)")
                .bind(movie.cycle_added)
                .fetch_one(&mut *tx)
                .await?;
        if !cycle_exists {
            return Err(AppError::InvalidInput(format!(
                "cycle {} does not exist",
                movie.cycle_added
            )));
        }
        check_watched_cycle(&mut tx, movie.cycle_watched).await?;
        let normalized = movie.normalized_name();
        if movie_name_taken(&mut tx, &normalized, Some(movie.id)).await? {
            return Err(AppError::Conflict(format!(
                "movie {:?} already exists",
                movie.name
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO movies (
                id, name, normalized_name, description, remarks, duration, rating, poster,
                added_by, cycle_added, cycle_watched, removed, approved
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                normalized_name = excluded.normalized_name,
                description = excluded.description,
                remarks = excluded.remarks,
                duration = excluded.duration,
                rating = excluded.rating,
                poster = excluded.poster,
                added_by = excluded.added_by,
                cycle_added = excluded.cycle_added,
                cycle_watched = excluded.cycle_watched,
                removed = excluded.removed,
                approved = excluded.approved
            "#,
        )
        .bind(movie.id)
        .bind(movie.name.trim())
        .bind(&normalized)
        .bind(&movie.description)
        .bind(&movie.remarks)
        .bind(&movie.duration)
        .bind(f64::from(movie.rating))
        .bind(&movie.poster)
        .bind(movie.added_by)
        .bind(movie.cycle_added)
        .bind(movie.cycle_watched)
        .bind(movie.removed)
        .bind(movie.approved)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("movie {:?} already exists", movie.name)))?;

        bind_movie_refs(&mut tx, movie.id, movie).await?;
        if movie.removed {
            sqlx::query("DELETE FROM votes WHERE movie_id = ?")
                .bind(movie.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "update_movie");
        Ok(())
    }

    async fn update_cycle(&self, cycle: &Cycle) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if cycle.ended.is_none() {
            if !cycle.watched.is_empty() {
                return Err(AppError::InvalidInput(
                    "an open cycle cannot have watched movies".to_string(),
                ));
            }
            if current_cycle_id(&mut tx)
                .await?
                .is_some_and(|open| open != cycle.id)
            {
                return Err(AppError::Conflict("a cycle is already open".to_string()));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO cycles (id, planned_end, ended) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                planned_end = excluded.planned_end,
                ended = excluded.ended
            "#,
        )
        .bind(cycle.id)
        .bind(cycle.planned_end.map(format_time))
        .bind(cycle.ended.map(format_time))
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || "a cycle is already open".to_string()))?;
        apply_watched(&mut tx, cycle.id, &cycle.watched).await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "update_cycle");
        Ok(())
    }

    async fn update_auth_method(&self, auth: &AuthMethod) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let stored_type = sqlx::query_scalar::<_, String>(
            "SELECT auth_type FROM auth_methods WHERE id = ?",
        )
        .bind(auth.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        if AuthType::parse(&stored_type) != Some(auth.auth_type) {
            return Err(AppError::InvalidInput(
                "auth method type cannot change".to_string(),
            ));
        }
        if let Some(ext_id) = auth.ext_id.as_deref() {
            if ext_id_taken(&mut tx, auth.auth_type, ext_id, Some(auth.id)).await? {
                return Err(AppError::Conflict(format!(
                    "{} account is already in use",
                    auth.auth_type
                )));
            }
        }

        sqlx::query(
            r#"
            UPDATE auth_methods
            SET ext_id = ?, password = ?, access_token = ?, refresh_token = ?, date = ?
            WHERE id = ?
            "#,
        )
        .bind(&auth.ext_id)
        .bind(&auth.password)
        .bind(&auth.access_token)
        .bind(&auth.refresh_token)
        .bind(format_time(auth.date))
        .bind(auth.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "update_auth_method");
        Ok(())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    async fn delete_vote(&self, user_id: i64, movie_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let watched = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT m.cycle_watched IS NOT NULL
            FROM votes v JOIN movies m ON m.id = v.movie_id
            WHERE v.user_id = ? AND v.movie_id = ?
            "#,
        )
        .bind(user_id)
        .bind(movie_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        if watched {
            return Err(AppError::Conflict(
                "votes on watched movies cannot be removed".to_string(),
            ));
        }

        sqlx::query("DELETE FROM votes WHERE user_id = ? AND movie_id = ?")
            .bind(user_id)
            .bind(movie_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "delete_vote");
        Ok(())
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        crate::metrics::record_write(BACKEND, "delete_tag");
        Ok(())
    }

    async fn delete_auth_method(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM auth_methods WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        crate::metrics::record_write(BACKEND, "delete_auth_method");
        Ok(())
    }

    async fn delete_link(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM links WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        crate::metrics::record_write(BACKEND, "delete_link");
        Ok(())
    }

    async fn remove_movie(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let cycle_watched = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT cycle_watched FROM movies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        if cycle_watched.is_some() {
            return Err(AppError::Conflict(
                "watched movies cannot be removed".to_string(),
            ));
        }

        sqlx::query("UPDATE movies SET removed = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM votes WHERE movie_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "remove_movie");
        Ok(())
    }

    async fn purge_user(&self, user_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM votes WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM auth_methods WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "purge_user");
        Ok(())
    }

    async fn decay_votes(&self, age: i64) -> Result<u64> {
        if age <= 0 {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let boundary = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM cycles ORDER BY id DESC LIMIT 1 OFFSET ?",
        )
        .bind(age)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(boundary) = boundary else {
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            DELETE FROM votes
            WHERE cycle_added < ?
            AND movie_id NOT IN (SELECT id FROM movies WHERE cycle_watched IS NOT NULL)
            "#,
        )
        .bind(boundary)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        crate::metrics::record_write(BACKEND, "decay_votes");
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Auth queries
    // =========================================================================

    async fn user_local_login(&self, name: &str, hashed_password: &str) -> Result<User> {
        let mut conn = self.pool.acquire().await?;
        let user_id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT u.id FROM users u
            JOIN auth_methods a ON a.user_id = u.id
            WHERE u.name = ? COLLATE NOCASE AND a.auth_type = 'LOCAL' AND a.password = ?
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(hashed_password)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::Unauthorized)?;
        load_user(&mut conn, user_id).await
    }

    async fn user_oauth_login(&self, auth_type: AuthType, ext_id: &str) -> Result<User> {
        let mut conn = self.pool.acquire().await?;
        let user_id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT user_id FROM auth_methods
            WHERE auth_type = ? AND ext_id = ? AND user_id IS NOT NULL
            "#,
        )
        .bind(auth_type.as_str())
        .bind(ext_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound)?;
        load_user(&mut conn, user_id).await
    }

    async fn check_oauth_usage(&self, ext_id: &str, auth_type: AuthType) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        ext_id_taken(&mut conn, auth_type, ext_id, None).await
    }

    // =========================================================================
    // Search & usage checks
    // =========================================================================

    async fn search_movie_titles(&self, query: &str) -> Result<Vec<Movie>> {
        let tokens = search_tokens(query);
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, MovieRow>("SELECT * FROM movies WHERE removed = 0 ORDER BY id")
            .fetch_all(&mut *conn)
            .await?;
        let matching = rows
            .into_iter()
            .filter(|row| title_matches(&row.name, &tokens))
            .collect();
        hydrate_movies(&mut conn, matching).await
    }

    async fn check_movie_exists(&self, title: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        movie_name_taken(&mut conn, &normalize_movie_name(title), None).await
    }

    async fn check_user_exists(&self, name: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        user_name_taken(&mut conn, name, None).await
    }

    async fn user_voted_for_movie(&self, user_id: i64, movie_id: i64) -> Result<bool> {
        let voted = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM votes WHERE user_id = ? AND movie_id = ?)",
        )
        .bind(user_id)
        .bind(movie_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(voted)
    }

    // =========================================================================
    // Config store
    // =========================================================================

    async fn get_cfg_value(&self, key: &str) -> Result<Option<CfgValue>> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT value_type, value FROM settings WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value_type, value)) => CfgValue::decode(&value_type, &value)
                .map(Some)
                .ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!(
                        "setting {key} holds an unreadable {value_type} value"
                    ))
                }),
            None => Ok(None),
        }
    }

    async fn set_cfg_value(&self, key: &str, value: CfgValue) -> Result<()> {
        let (value_type, text) = value.encode();
        sqlx::query(
            r#"
            INSERT INTO settings (key, value_type, value) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value_type = excluded.value_type, value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value_type)
        .bind(text)
        .execute(&self.pool)
        .await?;

        crate::metrics::record_write(BACKEND, "set_cfg_value");
        Ok(())
    }

    async fn delete_cfg_key(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        crate::metrics::record_write(BACKEND, "delete_cfg_key");
        Ok(())
    }
}
