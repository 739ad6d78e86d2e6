//! Data layer module
//!
//! One polymorphic contract, [`DataConnector`], with two backends:
//! - `json`: a single JSON document guarded by a process-wide RwLock
//! - `sqlite`: a relational store with transactional compound writes
//!
//! Backends are selected by name through [`connect`].

mod document;
mod models;
mod relational;

#[cfg(test)]
mod contract_test;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use document::DocumentStore;
pub use models::*;
pub use relational::RelationalStore;

use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};

/// Names accepted by [`connect`].
pub fn available_backends() -> &'static [&'static str] {
    &["json", "sqlite"]
}

/// Open the backend named in `config`.
///
/// # Errors
/// Returns `Config` for an unknown backend name, or the backend's own
/// error when the store cannot be opened.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn DataConnector>> {
    let connector: Arc<dyn DataConnector> = match config.backend.as_str() {
        "json" => Arc::new(DocumentStore::open(&config.path).await?),
        "sqlite" => Arc::new(RelationalStore::connect(&config.path).await?),
        other => {
            return Err(AppError::Config(format!(
                "unknown database backend {other:?}"
            )));
        }
    };

    tracing::info!(
        backend = connector.backend(),
        path = %config.path.display(),
        "Data layer ready"
    );
    Ok(connector)
}

/// Lowercased whitespace tokens of a search query.
pub(crate) fn search_tokens(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Whether `title` contains every token, case-insensitively.
pub(crate) fn title_matches(title: &str, tokens: &[String]) -> bool {
    let title = title.to_lowercase();
    tokens.iter().all(|token| title.contains(token.as_str()))
}

/// Persistence contract shared by every backend.
///
/// Entities cross this boundary fully rehydrated: a [`Movie`] carries its
/// links, tags and votes, a [`User`] carries its auth methods, a [`Cycle`]
/// carries the ids of the movies watched in it.
#[async_trait]
pub trait DataConnector: Send + Sync {
    /// Registry name of this backend
    fn backend(&self) -> &'static str;

    // =========================================================================
    // Create
    // =========================================================================

    /// Open a new cycle.
    ///
    /// # Errors
    /// `Conflict` when a cycle is already open.
    async fn add_cycle(&self, planned_end: Option<DateTime<Utc>>) -> Result<i64>;

    /// Insert a historical cycle with its dates and watched movies.
    async fn add_old_cycle(&self, cycle: &Cycle) -> Result<i64>;

    /// Insert a movie into the current cycle.
    ///
    /// Links and tags with id 0 are created (or matched) first. The
    /// movie's `id` and `cycle_added` are assigned here.
    ///
    /// # Errors
    /// `Conflict` when no cycle is open or the normalized name is taken.
    async fn add_movie(&self, movie: &Movie) -> Result<i64>;

    /// Insert a user and bind its auth methods.
    ///
    /// Auth methods with id 0 are created; others must exist.
    ///
    /// # Errors
    /// `Conflict` when the name is taken (case-insensitive).
    async fn add_user(&self, user: &User) -> Result<i64>;

    /// Insert a tag, or return the id of the existing tag with that name.
    async fn add_tag(&self, tag: &Tag) -> Result<i64>;

    /// Insert an unbound auth method.
    ///
    /// # Errors
    /// `Conflict` when the external id is already used for this type.
    async fn add_auth_method(&self, auth: &AuthMethod) -> Result<i64>;

    /// Insert a link, or return the id of the existing link with that url.
    async fn add_link(&self, link: &Link) -> Result<i64>;

    /// Record a vote, tagged with the current cycle.
    ///
    /// # Errors
    /// `Conflict` when no cycle is open, the movie is removed or watched,
    /// or the user already voted for it.
    async fn add_vote(&self, user_id: i64, movie_id: i64) -> Result<()>;

    // =========================================================================
    // Read
    // =========================================================================

    async fn get_cycle(&self, id: i64) -> Result<Cycle>;

    /// The open cycle, if any
    async fn get_current_cycle(&self) -> Result<Option<Cycle>>;

    async fn get_movie(&self, id: i64) -> Result<Movie>;

    /// Movies that are neither removed nor watched, ordered by id
    async fn get_active_movies(&self) -> Result<Vec<Movie>>;

    async fn get_user(&self, id: i64) -> Result<User>;

    /// Users ordered by id, windowed by `offset` and `count`
    async fn get_users(&self, offset: i64, count: i64) -> Result<Vec<User>>;

    /// Every movie the user holds a vote on, watched ones included
    async fn get_user_votes(&self, user_id: i64) -> Result<Vec<Movie>>;

    /// Movies nominated by the user
    async fn get_user_movies(&self, user_id: i64) -> Result<Vec<Movie>>;

    /// Users bound to `auth_type`; with `exclusive`, only users whose sole
    /// method is that type.
    async fn get_users_with_auth(&self, auth_type: AuthType, exclusive: bool)
    -> Result<Vec<User>>;

    async fn get_tag(&self, id: i64) -> Result<Tag>;

    async fn get_auth_method(&self, id: i64) -> Result<AuthMethod>;

    async fn get_link(&self, id: i64) -> Result<Link>;

    /// Ended cycles, newest first. A negative `start` is treated as 0.
    async fn get_past_cycles(&self, start: i64, count: i64) -> Result<Vec<Cycle>>;

    /// Movies watched in cycle `id`
    async fn get_movies_from_cycle(&self, id: i64) -> Result<Vec<Movie>>;

    // =========================================================================
    // Find
    // =========================================================================

    /// Id of the tag with this name (case-insensitive), or `NotFound`
    async fn find_tag(&self, name: &str) -> Result<i64>;

    /// Id of the link with this url (case-insensitive), or `NotFound`
    async fn find_link(&self, url: &str) -> Result<i64>;

    // =========================================================================
    // Update (upserts)
    // =========================================================================

    /// Store the user under its id, rebinding `auth_methods` to it.
    ///
    /// Methods with id 0 are created. Methods previously bound to the
    /// user but no longer listed are deleted.
    async fn update_user(&self, user: &User) -> Result<()>;

    /// Store name, email, notify flags and privilege of an existing user.
    /// Its auth methods are left as stored.
    ///
    /// # Errors
    /// `NotFound` for an unknown user, `Conflict` when the name is taken.
    async fn update_user_fields(&self, user: &User) -> Result<()>;

    /// Create `auth` and bind it to an existing user.
    ///
    /// # Errors
    /// - `NotFound` for an unknown user
    /// - `Conflict` when the user already has this type or the external
    ///   id is in use
    async fn add_user_auth_method(&self, user_id: i64, auth: &AuthMethod) -> Result<i64>;

    /// Delete the user's method of `auth_type`.
    ///
    /// # Errors
    /// `NotFound` when no such method is bound, `Conflict` when it is the
    /// user's last one.
    async fn remove_user_auth_method(&self, user_id: i64, auth_type: AuthType) -> Result<()>;

    /// Store the movie under its id, including links and tags.
    ///
    /// # Errors
    /// `InvalidInput` when `cycle_watched` names a cycle that has not ended.
    async fn update_movie(&self, movie: &Movie) -> Result<()>;

    /// Store the cycle under its id and mark `watched` movies.
    ///
    /// # Errors
    /// `InvalidInput` for watched movies on an open cycle, `Conflict` when
    /// this would open a second cycle.
    async fn update_cycle(&self, cycle: &Cycle) -> Result<()>;

    /// Replace an existing auth method.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    async fn update_auth_method(&self, auth: &AuthMethod) -> Result<()>;

    // =========================================================================
    // Delete
    // =========================================================================

    /// # Errors
    /// `NotFound` without such a vote, `Conflict` when the movie is watched.
    async fn delete_vote(&self, user_id: i64, movie_id: i64) -> Result<()>;

    async fn delete_tag(&self, id: i64) -> Result<()>;

    /// Delete the method and detach it from its user.
    async fn delete_auth_method(&self, id: i64) -> Result<()>;

    async fn delete_link(&self, id: i64) -> Result<()>;

    /// Soft-delete a movie and drop its votes.
    ///
    /// # Errors
    /// `Conflict` when the movie was already watched.
    async fn remove_movie(&self, id: i64) -> Result<()>;

    /// Delete the user together with its votes and auth methods.
    async fn purge_user(&self, user_id: i64) -> Result<()>;

    /// Remove votes on unwatched movies cast before the cycle `age` steps
    /// back from the newest one. Returns the number of removed votes.
    /// `age <= 0` removes nothing.
    async fn decay_votes(&self, age: i64) -> Result<u64>;

    // =========================================================================
    // Auth queries
    // =========================================================================

    /// # Errors
    /// `Unauthorized` when no LOCAL method matches name and hash.
    async fn user_local_login(&self, name: &str, hashed_password: &str) -> Result<User>;

    /// User bound to the OAuth identity, or `NotFound`
    async fn user_oauth_login(&self, auth_type: AuthType, ext_id: &str) -> Result<User>;

    async fn user_twitch_login(&self, ext_id: &str) -> Result<User> {
        self.user_oauth_login(AuthType::Twitch, ext_id).await
    }

    async fn user_discord_login(&self, ext_id: &str) -> Result<User> {
        self.user_oauth_login(AuthType::Discord, ext_id).await
    }

    async fn user_patreon_login(&self, ext_id: &str) -> Result<User> {
        self.user_oauth_login(AuthType::Patreon, ext_id).await
    }

    /// Whether the external id is already stored for `auth_type`
    async fn check_oauth_usage(&self, ext_id: &str, auth_type: AuthType) -> Result<bool>;

    // =========================================================================
    // Search & usage checks
    // =========================================================================

    /// Non-removed movies whose title contains every whitespace token of
    /// `query`, case-insensitively
    async fn search_movie_titles(&self, query: &str) -> Result<Vec<Movie>>;

    /// Whether a movie with the same normalized name exists
    async fn check_movie_exists(&self, title: &str) -> Result<bool>;

    /// Whether a user with this name exists (case-insensitive)
    async fn check_user_exists(&self, name: &str) -> Result<bool>;

    async fn user_voted_for_movie(&self, user_id: i64, movie_id: i64) -> Result<bool>;

    // =========================================================================
    // Config store
    // =========================================================================

    /// Raw stored value, `None` when the key is absent
    async fn get_cfg_value(&self, key: &str) -> Result<Option<CfgValue>>;

    async fn set_cfg_value(&self, key: &str, value: CfgValue) -> Result<()>;

    async fn delete_cfg_key(&self, key: &str) -> Result<()>;

    /// # Errors
    /// `NoValue` when absent, `ConfigType` when stored as another type.
    async fn get_cfg_string(&self, key: &str) -> Result<String> {
        match self.get_cfg_value(key).await? {
            Some(CfgValue::String(value)) => Ok(value),
            Some(other) => Err(config_type_error(key, "string", &other)),
            None => Err(AppError::NoValue(key.to_string())),
        }
    }

    /// # Errors
    /// `NoValue` when absent, `ConfigType` when stored as another type.
    async fn get_cfg_int(&self, key: &str) -> Result<i64> {
        match self.get_cfg_value(key).await? {
            Some(CfgValue::Int(value)) => Ok(value),
            Some(other) => Err(config_type_error(key, "int", &other)),
            None => Err(AppError::NoValue(key.to_string())),
        }
    }

    /// # Errors
    /// `NoValue` when absent, `ConfigType` when stored as another type.
    async fn get_cfg_bool(&self, key: &str) -> Result<bool> {
        match self.get_cfg_value(key).await? {
            Some(CfgValue::Bool(value)) => Ok(value),
            Some(other) => Err(config_type_error(key, "bool", &other)),
            None => Err(AppError::NoValue(key.to_string())),
        }
    }

    async fn set_cfg_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_cfg_value(key, CfgValue::String(value.to_string()))
            .await
    }

    async fn set_cfg_int(&self, key: &str, value: i64) -> Result<()> {
        self.set_cfg_value(key, CfgValue::Int(value)).await
    }

    async fn set_cfg_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_cfg_value(key, CfgValue::Bool(value)).await
    }
}

fn config_type_error(key: &str, expected: &'static str, found: &CfgValue) -> AppError {
    AppError::ConfigType {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// Order movies for display: vote count descending, then name ascending.
pub fn sort_by_votes(movies: &mut [Movie]) {
    movies.sort_by(|a, b| {
        b.vote_count()
            .cmp(&a.vote_count())
            .then_with(|| a.name.cmp(&b.name))
    });
}
