//! Document backend
//!
//! The whole store is one JSON document held in memory behind a
//! `tokio::sync::RwLock`. Every mutation runs against a copy of the
//! document, rewrites the file (temp file + rename) off the runtime
//! threads and only then swaps the copy in. A failed write leaves both
//! memory and disk unchanged.
//! Entities reference each other by id; the watched set of a cycle is
//! derived from the movies' `CycleWatched`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::models::*;
use super::{DataConnector, search_tokens, title_matches};
use crate::error::{AppError, Result};

const BACKEND: &str = "json";

// =============================================================================
// On-disk schema
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Document {
    cycles: BTreeMap<i64, CycleRecord>,
    movies: BTreeMap<i64, MovieRecord>,
    users: BTreeMap<i64, UserRecord>,
    tags: BTreeMap<i64, TagRecord>,
    links: BTreeMap<i64, LinkRecord>,
    auth_methods: BTreeMap<i64, AuthMethodRecord>,
    votes: Vec<VoteRecord>,
    settings: BTreeMap<String, CfgValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CycleRecord {
    id: i64,
    planned_end: Option<DateTime<Utc>>,
    ended: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MovieRecord {
    id: i64,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    remarks: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    rating: f32,
    poster: String,
    #[serde(default)]
    links: Vec<i64>,
    #[serde(default)]
    tags: Vec<i64>,
    added_by: i64,
    cycle_added: i64,
    cycle_watched: Option<i64>,
    #[serde(default)]
    removed: bool,
    #[serde(default = "default_true")]
    approved: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserRecord {
    id: i64,
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    notify_cycle_end: bool,
    #[serde(default)]
    notify_vote_selection: bool,
    #[serde(default)]
    privilege: i64,
    #[serde(default)]
    auth_methods: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthMethodRecord {
    id: i64,
    #[serde(rename = "Type")]
    auth_type: AuthType,
    ext_id: Option<String>,
    password: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LinkRecord {
    id: i64,
    url: String,
    #[serde(rename = "Type")]
    link_type: LinkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagRecord {
    id: i64,
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VoteRecord {
    user_id: i64,
    movie_id: i64,
    cycle_added: i64,
}

fn next_id<V>(map: &BTreeMap<i64, V>) -> i64 {
    map.keys().next_back().copied().unwrap_or(0) + 1
}

fn round_opt(at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    at.map(round_to_second)
}

// =============================================================================
// Rehydration and invariant checks
// =============================================================================

impl Document {
    fn current_cycle_id(&self) -> Option<i64> {
        self.cycles
            .values()
            .find(|cycle| cycle.ended.is_none())
            .map(|cycle| cycle.id)
    }

    fn cycle(&self, id: i64) -> Result<Cycle> {
        let record = self.cycles.get(&id).ok_or(AppError::NotFound)?;
        let watched = self
            .movies
            .values()
            .filter(|movie| movie.cycle_watched == Some(id))
            .map(|movie| movie.id)
            .collect();
        Ok(Cycle {
            id: record.id,
            planned_end: record.planned_end,
            ended: record.ended,
            watched,
        })
    }

    fn link(&self, id: i64, position: usize) -> Result<Link> {
        let record = self.links.get(&id).ok_or(AppError::NotFound)?;
        Ok(Link {
            id: record.id,
            url: record.url.clone(),
            link_type: record.link_type,
            is_source: position == 0,
        })
    }

    fn tag(&self, id: i64) -> Result<Tag> {
        let record = self.tags.get(&id).ok_or(AppError::NotFound)?;
        Ok(Tag {
            id: record.id,
            name: record.name.clone(),
        })
    }

    fn movie(&self, id: i64) -> Result<Movie> {
        let record = self.movies.get(&id).ok_or(AppError::NotFound)?;
        self.hydrate_movie(record)
    }

    fn hydrate_movie(&self, record: &MovieRecord) -> Result<Movie> {
        let links = record
            .links
            .iter()
            .enumerate()
            .map(|(position, id)| self.link(*id, position))
            .collect::<Result<Vec<_>>>()?;
        let tags = record
            .tags
            .iter()
            .map(|id| self.tag(*id))
            .collect::<Result<Vec<_>>>()?;
        let votes = self
            .votes
            .iter()
            .filter(|vote| vote.movie_id == record.id)
            .map(|vote| Vote {
                user_id: vote.user_id,
                movie_id: vote.movie_id,
                cycle_added: vote.cycle_added,
            })
            .collect();

        Ok(Movie {
            id: record.id,
            name: record.name.clone(),
            description: record.description.clone(),
            remarks: record.remarks.clone(),
            duration: record.duration.clone(),
            rating: record.rating,
            poster: record.poster.clone(),
            links,
            tags,
            added_by: record.added_by,
            cycle_added: record.cycle_added,
            cycle_watched: record.cycle_watched,
            removed: record.removed,
            approved: record.approved,
            votes,
        })
    }

    fn movies_where(&self, keep: impl Fn(&MovieRecord) -> bool) -> Result<Vec<Movie>> {
        self.movies
            .values()
            .filter(|record| keep(record))
            .map(|record| self.hydrate_movie(record))
            .collect()
    }

    fn auth_method(&self, id: i64) -> Result<AuthMethod> {
        let record = self.auth_methods.get(&id).ok_or(AppError::NotFound)?;
        Ok(AuthMethod {
            id: record.id,
            auth_type: record.auth_type,
            ext_id: record.ext_id.clone(),
            password: record.password.clone(),
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            date: record.date,
        })
    }

    fn user(&self, id: i64) -> Result<User> {
        let record = self.users.get(&id).ok_or(AppError::NotFound)?;
        self.hydrate_user(record)
    }

    fn hydrate_user(&self, record: &UserRecord) -> Result<User> {
        let auth_methods = record
            .auth_methods
            .iter()
            .map(|id| self.auth_method(*id))
            .collect::<Result<Vec<_>>>()?;
        Ok(User {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
            notify_cycle_end: record.notify_cycle_end,
            notify_vote_selection: record.notify_vote_selection,
            privilege: Privilege::from_i64(record.privilege),
            auth_methods,
        })
    }

    fn owner_of_auth_method(&self, auth_id: i64) -> Option<i64> {
        self.users
            .values()
            .find(|user| user.auth_methods.contains(&auth_id))
            .map(|user| user.id)
    }

    fn user_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        let name = name.to_lowercase();
        self.users
            .values()
            .any(|user| Some(user.id) != except && user.name.to_lowercase() == name)
    }

    fn movie_name_taken(&self, normalized: &str, except: Option<i64>) -> bool {
        self.movies.values().any(|movie| {
            Some(movie.id) != except && normalize_movie_name(&movie.name) == normalized
        })
    }

    fn ext_id_taken(&self, auth_type: AuthType, ext_id: &str, except: Option<i64>) -> bool {
        self.auth_methods.values().any(|method| {
            Some(method.id) != except
                && method.auth_type == auth_type
                && method.ext_id.as_deref() == Some(ext_id)
        })
    }

    fn insert_tag(&mut self, tag: &Tag) -> Result<i64> {
        let name = tag.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("tag name is empty".to_string()));
        }
        if let Some(existing) = self.find_tag(name) {
            return Ok(existing);
        }
        let id = next_id(&self.tags);
        self.tags.insert(
            id,
            TagRecord {
                id,
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    fn find_tag(&self, name: &str) -> Option<i64> {
        let name = name.trim().to_lowercase();
        self.tags
            .values()
            .find(|tag| tag.name.to_lowercase() == name)
            .map(|tag| tag.id)
    }

    fn insert_link(&mut self, link: &Link) -> Result<i64> {
        let url = link.url.trim();
        if url.is_empty() {
            return Err(AppError::InvalidInput("link url is empty".to_string()));
        }
        if let Some(existing) = self.find_link(url) {
            return Ok(existing);
        }
        let id = next_id(&self.links);
        self.links.insert(
            id,
            LinkRecord {
                id,
                url: url.to_string(),
                link_type: link.link_type,
            },
        );
        Ok(id)
    }

    fn find_link(&self, url: &str) -> Option<i64> {
        let url = url.trim().to_lowercase();
        self.links
            .values()
            .find(|link| link.url.to_lowercase() == url)
            .map(|link| link.id)
    }

    /// Resolve links and tags of `movie` to stored ids, creating new ones.
    fn bind_movie_refs(&mut self, movie: &Movie) -> Result<(Vec<i64>, Vec<i64>)> {
        let mut links = Vec::with_capacity(movie.links.len());
        for link in &movie.links {
            let id = if link.id > 0 && self.links.contains_key(&link.id) {
                link.id
            } else {
                self.insert_link(link)?
            };
            if !links.contains(&id) {
                links.push(id);
            }
        }

        let mut tags = Vec::with_capacity(movie.tags.len());
        for tag in &movie.tags {
            let id = if tag.id > 0 && self.tags.contains_key(&tag.id) {
                tag.id
            } else {
                self.insert_tag(tag)?
            };
            if !tags.contains(&id) {
                tags.push(id);
            }
        }
        Ok((links, tags))
    }

    fn insert_auth_method(&mut self, auth: &AuthMethod) -> Result<i64> {
        if let Some(ext_id) = auth.ext_id.as_deref() {
            if self.ext_id_taken(auth.auth_type, ext_id, None) {
                return Err(AppError::Conflict(format!(
                    "{} account is already in use",
                    auth.auth_type
                )));
            }
        }
        let id = next_id(&self.auth_methods);
        self.auth_methods.insert(
            id,
            AuthMethodRecord {
                id,
                auth_type: auth.auth_type,
                ext_id: auth.ext_id.clone(),
                password: auth.password.clone(),
                access_token: auth.access_token.clone(),
                refresh_token: auth.refresh_token.clone(),
                date: round_to_second(auth.date),
            },
        );
        Ok(id)
    }

    /// Resolve the auth methods of `user` to ids bound to `user_id`.
    fn bind_auth_methods(&mut self, user_id: i64, user: &User) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = Vec::with_capacity(user.auth_methods.len());
        let mut seen_types = Vec::with_capacity(user.auth_methods.len());
        for method in &user.auth_methods {
            if seen_types.contains(&method.auth_type) {
                return Err(AppError::Conflict(format!(
                    "user already has a {} login",
                    method.auth_type
                )));
            }
            seen_types.push(method.auth_type);

            let id = if method.id > 0 {
                if !self.auth_methods.contains_key(&method.id) {
                    return Err(AppError::NotFound);
                }
                match self.owner_of_auth_method(method.id) {
                    Some(owner) if owner != user_id => {
                        return Err(AppError::Conflict(
                            "auth method belongs to another user".to_string(),
                        ));
                    }
                    _ => method.id,
                }
            } else {
                self.insert_auth_method(method)?
            };
            ids.push(id);
        }
        Ok(ids)
    }

    fn check_watched_cycle(&self, cycle_watched: Option<i64>) -> Result<()> {
        if let Some(cycle_id) = cycle_watched {
            let cycle = self.cycles.get(&cycle_id).ok_or_else(|| {
                AppError::InvalidInput(format!("cycle {cycle_id} does not exist"))
            })?;
            if cycle.ended.is_none() {
                return Err(AppError::InvalidInput(format!(
                    "cycle {cycle_id} has not ended"
                )));
            }
        }
        Ok(())
    }

    /// Point `watched` movies at `cycle_id` and clear movies no longer listed.
    fn apply_watched(&mut self, cycle_id: i64, watched: &[i64]) -> Result<()> {
        for movie_id in watched {
            let movie = self.movies.get(movie_id).ok_or(AppError::NotFound)?;
            if movie.cycle_watched.is_some_and(|other| other != cycle_id) {
                return Err(AppError::Conflict(format!(
                    "movie {movie_id} was already watched in another cycle"
                )));
            }
        }
        for movie in self.movies.values_mut() {
            if watched.contains(&movie.id) {
                movie.cycle_watched = Some(cycle_id);
            } else if movie.cycle_watched == Some(cycle_id) {
                movie.cycle_watched = None;
            }
        }
        Ok(())
    }

    fn is_watched(&self, movie_id: i64) -> bool {
        self.movies
            .get(&movie_id)
            .is_some_and(|movie| movie.cycle_watched.is_some())
    }
}

// =============================================================================
// Persistence
// =============================================================================

fn load(path: &Path) -> Result<Document> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::default()),
        Err(e) => Err(e.into()),
    }
}

/// Rewrite the document next to `path`, then rename it into place.
fn save(path: &Path, document: &Document) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let bytes = serde_json::to_vec_pretty(document)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

/// JSON document store
pub struct DocumentStore {
    path: PathBuf,
    document: Arc<RwLock<Document>>,
}

impl DocumentStore {
    /// Open the document at `path`, starting empty when it does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub async fn open(path: &Path) -> Result<Self> {
        let owned = path.to_path_buf();
        let document = tokio::task::spawn_blocking(move || load(&owned))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("document load task failed: {e}")))??;

        tracing::debug!(
            path = %path.display(),
            cycles = document.cycles.len(),
            movies = document.movies.len(),
            users = document.users.len(),
            "Loaded document store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            document: Arc::new(RwLock::new(document)),
        })
    }

    async fn read<T>(&self, f: impl FnOnce(&Document) -> Result<T> + Send) -> Result<T> {
        let document = self.document.read().await;
        f(&document)
    }

    /// Apply `f` to a copy of the document and commit it to disk.
    ///
    /// The file write and the swap run together on the blocking pool while
    /// that task owns the write guard. A cancelled caller therefore never
    /// leaves disk and memory out of step.
    async fn write<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Document) -> Result<T> + Send,
    ) -> Result<T> {
        let mut document = self.document.clone().write_owned().await;
        let mut next = document.clone();
        let value = f(&mut next)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            save(&path, &next)?;
            *document = next;
            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("document save task failed: {e}")))??;

        crate::metrics::record_write(BACKEND, operation);
        Ok(value)
    }
}

#[async_trait]
impl DataConnector for DocumentStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    // =========================================================================
    // Create
    // =========================================================================

    async fn add_cycle(&self, planned_end: Option<DateTime<Utc>>) -> Result<i64> {
        self.write("add_cycle", |doc| {
            if doc.current_cycle_id().is_some() {
                return Err(AppError::Conflict("a cycle is already open".to_string()));
            }
            let id = next_id(&doc.cycles);
            doc.cycles.insert(
                id,
                CycleRecord {
                    id,
                    planned_end: round_opt(planned_end),
                    ended: None,
                },
            );
            Ok(id)
        })
        .await
    }

    async fn add_old_cycle(&self, cycle: &Cycle) -> Result<i64> {
        let cycle = cycle.clone();
        self.write("add_old_cycle", move |doc| {
            if cycle.ended.is_none() {
                if doc.current_cycle_id().is_some() {
                    return Err(AppError::Conflict("a cycle is already open".to_string()));
                }
                if !cycle.watched.is_empty() {
                    return Err(AppError::InvalidInput(
                        "an open cycle cannot have watched movies".to_string(),
                    ));
                }
            }
            let id = next_id(&doc.cycles);
            doc.cycles.insert(
                id,
                CycleRecord {
                    id,
                    planned_end: round_opt(cycle.planned_end),
                    ended: round_opt(cycle.ended),
                },
            );
            doc.apply_watched(id, &cycle.watched)?;
            Ok(id)
        })
        .await
    }

    async fn add_movie(&self, movie: &Movie) -> Result<i64> {
        let movie = movie.clone();
        self.write("add_movie", move |doc| {
            let cycle_id = doc
                .current_cycle_id()
                .ok_or_else(|| AppError::Conflict("no cycle is open".to_string()))?;
            let normalized = movie.normalized_name();
            if normalized.is_empty() {
                return Err(AppError::InvalidInput("movie name is empty".to_string()));
            }
            if doc.movie_name_taken(&normalized, None) {
                return Err(AppError::Conflict(format!(
                    "movie {:?} already exists",
                    movie.name
                )));
            }

            let (links, tags) = doc.bind_movie_refs(&movie)?;
            let id = next_id(&doc.movies);
            doc.movies.insert(
                id,
                MovieRecord {
                    id,
                    name: movie.name.trim().to_string(),
                    description: movie.description.clone(),
                    remarks: movie.remarks.clone(),
                    duration: movie.duration.clone(),
                    rating: movie.rating,
                    poster: movie.poster.clone(),
                    links,
                    tags,
                    added_by: movie.added_by,
                    cycle_added: cycle_id,
                    cycle_watched: None,
                    removed: false,
                    approved: movie.approved,
                },
            );
            Ok(id)
        })
        .await
    }

    async fn add_user(&self, user: &User) -> Result<i64> {
        let user = user.clone();
        self.write("add_user", move |doc| {
            if doc.user_name_taken(&user.name, None) {
                return Err(AppError::Conflict(format!(
                    "name {:?} is already taken",
                    user.name
                )));
            }
            let id = next_id(&doc.users);
            let auth_methods = doc.bind_auth_methods(id, &user)?;
            doc.users.insert(
                id,
                UserRecord {
                    id,
                    name: user.name.clone(),
                    email: user.email.clone(),
                    notify_cycle_end: user.notify_cycle_end,
                    notify_vote_selection: user.notify_vote_selection,
                    privilege: user.privilege.as_i64(),
                    auth_methods,
                },
            );
            Ok(id)
        })
        .await
    }

    async fn add_tag(&self, tag: &Tag) -> Result<i64> {
        let tag = tag.clone();
        self.write("add_tag", move |doc| doc.insert_tag(&tag)).await
    }

    async fn add_auth_method(&self, auth: &AuthMethod) -> Result<i64> {
        let auth = auth.clone();
        self.write("add_auth_method", move |doc| doc.insert_auth_method(&auth))
            .await
    }

    async fn add_link(&self, link: &Link) -> Result<i64> {
        let link = link.clone();
        self.write("add_link", move |doc| doc.insert_link(&link)).await
    }

    async fn add_vote(&self, user_id: i64, movie_id: i64) -> Result<()> {
        self.write("add_vote", |doc| {
            let cycle_id = doc
                .current_cycle_id()
                .ok_or_else(|| AppError::Conflict("no cycle is open".to_string()))?;
            let movie = doc.movies.get(&movie_id).ok_or(AppError::NotFound)?;
            if movie.removed || movie.cycle_watched.is_some() {
                return Err(AppError::Conflict(
                    "movie is not open for voting".to_string(),
                ));
            }
            if doc
                .votes
                .iter()
                .any(|vote| vote.user_id == user_id && vote.movie_id == movie_id)
            {
                return Err(AppError::Conflict("vote already recorded".to_string()));
            }
            doc.votes.push(VoteRecord {
                user_id,
                movie_id,
                cycle_added: cycle_id,
            });
            Ok(())
        })
        .await
    }

    // =========================================================================
    // Read
    // =========================================================================

    async fn get_cycle(&self, id: i64) -> Result<Cycle> {
        self.read(|doc| doc.cycle(id)).await
    }

    async fn get_current_cycle(&self) -> Result<Option<Cycle>> {
        self.read(|doc| doc.current_cycle_id().map(|id| doc.cycle(id)).transpose())
            .await
    }

    async fn get_movie(&self, id: i64) -> Result<Movie> {
        self.read(|doc| doc.movie(id)).await
    }

    async fn get_active_movies(&self) -> Result<Vec<Movie>> {
        self.read(|doc| doc.movies_where(|movie| !movie.removed && movie.cycle_watched.is_none()))
            .await
    }

    async fn get_user(&self, id: i64) -> Result<User> {
        self.read(|doc| doc.user(id)).await
    }

    async fn get_users(&self, offset: i64, count: i64) -> Result<Vec<User>> {
        let offset = usize::try_from(offset.max(0)).unwrap_or(0);
        let count = usize::try_from(count.max(0)).unwrap_or(0);
        self.read(|doc| {
            doc.users
                .values()
                .skip(offset)
                .take(count)
                .map(|user| doc.hydrate_user(user))
                .collect()
        })
        .await
    }

    async fn get_user_votes(&self, user_id: i64) -> Result<Vec<Movie>> {
        self.read(|doc| {
            doc.votes
                .iter()
                .filter(|vote| vote.user_id == user_id)
                .map(|vote| doc.movie(vote.movie_id))
                .collect()
        })
        .await
    }

    async fn get_user_movies(&self, user_id: i64) -> Result<Vec<Movie>> {
        self.read(|doc| doc.movies_where(|movie| movie.added_by == user_id))
            .await
    }

    async fn get_users_with_auth(
        &self,
        auth_type: AuthType,
        exclusive: bool,
    ) -> Result<Vec<User>> {
        self.read(|doc| {
            let mut users = Vec::new();
            for record in doc.users.values() {
                let user = doc.hydrate_user(record)?;
                let has = user.has_auth(auth_type);
                if has && (!exclusive || user.auth_methods.len() == 1) {
                    users.push(user);
                }
            }
            Ok(users)
        })
        .await
    }

    async fn get_tag(&self, id: i64) -> Result<Tag> {
        self.read(|doc| doc.tag(id)).await
    }

    async fn get_auth_method(&self, id: i64) -> Result<AuthMethod> {
        self.read(|doc| doc.auth_method(id)).await
    }

    async fn get_link(&self, id: i64) -> Result<Link> {
        self.read(|doc| {
            // The source flag depends on the position inside a movie.
            let is_source = doc
                .movies
                .values()
                .any(|movie| movie.links.first() == Some(&id));
            let mut link = doc.link(id, usize::MAX)?;
            link.is_source = is_source;
            Ok(link)
        })
        .await
    }

    async fn get_past_cycles(&self, start: i64, count: i64) -> Result<Vec<Cycle>> {
        let start = usize::try_from(start.max(0)).unwrap_or(0);
        let count = usize::try_from(count.max(0)).unwrap_or(0);
        self.read(|doc| {
            doc.cycles
                .values()
                .rev()
                .filter(|cycle| cycle.ended.is_some())
                .skip(start)
                .take(count)
                .map(|cycle| doc.cycle(cycle.id))
                .collect()
        })
        .await
    }

    async fn get_movies_from_cycle(&self, id: i64) -> Result<Vec<Movie>> {
        self.read(|doc| {
            if !doc.cycles.contains_key(&id) {
                return Err(AppError::NotFound);
            }
            doc.movies_where(|movie| movie.cycle_watched == Some(id))
        })
        .await
    }

    // =========================================================================
    // Find
    // =========================================================================

    async fn find_tag(&self, name: &str) -> Result<i64> {
        self.read(|doc| doc.find_tag(name).ok_or(AppError::NotFound))
            .await
    }

    async fn find_link(&self, url: &str) -> Result<i64> {
        self.read(|doc| doc.find_link(url).ok_or(AppError::NotFound))
            .await
    }

    // =========================================================================
    // Update
    // =========================================================================

    async fn update_user(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.write("update_user", move |doc| {
            if user.name != DELETED_USER_NAME && doc.user_name_taken(&user.name, Some(user.id)) {
                return Err(AppError::Conflict(format!(
                    "name {:?} is already taken",
                    user.name
                )));
            }
            let listed: Vec<i64> = user.auth_methods.iter().map(|m| m.id).collect();
            let previous = doc
                .users
                .get(&user.id)
                .map(|record| record.auth_methods.clone())
                .unwrap_or_default();
            for stale in previous.iter().filter(|id| !listed.contains(id)) {
                doc.auth_methods.remove(stale);
            }
            let auth_methods = doc.bind_auth_methods(user.id, &user)?;
            doc.users.insert(
                user.id,
                UserRecord {
                    id: user.id,
                    name: user.name.clone(),
                    email: user.email.clone(),
                    notify_cycle_end: user.notify_cycle_end,
                    notify_vote_selection: user.notify_vote_selection,
                    privilege: user.privilege.as_i64(),
                    auth_methods,
                },
            );
            Ok(())
        })
        .await
    }

    async fn update_user_fields(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.write("update_user_fields", move |doc| {
            if user.name != DELETED_USER_NAME && doc.user_name_taken(&user.name, Some(user.id)) {
                return Err(AppError::Conflict(format!(
                    "name {:?} is already taken",
                    user.name
                )));
            }
            let record = doc.users.get_mut(&user.id).ok_or(AppError::NotFound)?;
            record.name = user.name.clone();
            record.email = user.email.clone();
            record.notify_cycle_end = user.notify_cycle_end;
            record.notify_vote_selection = user.notify_vote_selection;
            record.privilege = user.privilege.as_i64();
            Ok(())
        })
        .await
    }

    async fn add_user_auth_method(&self, user_id: i64, auth: &AuthMethod) -> Result<i64> {
        let auth = auth.clone();
        self.write("add_user_auth_method", move |doc| {
            if doc.user(user_id)?.has_auth(auth.auth_type) {
                return Err(AppError::Conflict(format!(
                    "user already has a {} login",
                    auth.auth_type
                )));
            }
            let id = doc.insert_auth_method(&auth)?;
            if let Some(record) = doc.users.get_mut(&user_id) {
                record.auth_methods.push(id);
            }
            Ok(id)
        })
        .await
    }

    async fn remove_user_auth_method(&self, user_id: i64, auth_type: AuthType) -> Result<()> {
        self.write("remove_user_auth_method", move |doc| {
            let user = doc.user(user_id)?;
            let method = user.auth_method(auth_type).ok_or(AppError::NotFound)?.id;
            if user.auth_methods.len() <= 1 {
                return Err(AppError::Conflict(
                    "cannot remove the last login method".to_string(),
                ));
            }
            doc.auth_methods.remove(&method);
            if let Some(record) = doc.users.get_mut(&user_id) {
                record.auth_methods.retain(|id| *id != method);
            }
            Ok(())
        })
        .await
    }

    async fn update_movie(&self, movie: &Movie) -> Result<()> {
        let movie = movie.clone();
        self.write("update_movie", move |doc| {
            if !doc.cycles.contains_key(&movie.cycle_added) {
                return Err(AppError::InvalidInput(format!(
                    "cycle {} does not exist",
                    movie.cycle_added
                )));
            }
            doc.check_watched_cycle(movie.cycle_watched)?;
            let normalized = movie.normalized_name();
            if doc.movie_name_taken(&normalized, Some(movie.id)) {
                return Err(AppError::Conflict(format!(
                    "movie {:?} already exists",
                    movie.name
                )));
            }

            let (links, tags) = doc.bind_movie_refs(&movie)?;
            doc.movies.insert(
                movie.id,
                MovieRecord {
                    id: movie.id,
                    name: movie.name.trim().to_string(),
                    description: movie.description.clone(),
                    remarks: movie.remarks.clone(),
                    duration: movie.duration.clone(),
                    rating: movie.rating,
                    poster: movie.poster.clone(),
                    links,
                    tags,
                    added_by: movie.added_by,
                    cycle_added: movie.cycle_added,
                    cycle_watched: movie.cycle_watched,
                    removed: movie.removed,
                    approved: movie.approved,
                },
            );
            if movie.removed {
                doc.votes.retain(|vote| vote.movie_id != movie.id);
            }
            Ok(())
        })
        .await
    }

    async fn update_cycle(&self, cycle: &Cycle) -> Result<()> {
        let cycle = cycle.clone();
        self.write("update_cycle", move |doc| {
            if cycle.ended.is_none() {
                if !cycle.watched.is_empty() {
                    return Err(AppError::InvalidInput(
                        "an open cycle cannot have watched movies".to_string(),
                    ));
                }
                if doc.current_cycle_id().is_some_and(|open| open != cycle.id) {
                    return Err(AppError::Conflict("a cycle is already open".to_string()));
                }
            }
            doc.cycles.insert(
                cycle.id,
                CycleRecord {
                    id: cycle.id,
                    planned_end: round_opt(cycle.planned_end),
                    ended: round_opt(cycle.ended),
                },
            );
            doc.apply_watched(cycle.id, &cycle.watched)
        })
        .await
    }

    async fn update_auth_method(&self, auth: &AuthMethod) -> Result<()> {
        let auth = auth.clone();
        self.write("update_auth_method", move |doc| {
            let existing = doc.auth_methods.get(&auth.id).ok_or(AppError::NotFound)?;
            if existing.auth_type != auth.auth_type {
                return Err(AppError::InvalidInput(
                    "auth method type cannot change".to_string(),
                ));
            }
            if let Some(ext_id) = auth.ext_id.as_deref() {
                if doc.ext_id_taken(auth.auth_type, ext_id, Some(auth.id)) {
                    return Err(AppError::Conflict(format!(
                        "{} account is already in use",
                        auth.auth_type
                    )));
                }
            }
            doc.auth_methods.insert(
                auth.id,
                AuthMethodRecord {
                    id: auth.id,
                    auth_type: auth.auth_type,
                    ext_id: auth.ext_id.clone(),
                    password: auth.password.clone(),
                    access_token: auth.access_token.clone(),
                    refresh_token: auth.refresh_token.clone(),
                    date: round_to_second(auth.date),
                },
            );
            Ok(())
        })
        .await
    }

    // =========================================================================
    // Delete
    // =========================================================================

    async fn delete_vote(&self, user_id: i64, movie_id: i64) -> Result<()> {
        self.write("delete_vote", |doc| {
            let position = doc
                .votes
                .iter()
                .position(|vote| vote.user_id == user_id && vote.movie_id == movie_id)
                .ok_or(AppError::NotFound)?;
            if doc.is_watched(movie_id) {
                return Err(AppError::Conflict(
                    "votes on watched movies cannot be removed".to_string(),
                ));
            }
            doc.votes.remove(position);
            Ok(())
        })
        .await
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        self.write("delete_tag", |doc| {
            doc.tags.remove(&id).ok_or(AppError::NotFound)?;
            for movie in doc.movies.values_mut() {
                movie.tags.retain(|tag| *tag != id);
            }
            Ok(())
        })
        .await
    }

    async fn delete_auth_method(&self, id: i64) -> Result<()> {
        self.write("delete_auth_method", |doc| {
            doc.auth_methods.remove(&id).ok_or(AppError::NotFound)?;
            for user in doc.users.values_mut() {
                user.auth_methods.retain(|method| *method != id);
            }
            Ok(())
        })
        .await
    }

    async fn delete_link(&self, id: i64) -> Result<()> {
        self.write("delete_link", |doc| {
            doc.links.remove(&id).ok_or(AppError::NotFound)?;
            for movie in doc.movies.values_mut() {
                movie.links.retain(|link| *link != id);
            }
            Ok(())
        })
        .await
    }

    async fn remove_movie(&self, id: i64) -> Result<()> {
        self.write("remove_movie", |doc| {
            let movie = doc.movies.get_mut(&id).ok_or(AppError::NotFound)?;
            if movie.cycle_watched.is_some() {
                return Err(AppError::Conflict(
                    "watched movies cannot be removed".to_string(),
                ));
            }
            movie.removed = true;
            doc.votes.retain(|vote| vote.movie_id != id);
            Ok(())
        })
        .await
    }

    async fn purge_user(&self, user_id: i64) -> Result<()> {
        self.write("purge_user", |doc| {
            let user = doc.users.remove(&user_id).ok_or(AppError::NotFound)?;
            for method in &user.auth_methods {
                doc.auth_methods.remove(method);
            }
            doc.votes.retain(|vote| vote.user_id != user_id);
            Ok(())
        })
        .await
    }

    async fn decay_votes(&self, age: i64) -> Result<u64> {
        if age <= 0 {
            return Ok(0);
        }
        let Ok(skip) = usize::try_from(age) else {
            return Ok(0);
        };

        self.write("decay_votes", |doc| {
            // Cycle ids grow with time, so the map in reverse is newest first.
            let Some(boundary) = doc.cycles.keys().rev().nth(skip).copied() else {
                return Ok(0);
            };
            let before = doc.votes.len();
            let watched: Vec<i64> = doc
                .movies
                .values()
                .filter(|movie| movie.cycle_watched.is_some())
                .map(|movie| movie.id)
                .collect();
            doc.votes
                .retain(|vote| vote.cycle_added >= boundary || watched.contains(&vote.movie_id));
            Ok((before - doc.votes.len()) as u64)
        })
        .await
    }

    // =========================================================================
    // Auth queries
    // =========================================================================

    async fn user_local_login(&self, name: &str, hashed_password: &str) -> Result<User> {
        let name = name.to_lowercase();
        self.read(|doc| {
            for record in doc.users.values() {
                if record.name.to_lowercase() != name {
                    continue;
                }
                let user = doc.hydrate_user(record)?;
                let matches = user
                    .auth_method(AuthType::Local)
                    .and_then(|method| method.password.as_deref())
                    == Some(hashed_password);
                if matches {
                    return Ok(user);
                }
            }
            Err(AppError::Unauthorized)
        })
        .await
    }

    async fn user_oauth_login(&self, auth_type: AuthType, ext_id: &str) -> Result<User> {
        self.read(|doc| {
            let method = doc
                .auth_methods
                .values()
                .find(|method| {
                    method.auth_type == auth_type && method.ext_id.as_deref() == Some(ext_id)
                })
                .ok_or(AppError::NotFound)?;
            let owner = doc
                .owner_of_auth_method(method.id)
                .ok_or(AppError::NotFound)?;
            doc.user(owner)
        })
        .await
    }

    async fn check_oauth_usage(&self, ext_id: &str, auth_type: AuthType) -> Result<bool> {
        self.read(|doc| Ok(doc.ext_id_taken(auth_type, ext_id, None)))
            .await
    }

    // =========================================================================
    // Search & usage checks
    // =========================================================================

    async fn search_movie_titles(&self, query: &str) -> Result<Vec<Movie>> {
        let tokens = search_tokens(query);
        self.read(|doc| {
            doc.movies_where(|movie| !movie.removed && title_matches(&movie.name, &tokens))
        })
        .await
    }

    async fn check_movie_exists(&self, title: &str) -> Result<bool> {
        let normalized = normalize_movie_name(title);
        self.read(|doc| Ok(doc.movie_name_taken(&normalized, None)))
            .await
    }

    async fn check_user_exists(&self, name: &str) -> Result<bool> {
        self.read(|doc| Ok(doc.user_name_taken(name, None))).await
    }

    async fn user_voted_for_movie(&self, user_id: i64, movie_id: i64) -> Result<bool> {
        self.read(|doc| {
            Ok(doc
                .votes
                .iter()
                .any(|vote| vote.user_id == user_id && vote.movie_id == movie_id))
        })
        .await
    }

    // =========================================================================
    // Config store
    // =========================================================================

    async fn get_cfg_value(&self, key: &str) -> Result<Option<CfgValue>> {
        self.read(|doc| Ok(doc.settings.get(key).cloned())).await
    }

    async fn set_cfg_value(&self, key: &str, value: CfgValue) -> Result<()> {
        let key = key.to_string();
        self.write("set_cfg_value", move |doc| {
            doc.settings.insert(key, value);
            Ok(())
        })
        .await
    }

    async fn delete_cfg_key(&self, key: &str) -> Result<()> {
        self.write("delete_cfg_key", |doc| {
            doc.settings.remove(key);
            Ok(())
        })
        .await
    }
}
