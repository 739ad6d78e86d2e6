//! Response DTOs
//!
//! Shapes handed to clients. Credentials (password hashes, OAuth tokens)
//! never leave the server.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::{AuthType, Cycle, Link, Movie, Privilege, User};
use crate::service::PastCycle;

/// Movie as listed on the index, history and admin pages
#[derive(Debug, Clone, Serialize)]
pub struct MovieResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub remarks: String,
    pub duration: String,
    pub rating: f32,
    pub poster: String,
    pub links: Vec<LinkResponse>,
    pub tags: Vec<String>,
    pub added_by: i64,
    pub cycle_added: i64,
    pub cycle_watched: Option<i64>,
    pub removed: bool,
    pub approved: bool,
    pub votes: usize,
    /// Whether the requesting user voted for this movie
    pub voted: bool,
}

impl MovieResponse {
    pub fn new(movie: &Movie, viewer: Option<&User>) -> Self {
        Self {
            id: movie.id,
            name: movie.name.clone(),
            description: movie.description.clone(),
            remarks: movie.remarks.clone(),
            duration: movie.duration.clone(),
            rating: movie.rating,
            poster: movie.poster.clone(),
            links: movie.links.iter().map(LinkResponse::from).collect(),
            tags: movie.tags.iter().map(|tag| tag.name.clone()).collect(),
            added_by: movie.added_by,
            cycle_added: movie.cycle_added,
            cycle_watched: movie.cycle_watched,
            removed: movie.removed,
            approved: movie.approved,
            votes: movie.vote_count(),
            voted: viewer.is_some_and(|user| movie.voted_by(user.id)),
        }
    }

    pub fn list(movies: &[Movie], viewer: Option<&User>) -> Vec<Self> {
        movies
            .iter()
            .map(|movie| Self::new(movie, viewer))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkResponse {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_source: bool,
}

impl From<&Link> for LinkResponse {
    fn from(link: &Link) -> Self {
        Self {
            url: link.url.clone(),
            kind: link.link_type.as_str().to_string(),
            is_source: link.is_source,
        }
    }
}

/// Login binding without its secrets
#[derive(Debug, Clone, Serialize)]
pub struct AuthMethodResponse {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    pub ext_id: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub notify_cycle_end: bool,
    pub notify_vote_selection: bool,
    pub privilege: Privilege,
    pub auth_methods: Vec<AuthMethodResponse>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            notify_cycle_end: user.notify_cycle_end,
            notify_vote_selection: user.notify_vote_selection,
            privilege: user.privilege,
            auth_methods: user
                .auth_methods
                .iter()
                .map(|method| AuthMethodResponse {
                    auth_type: method.auth_type,
                    ext_id: method.ext_id.clone(),
                    date: method.date,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PastCycleResponse {
    pub cycle: Cycle,
    pub watched: Vec<MovieResponse>,
}

impl From<&PastCycle> for PastCycleResponse {
    fn from(past: &PastCycle) -> Self {
        Self {
            cycle: past.cycle.clone(),
            watched: MovieResponse::list(&past.watched, None),
        }
    }
}
