//! Data models
//!
//! Rust structs representing the persisted entities.
//! References between entities are plain integer ids; the backends
//! rehydrate links, tags and votes into the owning movie on read.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Name given to soft-deleted users.
pub const DELETED_USER_NAME: &str = "[deleted]";

/// Poster path used when no poster could be stored.
pub const UNKNOWN_POSTER: &str = "unknown.jpg";

/// Round a timestamp to whole seconds, the precision every backend stores.
pub fn round_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    at.round_subsecs(0)
}

/// Date for a refreshed credential: now, but always at least one second
/// after `previous` so that sessions bound to the old date are invalidated.
pub fn next_credential_date(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = round_to_second(Utc::now());
    let floor = round_to_second(previous) + chrono::Duration::seconds(1);
    now.max(floor)
}

/// Canonical form used for movie-name uniqueness.
///
/// Lowercased, inner whitespace collapsed to single spaces, trimmed.
pub fn normalize_movie_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Cycle
// =============================================================================

/// A time-bounded voting round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: i64,
    pub planned_end: Option<DateTime<Utc>>,
    /// Set when the cycle is closed. Exactly one cycle has `ended == None`.
    pub ended: Option<DateTime<Utc>>,
    /// Ids of the movies selected as winners when the cycle closed
    pub watched: Vec<i64>,
}

impl Cycle {
    pub fn is_open(&self) -> bool {
        self.ended.is_none()
    }
}

// =============================================================================
// Movie
// =============================================================================

/// A nominated movie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub remarks: String,
    /// Free-form duration text ("1 hr 55 min", "24 min per ep")
    pub duration: String,
    /// Provider rating, 0-10
    pub rating: f32,
    /// Path of the poster relative to the server root
    pub poster: String,
    /// Ordered links, the first one is the source link
    pub links: Vec<Link>,
    pub tags: Vec<Tag>,
    pub added_by: i64,
    pub cycle_added: i64,
    pub cycle_watched: Option<i64>,
    pub removed: bool,
    pub approved: bool,
    /// Votes currently stored for this movie
    pub votes: Vec<Vote>,
}

impl Movie {
    /// Blank movie ready to be filled by the nomination pipeline.
    pub fn new(name: impl Into<String>, added_by: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            remarks: String::new(),
            duration: String::new(),
            rating: 0.0,
            poster: UNKNOWN_POSTER.to_string(),
            links: Vec::new(),
            tags: Vec::new(),
            added_by,
            cycle_added: 0,
            cycle_watched: None,
            removed: false,
            approved: true,
            votes: Vec::new(),
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_movie_name(&self.name)
    }

    pub fn is_watched(&self) -> bool {
        self.cycle_watched.is_some()
    }

    /// Neither watched nor removed; the movie takes part in voting.
    pub fn is_active(&self) -> bool {
        !self.removed && self.cycle_watched.is_none()
    }

    pub fn source_link(&self) -> Option<&Link> {
        self.links.first()
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn voted_by(&self, user_id: i64) -> bool {
        self.votes.iter().any(|vote| vote.user_id == user_id)
    }
}

// =============================================================================
// User & authentication
// =============================================================================

/// Privilege level, ordered from least to most privileged
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Privilege {
    #[default]
    User,
    Mod,
    Admin,
}

impl Privilege {
    pub fn as_i64(self) -> i64 {
        match self {
            Privilege::User => 0,
            Privilege::Mod => 1,
            Privilege::Admin => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            2 => Privilege::Admin,
            1 => Privilege::Mod,
            _ => Privilege::User,
        }
    }
}

/// Kind of credential binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthType {
    Local,
    Twitch,
    Discord,
    Patreon,
}

impl AuthType {
    /// Order in which a remaining method is picked to re-establish a session.
    pub const PREFERENCE: [AuthType; 4] = [
        AuthType::Local,
        AuthType::Twitch,
        AuthType::Discord,
        AuthType::Patreon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::Local => "LOCAL",
            AuthType::Twitch => "TWITCH",
            AuthType::Discord => "DISCORD",
            AuthType::Patreon => "PATREON",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "LOCAL" => Some(AuthType::Local),
            "TWITCH" => Some(AuthType::Twitch),
            "DISCORD" => Some(AuthType::Discord),
            "PATREON" => Some(AuthType::Patreon),
            _ => None,
        }
    }

    pub fn is_oauth(self) -> bool {
        self != AuthType::Local
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One credential binding of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthMethod {
    pub id: i64,
    pub auth_type: AuthType,
    /// Provider-side account id, `None` for LOCAL
    pub ext_id: Option<String>,
    /// Salted password hash, LOCAL only
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Last credential change (LOCAL) or token expiry (OAuth).
    /// Sessions are bound to this value.
    pub date: DateTime<Utc>,
}

impl AuthMethod {
    pub fn local(password_hash: String) -> Self {
        Self {
            id: 0,
            auth_type: AuthType::Local,
            ext_id: None,
            password: Some(password_hash),
            access_token: None,
            refresh_token: None,
            date: round_to_second(Utc::now()),
        }
    }

    pub fn oauth(
        auth_type: AuthType,
        ext_id: String,
        access_token: String,
        refresh_token: Option<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            auth_type,
            ext_id: Some(ext_id),
            password: None,
            access_token: Some(access_token),
            refresh_token,
            date: round_to_second(date),
        }
    }
}

/// A site user with one or more authentication bindings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub notify_cycle_end: bool,
    pub notify_vote_selection: bool,
    pub privilege: Privilege,
    pub auth_methods: Vec<AuthMethod>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            email: email.into(),
            notify_cycle_end: false,
            notify_vote_selection: false,
            privilege: Privilege::User,
            auth_methods: Vec::new(),
        }
    }

    pub fn auth_method(&self, auth_type: AuthType) -> Option<&AuthMethod> {
        self.auth_methods
            .iter()
            .find(|method| method.auth_type == auth_type)
    }

    pub fn has_auth(&self, auth_type: AuthType) -> bool {
        self.auth_method(auth_type).is_some()
    }

    /// First remaining method in LOCAL, TWITCH, DISCORD, PATREON order.
    pub fn preferred_auth_method(&self) -> Option<&AuthMethod> {
        AuthType::PREFERENCE
            .iter()
            .find_map(|auth_type| self.auth_method(*auth_type))
    }

    pub fn is_admin(&self) -> bool {
        self.privilege >= Privilege::Admin
    }

    pub fn is_mod(&self) -> bool {
        self.privilege >= Privilege::Mod
    }

    pub fn is_deleted(&self) -> bool {
        self.name == DELETED_USER_NAME && self.auth_methods.is_empty()
    }
}

// =============================================================================
// Votes, links, tags
// =============================================================================

/// One user's vote on one movie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: i64,
    pub movie_id: i64,
    /// Cycle that was current when the vote was cast
    pub cycle_added: i64,
}

/// Link provider classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    #[serde(rename = "IMDb")]
    Imdb,
    MyAnimeList,
    Misc,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Imdb => "IMDb",
            LinkType::MyAnimeList => "MyAnimeList",
            LinkType::Misc => "Misc",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "IMDb" => LinkType::Imdb,
            "MyAnimeList" => LinkType::MyAnimeList,
            _ => LinkType::Misc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    /// Normalized URL
    pub url: String,
    pub link_type: LinkType,
    /// First link of its movie
    pub is_source: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl Tag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
        }
    }
}

// =============================================================================
// Config values
// =============================================================================

/// A stored site setting
///
/// Serialized as `{"Type": "...", "Value": ...}` in the document backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Value")]
pub enum CfgValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl CfgValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            CfgValue::String(_) => "string",
            CfgValue::Int(_) => "int",
            CfgValue::Bool(_) => "bool",
        }
    }

    /// Text form used by the relational backend.
    pub fn encode(&self) -> (&'static str, String) {
        match self {
            CfgValue::String(value) => ("string", value.clone()),
            CfgValue::Int(value) => ("int", value.to_string()),
            CfgValue::Bool(value) => ("bool", value.to_string()),
        }
    }

    pub fn decode(value_type: &str, value: &str) -> Option<Self> {
        match value_type {
            "string" => Some(CfgValue::String(value.to_string())),
            "int" => value.parse().ok().map(CfgValue::Int),
            "bool" => value.parse().ok().map(CfgValue::Bool),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_movie_name("  The   Matrix\t(1999) "),
            "the matrix (1999)"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for name in ["The  Matrix", " a\nb  c ", "", "ÄBC  déf"] {
            let once = normalize_movie_name(name);
            assert_eq!(normalize_movie_name(&once), once);
        }
    }

    #[test]
    fn preferred_auth_method_follows_preference_order() {
        let mut user = User::new("alice", "");
        user.auth_methods.push(AuthMethod::oauth(
            AuthType::Patreon,
            "p1".into(),
            "token".into(),
            None,
            Utc::now(),
        ));
        user.auth_methods.push(AuthMethod::oauth(
            AuthType::Twitch,
            "t1".into(),
            "token".into(),
            None,
            Utc::now(),
        ));

        assert_eq!(
            user.preferred_auth_method().map(|m| m.auth_type),
            Some(AuthType::Twitch)
        );
    }

    #[test]
    fn cfg_value_text_encoding_roundtrips_types() {
        let (kind, text) = CfgValue::Int(42).encode();
        assert_eq!(CfgValue::decode(kind, &text), Some(CfgValue::Int(42)));
        assert_eq!(CfgValue::decode("bool", "yes"), None);
    }

    #[test]
    fn round_to_second_rounds_to_nearest_second() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00.7Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(round_to_second(at).to_rfc3339(), "2024-03-01T10:00:01+00:00");
    }

    #[test]
    fn next_credential_date_is_strictly_later() {
        let previous = round_to_second(Utc::now()) + chrono::Duration::seconds(30);
        assert!(next_credential_date(previous) > previous);
    }

    #[test]
    fn privilege_ordering() {
        assert!(Privilege::Admin > Privilege::Mod);
        assert_eq!(Privilege::from_i64(Privilege::Mod.as_i64()), Privilege::Mod);
    }
}
