//! Password hashing, random tokens and single-use URL keys

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{Rng, rngs::OsRng};
use sha2::{Digest, Sha512};
use tokio::sync::RwLock;

use crate::error::AppError;

/// Length of both tokens of a [`UrlKey`]
pub const URL_KEY_LENGTH: usize = 20;

/// Salted SHA-512 of `password`, hex-encoded.
///
/// The salt is prepended to the password before hashing.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random lowercase hex string of exactly `length` characters.
///
/// Built by concatenating uniformly drawn 60-bit values from the OS RNG.
pub fn random_token(length: usize) -> String {
    let mut token = String::with_capacity(length + 15);
    while token.len() < length {
        let value: u64 = OsRng.gen_range(0..(1u64 << 60));
        let _ = write!(token, "{value:x}");
    }
    token.truncate(length);
    token
}

// =============================================================================
// URL keys
// =============================================================================

/// What a URL key grants when consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKeyKind {
    /// Elevates the logged-in caller to admin
    AdminAuth,
    /// Lets the user set a new local password
    PasswordReset { user_id: i64 },
}

/// Single-use capability: `url` travels in the path, `key` is supplied by
/// the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlKey {
    pub url: String,
    pub key: String,
    pub kind: UrlKeyKind,
    pub generated_at: DateTime<Utc>,
}

impl UrlKey {
    /// Path plus query that redeems this key
    pub fn path(&self) -> String {
        format!("/auth/{}?key={}", self.url, self.key)
    }
}

/// In-process table of live URL keys
///
/// Keys live until consumed or until the process exits.
#[derive(Clone, Default)]
pub struct UrlKeys {
    /// url token -> key record
    keys: Arc<RwLock<HashMap<String, UrlKey>>>,
}

impl UrlKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate and store a fresh key.
    ///
    /// A new password reset for a user replaces any pending one.
    pub async fn issue(&self, kind: UrlKeyKind) -> UrlKey {
        let mut keys = self.keys.write().await;
        if let UrlKeyKind::PasswordReset { .. } = kind {
            keys.retain(|_, existing| existing.kind != kind);
        }

        let mut url = random_token(URL_KEY_LENGTH);
        while keys.contains_key(&url) {
            url = random_token(URL_KEY_LENGTH);
        }
        let key = UrlKey {
            url: url.clone(),
            key: random_token(URL_KEY_LENGTH),
            kind,
            generated_at: Utc::now(),
        };
        keys.insert(url, key.clone());
        crate::metrics::PENDING_URL_KEYS.set(keys.len() as i64);
        key
    }

    /// The live key for `url` if `key` matches it, without consuming it.
    ///
    /// # Errors
    /// `NotFound` when either token does not match.
    pub async fn verify(&self, url: &str, key: &str) -> Result<UrlKey, AppError> {
        let keys = self.keys.read().await;
        keys.get(url)
            .filter(|stored| stored.key == key)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Validate and delete the key in one step.
    ///
    /// # Errors
    /// `NotFound` when either token does not match.
    pub async fn consume(&self, url: &str, key: &str) -> Result<UrlKey, AppError> {
        let mut keys = self.keys.write().await;
        match keys.get(url) {
            Some(stored) if stored.key == key => {}
            _ => return Err(AppError::NotFound),
        }
        let consumed = keys.remove(url).ok_or(AppError::NotFound)?;
        crate::metrics::PENDING_URL_KEYS.set(keys.len() as i64);
        Ok(consumed)
    }

    /// Number of unconsumed keys
    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}
