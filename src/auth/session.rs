//! Session management
//!
//! Sessions live entirely in the `moviepoll-session` cookie. The payload is
//! encrypted with AES-256-GCM and signed with HMAC-SHA256; both keys are
//! process secrets from the config store. No server-side session storage.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::data::{AuthMethod, AuthType, User};
use crate::error::{AppError, Result};
use crate::settings::{
    SESSION_AUTH_LENGTH, SESSION_ENCRYPT_LENGTH, Settings, keys,
};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "moviepoll-session";

const NONCE_LENGTH: usize = 12;
const USER_ID_FIELD: &str = "UserId";
const DATE_FIELD_PREFIX: &str = "Date_";

type HmacSha256 = Hmac<Sha256>;

/// Opaque marker for an auth method's `date`.
///
/// Hex SHA-256 over the big-endian seconds followed by the nanoseconds, so
/// the marker does not depend on how the date is formatted.
pub fn date_marker(date: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(date.timestamp().to_be_bytes());
    hasher.update(date.timestamp_subsec_nanos().to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Logged-in user bound to one of their auth methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: i64,
    pub auth_type: AuthType,
    pub marker: String,
}

impl Session {
    pub fn new(user_id: i64, method: &AuthMethod) -> Self {
        Self {
            user_id,
            auth_type: method.auth_type,
            marker: date_marker(method.date),
        }
    }

    /// Session for the user's preferred remaining method
    pub fn for_user(user: &User) -> Option<Self> {
        user.preferred_auth_method()
            .map(|method| Self::new(user.id, method))
    }

    /// Whether the bound method still exists with an unchanged date.
    pub fn matches(&self, user: &User) -> bool {
        user.id == self.user_id
            && user
                .auth_method(self.auth_type)
                .is_some_and(|method| date_marker(method.date) == self.marker)
    }

    fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        payload.insert(USER_ID_FIELD.to_string(), self.user_id.into());
        payload.insert(
            format!("{DATE_FIELD_PREFIX}{}", self.auth_type.as_str()),
            self.marker.clone().into(),
        );
        serde_json::Value::Object(payload)
    }

    fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let object = payload.as_object()?;
        let user_id = object.get(USER_ID_FIELD)?.as_i64()?;
        let (auth_type, marker) = object.iter().find_map(|(field, value)| {
            let auth_type = AuthType::parse(field.strip_prefix(DATE_FIELD_PREFIX)?)?;
            Some((auth_type, value.as_str()?.to_string()))
        })?;
        Some(Self {
            user_id,
            auth_type,
            marker,
        })
    }
}

/// Keys sealing the session cookie
pub struct SessionKeys {
    cipher: Aes256Gcm,
    auth: Vec<u8>,
}

impl SessionKeys {
    /// # Errors
    /// `Config` when the encryption key is not 32 bytes.
    pub fn new(auth: &[u8], encrypt: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(encrypt)
            .map_err(|_| AppError::Config("session encryption key must be 32 bytes".to_string()))?;
        Ok(Self {
            cipher,
            auth: auth.to_vec(),
        })
    }

    /// Keys from the config store, generating them on first start.
    pub async fn load(settings: &Settings) -> Result<Self> {
        let auth = settings
            .secret(keys::SESSION_AUTH, SESSION_AUTH_LENGTH)
            .await?;
        let encrypt = settings
            .secret(keys::SESSION_ENCRYPT, SESSION_ENCRYPT_LENGTH)
            .await?;
        Self::new(auth.as_bytes(), encrypt.as_bytes())
    }

    fn mac(&self) -> Result<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.auth)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid session auth key: {e}")))
    }

    /// Seal a session into a cookie value.
    ///
    /// Token format: base64(nonce ‖ ciphertext).base64(hmac)
    pub fn encode(&self, session: &Session) -> Result<String> {
        let plaintext = serde_json::to_vec(&session.to_payload())?;

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("session encryption failed")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        let sealed = URL_SAFE_NO_PAD.encode(sealed);

        let mut mac = self.mac()?;
        mac.update(sealed.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{sealed}.{signature}"))
    }

    /// Open a cookie value. Tampered or undecryptable values yield `None`.
    pub fn decode(&self, token: &str) -> Option<Session> {
        let (sealed, signature) = token.split_once('.')?;

        let mut mac = self.mac().ok()?;
        mac.update(sealed.as_bytes());
        mac.verify_slice(&URL_SAFE_NO_PAD.decode(signature).ok()?)
            .ok()?;

        let sealed = URL_SAFE_NO_PAD.decode(sealed).ok()?;
        if sealed.len() <= NONCE_LENGTH {
            return None;
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        let payload: serde_json::Value = serde_json::from_slice(&plaintext).ok()?;
        Session::from_payload(&payload)
    }

    /// Cookie carrying `session`
    pub fn cookie(&self, session: &Session) -> Result<Cookie<'static>> {
        Ok(Cookie::build((SESSION_COOKIE, self.encode(session)?))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build())
    }
}

/// Cookie that clears the session on the client
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}
