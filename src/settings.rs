//! Site settings
//!
//! Typed access to the config store kept in the data layer. Reads of
//! absent keys fall back to a default without writing it back; the three
//! process secrets are the exception and are generated on first read.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::data::{AuthType, CfgValue, DataConnector};
use crate::error::{AppError, FormErrors, Result};
use crate::security::random_token;

/// Recognised config keys
pub mod keys {
    pub const VOTING_ENABLED: &str = "VotingEnabled";
    pub const MAX_USER_VOTES: &str = "MaxUserVotes";
    pub const UNLIMITED_VOTES: &str = "UnlimitedVotes";
    pub const ENTRIES_REQUIRE_APPROVAL: &str = "EntriesRequireApproval";
    pub const FORMFILL_ENABLED: &str = "FormfillEnabled";
    pub const HOST_ADDRESS: &str = "HostAddress";
    pub const NOTICE_BANNER: &str = "NoticeBanner";

    pub const MIN_NAME_LENGTH: &str = "MinNameLength";
    pub const MAX_NAME_LENGTH: &str = "MaxNameLength";
    pub const MIN_PASSWORD_LENGTH: &str = "MinPasswordLength";
    pub const MAX_TITLE_LENGTH: &str = "MaxTitleLength";
    pub const MAX_DESCRIPTION_LENGTH: &str = "MaxDescriptionLength";
    pub const MAX_LINK_LENGTH: &str = "MaxLinkLength";
    pub const MAX_REMARKS_LENGTH: &str = "MaxRemarksLength";
    pub const MAX_MULT_EP_LENGTH: &str = "MaxMultEpLength";

    pub const JIKAN_ENABLED: &str = "JikanEnabled";
    pub const JIKAN_BANNED_TYPES: &str = "JikanBannedTypes";
    pub const JIKAN_MAX_EPISODES: &str = "JikanMaxEpisodes";
    pub const TMDB_ENABLED: &str = "TmdbEnabled";
    pub const TMDB_TOKEN: &str = "TmdbToken";

    pub const LOCAL_SIGNUP_ENABLED: &str = "LocalSignupEnabled";

    pub const TWITCH_OAUTH_ENABLED: &str = "TwitchOauthEnabled";
    pub const TWITCH_OAUTH_SIGNUP_ENABLED: &str = "TwitchOauthSignupEnabled";
    pub const TWITCH_OAUTH_CLIENT_ID: &str = "TwitchOauthClientID";
    pub const TWITCH_OAUTH_CLIENT_SECRET: &str = "TwitchOauthClientSecret";
    pub const DISCORD_OAUTH_ENABLED: &str = "DiscordOauthEnabled";
    pub const DISCORD_OAUTH_SIGNUP_ENABLED: &str = "DiscordOauthSignupEnabled";
    pub const DISCORD_OAUTH_CLIENT_ID: &str = "DiscordOauthClientID";
    pub const DISCORD_OAUTH_CLIENT_SECRET: &str = "DiscordOauthClientSecret";
    pub const PATREON_OAUTH_ENABLED: &str = "PatreonOauthEnabled";
    pub const PATREON_OAUTH_SIGNUP_ENABLED: &str = "PatreonOauthSignupEnabled";
    pub const PATREON_OAUTH_CLIENT_ID: &str = "PatreonOauthClientID";
    pub const PATREON_OAUTH_CLIENT_SECRET: &str = "PatreonOauthClientSecret";

    pub const SESSION_AUTH: &str = "SessionAuth";
    pub const SESSION_ENCRYPT: &str = "SessionEncrypt";
    pub const PASS_SALT: &str = "PassSalt";
}

/// Lengths of the generated process secrets
pub const SESSION_AUTH_LENGTH: usize = 64;
pub const SESSION_ENCRYPT_LENGTH: usize = 32;
pub const PASS_SALT_LENGTH: usize = 32;

/// Default of a policy key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Str(&'static str),
    Int(i64),
    Bool(bool),
}

impl DefaultValue {
    pub fn to_cfg(self) -> CfgValue {
        match self {
            DefaultValue::Str(value) => CfgValue::String(value.to_string()),
            DefaultValue::Int(value) => CfgValue::Int(value),
            DefaultValue::Bool(value) => CfgValue::Bool(value),
        }
    }
}

/// Every policy key editable from the admin surface, with its default.
pub const POLICY_KEYS: &[(&str, DefaultValue)] = &[
    (keys::VOTING_ENABLED, DefaultValue::Bool(false)),
    (keys::MAX_USER_VOTES, DefaultValue::Int(5)),
    (keys::UNLIMITED_VOTES, DefaultValue::Bool(false)),
    (keys::ENTRIES_REQUIRE_APPROVAL, DefaultValue::Bool(false)),
    (keys::FORMFILL_ENABLED, DefaultValue::Bool(true)),
    (keys::HOST_ADDRESS, DefaultValue::Str("")),
    (keys::NOTICE_BANNER, DefaultValue::Str("")),
    (keys::MIN_NAME_LENGTH, DefaultValue::Int(4)),
    (keys::MAX_NAME_LENGTH, DefaultValue::Int(100)),
    (keys::MIN_PASSWORD_LENGTH, DefaultValue::Int(8)),
    (keys::MAX_TITLE_LENGTH, DefaultValue::Int(100)),
    (keys::MAX_DESCRIPTION_LENGTH, DefaultValue::Int(1000)),
    (keys::MAX_LINK_LENGTH, DefaultValue::Int(500)),
    (keys::MAX_REMARKS_LENGTH, DefaultValue::Int(200)),
    (keys::MAX_MULT_EP_LENGTH, DefaultValue::Int(120)),
    (keys::JIKAN_ENABLED, DefaultValue::Bool(false)),
    (keys::JIKAN_BANNED_TYPES, DefaultValue::Str("TV,music")),
    (keys::JIKAN_MAX_EPISODES, DefaultValue::Int(1)),
    (keys::TMDB_ENABLED, DefaultValue::Bool(false)),
    (keys::TMDB_TOKEN, DefaultValue::Str("")),
    (keys::LOCAL_SIGNUP_ENABLED, DefaultValue::Bool(true)),
    (keys::TWITCH_OAUTH_ENABLED, DefaultValue::Bool(false)),
    (keys::TWITCH_OAUTH_SIGNUP_ENABLED, DefaultValue::Bool(false)),
    (keys::TWITCH_OAUTH_CLIENT_ID, DefaultValue::Str("")),
    (keys::TWITCH_OAUTH_CLIENT_SECRET, DefaultValue::Str("")),
    (keys::DISCORD_OAUTH_ENABLED, DefaultValue::Bool(false)),
    (keys::DISCORD_OAUTH_SIGNUP_ENABLED, DefaultValue::Bool(false)),
    (keys::DISCORD_OAUTH_CLIENT_ID, DefaultValue::Str("")),
    (keys::DISCORD_OAUTH_CLIENT_SECRET, DefaultValue::Str("")),
    (keys::PATREON_OAUTH_ENABLED, DefaultValue::Bool(false)),
    (keys::PATREON_OAUTH_SIGNUP_ENABLED, DefaultValue::Bool(false)),
    (keys::PATREON_OAUTH_CLIENT_ID, DefaultValue::Str("")),
    (keys::PATREON_OAUTH_CLIENT_SECRET, DefaultValue::Str("")),
];

/// Default for a recognised policy key
pub fn default_for(key: &str) -> Option<DefaultValue> {
    POLICY_KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, default)| *default)
}

/// Keys controlling one OAuth provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderKeys {
    pub enabled: &'static str,
    pub signup_enabled: &'static str,
    pub client_id: &'static str,
    pub client_secret: &'static str,
}

/// Config keys for `auth_type`, `None` for LOCAL
pub fn provider_keys(auth_type: AuthType) -> Option<ProviderKeys> {
    match auth_type {
        AuthType::Local => None,
        AuthType::Twitch => Some(ProviderKeys {
            enabled: keys::TWITCH_OAUTH_ENABLED,
            signup_enabled: keys::TWITCH_OAUTH_SIGNUP_ENABLED,
            client_id: keys::TWITCH_OAUTH_CLIENT_ID,
            client_secret: keys::TWITCH_OAUTH_CLIENT_SECRET,
        }),
        AuthType::Discord => Some(ProviderKeys {
            enabled: keys::DISCORD_OAUTH_ENABLED,
            signup_enabled: keys::DISCORD_OAUTH_SIGNUP_ENABLED,
            client_id: keys::DISCORD_OAUTH_CLIENT_ID,
            client_secret: keys::DISCORD_OAUTH_CLIENT_SECRET,
        }),
        AuthType::Patreon => Some(ProviderKeys {
            enabled: keys::PATREON_OAUTH_ENABLED,
            signup_enabled: keys::PATREON_OAUTH_SIGNUP_ENABLED,
            client_id: keys::PATREON_OAUTH_CLIENT_ID,
            client_secret: keys::PATREON_OAUTH_CLIENT_SECRET,
        }),
    }
}

/// Snapshot of every policy key, stored or defaulted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SiteConfig(BTreeMap<String, CfgValue>);

impl SiteConfig {
    pub fn get(&self, key: &str) -> Option<&CfgValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CfgValue)> {
        self.0.iter()
    }
}

/// Parse a submitted form value into the type of `default`.
fn parse_form_value(raw: &str, default: DefaultValue) -> std::result::Result<CfgValue, String> {
    let raw = raw.trim();
    match default {
        DefaultValue::Str(_) => Ok(CfgValue::String(raw.to_string())),
        DefaultValue::Int(_) => raw
            .parse::<i64>()
            .map(CfgValue::Int)
            .map_err(|_| format!("{raw:?} is not a whole number")),
        DefaultValue::Bool(_) => match raw.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" | "yes" => Ok(CfgValue::Bool(true)),
            "false" | "off" | "0" | "no" | "" => Ok(CfgValue::Bool(false)),
            _ => Err(format!("{raw:?} is not true or false")),
        },
    }
}

/// Typed front to the config store
#[derive(Clone)]
pub struct Settings {
    db: Arc<dyn DataConnector>,
}

impl Settings {
    pub fn new(db: Arc<dyn DataConnector>) -> Self {
        Self { db }
    }

    /// Stored string, or `default` when the key is absent.
    ///
    /// # Errors
    /// `ConfigType` when the key holds another type.
    pub async fn get_string(&self, key: &str, default: &str) -> Result<String> {
        match self.db.get_cfg_string(key).await {
            Err(e) if e.is_no_value() => Ok(default.to_string()),
            other => other,
        }
    }

    /// Stored int, or `default` when the key is absent.
    pub async fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        match self.db.get_cfg_int(key).await {
            Err(e) if e.is_no_value() => Ok(default),
            other => other,
        }
    }

    /// Stored bool, or `default` when the key is absent.
    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.db.get_cfg_bool(key).await {
            Err(e) if e.is_no_value() => Ok(default),
            other => other,
        }
    }

    /// String policy key with its table default
    pub async fn string(&self, key: &str) -> Result<String> {
        match default_for(key) {
            Some(DefaultValue::Str(default)) => self.get_string(key, default).await,
            _ => self.get_string(key, "").await,
        }
    }

    /// Int policy key with its table default
    pub async fn int(&self, key: &str) -> Result<i64> {
        match default_for(key) {
            Some(DefaultValue::Int(default)) => self.get_int(key, default).await,
            _ => self.get_int(key, 0).await,
        }
    }

    /// Bool policy key with its table default
    pub async fn flag(&self, key: &str) -> Result<bool> {
        match default_for(key) {
            Some(DefaultValue::Bool(default)) => self.get_bool(key, default).await,
            _ => self.get_bool(key, false).await,
        }
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.db.set_cfg_string(key, value).await
    }

    pub async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.db.set_cfg_int(key, value).await
    }

    pub async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.db.set_cfg_bool(key, value).await
    }

    /// Read a process secret, generating and storing it on first use.
    ///
    /// # Errors
    /// Returns error if the stored value is not a string or the store fails
    pub async fn secret(&self, key: &str, length: usize) -> Result<String> {
        match self.db.get_cfg_string(key).await {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) => self.seed_secret(key, length).await,
            Err(e) if e.is_no_value() => self.seed_secret(key, length).await,
            Err(e) => Err(e),
        }
    }

    async fn seed_secret(&self, key: &str, length: usize) -> Result<String> {
        let value = random_token(length);
        self.db.set_cfg_string(key, &value).await?;
        tracing::info!(key, "Generated process secret");
        Ok(value)
    }

    /// Salt used for every password hash
    pub async fn password_salt(&self) -> Result<String> {
        self.secret(keys::PASS_SALT, PASS_SALT_LENGTH).await
    }

    /// Current value of every policy key
    pub async fn site_config(&self) -> Result<SiteConfig> {
        let mut values = BTreeMap::new();
        for (key, default) in POLICY_KEYS {
            let value = match self.db.get_cfg_value(key).await? {
                Some(value) => value,
                None => default.to_cfg(),
            };
            values.insert((*key).to_string(), value);
        }
        Ok(SiteConfig(values))
    }

    /// Apply submitted `key -> text` pairs.
    ///
    /// Every pair is validated first; when any fails nothing is written.
    ///
    /// # Errors
    /// `Form` with one message per rejected key.
    pub async fn apply_form(&self, form: &BTreeMap<String, String>) -> Result<SiteConfig> {
        let mut errors = FormErrors::new();
        let mut parsed = Vec::with_capacity(form.len());
        for (key, raw) in form {
            let Some(default) = default_for(key) else {
                errors.add(key, "unknown setting");
                continue;
            };
            match parse_form_value(raw, default) {
                Ok(value) => parsed.push((key.as_str(), value)),
                Err(message) => errors.add(key, message),
            }
        }

        for (key, value) in &parsed {
            if let CfgValue::Int(number) = value {
                if *number < 0 {
                    errors.add(key, "must not be negative");
                }
            }
        }
        errors.into_result()?;

        for (key, value) in parsed {
            self.db.set_cfg_value(key, value).await?;
        }
        tracing::debug!(keys = form.len(), "Site configuration written");
        self.site_config().await
    }

    /// Whether the provider may be used to log in
    pub async fn oauth_enabled(&self, auth_type: AuthType) -> Result<bool> {
        match provider_keys(auth_type) {
            Some(keys) => self.flag(keys.enabled).await,
            None => Ok(true),
        }
    }

    /// Whether new accounts may be created through `auth_type`
    pub async fn signup_enabled(&self, auth_type: AuthType) -> Result<bool> {
        match provider_keys(auth_type) {
            Some(keys) => Ok(self.flag(keys.enabled).await? && self.flag(keys.signup_enabled).await?),
            None => self.flag(keys::LOCAL_SIGNUP_ENABLED).await,
        }
    }

    /// Fail with `PolicyDisabled` unless the provider is enabled.
    pub async fn require_oauth(&self, auth_type: AuthType) -> Result<()> {
        if self.oauth_enabled(auth_type).await? {
            Ok(())
        } else {
            Err(AppError::PolicyDisabled(format!(
                "{auth_type} login is not enabled"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DocumentStore;

    async fn settings() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DocumentStore::open(&dir.path().join("data.json"))
            .await
            .unwrap();
        (dir, Settings::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn absent_keys_return_defaults_without_persisting() {
        let (_dir, settings) = settings().await;
        assert_eq!(settings.int(keys::MAX_USER_VOTES).await.unwrap(), 5);
        assert!(settings.flag(keys::FORMFILL_ENABLED).await.unwrap());
        assert_eq!(settings.get_int("Custom", 42).await.unwrap(), 42);

        assert!(
            settings
                .db
                .get_cfg_value(keys::MAX_USER_VOTES)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn cross_type_reads_are_errors() {
        let (_dir, settings) = settings().await;
        settings.set_bool(keys::MAX_USER_VOTES, true).await.unwrap();
        let error = settings.int(keys::MAX_USER_VOTES).await.unwrap_err();
        assert!(matches!(error, AppError::ConfigType { .. }));
    }

    #[tokio::test]
    async fn secrets_are_generated_once() {
        let (_dir, settings) = settings().await;
        let first = settings
            .secret(keys::SESSION_AUTH, SESSION_AUTH_LENGTH)
            .await
            .unwrap();
        assert_eq!(first.len(), SESSION_AUTH_LENGTH);
        assert_eq!(
            settings
                .secret(keys::SESSION_AUTH, SESSION_AUTH_LENGTH)
                .await
                .unwrap(),
            first
        );
        assert_eq!(settings.password_salt().await.unwrap().len(), PASS_SALT_LENGTH);
    }

    #[tokio::test]
    async fn apply_form_is_all_or_nothing() {
        let (_dir, settings) = settings().await;
        let mut form = BTreeMap::new();
        form.insert(keys::MAX_USER_VOTES.to_string(), "3".to_string());
        form.insert(keys::VOTING_ENABLED.to_string(), "maybe".to_string());

        let error = settings.apply_form(&form).await.unwrap_err();
        let AppError::Form(fields) = error else {
            panic!("expected form errors");
        };
        assert!(fields.get(keys::VOTING_ENABLED).is_some());
        assert_eq!(settings.int(keys::MAX_USER_VOTES).await.unwrap(), 5);

        form.insert(keys::VOTING_ENABLED.to_string(), "on".to_string());
        let config = settings.apply_form(&form).await.unwrap();
        assert_eq!(config.get(keys::MAX_USER_VOTES), Some(&CfgValue::Int(3)));
        assert_eq!(config.get(keys::VOTING_ENABLED), Some(&CfgValue::Bool(true)));
    }

    #[tokio::test]
    async fn site_config_hides_process_secrets() {
        let (_dir, settings) = settings().await;
        settings.password_salt().await.unwrap();
        let config = settings.site_config().await.unwrap();
        assert!(config.get(keys::PASS_SALT).is_none());
        assert_eq!(config.iter().count(), POLICY_KEYS.len());
    }

    #[tokio::test]
    async fn oauth_signup_needs_both_flags() {
        let (_dir, settings) = settings().await;
        settings
            .set_bool(keys::DISCORD_OAUTH_SIGNUP_ENABLED, true)
            .await
            .unwrap();
        assert!(!settings.signup_enabled(AuthType::Discord).await.unwrap());

        settings
            .set_bool(keys::DISCORD_OAUTH_ENABLED, true)
            .await
            .unwrap();
        assert!(settings.signup_enabled(AuthType::Discord).await.unwrap());
        assert!(settings.signup_enabled(AuthType::Local).await.unwrap());
    }
}
