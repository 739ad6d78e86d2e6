//! OAuth 2.0 authorization code flow for Twitch, Discord and Patreon
//!
//! Handles:
//! - Provider endpoints and scopes
//! - Pending state nonces
//! - Code exchange, token refresh and identity lookup

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::data::AuthType;
use crate::error::{AppError, Result};
use crate::security::random_token;
use crate::service::OAuthGrant;
use crate::settings::{Settings, keys, provider_keys};

const DEFAULT_MAX_STATES: usize = 1000;
const STATE_LENGTH: usize = 32;
const STATE_TTL: Duration = Duration::from_secs(15 * 60);

// =============================================================================
// Providers
// =============================================================================

/// Endpoints of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub user_url: &'static str,
    pub scopes: &'static str,
}

/// Endpoints for an OAuth provider, `None` for LOCAL
pub fn endpoints(auth_type: AuthType) -> Option<ProviderEndpoints> {
    match auth_type {
        AuthType::Local => None,
        AuthType::Twitch => Some(ProviderEndpoints {
            authorize_url: "https://id.twitch.tv/oauth2/authorize",
            token_url: "https://id.twitch.tv/oauth2/token",
            user_url: "https://api.twitch.tv/helix/users",
            scopes: "user:read:email",
        }),
        AuthType::Discord => Some(ProviderEndpoints {
            authorize_url: "https://discord.com/api/oauth2/authorize",
            token_url: "https://discord.com/api/oauth2/token",
            user_url: "https://discord.com/api/users/@me",
            scopes: "email identify",
        }),
        AuthType::Patreon => Some(ProviderEndpoints {
            authorize_url: "https://www.patreon.com/oauth2/authorize",
            token_url: "https://www.patreon.com/api/oauth2/token",
            user_url: "https://www.patreon.com/api/oauth2/v2/identity?fields[user]=email,first_name,full_name,last_name,vanity",
            scopes: "identity identity[email]",
        }),
    }
}

/// Parse the `{provider}` path segment.
pub fn parse_provider(name: &str) -> Result<AuthType> {
    AuthType::parse(name)
        .filter(|auth_type| auth_type.is_oauth())
        .ok_or(AppError::NotFound)
}

/// Client credentials and redirect target for one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub auth_type: AuthType,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ProviderConfig {
    /// Read the provider's settings.
    ///
    /// # Errors
    /// `PolicyDisabled` when the provider is off or not fully configured.
    pub async fn load(settings: &Settings, auth_type: AuthType) -> Result<Self> {
        let keys_for = provider_keys(auth_type).ok_or(AppError::NotFound)?;
        settings.require_oauth(auth_type).await?;

        let client_id = settings.string(keys_for.client_id).await?;
        let client_secret = settings.string(keys_for.client_secret).await?;
        let host = settings.string(keys::HOST_ADDRESS).await?;
        if client_id.is_empty() || client_secret.is_empty() || host.is_empty() {
            return Err(AppError::PolicyDisabled(format!(
                "{auth_type} login is not configured"
            )));
        }

        Ok(Self {
            auth_type,
            client_id,
            client_secret,
            redirect_uri: format!(
                "{}/oauth/{}/callback",
                host.trim_end_matches('/'),
                auth_type.as_str().to_lowercase()
            ),
        })
    }
}

// =============================================================================
// Pending states
// =============================================================================

/// Why an authorization was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingState {
    pub auth_type: AuthType,
    /// Logged-in user linking a new method, `None` for login or signup
    pub link_user: Option<i64>,
    created_at: Instant,
}

/// In-process list of open OAuth states
///
/// Bounded: once full, the oldest state is evicted.
#[derive(Clone)]
pub struct OAuthStates {
    /// state nonce -> pending authorization
    states: Arc<RwLock<HashMap<String, PendingState>>>,
    max_states: usize,
}

impl Default for OAuthStates {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STATES)
    }
}

impl OAuthStates {
    pub fn new(max_states: usize) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            max_states: max_states.max(1),
        }
    }

    fn evict_oldest_locked(states: &mut HashMap<String, PendingState>) {
        if let Some(oldest) = states
            .iter()
            .min_by_key(|(_, pending)| pending.created_at)
            .map(|(state, _)| state.clone())
        {
            states.remove(&oldest);
        }
    }

    /// Remember a new state and return its nonce.
    pub async fn issue(&self, auth_type: AuthType, link_user: Option<i64>) -> String {
        let mut states = self.states.write().await;
        states.retain(|_, pending| pending.created_at.elapsed() < STATE_TTL);
        while states.len() >= self.max_states {
            Self::evict_oldest_locked(&mut states);
        }

        let state = random_token(STATE_LENGTH);
        states.insert(
            state.clone(),
            PendingState {
                auth_type,
                link_user,
                created_at: Instant::now(),
            },
        );
        state
    }

    /// Check and remove a state in one step.
    ///
    /// # Errors
    /// `InvalidInput` for unknown, expired or mismatched states.
    pub async fn consume(&self, state: &str, auth_type: AuthType) -> Result<PendingState> {
        let mut states = self.states.write().await;
        match states.remove(state) {
            Some(pending)
                if pending.auth_type == auth_type && pending.created_at.elapsed() < STATE_TTL =>
            {
                Ok(pending)
            }
            _ => Err(AppError::InvalidInput("invalid OAuth state".to_string())),
        }
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

// =============================================================================
// Provider responses
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Account data returned by a provider's user endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
}

fn json_string(value: &serde_json::Value, field: &str) -> Option<String> {
    match value.get(field)? {
        serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Pull id, display name and email out of a user endpoint response.
pub fn parse_identity(auth_type: AuthType, body: &serde_json::Value) -> Result<ProviderIdentity> {
    let (record, name_fields, email_source): (&serde_json::Value, &[&str], _) = match auth_type {
        AuthType::Twitch => (
            body.get("data").and_then(|data| data.get(0)).unwrap_or(&serde_json::Value::Null),
            &["display_name", "login"],
            None,
        ),
        AuthType::Discord => (body, &["global_name", "username"], None),
        AuthType::Patreon => {
            let data = body.get("data").unwrap_or(&serde_json::Value::Null);
            (
                data,
                &["vanity", "full_name", "first_name"],
                data.get("attributes"),
            )
        }
        AuthType::Local => return Err(AppError::NotFound),
    };

    let id = json_string(record, "id")
        .ok_or_else(|| AppError::InvalidInput(format!("{auth_type} returned no account id")))?;
    let attributes = email_source.unwrap_or(record);
    let name = name_fields
        .iter()
        .find_map(|field| json_string(attributes, field))
        .unwrap_or_default();
    let email = json_string(attributes, "email").unwrap_or_default();

    Ok(ProviderIdentity { id, name, email })
}

// =============================================================================
// Client
// =============================================================================

/// HTTP side of the OAuth flow
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// URL the browser is sent to for authorization
    pub fn authorize_url(&self, provider: &ProviderConfig, state: &str) -> Result<String> {
        let endpoints = endpoints(provider.auth_type).ok_or(AppError::NotFound)?;
        let url = url::Url::parse_with_params(
            endpoints.authorize_url,
            &[
                ("client_id", provider.client_id.as_str()),
                ("redirect_uri", provider.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", endpoints.scopes),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::Internal(e.into()))?;
        Ok(url.into())
    }

    async fn token_request(
        &self,
        provider: &ProviderConfig,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let endpoints = endpoints(provider.auth_type).ok_or(AppError::NotFound)?;
        let mut form = vec![
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self
            .http
            .post(endpoints.token_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn identity(
        &self,
        provider: &ProviderConfig,
        access_token: &str,
    ) -> Result<ProviderIdentity> {
        let endpoints = endpoints(provider.auth_type).ok_or(AppError::NotFound)?;
        let mut request = self.http.get(endpoints.user_url).bearer_auth(access_token);
        if provider.auth_type == AuthType::Twitch {
            request = request.header("Client-Id", provider.client_id.as_str());
        }
        let body: serde_json::Value = request.send().await?.error_for_status()?.json().await?;
        parse_identity(provider.auth_type, &body)
    }

    fn grant(token: TokenResponse, identity: ProviderIdentity) -> OAuthGrant {
        let expires_in = token.expires_in.unwrap_or(0).max(0);
        OAuthGrant {
            ext_id: identity.id,
            name: identity.name,
            email: identity.email,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        }
    }

    /// Exchange a callback code and look up the account behind it.
    pub async fn exchange(&self, provider: &ProviderConfig, code: &str) -> Result<OAuthGrant> {
        let token = self
            .token_request(
                provider,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", provider.redirect_uri.as_str()),
                ],
            )
            .await?;
        let identity = self.identity(provider, &token.access_token).await?;
        Ok(Self::grant(token, identity))
    }

    /// Trade a refresh token for new tokens.
    pub async fn refresh(
        &self,
        provider: &ProviderConfig,
        refresh_token: &str,
    ) -> Result<OAuthGrant> {
        let token = self
            .token_request(
                provider,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ],
            )
            .await?;
        let identity = self.identity(provider, &token.access_token).await?;
        Ok(Self::grant(token, identity))
    }
}
