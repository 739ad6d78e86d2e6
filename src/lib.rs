//! MoviePolls - a self-hosted, cycle-driven movie voting service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Poll pages, voting, nominations, history                 │
//! │  - Account pages, OAuth callbacks                           │
//! │  - Admin pages, metrics                                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Cycles, votes, nominations, accounts                     │
//! │  - Link and metadata pipeline                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - JSON document store                                      │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `metadata`: Link parsing, Jikan and TMDB lookups, posters
//! - `data`: Persistence contract and its two backends
//! - `settings`: Site policy stored in the data layer
//! - `auth`: Session cookies, OAuth, request extractors
//! - `security`: Password hashing, tokens, single-use URL keys
//! - `config`: Process configuration
//! - `logging`: Logger setup
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod security;
pub mod service;
pub mod settings;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the data layer, session keys and HTTP client.
#[derive(Clone)]
pub struct AppState {
    /// Process configuration
    pub config: Arc<config::AppConfig>,

    /// Data layer backend
    pub db: Arc<dyn data::DataConnector>,

    /// Site policy
    pub settings: settings::Settings,

    /// Session cookie keys
    pub sessions: Arc<auth::SessionKeys>,

    /// Live password reset and admin claim keys
    pub url_keys: security::UrlKeys,

    /// Open OAuth authorizations
    pub oauth_states: auth::OAuthStates,

    /// OAuth token and identity requests
    pub oauth: auth::OAuthClient,

    /// Poster files
    pub posters: metadata::PosterStore,

    pub accounts: Arc<service::AccountService>,
    pub cycles: Arc<service::CycleService>,
    pub voting: Arc<service::VotingService>,
    pub nominations: Arc<service::NominationService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to the configured data backend
    /// 2. Load or generate the session keys
    /// 3. Build the HTTP client and services
    /// 4. Print the admin claim URL when no admin exists
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let http_client = Self::http_client(&config)?;
        let metadata = Arc::new(metadata::HttpMetadataSource::new(http_client.clone()));
        Self::with_metadata_source(config, metadata).await
    }

    /// Like [`AppState::new`], with another metadata source.
    pub async fn with_metadata_source(
        config: config::AppConfig,
        metadata: Arc<dyn metadata::MetadataSource>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::connect(&config.database).await?;
        let settings = settings::Settings::new(db.clone());
        let sessions = Arc::new(auth::SessionKeys::load(&settings).await?);
        tracing::info!("Session keys loaded");

        let http_client = Self::http_client(&config)?;
        let url_keys = security::UrlKeys::new();
        let posters = metadata::PosterStore::new(&config.storage.posters_dir, http_client.clone());

        let accounts = Arc::new(service::AccountService::new(
            db.clone(),
            settings.clone(),
            url_keys.clone(),
        ));
        let cycles = Arc::new(service::CycleService::new(
            db.clone(),
            settings.clone(),
            config.cycles.vote_decay,
        ));
        let voting = Arc::new(service::VotingService::new(db.clone(), settings.clone()));
        let nominations = Arc::new(service::NominationService::new(
            db.clone(),
            settings.clone(),
            metadata,
            posters.clone(),
        ));

        if cycles.current().await?.is_none() {
            tracing::warn!("No cycle is open; start one from /admin/cycles");
        }
        accounts.bootstrap_admin().await?;

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            settings,
            sessions,
            url_keys,
            oauth_states: auth::OAuthStates::default(),
            oauth: auth::OAuthClient::new(http_client),
            posters,
            accounts,
            cycles,
            voting,
            nominations,
        })
    }

    fn http_client(config: &config::AppConfig) -> Result<reqwest::Client, error::AppError> {
        reqwest::Client::builder()
            .user_agent(concat!("MoviePolls/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.http.timeout_seconds))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer,
        services::{ServeDir, ServeFile},
        trace::TraceLayer,
    };

    let static_dir = state.config.storage.static_dir.clone();
    let posters_dir = state.posters.dir().to_path_buf();

    Router::new()
        .merge(api::polls_router())
        .merge(api::user_router())
        .merge(api::oauth_router())
        .merge(api::admin_router())
        .nest_service("/static", ServeDir::new(&static_dir))
        .nest_service("/posters", ServeDir::new(posters_dir))
        .route_service("/favicon.ico", ServeFile::new(static_dir.join("favicon.ico")))
        .route("/health", axum::routing::get(health_check))
        .merge(api::metrics_router())
        .layer(axum::middleware::from_fn(api::track_http))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
